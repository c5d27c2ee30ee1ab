#![deny(clippy::print_stdout, clippy::print_stderr)]

//! The accounting ingress facade (`spec.md` §6): wraps `codex-ledger`'s
//! `InMemoryLedger` for journal posting/reporting, `codex-reconcile` for
//! bank-to-ledger matching, and `codex-tenancy` for firm/company/user
//! administration, behind one facade crate a handler layer (HTTP/CLI,
//! deliberately out of scope) can depend on without reaching into any
//! single domain crate directly.

pub mod duplicates;
mod facade;
mod reconciliation;
mod status;
mod telemetry;
mod tenancy;

pub use facade::LedgerFacade;
pub use reconciliation::BankTransactionSource;
pub use reconciliation::InMemoryBankTransactionSource;
pub use reconciliation::InMemoryReconciliationSummaryProvider;
pub use reconciliation::NullReconciliationSummaryProvider;
pub use reconciliation::ReconciliationFacade;
pub use reconciliation::ReconciliationSummary;
pub use reconciliation::ReconciliationSummaryProvider;
pub use status::status_class_for;
pub use status::StatusClass;
pub use telemetry::AccountingTelemetry;
pub use telemetry::PeriodLockAction;
pub use telemetry::TelemetryCounters;
pub use tenancy::TenancyFacade;
