#![deny(clippy::print_stdout, clippy::print_stderr)]

//! The ledger posting engine and its tenant-isolation substrate: chart of
//! accounts, accounting periods, double-entry journal transactions, period
//! locks, and read-only reporting projections over posted lines.
//!
//! Grounded on the donor's `codex-ledger` crate (same `LedgerError`
//! vocabulary, same `Mutex<State>` in-memory backend idiom, same
//! `record_audit_event` helper), generalized from a single-currency demo
//! ledger keyed by an explicit `TenantContext` parameter into the scoped
//! repository + posting engine + period lock manager described by
//! `spec.md` §4, driven by an ambient [`codex_request_scope::RequestScope`]
//! instead.

mod engine;
mod reporting;

use std::fmt;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use codex_request_scope::RequestScope;
use codex_request_scope::ScopeError;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub use engine::InMemoryLedger;
pub use engine::LedgerConfig;
pub use reporting::balance_sheet;
pub use reporting::profit_and_loss;
pub use reporting::trial_balance;
pub use reporting::BalanceSheet;
pub use reporting::BalanceSheetLine;
pub use reporting::ProfitAndLoss;
pub use reporting::TrialBalance;
pub use reporting::TrialBalanceLine;

pub type CompanyId = String;
pub type AccountId = String;
pub type DimensionId = String;
pub type DimensionValueId = String;
pub type PeriodId = String;
pub type TransactionId = String;
pub type TransactionLineId = String;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Error taxonomy of `spec.md` §7, restricted to the kinds the ledger layer
/// itself can raise (idempotency and scope kinds delegate to their own
/// crates' error types via `From`).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("no active request scope")]
    ScopeMissing,
    #[error("cross-tenant access: active company {active}, requested {requested}")]
    CrossTenant { active: CompanyId, requested: CompanyId },
    #[error("actor lacks required role: {0}")]
    Unauthorized(String),
    #[error("transaction is unbalanced: debits {debit_total} != credits {credit_total}")]
    Unbalanced { debit_total: u64, credit_total: u64 },
    #[error("transaction must have at least two lines")]
    TooFewLines,
    #[error("transaction exceeds the maximum line count")]
    TooManyLines,
    #[error("line {0} must have exactly one of debit or credit set")]
    LineSignViolation(usize),
    #[error("negative amount on line {0}")]
    NegativeAmount(usize),
    #[error("unknown account: {0}")]
    UnknownAccount(String),
    #[error("period locked for company {company_id} on {date}")]
    PeriodLocked { company_id: CompanyId, date: NaiveDate },
    #[error("posting would drive account {account_id} negative")]
    NegativeBalance { account_id: AccountId },
    #[error("immutability violation: {0}")]
    ImmutabilityViolation(String),
    #[error("idempotency key is required")]
    IdempotencyKeyRequired,
    #[error("idempotency key replayed with a different request fingerprint")]
    IdempotencyConflict,
    #[error("concurrent request for the same idempotency key did not complete in time")]
    Busy,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    /// The stable `kind` string carried on every error (`spec.md` §7):
    /// handlers map this to an HTTP-equivalent status without inspecting
    /// the human-readable message, which may change wording over time.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::NotFound(_) => "NotFound",
            LedgerError::ScopeMissing => "ScopeMissing",
            LedgerError::CrossTenant { .. } => "CrossTenant",
            LedgerError::Unauthorized(_) => "Unauthorized",
            LedgerError::Unbalanced { .. } => "Unbalanced",
            LedgerError::TooFewLines => "TooFewLines",
            LedgerError::TooManyLines => "TooManyLines",
            LedgerError::LineSignViolation(_) => "LineSignViolation",
            LedgerError::NegativeAmount(_) => "NegativeAmount",
            LedgerError::UnknownAccount(_) => "UnknownAccount",
            LedgerError::PeriodLocked { .. } => "PeriodLocked",
            LedgerError::NegativeBalance { .. } => "NegativeBalance",
            LedgerError::ImmutabilityViolation(_) => "ImmutabilityViolation",
            LedgerError::IdempotencyKeyRequired => "IdempotencyKeyRequired",
            LedgerError::IdempotencyConflict => "IdempotencyConflict",
            LedgerError::Busy => "Busy",
            LedgerError::Conflict(_) => "Conflict",
            LedgerError::Validation(_) => "Validation",
            LedgerError::Storage(_) => "Storage",
        }
    }
}

impl From<ScopeError> for LedgerError {
    fn from(err: ScopeError) -> Self {
        match err {
            ScopeError::ScopeMissing => LedgerError::ScopeMissing,
            ScopeError::CrossTenant { active, requested } => {
                LedgerError::CrossTenant { active, requested }
            }
            ScopeError::Unauthorized { role } => LedgerError::Unauthorized(role),
        }
    }
}

impl From<codex_idempotency::IdempotencyError> for LedgerError {
    fn from(err: codex_idempotency::IdempotencyError) -> Self {
        use codex_idempotency::IdempotencyError as E;
        match err {
            E::KeyRequired => LedgerError::IdempotencyKeyRequired,
            E::Conflict { .. } => LedgerError::IdempotencyConflict,
            E::Busy { .. } => LedgerError::Busy,
            E::Storage(message) => LedgerError::Storage(message),
        }
    }
}

impl From<codex_audit_log::AuditLogError> for LedgerError {
    fn from(err: codex_audit_log::AuditLogError) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

/// `type∈{asset,liability,equity,revenue,expense}` (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

/// Which side of a transaction line increases an account's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NormalSide {
    Debit,
    Credit,
}

impl AccountType {
    #[must_use]
    pub fn normal_side(self) -> NormalSide {
        match self {
            AccountType::Asset | AccountType::Expense => NormalSide::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Revenue => {
                NormalSide::Credit
            }
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountType::Asset => "asset",
            AccountType::Liability => "liability",
            AccountType::Equity => "equity",
            AccountType::Revenue => "revenue",
            AccountType::Expense => "expense",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub company_id: CompanyId,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub subtype: Option<String>,
    pub parent_id: Option<AccountId>,
    pub active: bool,
    pub allow_negative_balance: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DimensionType {
    Location,
    Department,
    Project,
    Class,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub id: DimensionId,
    pub company_id: CompanyId,
    pub dimension_type: DimensionType,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionValue {
    pub id: DimensionValueId,
    pub dimension_id: DimensionId,
    pub company_id: CompanyId,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeriodState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingPeriod {
    pub id: PeriodId,
    pub company_id: CompanyId,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub period_type: String,
    pub state: PeriodState,
    pub closed_by: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl AccountingPeriod {
    #[must_use]
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Configured response to a reversing posting landing inside a closed
/// period (`spec.md` §6 `period_lock_override_policy`, Open Question 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeriodLockOverridePolicy {
    Deny,
    AllowReversalsOnly,
    AllowWithAudit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionType {
    Standard,
    Reversal,
    Adjustment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionStatus {
    Draft,
    Posted,
    Reversed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub company_id: CompanyId,
    pub transaction_number: String,
    pub date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub reversed_transaction_id: Option<TransactionId>,
    pub idempotency_key: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLine {
    pub id: TransactionLineId,
    pub transaction_id: TransactionId,
    pub company_id: CompanyId,
    pub account_id: AccountId,
    pub debit_minor: u64,
    pub credit_minor: u64,
    pub description: Option<String>,
    pub dimension_values: Vec<DimensionValueId>,
    pub line_number: u32,
}

impl TransactionLine {
    /// Invariant 2 (`spec.md` §3): `debit>0 XOR credit>0`.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let line_index = self.line_number as usize;
        if (self.debit_minor > 0) == (self.credit_minor > 0) {
            return Err(LedgerError::LineSignViolation(line_index));
        }
        Ok(())
    }
}

/// A fully posted transaction with its ordered lines, as returned by
/// `getTransactionWithLines` (`spec.md` §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionWithLines {
    pub transaction: Transaction,
    pub lines: Vec<TransactionLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingLineInput {
    pub account_id: AccountId,
    pub debit_minor: u64,
    pub credit_minor: u64,
    pub description: Option<String>,
    #[serde(default)]
    pub dimension_values: Vec<DimensionValueId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingHeader {
    pub company_id: CompanyId,
    pub date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    #[serde(default = "default_transaction_type")]
    pub transaction_type: TransactionType,
    pub created_by: String,
    pub idempotency_key: Option<String>,
}

fn default_transaction_type() -> TransactionType {
    TransactionType::Standard
}

/// The `PostingRequest` of `spec.md` §4.3: the only input the Posting
/// Engine accepts for a new journal entry. Fingerprinted verbatim, including
/// `header.idempotency_key`, via canonical JSON for the idempotency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRequest {
    pub header: PostingHeader,
    pub lines: Vec<PostingLineInput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutboxState {
    Pending,
    Dispatched,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: String,
    pub transaction_id: TransactionId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub state: OutboxState,
    pub attempts: u32,
}

/// Result of a `postJournal`-shaped call, distinguishing a fresh commit
/// (HTTP `created`) from a replayed idempotent response (HTTP `ok`) per
/// `spec.md` §6.
#[derive(Debug, Clone, PartialEq)]
pub struct PostingOutcome {
    pub transaction: TransactionWithLines,
    pub replayed: bool,
}

/// The only API permitted to talk to ledger storage (`spec.md` §4.2). Every
/// operation enforces `scope` on every row it returns or writes; callers
/// that already hold a `&RequestScope` pass it explicitly rather than
/// relying solely on the task-local, so enforcement survives an executor
/// boundary that drops the task-local.
#[async_trait::async_trait]
pub trait ScopedRepository: Send + Sync {
    async fn get_account(&self, scope: &RequestScope, id: &AccountId) -> LedgerResult<Account>;
    async fn list_accounts(&self, scope: &RequestScope) -> LedgerResult<Vec<Account>>;
    async fn upsert_account(&self, scope: &RequestScope, account: Account) -> LedgerResult<Account>;
    async fn create_period(
        &self,
        scope: &RequestScope,
        period: AccountingPeriod,
    ) -> LedgerResult<AccountingPeriod>;
    async fn list_periods(&self, scope: &RequestScope) -> LedgerResult<Vec<AccountingPeriod>>;
    async fn get_transaction_with_lines(
        &self,
        scope: &RequestScope,
        id: &TransactionId,
    ) -> LedgerResult<TransactionWithLines>;
    async fn list_posted_lines_in_range(
        &self,
        scope: &RequestScope,
        from: NaiveDate,
        to: NaiveDate,
    ) -> LedgerResult<Vec<TransactionLine>>;
}

#[cfg(feature = "storage")]
pub mod storage {
    //! Honest stub for a durable ledger backend, mirroring
    //! `codex_idempotency::storage::PostgresIdempotencyStore`: it compiles,
    //! implements `ScopedRepository`, and always returns a `Storage` error,
    //! carrying the intended schema as a doc comment rather than a
    //! fabricated driver dependency.
    use super::*;

    /// # Schema Draft
    /// ```sql
    /// CREATE TABLE accounts (
    ///     id TEXT PRIMARY KEY,
    ///     company_id TEXT NOT NULL,
    ///     code TEXT NOT NULL,
    ///     name TEXT NOT NULL,
    ///     account_type TEXT NOT NULL,
    ///     UNIQUE (company_id, code)
    /// );
    ///
    /// CREATE TABLE accounting_periods (
    ///     id TEXT PRIMARY KEY,
    ///     company_id TEXT NOT NULL,
    ///     start_date DATE NOT NULL,
    ///     end_date DATE NOT NULL CHECK (end_date >= start_date),
    ///     state TEXT NOT NULL, -- 'open' | 'closed'
    ///     closed_by TEXT,
    ///     closed_at TIMESTAMPTZ
    /// );
    ///
    /// CREATE TABLE transactions (
    ///     id TEXT PRIMARY KEY,
    ///     company_id TEXT NOT NULL,
    ///     transaction_number TEXT NOT NULL,
    ///     status TEXT NOT NULL,
    ///     reversed_transaction_id TEXT REFERENCES transactions (id),
    ///     UNIQUE (company_id, transaction_number)
    /// );
    ///
    /// CREATE TABLE transaction_lines (
    ///     id TEXT PRIMARY KEY,
    ///     transaction_id TEXT NOT NULL REFERENCES transactions (id),
    ///     account_id TEXT NOT NULL REFERENCES accounts (id),
    ///     debit_minor BIGINT NOT NULL CHECK (debit_minor >= 0),
    ///     credit_minor BIGINT NOT NULL CHECK (credit_minor >= 0),
    ///     CHECK ((debit_minor > 0) <> (credit_minor > 0))
    /// );
    ///
    /// -- deferred per-transaction trigger: SUM(debit_minor) = SUM(credit_minor)
    /// -- row-level security: USING (company_id = current_setting('app.company_id'))
    /// ```
    ///
    /// TODO: wire the deferrable balance-verification trigger once this
    /// backend is implemented; the in-memory store enforces it in
    /// `validate_and_stage` instead.
    pub struct PostgresLedgerRepository {
        connection_string: String,
    }

    impl PostgresLedgerRepository {
        #[must_use]
        pub fn new(connection_string: impl Into<String>) -> Self {
            Self {
                connection_string: connection_string.into(),
            }
        }
    }

    #[async_trait::async_trait]
    impl ScopedRepository for PostgresLedgerRepository {
        async fn get_account(&self, _scope: &RequestScope, id: &AccountId) -> LedgerResult<Account> {
            let _ = &self.connection_string;
            Err(LedgerError::Storage(format!(
                "postgres ledger repository not yet implemented (account {id})"
            )))
        }

        async fn list_accounts(&self, _scope: &RequestScope) -> LedgerResult<Vec<Account>> {
            Err(LedgerError::Storage(
                "postgres ledger repository not yet implemented".into(),
            ))
        }

        async fn upsert_account(
            &self,
            _scope: &RequestScope,
            _account: Account,
        ) -> LedgerResult<Account> {
            Err(LedgerError::Storage(
                "postgres ledger repository not yet implemented".into(),
            ))
        }

        async fn create_period(
            &self,
            _scope: &RequestScope,
            _period: AccountingPeriod,
        ) -> LedgerResult<AccountingPeriod> {
            Err(LedgerError::Storage(
                "postgres ledger repository not yet implemented".into(),
            ))
        }

        async fn list_periods(&self, _scope: &RequestScope) -> LedgerResult<Vec<AccountingPeriod>> {
            Err(LedgerError::Storage(
                "postgres ledger repository not yet implemented".into(),
            ))
        }

        async fn get_transaction_with_lines(
            &self,
            _scope: &RequestScope,
            id: &TransactionId,
        ) -> LedgerResult<TransactionWithLines> {
            Err(LedgerError::Storage(format!(
                "postgres ledger repository not yet implemented (transaction {id})"
            )))
        }

        async fn list_posted_lines_in_range(
            &self,
            _scope: &RequestScope,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> LedgerResult<Vec<TransactionLine>> {
            Err(LedgerError::Storage(
                "postgres ledger repository not yet implemented".into(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_side_matches_account_type() {
        assert_eq!(AccountType::Asset.normal_side(), NormalSide::Debit);
        assert_eq!(AccountType::Expense.normal_side(), NormalSide::Debit);
        assert_eq!(AccountType::Liability.normal_side(), NormalSide::Credit);
        assert_eq!(AccountType::Equity.normal_side(), NormalSide::Credit);
        assert_eq!(AccountType::Revenue.normal_side(), NormalSide::Credit);
    }

    #[test]
    fn line_sign_violation_rejects_both_zero_and_both_positive() {
        let mut line = TransactionLine {
            id: "ln-1".into(),
            transaction_id: "txn-1".into(),
            company_id: "co_1".into(),
            account_id: "acc-1".into(),
            debit_minor: 0,
            credit_minor: 0,
            description: None,
            dimension_values: Vec::new(),
            line_number: 1,
        };
        assert!(line.validate().is_err());

        line.debit_minor = 100;
        line.credit_minor = 50;
        assert!(line.validate().is_err());

        line.credit_minor = 0;
        assert!(line.validate().is_ok());
    }

    #[test]
    fn period_covers_inclusive_range() {
        let period = AccountingPeriod {
            id: "per-1".into(),
            company_id: "co_1".into(),
            start: NaiveDate::from_ymd_opt(2024, 10, 1).expect("valid date"),
            end: NaiveDate::from_ymd_opt(2024, 12, 31).expect("valid date"),
            period_type: "quarter".into(),
            state: PeriodState::Closed,
            closed_by: Some("admin".into()),
            closed_at: Some(Utc::now()),
        };
        assert!(period.covers(NaiveDate::from_ymd_opt(2024, 11, 15).expect("valid date")));
        assert!(!period.covers(NaiveDate::from_ymd_opt(2025, 1, 5).expect("valid date")));
    }

    #[test]
    fn error_kind_is_stable() {
        assert_eq!(LedgerError::ScopeMissing.kind(), "ScopeMissing");
        assert_eq!(
            LedgerError::Unbalanced {
                debit_total: 1,
                credit_total: 2
            }
            .kind(),
            "Unbalanced"
        );
    }
}
