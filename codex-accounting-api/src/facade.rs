//! `LedgerFacade`: the ingress surface `spec.md` §6 asks the core to expose
//! to HTTP/CLI handlers without owning wire framing. Thin wrapper over
//! `codex_ledger::InMemoryLedger` that records telemetry and exposes the
//! `postJournal`/`finalizeInvoice`/`applyPayment`/`executePayroll`/
//! `reconcileLedger`/`voidTransaction` mutations plus the reporting queries,
//! all keyed off an ambient [`RequestScope`] the caller already resolved.

use std::sync::Arc;

use chrono::NaiveDate;
use codex_audit_log::AuditLogFilter;
use codex_audit_log::AuditRecord;
use codex_idempotency::Operation;
use codex_ledger::AccountingPeriod;
use codex_ledger::BalanceSheet;
use codex_ledger::InMemoryLedger;
use codex_ledger::LedgerResult;
use codex_ledger::PeriodId;
use codex_ledger::PostingRequest;
use codex_ledger::ProfitAndLoss;
use codex_ledger::ScopedRepository;
use codex_ledger::TransactionId;
use codex_ledger::TransactionWithLines;
use codex_ledger::TrialBalance;
use codex_request_scope::RequestScope;

use crate::telemetry::PeriodLockAction;
use crate::AccountingTelemetry;

#[derive(Clone)]
pub struct LedgerFacade {
    ledger: Arc<InMemoryLedger>,
    telemetry: Option<Arc<AccountingTelemetry>>,
}

impl LedgerFacade {
    #[must_use]
    pub fn new(ledger: Arc<InMemoryLedger>) -> Self {
        Self::with_telemetry(ledger, None)
    }

    #[must_use]
    pub fn with_telemetry(ledger: Arc<InMemoryLedger>, telemetry: Option<Arc<AccountingTelemetry>>) -> Self {
        Self { ledger, telemetry }
    }

    /// `postJournal(request, scope, idempotencyKey?)` (`spec.md` §6). The
    /// idempotency key already lives on `request.header.idempotency_key`;
    /// a missing key surfaces `IdempotencyKeyRequired` from the engine.
    pub async fn post_journal(
        &self,
        scope: &RequestScope,
        request: PostingRequest,
    ) -> LedgerResult<TransactionWithLines> {
        let outcome = self.ledger.post_journal(scope, Operation::PostJournal, request).await?;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_posting(outcome.replayed);
        }
        Ok(outcome.transaction)
    }

    /// `finalizeInvoice(invoiceId, targetStatus, scope, idempotencyKey)`
    /// (`spec.md` §6): invoice lifecycle lives outside this core's scope
    /// (§1 Non-goals), so the caller supplies the journal entry its invoice
    /// subsystem wants booked and this posts it under the `FinalizeInvoice`
    /// idempotency namespace.
    pub async fn finalize_invoice(
        &self,
        scope: &RequestScope,
        request: PostingRequest,
    ) -> LedgerResult<TransactionWithLines> {
        let outcome = self
            .ledger
            .post_journal(scope, Operation::FinalizeInvoice, request)
            .await?;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_posting(outcome.replayed);
        }
        Ok(outcome.transaction)
    }

    /// `applyPayment(paymentRequest, scope, idempotencyKey)` (`spec.md` §6).
    pub async fn apply_payment(
        &self,
        scope: &RequestScope,
        request: PostingRequest,
    ) -> LedgerResult<TransactionWithLines> {
        let outcome = self.ledger.post_journal(scope, Operation::ApplyPayment, request).await?;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_posting(outcome.replayed);
        }
        Ok(outcome.transaction)
    }

    /// `executePayroll(payRunId, targetStatus, scope, idempotencyKey)`
    /// (`spec.md` §6).
    pub async fn execute_payroll(
        &self,
        scope: &RequestScope,
        request: PostingRequest,
    ) -> LedgerResult<TransactionWithLines> {
        let outcome = self
            .ledger
            .post_journal(scope, Operation::ExecutePayroll, request)
            .await?;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_posting(outcome.replayed);
        }
        Ok(outcome.transaction)
    }

    /// `reconcileLedger(bankTxId, matchedTxId, scope, idempotencyKey)`
    /// (`spec.md` §6): books the reconciling journal entry (e.g. a
    /// write-off) that `codex-reconcile`'s match decision produced.
    pub async fn reconcile_ledger(
        &self,
        scope: &RequestScope,
        request: PostingRequest,
    ) -> LedgerResult<TransactionWithLines> {
        let outcome = self
            .ledger
            .post_journal(scope, Operation::ReconcileLedger, request)
            .await?;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_posting(outcome.replayed);
        }
        Ok(outcome.transaction)
    }

    /// `voidTransaction(txId, reason, scope)` (`spec.md` §6): not an
    /// idempotent entry point by contract, since it is driven by a
    /// transaction id rather than a client-supplied key.
    pub async fn void_transaction(
        &self,
        scope: &RequestScope,
        transaction_id: &TransactionId,
        reason: &str,
        actor: &str,
    ) -> LedgerResult<TransactionWithLines> {
        let reversal = self.ledger.void_transaction(scope, transaction_id, reason, actor).await?;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_void();
        }
        Ok(reversal)
    }

    pub async fn lock_period(
        &self,
        scope: &RequestScope,
        period_id: &PeriodId,
        actor: &str,
        reason: &str,
    ) -> LedgerResult<AccountingPeriod> {
        let period = self.ledger.lock_period(scope, period_id, actor, reason).await?;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_period_lock(PeriodLockAction::Lock);
        }
        Ok(period)
    }

    pub async fn unlock_period(
        &self,
        scope: &RequestScope,
        period_id: &PeriodId,
        actor: &str,
        reason: &str,
    ) -> LedgerResult<AccountingPeriod> {
        let period = self.ledger.unlock_period(scope, period_id, actor, reason).await?;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_period_lock(PeriodLockAction::Unlock);
        }
        Ok(period)
    }

    pub async fn get_transaction(
        &self,
        scope: &RequestScope,
        transaction_id: &TransactionId,
    ) -> LedgerResult<TransactionWithLines> {
        self.ledger.get_transaction_with_lines(scope, transaction_id).await
    }

    /// `trialBalance` query (`spec.md` §6): every posted line on or before
    /// `as_of`.
    pub async fn trial_balance(&self, scope: &RequestScope, as_of: NaiveDate) -> LedgerResult<TrialBalance> {
        let company_id = scope.require_company_id()?.clone();
        let accounts = self.ledger.list_accounts(scope).await?;
        let from = NaiveDate::MIN;
        let lines = self.ledger.list_posted_lines_in_range(scope, from, as_of).await?;
        Ok(codex_ledger::trial_balance(&company_id, as_of, &accounts, &lines))
    }

    /// `profitAndLoss` query (`spec.md` §6): revenue and expense moved in
    /// `[from, to]`.
    pub async fn profit_and_loss(
        &self,
        scope: &RequestScope,
        from: NaiveDate,
        to: NaiveDate,
    ) -> LedgerResult<ProfitAndLoss> {
        let company_id = scope.require_company_id()?.clone();
        let accounts = self.ledger.list_accounts(scope).await?;
        let lines = self.ledger.list_posted_lines_in_range(scope, from, to).await?;
        Ok(codex_ledger::profit_and_loss(&company_id, from, to, &accounts, &lines))
    }

    /// `balanceSheet` query (`spec.md` §6): asset/liability/equity balances
    /// on or before `as_of`.
    pub async fn balance_sheet(&self, scope: &RequestScope, as_of: NaiveDate) -> LedgerResult<BalanceSheet> {
        let company_id = scope.require_company_id()?.clone();
        let accounts = self.ledger.list_accounts(scope).await?;
        let from = NaiveDate::MIN;
        let lines = self.ledger.list_posted_lines_in_range(scope, from, as_of).await?;
        Ok(codex_ledger::balance_sheet(&company_id, as_of, &accounts, &lines))
    }

    /// `cashFlow` query (`spec.md` §6): the indirect-method proxy this core
    /// can derive without a dedicated cash-flow statement subsystem — the
    /// net change across every asset account flagged as a cash equivalent,
    /// over `[from, to]`.
    pub async fn cash_flow(
        &self,
        scope: &RequestScope,
        cash_account_codes: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> LedgerResult<i64> {
        let accounts = self.ledger.list_accounts(scope).await?;
        let lines = self.ledger.list_posted_lines_in_range(scope, from, to).await?;
        let cash_account_ids: std::collections::HashSet<_> = accounts
            .iter()
            .filter(|account| cash_account_codes.iter().any(|code| code == &account.code))
            .map(|account| account.id.clone())
            .collect();
        let net: i64 = lines
            .iter()
            .filter(|line| cash_account_ids.contains(&line.account_id))
            .map(|line| line.debit_minor as i64 - line.credit_minor as i64)
            .sum();
        Ok(net)
    }

    pub async fn list_audit_trail(
        &self,
        scope: &RequestScope,
        entity_id: Option<String>,
        limit: Option<usize>,
    ) -> LedgerResult<Vec<AuditRecord>> {
        let company_id = scope.require_company_id()?.clone();
        let records = self
            .ledger
            .audit_log()
            .records(AuditLogFilter {
                company_id: Some(company_id),
                entity_id,
                limit,
            })
            .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codex_audit_log::InMemoryAuditLog;
    use codex_idempotency::InMemoryIdempotencyStore;
    use codex_idempotency::PollConfig;
    use codex_ledger::Account;
    use codex_ledger::AccountType;
    use codex_ledger::LedgerConfig;
    use codex_ledger::PostingHeader;
    use codex_ledger::PostingLineInput;
    use codex_ledger::TransactionType;
    use pretty_assertions::assert_eq;

    fn scope(company_id: &str) -> RequestScope {
        RequestScope::tenant("user-1".into(), "tenant-1".into(), company_id.into(), vec!["accountant".into()])
    }

    fn facade() -> LedgerFacade {
        let ledger = Arc::new(InMemoryLedger::new(
            LedgerConfig::default(),
            Arc::new(InMemoryIdempotencyStore::new(PollConfig::default())),
            InMemoryAuditLog::shared(),
        ));
        LedgerFacade::with_telemetry(ledger, Some(Arc::new(AccountingTelemetry::new())))
    }

    async fn seed(facade: &LedgerFacade, scope: &RequestScope, company_id: &str) {
        facade
            .ledger
            .upsert_account(
                scope,
                Account {
                    id: "acc-cash".into(),
                    company_id: company_id.into(),
                    code: "1000".into(),
                    name: "Cash".into(),
                    account_type: AccountType::Asset,
                    subtype: None,
                    parent_id: None,
                    active: true,
                    allow_negative_balance: false,
                },
            )
            .await
            .expect("seed cash");
        facade
            .ledger
            .upsert_account(
                scope,
                Account {
                    id: "acc-revenue".into(),
                    company_id: company_id.into(),
                    code: "4000".into(),
                    name: "Revenue".into(),
                    account_type: AccountType::Revenue,
                    subtype: None,
                    parent_id: None,
                    active: true,
                    allow_negative_balance: false,
                },
            )
            .await
            .expect("seed revenue");
    }

    fn request(company_id: &str, key: &str) -> PostingRequest {
        PostingRequest {
            header: PostingHeader {
                company_id: company_id.into(),
                date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap_or_default(),
                description: "Invoice paid".into(),
                reference: None,
                transaction_type: TransactionType::Standard,
                created_by: "user-1".into(),
                idempotency_key: Some(key.into()),
            },
            lines: vec![
                PostingLineInput {
                    account_id: "acc-cash".into(),
                    debit_minor: 2_000,
                    credit_minor: 0,
                    description: None,
                    dimension_values: Vec::new(),
                },
                PostingLineInput {
                    account_id: "acc-revenue".into(),
                    debit_minor: 0,
                    credit_minor: 2_000,
                    description: None,
                    dimension_values: Vec::new(),
                },
            ],
        }
    }

    #[tokio::test]
    async fn post_journal_records_telemetry_and_audit_trail() {
        let facade = facade();
        let scope = scope("co_demo");
        seed(&facade, &scope, "co_demo").await;

        facade
            .post_journal(&scope, request("co_demo", "k1"))
            .await
            .expect("post succeeds");

        let counters = facade.telemetry.as_ref().expect("telemetry present").snapshot();
        assert_eq!(counters.postings_total, 1);
        assert_eq!(counters.postings_replayed, 0);

        let trail = facade
            .list_audit_trail(&scope, None, None)
            .await
            .expect("audit trail readable");
        assert!(trail.iter().any(|record| record.action == "transaction.posted"));
    }

    #[tokio::test]
    async fn finalize_invoice_and_apply_payment_use_distinct_idempotency_namespaces() {
        let facade = facade();
        let scope = scope("co_demo");
        seed(&facade, &scope, "co_demo").await;

        let invoice = facade
            .finalize_invoice(&scope, request("co_demo", "shared-key"))
            .await
            .expect("finalize invoice succeeds");
        let payment = facade
            .apply_payment(&scope, request("co_demo", "shared-key"))
            .await
            .expect("apply payment succeeds despite the same key string");

        assert_ne!(invoice.transaction.id, payment.transaction.id);
    }

    #[tokio::test]
    async fn reporting_queries_reflect_posted_activity() {
        let facade = facade();
        let scope = scope("co_demo");
        seed(&facade, &scope, "co_demo").await;
        facade
            .post_journal(&scope, request("co_demo", "k2"))
            .await
            .expect("post succeeds");

        let as_of = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or_default();
        let tb = facade.trial_balance(&scope, as_of).await.expect("trial balance");
        assert!(tb.is_balanced());

        let sheet = facade.balance_sheet(&scope, as_of).await.expect("balance sheet");
        assert_eq!(sheet.total_assets_minor, 2_000);

        let cash_flow = facade
            .cash_flow(&scope, &["1000".to_string()], NaiveDate::MIN, as_of)
            .await
            .expect("cash flow");
        assert_eq!(cash_flow, 2_000);
    }

    #[tokio::test]
    async fn void_transaction_records_telemetry() {
        let facade = facade();
        let scope = scope("co_demo");
        seed(&facade, &scope, "co_demo").await;
        let posted = facade
            .post_journal(&scope, request("co_demo", "k3"))
            .await
            .expect("post succeeds");

        facade
            .void_transaction(&scope, &posted.transaction.id, "duplicate", "controller-1")
            .await
            .expect("void succeeds");

        let counters = facade.telemetry.as_ref().expect("telemetry present").snapshot();
        assert_eq!(counters.voids_total, 1);
    }
}
