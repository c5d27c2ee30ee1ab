//! The in-memory `ScopedRepository` + Posting Engine + Period Lock Manager.
//!
//! Grounded on the donor's `InMemoryLedgerService` (`Mutex<State>` guarding
//! a handful of `HashMap`s, a `record_audit_event` helper, the period lock
//! state machine in `lock_period`/`ensure_period`), generalized to run the
//! `spec.md` §4.3 posting algorithm against an ambient `RequestScope`, to
//! consult `codex_idempotency::IdempotencyStore` before committing, and to
//! append every write through `codex_audit_log::AuditLog`'s hash chain
//! instead of a flat, unchained `Vec<AuditEvent>`.
//!
//! The whole posting critical section runs under one `tokio::sync::Mutex`,
//! which is this in-memory backend's analogue of the serializable
//! isolation `spec.md` §5 asks a real database for: two concurrent
//! postings cannot observe the same period-lock state, the same "next
//! `transaction_number`", or race the balance check. Because the mutex
//! makes that section fully serial, no real serialization conflict is
//! ever observable here, so `LedgerConfig::posting_retry_max` has no
//! effect against this backend — it exists so a durable backend (a real
//! database, retrying on serialization failure per §5) can read the same
//! configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use chrono::Utc;
use codex_audit_log::AppendRequest;
use codex_audit_log::AuditLog;
use codex_idempotency::BeginOutcome;
use codex_idempotency::IdempotencyKey;
use codex_idempotency::IdempotencyStore;
use codex_idempotency::Operation;
use codex_request_scope::RequestScope;
use codex_tenancy::Role;
use uuid::Uuid;

use crate::Account;
use crate::AccountId;
use crate::AccountingPeriod;
use crate::CompanyId;
use crate::LedgerError;
use crate::LedgerResult;
use crate::OutboxRecord;
use crate::OutboxState;
use crate::PeriodLockOverridePolicy;
use crate::PeriodState;
use crate::PostingOutcome;
use crate::PostingRequest;
use crate::ScopedRepository;
use crate::Transaction;
use crate::TransactionLine;
use crate::TransactionStatus;
use crate::TransactionType;
use crate::TransactionWithLines;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub period_lock_override_policy: PeriodLockOverridePolicy,
    pub posting_retry_max: u32,
    pub line_amount_max_minor: u64,
    pub line_count_max_per_txn: usize,
    pub idempotency_ttl: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            period_lock_override_policy: PeriodLockOverridePolicy::AllowReversalsOnly,
            posting_retry_max: 5,
            line_amount_max_minor: 100_000_000_000,
            line_count_max_per_txn: 1_000,
            idempotency_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    account_codes: HashMap<(CompanyId, String), AccountId>,
    periods: HashMap<String, AccountingPeriod>,
    periods_by_company: HashMap<CompanyId, Vec<String>>,
    transactions: HashMap<String, Transaction>,
    lines: HashMap<String, Vec<TransactionLine>>,
    transaction_number_seq: HashMap<CompanyId, u64>,
    balances: HashMap<AccountId, i64>,
    outbox: Vec<OutboxRecord>,
}

pub struct InMemoryLedger {
    state: tokio::sync::Mutex<State>,
    config: LedgerConfig,
    idempotency: Arc<dyn IdempotencyStore>,
    audit_log: Arc<dyn AuditLog>,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new(
        config: LedgerConfig,
        idempotency: Arc<dyn IdempotencyStore>,
        audit_log: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            state: tokio::sync::Mutex::new(State::default()),
            config,
            idempotency,
            audit_log,
        }
    }

    #[must_use]
    pub fn audit_log(&self) -> Arc<dyn AuditLog> {
        self.audit_log.clone()
    }

    fn fingerprint(request: &PostingRequest) -> String {
        use sha2::Digest;
        let canonical = codex_audit_log::canonical::to_canonical_json(request);
        let mut hasher = sha2::Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Steps 5-9 of `spec.md` §4.3: validate every line, check the
    /// double-entry balance, enforce cardinality, and reject any posting
    /// that would drive a non-negative-balance account negative. Returns
    /// the staged lines and the account balance deltas so the caller can
    /// commit them atomically once every check has passed.
    fn validate_and_stage(
        &self,
        state: &State,
        company_id: &CompanyId,
        request: &PostingRequest,
    ) -> LedgerResult<(Vec<TransactionLine>, HashMap<AccountId, i64>)> {
        if request.lines.len() > self.config.line_count_max_per_txn {
            return Err(LedgerError::TooManyLines);
        }
        if request.lines.len() < 2 {
            return Err(LedgerError::TooFewLines);
        }

        let mut staged = Vec::with_capacity(request.lines.len());
        let mut deltas: HashMap<AccountId, i64> = HashMap::new();
        let mut debit_total: u64 = 0;
        let mut credit_total: u64 = 0;

        for (index, input) in request.lines.iter().enumerate() {
            let line_number = (index + 1) as u32;
            if (input.debit_minor > 0) == (input.credit_minor > 0) {
                return Err(LedgerError::LineSignViolation(index));
            }
            if input.debit_minor > self.config.line_amount_max_minor
                || input.credit_minor > self.config.line_amount_max_minor
            {
                return Err(LedgerError::NegativeAmount(index));
            }

            let account = state
                .accounts
                .get(&input.account_id)
                .ok_or_else(|| LedgerError::UnknownAccount(input.account_id.clone()))?;
            if account.company_id != *company_id {
                return Err(LedgerError::UnknownAccount(input.account_id.clone()));
            }

            debit_total += input.debit_minor;
            credit_total += input.credit_minor;

            if matches!(
                account.account_type,
                crate::AccountType::Asset | crate::AccountType::Expense
            ) {
                let delta = input.debit_minor as i64 - input.credit_minor as i64;
                *deltas.entry(account.id.clone()).or_insert(0) += delta;
            }

            staged.push(TransactionLine {
                id: Uuid::new_v4().to_string(),
                transaction_id: String::new(),
                company_id: company_id.clone(),
                account_id: input.account_id.clone(),
                debit_minor: input.debit_minor,
                credit_minor: input.credit_minor,
                description: input.description.clone(),
                dimension_values: input.dimension_values.clone(),
                line_number,
            });
        }

        if debit_total != credit_total {
            return Err(LedgerError::Unbalanced {
                debit_total,
                credit_total,
            });
        }

        for (account_id, delta) in &deltas {
            let Some(account) = state.accounts.get(account_id) else {
                continue;
            };
            if account.allow_negative_balance {
                continue;
            }
            let current = state.balances.get(account_id).copied().unwrap_or(0);
            if current + delta < 0 {
                return Err(LedgerError::NegativeBalance {
                    account_id: account_id.clone(),
                });
            }
        }

        Ok((staged, deltas))
    }

    fn locked_period(state: &State, company_id: &CompanyId, date: NaiveDate) -> Option<AccountingPeriod> {
        state
            .periods_by_company
            .get(company_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.periods.get(id))
            .find(|period| period.state == PeriodState::Closed && period.covers(date))
            .cloned()
    }

    fn next_transaction_number(state: &mut State, company_id: &CompanyId) -> String {
        let counter = state.transaction_number_seq.entry(company_id.clone()).or_insert(0);
        *counter += 1;
        format!("T-{:04}", *counter)
    }

    /// `spec.md` §4.3: the core posting algorithm shared by `postJournal`
    /// and every other idempotent mutation (`finalizeInvoice`,
    /// `applyPayment`, `executePayroll`) that ultimately records a journal
    /// entry — they differ only in `operation`, which scopes the
    /// idempotency key's namespace.
    pub async fn post_journal(
        &self,
        scope: &RequestScope,
        operation: Operation,
        request: PostingRequest,
    ) -> LedgerResult<PostingOutcome> {
        scope.assert_company_scope(&request.header.company_id)?;
        let company_id = request.header.company_id.clone();

        let idempotency_key = request
            .header
            .idempotency_key
            .clone()
            .ok_or(LedgerError::IdempotencyKeyRequired)?;
        let fingerprint = Self::fingerprint(&request);
        let key = IdempotencyKey::new(company_id.clone(), operation, idempotency_key.clone());

        match self
            .idempotency
            .begin(key.clone(), fingerprint.clone(), self.config.idempotency_ttl)
            .await?
        {
            BeginOutcome::ReplayDone { response_body, .. } => {
                let transaction: TransactionWithLines = serde_json::from_value(response_body)
                    .map_err(|err| LedgerError::Storage(err.to_string()))?;
                return Ok(PostingOutcome {
                    transaction,
                    replayed: true,
                });
            }
            BeginOutcome::Started => {}
        }

        match self.commit_posting(scope, &request, &company_id).await {
            Ok(posted) => {
                let body = serde_json::to_value(&posted).map_err(|err| LedgerError::Storage(err.to_string()))?;
                self.idempotency.finish(&key, 201, body).await?;
                Ok(PostingOutcome {
                    transaction: posted,
                    replayed: false,
                })
            }
            Err(err) => {
                self.idempotency.abandon(&key).await?;
                Err(err)
            }
        }
    }

    async fn commit_posting(
        &self,
        scope: &RequestScope,
        request: &PostingRequest,
        company_id: &CompanyId,
    ) -> LedgerResult<TransactionWithLines> {
        let mut state = self.state.lock().await;

        let is_reversal = request.header.transaction_type == TransactionType::Reversal;
        if let Some(period) = Self::locked_period(&state, company_id, request.header.date) {
            let permitted = match self.config.period_lock_override_policy {
                PeriodLockOverridePolicy::Deny => false,
                PeriodLockOverridePolicy::AllowReversalsOnly => is_reversal,
                PeriodLockOverridePolicy::AllowWithAudit => true,
            };
            if !permitted {
                return Err(LedgerError::PeriodLocked {
                    company_id: company_id.clone(),
                    date: request.header.date,
                });
            }
            drop(period);
        }

        let (mut staged_lines, deltas) = self.validate_and_stage(&state, company_id, request)?;

        let transaction_number = Self::next_transaction_number(&mut state, company_id);
        let now = Utc::now();
        let transaction = Transaction {
            id: Uuid::new_v4().to_string(),
            company_id: company_id.clone(),
            transaction_number,
            date: request.header.date,
            description: request.header.description.clone(),
            reference: request.header.reference.clone(),
            transaction_type: request.header.transaction_type,
            status: TransactionStatus::Posted,
            reversed_transaction_id: None,
            idempotency_key: request.header.idempotency_key.clone(),
            created_by: request.header.created_by.clone(),
            created_at: now,
            posted_at: Some(now),
        };

        for line in &mut staged_lines {
            line.transaction_id = transaction.id.clone();
        }
        for (account_id, delta) in &deltas {
            *state.balances.entry(account_id.clone()).or_insert(0) += delta;
        }
        state.transactions.insert(transaction.id.clone(), transaction.clone());
        state.lines.insert(transaction.id.clone(), staged_lines.clone());

        let after = serde_json::json!({
            "transactionNumber": transaction.transaction_number,
            "status": "posted",
            "debitMinor": staged_lines.iter().map(|l| l.debit_minor).sum::<u64>(),
            "creditMinor": staged_lines.iter().map(|l| l.credit_minor).sum::<u64>(),
        });
        self.audit_log
            .append(AppendRequest {
                company_id: Some(company_id.clone()),
                actor_user_id: scope.user_id.clone(),
                action: "transaction.posted".into(),
                entity_type: "transaction".into(),
                entity_id: transaction.id.clone(),
                before: serde_json::Value::Null,
                after,
                correlation_id: Some(scope.request_id.to_string()),
            })
            .await?;

        state.outbox.push(OutboxRecord {
            id: Uuid::new_v4().to_string(),
            transaction_id: transaction.id.clone(),
            event_type: "transaction.posted".into(),
            payload: serde_json::json!({ "transactionId": transaction.id }),
            state: OutboxState::Pending,
            attempts: 0,
        });

        Ok(TransactionWithLines {
            transaction,
            lines: staged_lines,
        })
    }

    /// Voiding by reversal (`spec.md` §4.3): constructs a sign-reversed
    /// twin of `id`'s lines, posts it directly (no idempotency key — the
    /// `voidTransaction` contract in §6 does not take one), and marks the
    /// original `reversed` only once the reversal has committed.
    pub async fn void_transaction(
        &self,
        scope: &RequestScope,
        id: &TransactionId,
        reason: &str,
        actor: &str,
    ) -> LedgerResult<TransactionWithLines> {
        let company_id = scope.require_company_id()?.clone();

        let (original, original_lines) = {
            let state = self.state.lock().await;
            let original = state
                .transactions
                .get(id)
                .cloned()
                .ok_or_else(|| LedgerError::NotFound(format!("transaction {id}")))?;
            if original.company_id != company_id {
                return Err(LedgerError::NotFound(format!("transaction {id}")));
            }
            if original.status != TransactionStatus::Posted {
                return Err(LedgerError::ImmutabilityViolation(
                    "only a posted transaction may be reversed".into(),
                ));
            }
            let lines = state.lines.get(id).cloned().unwrap_or_default();
            (original, lines)
        };

        let reversing_lines: Vec<_> = original_lines
            .iter()
            .map(|line| crate::PostingLineInput {
                account_id: line.account_id.clone(),
                debit_minor: line.credit_minor,
                credit_minor: line.debit_minor,
                description: Some(format!(
                    "Reversal of {}: {reason}",
                    original.transaction_number
                )),
                dimension_values: line.dimension_values.clone(),
            })
            .collect();

        let request = PostingRequest {
            header: crate::PostingHeader {
                company_id: company_id.clone(),
                date: original.date,
                description: format!("Reversal of {}: {reason}", original.transaction_number),
                reference: original.reference.clone(),
                transaction_type: TransactionType::Reversal,
                created_by: actor.to_string(),
                idempotency_key: Some(format!("void:{id}")),
            },
            lines: reversing_lines,
        };

        let posted = self
            .post_journal(scope, Operation::PostJournal, request)
            .await?
            .transaction;

        {
            let mut state = self.state.lock().await;
            if let Some(tx) = state.transactions.get_mut(id) {
                tx.status = TransactionStatus::Reversed;
                tx.reversed_transaction_id = Some(posted.transaction.id.clone());
            }
        }

        self.audit_log
            .append(AppendRequest {
                company_id: Some(company_id),
                actor_user_id: scope.user_id.clone(),
                action: "transaction.reversed".into(),
                entity_type: "transaction".into(),
                entity_id: id.clone(),
                before: serde_json::json!({"status": "posted"}),
                after: serde_json::json!({"status": "reversed", "reversedBy": posted.transaction.id}),
                correlation_id: Some(scope.request_id.to_string()),
            })
            .await?;

        Ok(posted)
    }

    /// Period Lock Manager (`spec.md` §4.5): `lock` closes a period,
    /// checking the actor's privilege and audit-logging the transition; the
    /// rare `unlock` back to open is gated and logged the same way.
    pub async fn lock_period(
        &self,
        scope: &RequestScope,
        period_id: &PeriodId,
        actor: &str,
        reason: &str,
    ) -> LedgerResult<AccountingPeriod> {
        self.set_period_state(scope, period_id, actor, reason, PeriodState::Closed, "period.locked")
            .await
    }

    pub async fn unlock_period(
        &self,
        scope: &RequestScope,
        period_id: &PeriodId,
        actor: &str,
        reason: &str,
    ) -> LedgerResult<AccountingPeriod> {
        self.set_period_state(scope, period_id, actor, reason, PeriodState::Open, "period.unlocked")
            .await
    }

    async fn set_period_state(
        &self,
        scope: &RequestScope,
        period_id: &PeriodId,
        actor: &str,
        reason: &str,
        target: PeriodState,
        action: &str,
    ) -> LedgerResult<AccountingPeriod> {
        if !scope
            .roles
            .iter()
            .filter_map(|role| Role::parse(role))
            .any(Role::can_close_books)
        {
            return Err(LedgerError::Unauthorized(
                "actor lacks a role permitted to lock or unlock periods".into(),
            ));
        }
        let company_id = scope.require_company_id()?.clone();
        let updated = {
            let mut state = self.state.lock().await;
            let period = state
                .periods
                .get_mut(period_id)
                .ok_or_else(|| LedgerError::NotFound(format!("period {period_id}")))?;
            if period.company_id != company_id {
                return Err(LedgerError::NotFound(format!("period {period_id}")));
            }
            period.state = target;
            period.closed_by = matches!(target, PeriodState::Closed).then(|| actor.to_string());
            period.closed_at = matches!(target, PeriodState::Closed).then(Utc::now);
            period.clone()
        };

        self.audit_log
            .append(AppendRequest {
                company_id: Some(company_id),
                actor_user_id: Some(actor.to_string()),
                action: action.into(),
                entity_type: "accounting_period".into(),
                entity_id: period_id.clone(),
                before: serde_json::Value::Null,
                after: serde_json::json!({ "state": format!("{target:?}"), "reason": reason }),
                correlation_id: Some(scope.request_id.to_string()),
            })
            .await?;

        Ok(updated)
    }

    /// `isLocked(companyId, date)` (`spec.md` §4.5).
    pub async fn is_locked(&self, company_id: &CompanyId, date: NaiveDate) -> bool {
        let state = self.state.lock().await;
        Self::locked_period(&state, company_id, date).is_some()
    }

    /// Drains pending outbox rows for post-commit at-least-once dispatch
    /// (`spec.md` §6), marking them dispatched.
    pub async fn drain_outbox(&self) -> Vec<OutboxRecord> {
        let mut state = self.state.lock().await;
        let mut drained = Vec::new();
        for record in &mut state.outbox {
            if record.state == OutboxState::Pending {
                record.state = OutboxState::Dispatched;
                record.attempts += 1;
                drained.push(record.clone());
            }
        }
        drained
    }
}

use crate::PeriodId;
use crate::TransactionId;

#[async_trait::async_trait]
impl ScopedRepository for InMemoryLedger {
    async fn get_account(&self, scope: &RequestScope, id: &AccountId) -> LedgerResult<Account> {
        let company_id = scope.require_company_id()?;
        let state = self.state.lock().await;
        state
            .accounts
            .get(id)
            .filter(|account| &account.company_id == company_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("account {id}")))
    }

    async fn list_accounts(&self, scope: &RequestScope) -> LedgerResult<Vec<Account>> {
        let company_id = scope.require_company_id()?;
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .filter(|account| &account.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn upsert_account(&self, scope: &RequestScope, account: Account) -> LedgerResult<Account> {
        scope.assert_company_scope(&account.company_id)?;
        let mut state = self.state.lock().await;
        if let Some(existing_id) = state
            .account_codes
            .get(&(account.company_id.clone(), account.code.clone()))
            && existing_id != &account.id
        {
            return Err(LedgerError::Conflict(format!(
                "account code {} already exists",
                account.code
            )));
        }
        state
            .account_codes
            .insert((account.company_id.clone(), account.code.clone()), account.id.clone());
        state.accounts.insert(account.id.clone(), account.clone());
        Ok(account)
    }

    async fn create_period(
        &self,
        scope: &RequestScope,
        period: AccountingPeriod,
    ) -> LedgerResult<AccountingPeriod> {
        scope.assert_company_scope(&period.company_id)?;
        let mut state = self.state.lock().await;
        state
            .periods_by_company
            .entry(period.company_id.clone())
            .or_default()
            .push(period.id.clone());
        state.periods.insert(period.id.clone(), period.clone());
        Ok(period)
    }

    async fn list_periods(&self, scope: &RequestScope) -> LedgerResult<Vec<AccountingPeriod>> {
        let company_id = scope.require_company_id()?;
        let state = self.state.lock().await;
        Ok(state
            .periods_by_company
            .get(company_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.periods.get(id))
            .cloned()
            .collect())
    }

    async fn get_transaction_with_lines(
        &self,
        scope: &RequestScope,
        id: &TransactionId,
    ) -> LedgerResult<TransactionWithLines> {
        let company_id = scope.require_company_id()?;
        let state = self.state.lock().await;
        let transaction = state
            .transactions
            .get(id)
            .filter(|txn| &txn.company_id == company_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {id}")))?;
        let lines = state.lines.get(id).cloned().unwrap_or_default();
        Ok(TransactionWithLines { transaction, lines })
    }

    async fn list_posted_lines_in_range(
        &self,
        scope: &RequestScope,
        from: NaiveDate,
        to: NaiveDate,
    ) -> LedgerResult<Vec<TransactionLine>> {
        let company_id = scope.require_company_id()?;
        let state = self.state.lock().await;
        let mut lines = Vec::new();
        for transaction in state.transactions.values() {
            if &transaction.company_id != company_id {
                continue;
            }
            if transaction.date < from || transaction.date > to {
                continue;
            }
            if !matches!(
                transaction.status,
                TransactionStatus::Posted | TransactionStatus::Reversed
            ) {
                continue;
            }
            if let Some(txn_lines) = state.lines.get(&transaction.id) {
                lines.extend(txn_lines.iter().cloned());
            }
        }
        Ok(lines)
    }
}
