use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use chrono::DateTime;
use chrono::Utc;
use codex_bank_ingest::NormalizedBankTransaction;
use codex_ledger::CompanyId;
use codex_reconcile::CandidateId;
use codex_reconcile::MatchCandidate;
use codex_reconcile::ReconciliationService;
use codex_reconcile::SessionId;

use crate::AccountingTelemetry;

/// Summary response for reconciliation dashboards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationSummary {
    pub company_id: CompanyId,
    pub matched: usize,
    pub pending: usize,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl ReconciliationSummary {
    #[must_use]
    pub fn coverage_ratio(&self) -> f32 {
        let total = self.matched + self.pending;
        if total == 0 {
            0.0
        } else {
            self.matched as f32 / total as f32
        }
    }
}

/// Trait abstraction so we can plug different reconciliation data sources.
pub trait ReconciliationSummaryProvider: Send + Sync {
    fn summary(&self, company_id: &CompanyId) -> anyhow::Result<ReconciliationSummary>;
}

/// Placeholder implementation until the reconciliation service is wired up.
pub struct NullReconciliationSummaryProvider;

impl ReconciliationSummaryProvider for NullReconciliationSummaryProvider {
    fn summary(&self, company_id: &CompanyId) -> anyhow::Result<ReconciliationSummary> {
        Ok(ReconciliationSummary {
            company_id: company_id.clone(),
            matched: 0,
            pending: 0,
            last_refreshed_at: None,
        })
    }
}

/// In-memory summary provider used by demos and tests.
#[derive(Default)]
pub struct InMemoryReconciliationSummaryProvider {
    summaries: RwLock<HashMap<CompanyId, ReconciliationSummary>>,
}

impl InMemoryReconciliationSummaryProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, summary: ReconciliationSummary) {
        if let Ok(mut guard) = self.summaries.write() {
            guard.insert(summary.company_id.clone(), summary);
        }
    }
}

impl ReconciliationSummaryProvider for InMemoryReconciliationSummaryProvider {
    fn summary(&self, company_id: &CompanyId) -> anyhow::Result<ReconciliationSummary> {
        let guard = self
            .summaries
            .read()
            .map_err(|_| anyhow::anyhow!("reconciliation summary store poisoned"))?;
        guard
            .get(company_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("summary for company {company_id} not found"))
    }
}

/// Abstracts the source of normalized bank transactions.
pub trait BankTransactionSource: Send + Sync {
    fn list_transactions(
        &self,
        company_id: &CompanyId,
    ) -> anyhow::Result<Vec<NormalizedBankTransaction>>;
}

#[derive(Default)]
pub struct InMemoryBankTransactionSource {
    transactions: RwLock<HashMap<CompanyId, Vec<NormalizedBankTransaction>>>,
}

impl InMemoryBankTransactionSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, company_id: &CompanyId, transactions: Vec<NormalizedBankTransaction>) {
        if let Ok(mut guard) = self.transactions.write() {
            guard.insert(company_id.clone(), transactions);
        }
    }
}

impl BankTransactionSource for InMemoryBankTransactionSource {
    fn list_transactions(
        &self,
        company_id: &CompanyId,
    ) -> anyhow::Result<Vec<NormalizedBankTransaction>> {
        let guard = self
            .transactions
            .read()
            .map_err(|_| anyhow::anyhow!("transaction source poisoned"))?;
        Ok(guard.get(company_id).cloned().unwrap_or_default())
    }
}

/// Facade wiring bank transaction ingest with reconciliation state.
#[derive(Clone)]
pub struct ReconciliationFacade {
    transactions: Arc<dyn BankTransactionSource>,
    service: Arc<dyn ReconciliationService>,
    summary: Arc<dyn ReconciliationSummaryProvider>,
    telemetry: Option<Arc<AccountingTelemetry>>,
}

impl ReconciliationFacade {
    pub fn new(
        transactions: Arc<dyn BankTransactionSource>,
        service: Arc<dyn ReconciliationService>,
    ) -> Self {
        Self::with_summary_and_telemetry(
            transactions,
            service,
            Arc::new(NullReconciliationSummaryProvider),
            None,
        )
    }

    pub fn with_summary(
        transactions: Arc<dyn BankTransactionSource>,
        service: Arc<dyn ReconciliationService>,
        summary: Arc<dyn ReconciliationSummaryProvider>,
    ) -> Self {
        Self::with_summary_and_telemetry(transactions, service, summary, None)
    }

    pub fn with_summary_and_telemetry(
        transactions: Arc<dyn BankTransactionSource>,
        service: Arc<dyn ReconciliationService>,
        summary: Arc<dyn ReconciliationSummaryProvider>,
        telemetry: Option<Arc<AccountingTelemetry>>,
    ) -> Self {
        Self {
            transactions,
            service,
            summary,
            telemetry,
        }
    }

    pub fn list_transactions(
        &self,
        company_id: &CompanyId,
    ) -> anyhow::Result<Vec<NormalizedBankTransaction>> {
        let transactions = self.transactions.list_transactions(company_id)?;
        if let Some(telemetry) = self.telemetry.as_ref() {
            telemetry.record_transactions(transactions.len());
        }
        Ok(transactions)
    }

    pub fn list_candidates(&self, session_id: &SessionId) -> anyhow::Result<Vec<MatchCandidate>> {
        let session = self
            .service
            .session(session_id)
            .map_err(|err| anyhow::anyhow!(err))?;
        if let Some(telemetry) = self.telemetry.as_ref() {
            telemetry.record_candidates(session.candidates.len());
        }
        Ok(session.candidates)
    }

    pub fn write_off_candidate(
        &self,
        session_id: &SessionId,
        candidate_id: &CandidateId,
        approval_reference: &str,
    ) -> anyhow::Result<MatchCandidate> {
        if approval_reference.trim().is_empty() {
            anyhow::bail!("approval reference must be provided for write-offs");
        }
        let candidate = self
            .service
            .write_off(session_id, candidate_id, approval_reference.to_string())
            .map_err(|err| anyhow::anyhow!(err))?;
        if let Some(telemetry) = self.telemetry.as_ref() {
            telemetry.record_write_off();
        }
        Ok(candidate)
    }

    pub fn summary(&self, company_id: &CompanyId) -> anyhow::Result<ReconciliationSummary> {
        self.summary.summary(company_id)
    }
}
