use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

/// Which direction a period lock transition moved (`spec.md` §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodLockAction {
    Lock,
    Unlock,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryCounters {
    pub postings_total: usize,
    pub postings_replayed: usize,
    pub voids_total: usize,
    pub reconciliation_transactions: usize,
    pub reconciliation_candidates: usize,
    pub reconciliation_write_offs: usize,
    pub period_lock_events: usize,
    pub period_lock_close: usize,
    pub period_lock_reopen: usize,
}

#[derive(Debug)]
struct TelemetryStore {
    path: PathBuf,
}

impl TelemetryStore {
    fn from_env() -> Option<Self> {
        let home = env::var_os("CODEX_HOME")?;
        let mut path = PathBuf::from(home);
        path.push("accounting");
        path.push("telemetry.json");
        Some(Self { path })
    }

    fn read(&self) -> anyhow::Result<Option<TelemetryCounters>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let counters = serde_json::from_slice(&data)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Some(counters))
    }

    fn persist(&self, counters: &TelemetryCounters) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let data =
            serde_json::to_vec_pretty(counters).context("failed to encode telemetry counters")?;
        fs::write(&self.path, data)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TelemetryInner {
    counters: TelemetryCounters,
    store: Option<TelemetryStore>,
}

impl TelemetryInner {
    fn with_store(store: Option<TelemetryStore>) -> Self {
        match store {
            Some(store) => {
                let counters = match store.read() {
                    Ok(Some(existing)) => existing,
                    Ok(None) => TelemetryCounters::default(),
                    Err(err) => {
                        warn!(
                            path = %store.path.display(),
                            error = %err,
                            "failed to load persisted telemetry; continuing with defaults"
                        );
                        TelemetryCounters::default()
                    }
                };
                Self {
                    counters,
                    store: Some(store),
                }
            }
            None => Self::default(),
        }
    }

    fn persist(&self) {
        if let Some(store) = &self.store
            && let Err(err) = store.persist(&self.counters)
        {
            warn!(
                path = %store.path.display(),
                error = %err,
                "failed to persist telemetry counters"
            );
        }
    }
}

/// Process-local telemetry for the accounting API facade (`spec.md` §6):
/// how often postings land fresh versus replay an idempotency key, how
/// often periods lock and unlock, how reconciliation activity moves.
/// Persisted under `$CODEX_HOME/accounting/telemetry.json` when available
/// so counters survive a restart, the same idiom the donor used for its
/// policy-decision counters.
#[derive(Clone, Default)]
pub struct AccountingTelemetry {
    inner: Arc<Mutex<TelemetryInner>>,
}

impl AccountingTelemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::from_store(None)
    }

    #[must_use]
    pub fn persistent_from_env() -> Self {
        Self::from_store(TelemetryStore::from_env())
    }

    #[must_use]
    pub fn with_store_path(path: PathBuf) -> Self {
        Self::from_store(Some(TelemetryStore { path }))
    }

    fn from_store(store: Option<TelemetryStore>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TelemetryInner::with_store(store))),
        }
    }

    fn update<F>(&self, mut updater: F)
    where
        F: FnMut(&mut TelemetryCounters) -> bool,
    {
        if let Ok(mut inner) = self.inner.lock()
            && updater(&mut inner.counters)
        {
            inner.persist();
        }
    }

    pub fn record_posting(&self, replayed: bool) {
        self.update(|counters| {
            counters.postings_total += 1;
            if replayed {
                counters.postings_replayed += 1;
            }
            true
        });
    }

    pub fn record_void(&self) {
        self.update(|counters| {
            counters.voids_total += 1;
            true
        });
    }

    pub fn record_transactions(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.update(|counters| {
            counters.reconciliation_transactions += count;
            true
        });
    }

    pub fn record_candidates(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.update(|counters| {
            counters.reconciliation_candidates += count;
            true
        });
    }

    pub fn record_write_off(&self) {
        self.update(|counters| {
            counters.reconciliation_write_offs += 1;
            true
        });
    }

    pub fn record_period_lock(&self, action: PeriodLockAction) {
        self.update(|counters| {
            counters.period_lock_events += 1;
            match action {
                PeriodLockAction::Lock => counters.period_lock_close += 1,
                PeriodLockAction::Unlock => counters.period_lock_reopen += 1,
            }
            true
        });
    }

    #[must_use]
    pub fn snapshot(&self) -> TelemetryCounters {
        self.inner
            .lock()
            .map(|inner| inner.counters.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn store_path(&self) -> Option<PathBuf> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.store.as_ref().map(|store| store.path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn counters_accumulate() {
        let telemetry = AccountingTelemetry::new();
        telemetry.record_posting(false);
        telemetry.record_posting(true);
        telemetry.record_void();
        telemetry.record_transactions(3);
        telemetry.record_candidates(2);
        telemetry.record_write_off();
        telemetry.record_period_lock(PeriodLockAction::Lock);
        telemetry.record_period_lock(PeriodLockAction::Unlock);
        let counters = telemetry.snapshot();
        assert_eq!(counters.postings_total, 2);
        assert_eq!(counters.postings_replayed, 1);
        assert_eq!(counters.voids_total, 1);
        assert_eq!(counters.reconciliation_transactions, 3);
        assert_eq!(counters.reconciliation_candidates, 2);
        assert_eq!(counters.reconciliation_write_offs, 1);
        assert_eq!(counters.period_lock_events, 2);
        assert_eq!(counters.period_lock_close, 1);
        assert_eq!(counters.period_lock_reopen, 1);
    }

    #[test]
    fn persistence_survives_restart() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("telemetry.json");
        {
            let telemetry = AccountingTelemetry::with_store_path(path.clone());
            telemetry.record_posting(false);
            telemetry.record_period_lock(PeriodLockAction::Lock);
        }
        let telemetry = AccountingTelemetry::with_store_path(path);
        let counters = telemetry.snapshot();
        assert_eq!(counters.postings_total, 1);
        assert_eq!(counters.period_lock_events, 1);
        assert_eq!(counters.period_lock_close, 1);
    }

    #[test]
    fn persistence_recovers_from_corrupt_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("telemetry.json");
        fs::write(&path, b"not json").expect("write corrupt telemetry");

        let telemetry = AccountingTelemetry::with_store_path(path.clone());
        let counters = telemetry.snapshot();
        assert_eq!(counters.postings_total, 0);
        assert_eq!(counters.period_lock_events, 0);

        telemetry.record_posting(false);
        telemetry.record_period_lock(PeriodLockAction::Lock);

        let reloaded = AccountingTelemetry::with_store_path(path);
        let counters = reloaded.snapshot();
        assert_eq!(counters.postings_total, 1);
        assert_eq!(counters.period_lock_events, 1);

        let stored_path = reloaded.store_path().expect("telemetry path recorded");
        assert!(
            stored_path.ends_with("telemetry.json"),
            "unexpected path: {stored_path:?}"
        );
    }
}
