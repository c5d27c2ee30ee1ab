#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Idempotency Store: guarantees exactly-once externally observable effect
//! for named mutating operations, keyed by
//! `(scope, operation, idempotencyKey, requestFingerprint)`.
//!
//! Grounded on the donor's `codex-policy::DurablePolicyStore` cache-over-
//! persistence layering (a fast in-memory cache in front of a
//! `PolicyRulePersistence` trait with a feature-gated Postgres stub) and
//! `codex-tenancy`'s unique-constraint-on-insert idiom, generalized here to
//! an async-mutex-guarded map so concurrent `begin` calls race the way two
//! database transactions would race on a unique index.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;

pub type IdempotencyResult<T> = Result<T, IdempotencyError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdempotencyError {
    #[error("idempotency key required")]
    KeyRequired,
    #[error("idempotency key {key} replayed with a different request fingerprint")]
    Conflict { key: String },
    #[error("concurrent request for key {key} did not complete in time")]
    Busy { key: String },
    #[error("storage failure: {0}")]
    Storage(String),
}

/// The closed enum of mutation names the Idempotency Store scopes keys by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    PostJournal,
    ApplyPayment,
    FinalizeInvoice,
    ExecutePayroll,
    ReconcileLedger,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::PostJournal => "postJournal",
            Operation::ApplyPayment => "applyPayment",
            Operation::FinalizeInvoice => "finalizeInvoice",
            Operation::ExecutePayroll => "executePayroll",
            Operation::ReconcileLedger => "reconcileLedger",
        }
    }
}

/// `(scope, operation, key)` — the unique identity of an idempotent
/// mutation attempt. `scope` is a company id or tenant id string; which one
/// applies is a convention of the caller, not enforced here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub scope: String,
    pub operation: Operation,
    pub key: String,
}

impl IdempotencyKey {
    #[must_use]
    pub fn new(scope: impl Into<String>, operation: Operation, key: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            operation,
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum RecordState {
    InFlight,
    Done {
        response_status: u16,
        response_body: serde_json::Value,
    },
}

#[derive(Debug, Clone)]
struct StoredRecord {
    fingerprint: String,
    state: RecordState,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// What `begin` tells the caller to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// No prior attempt exists; the caller should perform the mutation and
    /// call [`IdempotencyStore::finish`] on success.
    Started,
    /// A prior attempt with the same fingerprint already completed; replay
    /// its response verbatim.
    ReplayDone {
        response_status: u16,
        response_body: serde_json::Value,
    },
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Begins (or resumes) an idempotent attempt. See [`BeginOutcome`] for
    /// what the caller should do with the result.
    async fn begin(
        &self,
        key: IdempotencyKey,
        fingerprint: String,
        ttl: Duration,
    ) -> IdempotencyResult<BeginOutcome>;

    /// Finalizes a successful attempt, storing the response for replay.
    async fn finish(
        &self,
        key: &IdempotencyKey,
        response_status: u16,
        response_body: serde_json::Value,
    ) -> IdempotencyResult<()>;

    /// Releases an in-flight marker after a failed attempt, so a retry with
    /// the same key is not stuck polling forever. Deterministic failures
    /// (validation, scope, integrity) are not retried by the Idempotency
    /// Store itself — the caller surfaces the error and the next attempt
    /// with the same key starts fresh.
    async fn abandon(&self, key: &IdempotencyKey) -> IdempotencyResult<()>;

    /// Drops `Done` rows whose `expires_at` has passed. Never purges
    /// `InFlight` rows.
    async fn purge_expired(&self, now: DateTime<Utc>) -> IdempotencyResult<usize>;
}

/// Configures how long a losing concurrent `begin` call polls for the
/// winner's terminal state before giving up with [`IdempotencyError::Busy`].
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(20),
            timeout: Duration::from_millis(500),
        }
    }
}

pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<IdempotencyKey, StoredRecord>>,
    poll: PollConfig,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(PollConfig::default())
    }
}

impl InMemoryIdempotencyStore {
    #[must_use]
    pub fn new(poll: PollConfig) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            poll,
        }
    }

    async fn snapshot(&self, key: &IdempotencyKey) -> Option<StoredRecord> {
        self.records.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn begin(
        &self,
        key: IdempotencyKey,
        fingerprint: String,
        ttl: Duration,
    ) -> IdempotencyResult<BeginOutcome> {
        if key.key.trim().is_empty() {
            return Err(IdempotencyError::KeyRequired);
        }

        {
            let mut guard = self.records.lock().await;
            match guard.get(&key) {
                None => {
                    let now = Utc::now();
                    guard.insert(
                        key,
                        StoredRecord {
                            fingerprint,
                            state: RecordState::InFlight,
                            created_at: now,
                            expires_at: now
                                + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
                        },
                    );
                    return Ok(BeginOutcome::Started);
                }
                Some(existing) => {
                    if let RecordState::Done {
                        response_status,
                        response_body,
                    } = &existing.state
                    {
                        if existing.fingerprint != fingerprint {
                            return Err(IdempotencyError::Conflict { key: key.key });
                        }
                        return Ok(BeginOutcome::ReplayDone {
                            response_status: *response_status,
                            response_body: response_body.clone(),
                        });
                    }
                    if existing.fingerprint != fingerprint {
                        return Err(IdempotencyError::Conflict { key: key.key });
                    }
                    // Same key, same fingerprint, still in flight: fall
                    // through to polling for the winner below.
                }
            }
        }

        // Lost the race: poll briefly for the winner's terminal state.
        let deadline = tokio::time::Instant::now() + self.poll.timeout;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(IdempotencyError::Busy { key: key.key });
            }
            sleep(self.poll.interval).await;
            if let Some(record) = self.snapshot(&key).await
                && let RecordState::Done {
                    response_status,
                    response_body,
                } = record.state
            {
                return Ok(BeginOutcome::ReplayDone {
                    response_status,
                    response_body,
                });
            }
        }
    }

    async fn finish(
        &self,
        key: &IdempotencyKey,
        response_status: u16,
        response_body: serde_json::Value,
    ) -> IdempotencyResult<()> {
        let mut guard = self.records.lock().await;
        let record = guard
            .get_mut(key)
            .ok_or_else(|| IdempotencyError::Storage(format!("no in-flight record for {}", key.key)))?;
        record.state = RecordState::Done {
            response_status,
            response_body,
        };
        Ok(())
    }

    async fn abandon(&self, key: &IdempotencyKey) -> IdempotencyResult<()> {
        self.records.lock().await.remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> IdempotencyResult<usize> {
        let mut guard = self.records.lock().await;
        let before = guard.len();
        guard.retain(|_, record| {
            !matches!(record.state, RecordState::Done { .. }) || record.expires_at > now
        });
        Ok(before - guard.len())
    }
}

#[cfg(feature = "storage")]
pub mod storage {
    //! Honest stub for a durable idempotency backend, mirroring the
    //! donor's `codex-policy::PostgresPolicyStore`: it compiles, implements
    //! the same trait, and always returns a `Storage` error, carrying the
    //! intended schema (`spec.md` §4.8 / §6) as a doc comment rather than a
    //! fabricated driver dependency.
    use super::*;

    /// # Schema Draft
    /// ```sql
    /// CREATE TABLE idempotency_keys (
    ///     scope TEXT NOT NULL,
    ///     operation TEXT NOT NULL,
    ///     key TEXT NOT NULL,
    ///     fingerprint TEXT NOT NULL,
    ///     state TEXT NOT NULL, -- 'inflight' | 'done'
    ///     response_status SMALLINT,
    ///     response_body JSONB,
    ///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    ///     expires_at TIMESTAMPTZ NOT NULL,
    ///     PRIMARY KEY (scope, operation, key)
    /// );
    /// ```
    ///
    /// TODO: add a partial index on `state = 'inflight'` for the loser-poll
    /// query once this backend is implemented.
    pub struct PostgresIdempotencyStore {
        connection_string: String,
    }

    impl PostgresIdempotencyStore {
        #[must_use]
        pub fn new(connection_string: impl Into<String>) -> Self {
            Self {
                connection_string: connection_string.into(),
            }
        }
    }

    #[async_trait]
    impl IdempotencyStore for PostgresIdempotencyStore {
        async fn begin(
            &self,
            key: IdempotencyKey,
            _fingerprint: String,
            _ttl: Duration,
        ) -> IdempotencyResult<BeginOutcome> {
            let _ = (&self.connection_string, &key);
            Err(IdempotencyError::Storage(
                "postgres idempotency store not yet implemented".into(),
            ))
        }

        async fn finish(
            &self,
            _key: &IdempotencyKey,
            _response_status: u16,
            _response_body: serde_json::Value,
        ) -> IdempotencyResult<()> {
            Err(IdempotencyError::Storage(
                "postgres idempotency store not yet implemented".into(),
            ))
        }

        async fn abandon(&self, _key: &IdempotencyKey) -> IdempotencyResult<()> {
            Err(IdempotencyError::Storage(
                "postgres idempotency store not yet implemented".into(),
            ))
        }

        async fn purge_expired(&self, _now: DateTime<Utc>) -> IdempotencyResult<usize> {
            Err(IdempotencyError::Storage(
                "postgres idempotency store not yet implemented".into(),
            ))
        }
    }
}
