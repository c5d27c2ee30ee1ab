#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Append-only, hash-chained audit log, one chain per company scope.
//!
//! Every audit event links to its predecessor within the same company by
//! `eventHash = sha256(previousHash ‖ canonical(event))`, so tampering with
//! any event in a company's history is detectable by replaying the chain.
//! System-level events (no company scope) form their own chain under the
//! reserved `None` key.

pub mod canonical;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type AuditLogResult<T> = Result<T, AuditLogError>;

#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("corrupted chain: {0}")]
    Corrupted(String),
}

/// A request to append one audit event. `company_id` is `None` only for
/// genuinely tenant-less system events; scoped callers always set it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendRequest {
    pub company_id: Option<String>,
    pub actor_user_id: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default)]
    pub before: serde_json::Value,
    #[serde(default)]
    pub after: serde_json::Value,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub company_id: Option<String>,
    pub actor_user_id: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub previous_hash: String,
    pub event_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub company_id: Option<String>,
    pub entity_id: Option<String>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, request: AppendRequest) -> AuditLogResult<AuditRecord>;

    async fn records(&self, filter: AuditLogFilter) -> AuditLogResult<Vec<AuditRecord>>;

    /// Replays a company's chain end to end and confirms every link, for the
    /// disaster-recovery readiness check called out in `spec.md` §4.6.
    async fn verify(&self, company_id: Option<&str>) -> AuditLogResult<()>;
}

/// The reserved chain key for system-scope (tenant-less) events.
const SYSTEM_CHAIN_KEY: &str = "";

fn chain_key(company_id: Option<&str>) -> String {
    company_id.unwrap_or(SYSTEM_CHAIN_KEY).to_string()
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    chains: RwLock<HashMap<String, Vec<AuditRecord>>>,
}

impl InMemoryAuditLog {
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn compute_hash(previous: &str, event: &canonical::CanonicalEvent) -> String {
        let mut hasher = Sha256::new();
        hasher.update(previous.as_bytes());
        hasher.update(canonical::to_canonical_json(event).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn validate_request(request: &AppendRequest) -> AuditLogResult<()> {
        if request.entity_id.trim().is_empty() {
            return Err(AuditLogError::Validation(
                "entity_id must be provided".into(),
            ));
        }
        if request.entity_type.trim().is_empty() {
            return Err(AuditLogError::Validation(
                "entity_type must be provided".into(),
            ));
        }
        if request.action.trim().is_empty() {
            return Err(AuditLogError::Validation("action must be provided".into()));
        }
        Ok(())
    }

    fn verify_records(records: &[AuditRecord]) -> AuditLogResult<()> {
        let mut previous = String::from("genesis");
        for record in records {
            if record.previous_hash != previous {
                return Err(AuditLogError::Corrupted(format!(
                    "unexpected previous hash for {}",
                    record.id
                )));
            }
            let expected = Self::compute_hash(&record.previous_hash, &canonical::CanonicalEvent::from(record));
            if expected != record.event_hash {
                return Err(AuditLogError::Corrupted(format!(
                    "hash mismatch for {}",
                    record.id
                )));
            }
            previous = record.event_hash.clone();
        }
        Ok(())
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, request: AppendRequest) -> AuditLogResult<AuditRecord> {
        Self::validate_request(&request)?;

        let key = chain_key(request.company_id.as_deref());
        let mut guard = self.chains.write().await;
        let chain = guard.entry(key).or_default();
        let previous_hash = chain
            .last()
            .map(|record| record.event_hash.clone())
            .unwrap_or_else(|| "genesis".into());

        let occurred_at = Utc::now();
        let pending = canonical::CanonicalEvent {
            company_id: request.company_id.clone(),
            actor_user_id: request.actor_user_id.clone(),
            action: request.action.clone(),
            entity_type: request.entity_type.clone(),
            entity_id: request.entity_id.clone(),
            before: request.before.clone(),
            after: request.after.clone(),
            occurred_at,
            correlation_id: request.correlation_id.clone(),
        };
        let event_hash = Self::compute_hash(&previous_hash, &pending);

        let record = AuditRecord {
            id: Uuid::new_v4().to_string(),
            company_id: request.company_id,
            actor_user_id: request.actor_user_id,
            action: request.action,
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            before: request.before,
            after: request.after,
            occurred_at,
            correlation_id: request.correlation_id,
            previous_hash,
            event_hash,
        };

        chain.push(record.clone());
        Ok(record)
    }

    async fn records(&self, filter: AuditLogFilter) -> AuditLogResult<Vec<AuditRecord>> {
        let key = chain_key(filter.company_id.as_deref());
        let guard = self.chains.read().await;
        let chain = guard.get(&key).cloned().unwrap_or_default();
        Self::verify_records(&chain)?;

        let mut filtered = chain;
        if let Some(entity_id) = filter.entity_id {
            filtered.retain(|record| record.entity_id == entity_id);
        }
        if let Some(limit) = filter.limit
            && filtered.len() > limit
        {
            filtered.truncate(limit);
        }

        Ok(filtered)
    }

    async fn verify(&self, company_id: Option<&str>) -> AuditLogResult<()> {
        let key = chain_key(company_id);
        let guard = self.chains.read().await;
        let chain = guard.get(&key).cloned().unwrap_or_default();
        Self::verify_records(&chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(company: &str, action: &str) -> AppendRequest {
        AppendRequest {
            company_id: Some(company.into()),
            actor_user_id: Some("user-1".into()),
            action: action.into(),
            entity_type: "transaction".into(),
            entity_id: "txn-1".into(),
            before: serde_json::Value::Null,
            after: serde_json::json!({"status": "posted"}),
            correlation_id: Some("req-1".into()),
        }
    }

    #[tokio::test]
    async fn appends_records_with_hash_chain() {
        let log = InMemoryAuditLog::shared();

        let first = log
            .append(request("co_1", "transaction.posted"))
            .await
            .expect("append record");
        assert_eq!(first.previous_hash, "genesis");
        assert!(!first.event_hash.is_empty());

        let second = log
            .append(request("co_1", "transaction.reversed"))
            .await
            .expect("append record");
        assert_eq!(second.previous_hash, first.event_hash);

        let records = log
            .records(AuditLogFilter {
                company_id: Some("co_1".into()),
                ..Default::default()
            })
            .await
            .expect("records");
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn chains_are_isolated_per_company() {
        let log = InMemoryAuditLog::shared();
        log.append(request("co_1", "transaction.posted"))
            .await
            .expect("append");
        log.append(request("co_2", "transaction.posted"))
            .await
            .expect("append");

        let co1_records = log
            .records(AuditLogFilter {
                company_id: Some("co_1".into()),
                ..Default::default()
            })
            .await
            .expect("records");
        assert_eq!(co1_records.len(), 1);
        // A fresh chain for co_2 must not inherit co_1's previous_hash.
        let co2_records = log
            .records(AuditLogFilter {
                company_id: Some("co_2".into()),
                ..Default::default()
            })
            .await
            .expect("records");
        assert_eq!(co2_records[0].previous_hash, "genesis");
    }

    #[tokio::test]
    async fn detects_tampering() {
        let log = InMemoryAuditLog::shared();

        log.append(request("co_1", "created")).await.expect("append");
        log.append(request("co_1", "updated")).await.expect("append");

        {
            let mut guard = log.chains.write().await;
            let chain = guard.get_mut("co_1").expect("chain exists");
            chain[1].previous_hash = "tampered".into();
        }

        let err = log
            .records(AuditLogFilter {
                company_id: Some("co_1".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuditLogError::Corrupted(_)));
    }

    #[tokio::test]
    async fn verify_succeeds_on_untampered_chain() {
        let log = InMemoryAuditLog::shared();
        log.append(request("co_1", "created")).await.expect("append");
        log.verify(Some("co_1")).await.expect("chain verifies");
    }

    #[tokio::test]
    async fn system_scope_events_form_their_own_chain() {
        let log = InMemoryAuditLog::shared();
        log.append(AppendRequest {
            company_id: None,
            actor_user_id: None,
            action: "system.bootstrap".into(),
            entity_type: "system".into(),
            entity_id: "boot".into(),
            before: serde_json::Value::Null,
            after: serde_json::Value::Null,
            correlation_id: None,
        })
        .await
        .expect("append");
        log.append(request("co_1", "created")).await.expect("append");

        let system_records = log
            .records(AuditLogFilter::default())
            .await
            .expect("records");
        assert_eq!(system_records.len(), 1);
        assert_eq!(system_records[0].entity_id, "boot");
    }
}
