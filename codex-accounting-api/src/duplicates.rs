use codex_bank_ingest::NormalizedBankTransaction;
use std::collections::BTreeSet;

/// Collect unique duplicate set labels from transactions, preferring the external reference.
pub fn duplicate_set_labels(transactions: &[NormalizedBankTransaction]) -> Vec<String> {
    let mut labels = BTreeSet::new();
    for tx in transactions {
        if tx.duplicate_metadata.total_occurrences > 1 {
            let label = tx
                .source_reference
                .clone()
                .or_else(|| tx.duplicate_metadata.group_key.clone())
                .unwrap_or_else(|| tx.transaction_id.clone());
            labels.insert(label);
        }
    }
    labels.into_iter().collect()
}
