use codex_ledger::LedgerError;

/// HTTP-equivalent status family a `LedgerError` maps to (`spec.md` §7:
/// "handlers map kinds to HTTP-equivalent statuses"). Wire framing itself is
/// out of scope for this facade, so this stops at the class rather than a
/// literal status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    ServiceUnavailable,
    Internal,
}

/// Maps a `LedgerError`'s stable `kind()` to the status class a handler
/// should answer with, per §7: "validation/integrity → 4xx, scope → 403,
/// not-found → 404, idempotency conflict → 409, concurrency → 503 with
/// retry hint, storage → 500."
#[must_use]
pub fn status_class_for(error: &LedgerError) -> StatusClass {
    match error.kind() {
        "NotFound" => StatusClass::NotFound,
        "ScopeMissing" | "CrossTenant" | "Unauthorized" => StatusClass::Forbidden,
        "PeriodLocked" | "ImmutabilityViolation" | "IdempotencyConflict" | "Conflict" => {
            StatusClass::Conflict
        }
        "Busy" => StatusClass::ServiceUnavailable,
        "Storage" => StatusClass::Internal,
        _ => StatusClass::BadRequest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_every_kind_to_its_documented_class() {
        assert_eq!(
            status_class_for(&LedgerError::NotFound("account".into())),
            StatusClass::NotFound
        );
        assert_eq!(
            status_class_for(&LedgerError::ScopeMissing),
            StatusClass::Forbidden
        );
        assert_eq!(
            status_class_for(&LedgerError::CrossTenant {
                active: "co_1".into(),
                requested: "co_2".into(),
            }),
            StatusClass::Forbidden
        );
        assert_eq!(
            status_class_for(&LedgerError::Unauthorized("lacks role".into())),
            StatusClass::Forbidden
        );
        assert_eq!(
            status_class_for(&LedgerError::Unbalanced {
                debit_total: 1,
                credit_total: 2,
            }),
            StatusClass::BadRequest
        );
        assert_eq!(
            status_class_for(&LedgerError::PeriodLocked {
                company_id: "co_1".into(),
                date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            }),
            StatusClass::Conflict
        );
        assert_eq!(
            status_class_for(&LedgerError::IdempotencyConflict),
            StatusClass::Conflict
        );
        assert_eq!(status_class_for(&LedgerError::Busy), StatusClass::ServiceUnavailable);
        assert_eq!(
            status_class_for(&LedgerError::Storage("disk full".into())),
            StatusClass::Internal
        );
    }
}
