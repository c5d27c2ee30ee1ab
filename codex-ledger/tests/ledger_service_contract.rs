//! Contract tests exercising `InMemoryLedger` end to end: balanced posting,
//! the double-entry and line-cardinality rejections, cross-company scope
//! isolation, period locking, void-by-reversal, and idempotent replay under
//! concurrency.

use std::sync::Arc;

use chrono::NaiveDate;
use codex_audit_log::InMemoryAuditLog;
use codex_idempotency::InMemoryIdempotencyStore;
use codex_idempotency::Operation;
use codex_idempotency::PollConfig;
use codex_ledger::Account;
use codex_ledger::AccountType;
use codex_ledger::AccountingPeriod;
use codex_ledger::InMemoryLedger;
use codex_ledger::LedgerConfig;
use codex_ledger::LedgerError;
use codex_ledger::PeriodState;
use codex_ledger::PostingHeader;
use codex_ledger::PostingLineInput;
use codex_ledger::PostingRequest;
use codex_ledger::ScopedRepository;
use codex_request_scope::RequestScope;
use pretty_assertions::assert_eq;

fn scope(company_id: &str) -> RequestScope {
    RequestScope::tenant(
        "user-1".into(),
        "tenant-1".into(),
        company_id.into(),
        vec!["accountant".into()],
    )
}

fn partner_scope(company_id: &str) -> RequestScope {
    RequestScope::tenant(
        "controller-1".into(),
        "tenant-1".into(),
        company_id.into(),
        vec!["partner".into()],
    )
}

fn ledger() -> InMemoryLedger {
    InMemoryLedger::new(
        LedgerConfig::default(),
        Arc::new(InMemoryIdempotencyStore::new(PollConfig::default())),
        InMemoryAuditLog::shared(),
    )
}

async fn seed_accounts(ledger: &InMemoryLedger, scope: &RequestScope, company_id: &str) {
    let cash = Account {
        id: "acc-cash".into(),
        company_id: company_id.into(),
        code: "1000".into(),
        name: "Cash".into(),
        account_type: AccountType::Asset,
        subtype: None,
        parent_id: None,
        active: true,
        allow_negative_balance: false,
    };
    let revenue = Account {
        id: "acc-revenue".into(),
        company_id: company_id.into(),
        code: "4000".into(),
        name: "Service Revenue".into(),
        account_type: AccountType::Revenue,
        subtype: None,
        parent_id: None,
        active: true,
        allow_negative_balance: false,
    };
    ledger.upsert_account(scope, cash).await.expect("seed cash account");
    ledger
        .upsert_account(scope, revenue)
        .await
        .expect("seed revenue account");
}

fn posting_request(company_id: &str, idempotency_key: &str) -> PostingRequest {
    PostingRequest {
        header: PostingHeader {
            company_id: company_id.into(),
            date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap_or_default(),
            description: "Consulting invoice paid in cash".into(),
            reference: Some("INV-100".into()),
            transaction_type: codex_ledger::TransactionType::Standard,
            created_by: "user-1".into(),
            idempotency_key: Some(idempotency_key.into()),
        },
        lines: vec![
            PostingLineInput {
                account_id: "acc-cash".into(),
                debit_minor: 10_000,
                credit_minor: 0,
                description: None,
                dimension_values: Vec::new(),
            },
            PostingLineInput {
                account_id: "acc-revenue".into(),
                debit_minor: 0,
                credit_minor: 10_000,
                description: None,
                dimension_values: Vec::new(),
            },
        ],
    }
}

#[tokio::test]
async fn posts_a_balanced_transaction_and_numbers_it() {
    let ledger = ledger();
    let scope = scope("co_acme");
    seed_accounts(&ledger, &scope, "co_acme").await;

    let outcome = ledger
        .post_journal(&scope, Operation::PostJournal, posting_request("co_acme", "inv-100"))
        .await
        .expect("balanced posting succeeds");

    assert!(!outcome.replayed);
    assert_eq!(outcome.transaction.transaction.transaction_number, "T-0001");
    assert_eq!(outcome.transaction.lines.len(), 2);
    assert_eq!(
        outcome.transaction.lines.iter().map(|l| l.debit_minor).sum::<u64>(),
        outcome.transaction.lines.iter().map(|l| l.credit_minor).sum::<u64>()
    );
}

#[tokio::test]
async fn rejects_an_unbalanced_transaction() {
    let ledger = ledger();
    let scope = scope("co_acme");
    seed_accounts(&ledger, &scope, "co_acme").await;

    let mut request = posting_request("co_acme", "inv-101");
    request.lines[1].credit_minor = 9_000;

    let err = ledger
        .post_journal(&scope, Operation::PostJournal, request)
        .await
        .expect_err("unbalanced posting is rejected");
    assert!(matches!(
        err,
        LedgerError::Unbalanced {
            debit_total: 10_000,
            credit_total: 9_000
        }
    ));
}

#[tokio::test]
async fn rejects_a_single_line_transaction() {
    let ledger = ledger();
    let scope = scope("co_acme");
    seed_accounts(&ledger, &scope, "co_acme").await;

    let mut request = posting_request("co_acme", "inv-102");
    request.lines.truncate(1);

    let err = ledger
        .post_journal(&scope, Operation::PostJournal, request)
        .await
        .expect_err("single-line posting is rejected");
    assert_eq!(err, LedgerError::TooFewLines);
}

#[tokio::test]
async fn cross_company_posting_is_rejected_by_scope() {
    let ledger = ledger();
    let scope_acme = scope("co_acme");
    seed_accounts(&ledger, &scope_acme, "co_acme").await;

    let other_scope = scope("co_globex");
    let err = ledger
        .post_journal(
            &other_scope,
            Operation::PostJournal,
            posting_request("co_acme", "inv-103"),
        )
        .await
        .expect_err("posting into another company's scope is rejected");
    assert!(matches!(err, LedgerError::CrossTenant { .. }));
}

#[tokio::test]
async fn cannot_read_another_companys_account() {
    let ledger = ledger();
    let scope_acme = scope("co_acme");
    seed_accounts(&ledger, &scope_acme, "co_acme").await;

    let scope_globex = scope("co_globex");
    let err = ledger
        .get_account(&scope_globex, &"acc-cash".to_string())
        .await
        .expect_err("account from another company is not visible");
    assert!(matches!(err, LedgerError::NotFound(_)));
}

#[tokio::test]
async fn locked_period_rejects_a_standard_posting() {
    let ledger = ledger();
    let scope = scope("co_acme");
    seed_accounts(&ledger, &scope, "co_acme").await;

    let period = AccountingPeriod {
        id: "per-2024-06".into(),
        company_id: "co_acme".into(),
        start: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap_or_default(),
        end: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap_or_default(),
        period_type: "month".into(),
        state: PeriodState::Open,
        closed_by: None,
        closed_at: None,
    };
    ledger.create_period(&scope, period).await.expect("create period");
    ledger
        .lock_period(
            &partner_scope("co_acme"),
            &"per-2024-06".to_string(),
            "controller-1",
            "month end close",
        )
        .await
        .expect("lock period");

    assert!(
        ledger
            .is_locked(&"co_acme".to_string(), NaiveDate::from_ymd_opt(2024, 6, 15).unwrap_or_default())
            .await
    );

    let err = ledger
        .post_journal(&scope, Operation::PostJournal, posting_request("co_acme", "inv-104"))
        .await
        .expect_err("posting into a locked period is rejected");
    assert!(matches!(err, LedgerError::PeriodLocked { .. }));
}

#[tokio::test]
async fn locking_a_period_requires_a_close_books_role() {
    let ledger = ledger();
    let scope = scope("co_acme");
    seed_accounts(&ledger, &scope, "co_acme").await;

    let period = AccountingPeriod {
        id: "per-2024-06".into(),
        company_id: "co_acme".into(),
        start: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap_or_default(),
        end: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap_or_default(),
        period_type: "month".into(),
        state: PeriodState::Open,
        closed_by: None,
        closed_at: None,
    };
    ledger.create_period(&scope, period).await.expect("create period");

    let err = ledger
        .lock_period(&scope, &"per-2024-06".to_string(), "staff-1", "month end close")
        .await
        .expect_err("an accountant role cannot lock a period");
    assert!(matches!(err, LedgerError::Unauthorized(_)));

    assert!(
        !ledger
            .is_locked(&"co_acme".to_string(), NaiveDate::from_ymd_opt(2024, 6, 15).unwrap_or_default())
            .await
    );

    let err = ledger
        .unlock_period(&scope, &"per-2024-06".to_string(), "staff-1", "reopen for correction")
        .await
        .expect_err("an accountant role cannot unlock a period either");
    assert!(matches!(err, LedgerError::Unauthorized(_)));
}

#[tokio::test]
async fn reversal_is_permitted_into_a_locked_period_under_the_default_policy() {
    let ledger = ledger();
    let scope = scope("co_acme");
    seed_accounts(&ledger, &scope, "co_acme").await;

    let posted = ledger
        .post_journal(&scope, Operation::PostJournal, posting_request("co_acme", "inv-105"))
        .await
        .expect("initial posting succeeds")
        .transaction
        .transaction;

    let period = AccountingPeriod {
        id: "per-2024-06".into(),
        company_id: "co_acme".into(),
        start: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap_or_default(),
        end: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap_or_default(),
        period_type: "month".into(),
        state: PeriodState::Open,
        closed_by: None,
        closed_at: None,
    };
    ledger.create_period(&scope, period).await.expect("create period");
    ledger
        .lock_period(
            &partner_scope("co_acme"),
            &"per-2024-06".to_string(),
            "controller-1",
            "month end close",
        )
        .await
        .expect("lock period");

    let reversal = ledger
        .void_transaction(&scope, &posted.id, "booked to the wrong account", "controller-1")
        .await
        .expect("reversal is permitted under AllowReversalsOnly");

    assert_eq!(
        reversal.transaction.transaction_type,
        codex_ledger::TransactionType::Reversal
    );
    let debit_total: u64 = reversal.lines.iter().map(|l| l.debit_minor).sum();
    let credit_total: u64 = reversal.lines.iter().map(|l| l.credit_minor).sum();
    assert_eq!(debit_total, credit_total);
}

#[tokio::test]
async fn voiding_a_transaction_posts_a_sign_reversed_twin_and_marks_the_original_reversed() {
    let ledger = ledger();
    let scope = scope("co_acme");
    seed_accounts(&ledger, &scope, "co_acme").await;

    let posted = ledger
        .post_journal(&scope, Operation::PostJournal, posting_request("co_acme", "inv-106"))
        .await
        .expect("initial posting succeeds")
        .transaction
        .transaction;

    let reversal = ledger
        .void_transaction(&scope, &posted.id, "duplicate invoice", "controller-1")
        .await
        .expect("void succeeds");

    let original = ledger
        .get_transaction_with_lines(&scope, &posted.id)
        .await
        .expect("original transaction still exists");
    assert_eq!(original.transaction.status, codex_ledger::TransactionStatus::Reversed);
    assert_eq!(
        original.transaction.reversed_transaction_id,
        Some(reversal.transaction.id.clone())
    );

    for (original_line, reversed_line) in original.lines.iter().zip(reversal.lines.iter()) {
        assert_eq!(original_line.debit_minor, reversed_line.credit_minor);
        assert_eq!(original_line.credit_minor, reversed_line.debit_minor);
    }
}

#[tokio::test]
async fn voiding_an_already_reversed_transaction_is_rejected() {
    let ledger = ledger();
    let scope = scope("co_acme");
    seed_accounts(&ledger, &scope, "co_acme").await;

    let posted = ledger
        .post_journal(&scope, Operation::PostJournal, posting_request("co_acme", "inv-107"))
        .await
        .expect("initial posting succeeds")
        .transaction
        .transaction;

    ledger
        .void_transaction(&scope, &posted.id, "first void", "controller-1")
        .await
        .expect("first void succeeds");

    let err = ledger
        .void_transaction(&scope, &posted.id, "second void", "controller-1")
        .await
        .expect_err("a reversed transaction cannot be reversed again");
    assert!(matches!(err, LedgerError::ImmutabilityViolation(_)));
}

#[tokio::test]
async fn replays_an_idempotent_posting_without_double_posting() {
    let ledger = ledger();
    let scope = scope("co_acme");
    seed_accounts(&ledger, &scope, "co_acme").await;

    let first = ledger
        .post_journal(&scope, Operation::PostJournal, posting_request("co_acme", "inv-108"))
        .await
        .expect("first attempt succeeds");
    let second = ledger
        .post_journal(&scope, Operation::PostJournal, posting_request("co_acme", "inv-108"))
        .await
        .expect("replay succeeds");

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.transaction.transaction.id, second.transaction.transaction.id);

    let lines = ledger
        .list_posted_lines_in_range(
            &scope,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or_default(),
        )
        .await
        .expect("list posted lines");
    assert_eq!(lines.len(), 2, "the replayed attempt must not have posted a second time");
}

#[tokio::test]
async fn concurrent_postings_with_the_same_key_settle_on_one_transaction() {
    let ledger = Arc::new(ledger());
    let scope = scope("co_acme");
    seed_accounts(&ledger, &scope, "co_acme").await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let ledger = Arc::clone(&ledger);
        let scope = scope.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .post_journal(&scope, Operation::PostJournal, posting_request("co_acme", "inv-109"))
                .await
        }));
    }

    let mut transaction_ids = Vec::new();
    for handle in handles {
        let outcome = handle.await.expect("task does not panic").expect("posting succeeds");
        transaction_ids.push(outcome.transaction.transaction.id);
    }
    transaction_ids.dedup();
    assert_eq!(transaction_ids.len(), 1, "every racer must observe the same posted transaction");
}

#[tokio::test]
async fn negative_balance_is_rejected_when_not_allowed() {
    let ledger = ledger();
    let scope = scope("co_acme");
    seed_accounts(&ledger, &scope, "co_acme").await;

    let overdraw = PostingRequest {
        header: PostingHeader {
            company_id: "co_acme".into(),
            date: NaiveDate::from_ymd_opt(2024, 6, 20).unwrap_or_default(),
            description: "Refund exceeding cash on hand".into(),
            reference: None,
            transaction_type: codex_ledger::TransactionType::Standard,
            created_by: "user-1".into(),
            idempotency_key: Some("refund-1".into()),
        },
        lines: vec![
            PostingLineInput {
                account_id: "acc-revenue".into(),
                debit_minor: 5_000,
                credit_minor: 0,
                description: None,
                dimension_values: Vec::new(),
            },
            PostingLineInput {
                account_id: "acc-cash".into(),
                debit_minor: 0,
                credit_minor: 5_000,
                description: None,
                dimension_values: Vec::new(),
            },
        ],
    };

    let err = ledger
        .post_journal(&scope, Operation::PostJournal, overdraw)
        .await
        .expect_err("cash has no balance yet so a credit must fail the negative-balance check");
    assert!(matches!(err, LedgerError::NegativeBalance { .. }));
}

#[tokio::test]
async fn trial_balance_and_balance_sheet_reflect_posted_activity() {
    let ledger = ledger();
    let scope = scope("co_acme");
    seed_accounts(&ledger, &scope, "co_acme").await;
    ledger
        .post_journal(&scope, Operation::PostJournal, posting_request("co_acme", "inv-110"))
        .await
        .expect("posting succeeds");

    let accounts = ledger.list_accounts(&scope).await.expect("list accounts");
    let as_of = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or_default();
    let lines = ledger
        .list_posted_lines_in_range(&scope, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(), as_of)
        .await
        .expect("list posted lines");

    let tb = codex_ledger::trial_balance(&"co_acme".to_string(), as_of, &accounts, &lines);
    assert!(tb.is_balanced());

    let sheet = codex_ledger::balance_sheet(&"co_acme".to_string(), as_of, &accounts, &lines);
    assert_eq!(sheet.total_assets_minor, 10_000);
    assert_eq!(sheet.total_liabilities_and_equity_minor, 0);
}
