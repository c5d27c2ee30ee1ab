//! Read-only reporting projections over posted transaction lines
//! (`spec.md` §4.7): trial balance, profit & loss, and balance sheet. Pure
//! functions over data the caller already fetched through
//! `ScopedRepository::list_posted_lines_in_range`, mirroring the donor's
//! separation between its repository layer and its report-building free
//! functions.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use sha2::Digest;

use crate::Account;
use crate::AccountId;
use crate::AccountType;
use crate::CompanyId;
use crate::NormalSide;
use crate::TransactionLine;

fn integrity_hash<T: Serialize>(value: &T) -> String {
    let canonical = codex_audit_log::canonical::to_canonical_json(value);
    let mut hasher = sha2::Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialBalanceLine {
    pub account_id: AccountId,
    pub account_code: String,
    pub account_name: String,
    pub debit_minor: u64,
    pub credit_minor: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialBalance {
    pub company_id: CompanyId,
    pub as_of: NaiveDate,
    pub lines: Vec<TrialBalanceLine>,
    pub total_debit_minor: u64,
    pub total_credit_minor: u64,
    pub integrity_hash: String,
}

impl TrialBalance {
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.total_debit_minor == self.total_credit_minor
    }
}

/// `spec.md` §4.7: a trial balance sums every posted line touching each
/// account, on or before `as_of`. `lines` must already be scoped to one
/// company and filtered to `date <= as_of` by the caller.
#[must_use]
pub fn trial_balance(
    company_id: &CompanyId,
    as_of: NaiveDate,
    accounts: &[Account],
    lines: &[TransactionLine],
) -> TrialBalance {
    let accounts_by_id: BTreeMap<&AccountId, &Account> =
        accounts.iter().map(|account| (&account.id, account)).collect();

    let mut totals: BTreeMap<AccountId, (u64, u64)> = BTreeMap::new();
    for line in lines {
        let entry = totals.entry(line.account_id.clone()).or_insert((0, 0));
        entry.0 += line.debit_minor;
        entry.1 += line.credit_minor;
    }

    let mut result_lines = Vec::with_capacity(totals.len());
    let mut total_debit_minor = 0;
    let mut total_credit_minor = 0;
    for (account_id, (debit_minor, credit_minor)) in totals {
        let account = accounts_by_id.get(&account_id);
        result_lines.push(TrialBalanceLine {
            account_code: account.map(|a| a.code.clone()).unwrap_or_default(),
            account_name: account.map(|a| a.name.clone()).unwrap_or_default(),
            account_id,
            debit_minor,
            credit_minor,
        });
        total_debit_minor += debit_minor;
        total_credit_minor += credit_minor;
    }

    let mut trial_balance = TrialBalance {
        company_id: company_id.clone(),
        as_of,
        lines: result_lines,
        total_debit_minor,
        total_credit_minor,
        integrity_hash: String::new(),
    };
    trial_balance.integrity_hash = integrity_hash(&trial_balance);
    trial_balance
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfitAndLoss {
    pub company_id: CompanyId,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub revenue_minor: i64,
    pub expense_minor: i64,
    pub net_income_minor: i64,
    pub integrity_hash: String,
}

/// `spec.md` §4.7: revenue and expense moved in `[from, to]`, netted by
/// each account's normal side. `lines` must already be scoped to one
/// company and filtered to that date range by the caller.
#[must_use]
pub fn profit_and_loss(
    company_id: &CompanyId,
    from: NaiveDate,
    to: NaiveDate,
    accounts: &[Account],
    lines: &[TransactionLine],
) -> ProfitAndLoss {
    let accounts_by_id: BTreeMap<&AccountId, &Account> =
        accounts.iter().map(|account| (&account.id, account)).collect();

    let mut revenue_minor: i64 = 0;
    let mut expense_minor: i64 = 0;
    for line in lines {
        let Some(account) = accounts_by_id.get(&line.account_id) else {
            continue;
        };
        let delta = line.credit_minor as i64 - line.debit_minor as i64;
        match account.account_type {
            AccountType::Revenue => revenue_minor += delta,
            AccountType::Expense => expense_minor += -delta,
            _ => {}
        }
    }

    let mut report = ProfitAndLoss {
        company_id: company_id.clone(),
        from,
        to,
        revenue_minor,
        expense_minor,
        net_income_minor: revenue_minor - expense_minor,
        integrity_hash: String::new(),
    };
    report.integrity_hash = integrity_hash(&report);
    report
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceSheetLine {
    pub account_id: AccountId,
    pub account_code: String,
    pub account_name: String,
    pub balance_minor: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceSheet {
    pub company_id: CompanyId,
    pub as_of: NaiveDate,
    pub assets: Vec<BalanceSheetLine>,
    pub liabilities: Vec<BalanceSheetLine>,
    pub equity: Vec<BalanceSheetLine>,
    pub total_assets_minor: i64,
    pub total_liabilities_and_equity_minor: i64,
    pub integrity_hash: String,
}

impl BalanceSheet {
    /// Postcondition (`spec.md` §4.7): `Σassets = Σliabilities + Σequity`.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.total_assets_minor == self.total_liabilities_and_equity_minor
    }
}

/// `spec.md` §4.7: each account's balance on its normal side, on or before
/// `as_of`. `lines` must already be scoped to one company and filtered to
/// `date <= as_of` by the caller.
#[must_use]
pub fn balance_sheet(
    company_id: &CompanyId,
    as_of: NaiveDate,
    accounts: &[Account],
    lines: &[TransactionLine],
) -> BalanceSheet {
    let mut balances: BTreeMap<AccountId, i64> = BTreeMap::new();
    for line in lines {
        let entry = balances.entry(line.account_id.clone()).or_insert(0);
        *entry += line.debit_minor as i64 - line.credit_minor as i64;
    }

    let mut assets = Vec::new();
    let mut liabilities = Vec::new();
    let mut equity = Vec::new();
    let mut total_assets_minor: i64 = 0;
    let mut total_liabilities_and_equity_minor: i64 = 0;

    for account in accounts {
        if account.company_id != *company_id {
            continue;
        }
        let Some(raw) = balances.get(&account.id) else {
            continue;
        };
        let line = BalanceSheetLine {
            account_id: account.id.clone(),
            account_code: account.code.clone(),
            account_name: account.name.clone(),
            balance_minor: match account.account_type.normal_side() {
                NormalSide::Debit => *raw,
                NormalSide::Credit => -*raw,
            },
        };
        match account.account_type {
            AccountType::Asset => {
                total_assets_minor += line.balance_minor;
                assets.push(line);
            }
            AccountType::Liability => {
                total_liabilities_and_equity_minor += line.balance_minor;
                liabilities.push(line);
            }
            AccountType::Equity => {
                total_liabilities_and_equity_minor += line.balance_minor;
                equity.push(line);
            }
            AccountType::Revenue | AccountType::Expense => {}
        }
    }

    let mut sheet = BalanceSheet {
        company_id: company_id.clone(),
        as_of,
        assets,
        liabilities,
        equity,
        total_assets_minor,
        total_liabilities_and_equity_minor,
        integrity_hash: String::new(),
    };
    sheet.integrity_hash = integrity_hash(&sheet);
    sheet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransactionLine;
    use pretty_assertions::assert_eq;

    fn account(id: &str, account_type: AccountType) -> Account {
        Account {
            id: id.into(),
            company_id: "co_1".into(),
            code: id.into(),
            name: id.into(),
            account_type,
            subtype: None,
            parent_id: None,
            active: true,
            allow_negative_balance: false,
        }
    }

    fn line(account_id: &str, debit_minor: u64, credit_minor: u64) -> TransactionLine {
        TransactionLine {
            id: format!("{account_id}-ln"),
            transaction_id: "txn-1".into(),
            company_id: "co_1".into(),
            account_id: account_id.into(),
            debit_minor,
            credit_minor,
            description: None,
            dimension_values: Vec::new(),
            line_number: 1,
        }
    }

    #[test]
    fn balance_sheet_assets_equal_liabilities_plus_equity() {
        let accounts = vec![
            account("cash", AccountType::Asset),
            account("loan", AccountType::Liability),
            account("capital", AccountType::Equity),
        ];
        let lines = vec![line("cash", 10_000, 0), line("loan", 0, 4_000), line("capital", 0, 6_000)];
        let as_of = NaiveDate::from_ymd_opt(2024, 12, 31).expect("valid date");
        let sheet = balance_sheet(&"co_1".to_string(), as_of, &accounts, &lines);
        assert!(sheet.is_balanced());
        assert_eq!(sheet.total_assets_minor, 10_000);
    }

    #[test]
    fn profit_and_loss_nets_revenue_and_expense_by_normal_side() {
        let accounts = vec![account("sales", AccountType::Revenue), account("rent", AccountType::Expense)];
        let lines = vec![line("sales", 0, 5_000), line("rent", 2_000, 0)];
        let from = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");
        let to = NaiveDate::from_ymd_opt(2024, 1, 31).expect("valid date");
        let report = profit_and_loss(&"co_1".to_string(), from, to, &accounts, &lines);
        assert_eq!(report.revenue_minor, 5_000);
        assert_eq!(report.expense_minor, 2_000);
        assert_eq!(report.net_income_minor, 3_000);
    }

    #[test]
    fn trial_balance_totals_match_when_lines_are_balanced() {
        let accounts = vec![account("cash", AccountType::Asset), account("capital", AccountType::Equity)];
        let lines = vec![line("cash", 1_000, 0), line("capital", 0, 1_000)];
        let as_of = NaiveDate::from_ymd_opt(2024, 1, 31).expect("valid date");
        let tb = trial_balance(&"co_1".to_string(), as_of, &accounts, &lines);
        assert!(tb.is_balanced());
        assert_eq!(tb.lines.len(), 2);
    }
}
