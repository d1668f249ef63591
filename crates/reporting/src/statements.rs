//! Financial statements derived from posted journal entries.
//!
//! Every builder is a pure function of the chart of accounts and the entries
//! handed in; nothing here changes state.

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use coop_accounting::{Account, AccountId, AccountType, JournalEntry};

use crate::period::{as_of_label, range_label};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalanceLine {
    pub account_code: String,
    pub account_name: String,
    pub account_type: AccountType,
    pub debit: Decimal,
    pub credit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalance {
    pub institution_name: String,
    pub period_label: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub lines: Vec<TrialBalanceLine>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub balanced: bool,
}

/// Account code, name and presented amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLine {
    pub account_code: String,
    pub account_name: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeStatement {
    pub institution_name: String,
    pub period_label: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub income: Vec<StatementLine>,
    pub expenses: Vec<StatementLine>,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub net_income: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub institution_name: String,
    pub period_label: String,
    pub as_of_date: NaiveDate,
    pub assets: Vec<StatementLine>,
    pub liabilities: Vec<StatementLine>,
    pub equity: Vec<StatementLine>,
    pub total_assets: Decimal,
    pub total_liabilities: Decimal,
    pub total_equity: Decimal,
}

fn chart_index(accounts: &[Account]) -> HashMap<AccountId, &Account> {
    accounts.iter().map(|a| (a.id, a)).collect()
}

/// Net debit (debit minus credit) per account over the given entries.
fn net_by_account<'a>(
    entries: impl Iterator<Item = &'a JournalEntry>,
) -> HashMap<AccountId, Decimal> {
    let mut net = HashMap::new();
    for entry in entries {
        for line in &entry.lines {
            *net.entry(line.account_id).or_insert(Decimal::ZERO) += line.net_debit();
        }
    }
    net
}

/// Non-zero amounts of one account type, sign-adjusted, sorted by code.
fn lines_of_type(
    chart: &HashMap<AccountId, &Account>,
    net: &HashMap<AccountId, Decimal>,
    account_type: AccountType,
    negate: bool,
) -> Vec<StatementLine> {
    let mut lines: Vec<StatementLine> = net
        .iter()
        .filter_map(|(id, amount)| {
            let account = chart.get(id)?;
            if account.account_type != account_type || amount.is_zero() {
                return None;
            }
            Some(StatementLine {
                account_code: account.code.clone(),
                account_name: account.name.clone(),
                amount: if negate { -*amount } else { *amount },
            })
        })
        .collect();
    lines.sort_by(|a, b| a.account_code.cmp(&b.account_code));
    lines
}

fn total(lines: &[StatementLine]) -> Decimal {
    lines.iter().map(|l| l.amount).sum()
}

fn in_range(entry: &JournalEntry, start: NaiveDate, end: NaiveDate) -> bool {
    entry.entry_date >= start && entry.entry_date <= end
}

/// Debit and credit per account for entries dated within `[start, end]`.
///
/// Lines appear in order of first use.
pub fn trial_balance(
    institution_name: &str,
    accounts: &[Account],
    entries: &[JournalEntry],
    start: NaiveDate,
    end: NaiveDate,
    label: Option<&str>,
) -> TrialBalance {
    let chart = chart_index(accounts);
    let mut position: HashMap<AccountId, usize> = HashMap::new();
    let mut lines: Vec<TrialBalanceLine> = Vec::new();

    for entry in entries.iter().filter(|e| in_range(e, start, end)) {
        for line in &entry.lines {
            let Some(account) = chart.get(&line.account_id) else {
                continue;
            };
            let idx = *position.entry(line.account_id).or_insert_with(|| {
                lines.push(TrialBalanceLine {
                    account_code: account.code.clone(),
                    account_name: account.name.clone(),
                    account_type: account.account_type,
                    debit: Decimal::ZERO,
                    credit: Decimal::ZERO,
                });
                lines.len() - 1
            });
            lines[idx].debit += line.debit;
            lines[idx].credit += line.credit;
        }
    }

    let total_debit: Decimal = lines.iter().map(|l| l.debit).sum();
    let total_credit: Decimal = lines.iter().map(|l| l.credit).sum();

    TrialBalance {
        institution_name: institution_name.to_string(),
        period_label: range_label(label, start, end),
        start_date: start,
        end_date: end,
        lines,
        total_debit,
        total_credit,
        balanced: total_debit == total_credit,
    }
}

/// Income and expense for entries dated within `[start, end]`.
///
/// Both sides are presented positive: income as net credit, expense as net
/// debit. Accounts netting to zero are left out.
pub fn income_statement(
    institution_name: &str,
    accounts: &[Account],
    entries: &[JournalEntry],
    start: NaiveDate,
    end: NaiveDate,
    label: Option<&str>,
) -> IncomeStatement {
    let chart = chart_index(accounts);
    let net = net_by_account(entries.iter().filter(|e| in_range(e, start, end)));

    let income = lines_of_type(&chart, &net, AccountType::Income, true);
    let expenses = lines_of_type(&chart, &net, AccountType::Expense, false);
    let total_income = total(&income);
    let total_expenses = total(&expenses);

    IncomeStatement {
        institution_name: institution_name.to_string(),
        period_label: range_label(label, start, end),
        start_date: start,
        end_date: end,
        income,
        expenses,
        total_income,
        total_expenses,
        net_income: total_income - total_expenses,
    }
}

/// Position as of `as_of` (inclusive). Assets at net debit, liabilities and
/// equity at net credit.
pub fn balance_sheet(
    institution_name: &str,
    accounts: &[Account],
    entries: &[JournalEntry],
    as_of: NaiveDate,
    label: Option<&str>,
) -> BalanceSheet {
    let chart = chart_index(accounts);
    let net = net_by_account(entries.iter().filter(|e| e.entry_date <= as_of));

    let assets = lines_of_type(&chart, &net, AccountType::Asset, false);
    let liabilities = lines_of_type(&chart, &net, AccountType::Liability, true);
    let equity = lines_of_type(&chart, &net, AccountType::Equity, true);

    BalanceSheet {
        institution_name: institution_name.to_string(),
        period_label: as_of_label(label, as_of),
        as_of_date: as_of,
        total_assets: total(&assets),
        total_liabilities: total(&liabilities),
        total_equity: total(&equity),
        assets,
        liabilities,
        equity,
    }
}
