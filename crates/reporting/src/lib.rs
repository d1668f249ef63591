//! Reporting: financial statements and portfolio summaries.
//!
//! Read-only aggregation over already-posted ledger, loan and savings data.

pub mod period;
pub mod portfolio;
pub mod statements;

pub use period::{ReportPeriod, as_of_label, range_label};
pub use portfolio::{LoanPortfolioSummary, SavingsSummary, loan_portfolio_summary, savings_summary};
pub use statements::{
    BalanceSheet, IncomeStatement, StatementLine, TrialBalance, TrialBalanceLine, balance_sheet,
    income_statement, trial_balance,
};
