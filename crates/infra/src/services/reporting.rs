use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, instrument};

use coop_auth::CallerContext;
use coop_core::InstitutionId;
use coop_reporting::{
    BalanceSheet, IncomeStatement, LoanPortfolioSummary, ReportPeriod, SavingsSummary, TrialBalance,
    balance_sheet, income_statement, loan_portfolio_summary, savings_summary, trial_balance,
};

use crate::event_store::EventStore;

use super::{EngineContext, ServiceResult};

/// Read-only statements over the current projections.
///
/// Each report reads one snapshot of the ledger (or loans, or savings
/// accounts) so a statement is never torn by a concurrent commit.
pub struct ReportingService<S> {
    context: Arc<EngineContext<S>>,
}

impl<S> ReportingService<S>
where
    S: EventStore,
{
    pub fn new(context: Arc<EngineContext<S>>) -> Self {
        Self { context }
    }

    #[instrument(skip_all, fields(institution_id = %institution_id, start = %start, end = %end))]
    pub fn trial_balance(
        &self,
        caller: &CallerContext,
        institution_id: InstitutionId,
        start: NaiveDate,
        end: NaiveDate,
        label: Option<&str>,
    ) -> ServiceResult<TrialBalance> {
        let name = self.institution_name(caller, institution_id)?;
        let ledger = self.context.ledger_snapshot(institution_id)?;
        let report = trial_balance(&name, ledger.accounts(), ledger.entries(), start, end, label);

        debug!(
            lines = report.lines.len(),
            total_debit = %report.total_debit,
            total_credit = %report.total_credit,
            "trial balance built"
        );
        Ok(report)
    }

    #[instrument(skip_all, fields(institution_id = %institution_id, start = %start, end = %end))]
    pub fn income_statement(
        &self,
        caller: &CallerContext,
        institution_id: InstitutionId,
        start: NaiveDate,
        end: NaiveDate,
        label: Option<&str>,
    ) -> ServiceResult<IncomeStatement> {
        let name = self.institution_name(caller, institution_id)?;
        let ledger = self.context.ledger_snapshot(institution_id)?;
        Ok(income_statement(&name, ledger.accounts(), ledger.entries(), start, end, label))
    }

    #[instrument(skip_all, fields(institution_id = %institution_id, as_of = %as_of))]
    pub fn balance_sheet(
        &self,
        caller: &CallerContext,
        institution_id: InstitutionId,
        as_of: NaiveDate,
        label: Option<&str>,
    ) -> ServiceResult<BalanceSheet> {
        let name = self.institution_name(caller, institution_id)?;
        let ledger = self.context.ledger_snapshot(institution_id)?;
        Ok(balance_sheet(&name, ledger.accounts(), ledger.entries(), as_of, label))
    }

    #[instrument(skip_all, fields(sacco_id = %sacco_id, as_of = %as_of))]
    pub fn loan_portfolio_summary(
        &self,
        caller: &CallerContext,
        sacco_id: InstitutionId,
        as_of: NaiveDate,
        label: Option<&str>,
    ) -> ServiceResult<LoanPortfolioSummary> {
        let name = self.institution_name(caller, sacco_id)?;
        let loans = self.context.loans_of(sacco_id)?;
        Ok(loan_portfolio_summary(&name, &loans, as_of, label))
    }

    #[instrument(skip_all, fields(sacco_id = %sacco_id, start = %start, end = %end))]
    pub fn savings_summary(
        &self,
        caller: &CallerContext,
        sacco_id: InstitutionId,
        start: NaiveDate,
        end: NaiveDate,
        label: Option<&str>,
    ) -> ServiceResult<SavingsSummary> {
        let name = self.institution_name(caller, sacco_id)?;
        let accounts = self.context.savings_accounts_of(sacco_id)?;
        Ok(savings_summary(&name, &accounts, start, end, label))
    }

    pub fn trial_balance_for_period(
        &self,
        caller: &CallerContext,
        institution_id: InstitutionId,
        period: ReportPeriod,
        as_of: NaiveDate,
    ) -> ServiceResult<TrialBalance> {
        let (start, end) = period.resolve(as_of);
        self.trial_balance(caller, institution_id, start, end, None)
    }

    pub fn income_statement_for_period(
        &self,
        caller: &CallerContext,
        institution_id: InstitutionId,
        period: ReportPeriod,
        as_of: NaiveDate,
    ) -> ServiceResult<IncomeStatement> {
        let (start, end) = period.resolve(as_of);
        self.income_statement(caller, institution_id, start, end, None)
    }

    pub fn savings_summary_for_period(
        &self,
        caller: &CallerContext,
        sacco_id: InstitutionId,
        period: ReportPeriod,
        as_of: NaiveDate,
    ) -> ServiceResult<SavingsSummary> {
        let (start, end) = period.resolve(as_of);
        self.savings_summary(caller, sacco_id, start, end, None)
    }

    fn institution_name(&self, caller: &CallerContext, institution_id: InstitutionId) -> ServiceResult<String> {
        let institution = self.context.institutions.institution(institution_id)?;
        self.context.authorize(caller, institution_id)?;
        Ok(institution.name)
    }
}
