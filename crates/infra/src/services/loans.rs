use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use coop_auth::{AccessError, CallerContext, ensure_own_member};
use coop_core::{AggregateId, DomainError, InstitutionId, MemberId};
use coop_loans::{
    ApplyForLoan, DecideLoan, DisburseLoan, Loan, LoanCommand, LoanId, LoanRepayment, LoanStatus,
    RecordRepayment, RepaymentId,
};
use coop_savings::SavingsAccountId;

use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStore;

use super::{EngineContext, ServiceResult};

/// Loan application as submitted.
///
/// For a self-service caller `member_id` and `sacco_id` are replaced by the
/// caller's own, and `interest_rate` only counts when the SACCO has no
/// default rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanApplication {
    pub member_id: MemberId,
    pub sacco_id: InstitutionId,
    pub principal: Decimal,
    /// Annual percent; the configured fallback applies when absent.
    pub interest_rate: Option<Decimal>,
    pub term_months: u32,
    pub collateral_account_id: Option<SavingsAccountId>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepaymentRequest {
    pub loan_id: LoanId,
    pub amount: Decimal,
    /// Defaults to today.
    pub payment_date: Option<NaiveDate>,
    /// Restrict the payment to one unpaid installment.
    pub installment_number: Option<u32>,
}

/// Loan lifecycle: application, decision, disbursement, repayment.
pub struct LoanService<S> {
    context: Arc<EngineContext<S>>,
}

impl<S> LoanService<S>
where
    S: EventStore,
{
    pub fn new(context: Arc<EngineContext<S>>) -> Self {
        Self { context }
    }

    #[instrument(skip_all, fields(role = %caller.role(), principal = %application.principal))]
    pub fn apply(&self, caller: &CallerContext, application: LoanApplication) -> ServiceResult<Loan> {
        let ctx = &self.context;

        let (member_id, sacco_id) = if caller.is_self_service() {
            let member_id = caller
                .member_id()
                .ok_or_else(|| DomainError::not_found("member record for caller"))?;
            let sacco_id = caller
                .institution_id()
                .ok_or_else(|| DomainError::access_denied("caller has no institution"))?;
            (member_id, sacco_id)
        } else {
            (application.member_id, application.sacco_id)
        };
        ctx.authorize(caller, sacco_id)?;

        let member = ctx.members.member(member_id)?;
        let sacco = ctx.institutions.institution(sacco_id)?;
        if member.sacco_id != sacco_id {
            return Err(DomainError::invalid_argument("member does not belong to this SACCO").into());
        }

        let collateral_account_id = match application.collateral_account_id {
            Some(account_id) => {
                let (_, account) = ctx.locate_savings_account(account_id)?;
                if account.member_id() != Some(member_id) {
                    return Err(DomainError::invalid_argument(
                        "savings account does not belong to this member",
                    )
                    .into());
                }
                Some(account_id.0)
            }
            None => None,
        };

        let interest_rate = if caller.is_self_service() {
            sacco.default_loan_interest_rate.or(application.interest_rate)
        } else {
            application.interest_rate
        }
        .unwrap_or(ctx.config.fallback_loan_interest_rate);

        let loan_id = LoanId::new(AggregateId::new());
        let command = LoanCommand::Apply(ApplyForLoan {
            institution_id: sacco_id,
            loan_id,
            member_id,
            principal: application.principal,
            interest_rate,
            term_months: application.term_months,
            collateral_account_id,
            reason: application.reason.clone(),
            schedule_rounding: ctx.config.schedule_rounding,
            applied_by: Some(caller.user_id()),
            occurred_at: ctx.clock.now(),
        });
        let loan = self.run(sacco_id, loan_id, "loans.apply", &command)?;

        info!(loan_id = %loan_id, member_id = %member_id, rate = %interest_rate, "loan application recorded");
        Ok(loan)
    }

    #[instrument(skip_all, fields(loan_id = %loan_id, approved = approved))]
    pub fn approve(&self, caller: &CallerContext, loan_id: LoanId, approved: bool) -> ServiceResult<Loan> {
        let ctx = &self.context;
        let (institution_id, _) = self.context.locate_loan(loan_id)?;
        ctx.authorize(caller, institution_id)?;

        let command = LoanCommand::Decide(DecideLoan {
            institution_id,
            loan_id,
            approved,
            decided_by: Some(caller.user_id()),
            occurred_at: ctx.clock.now(),
        });
        let loan = self.run(institution_id, loan_id, "loans.approve", &command)?;

        info!(status = %loan.status(), "loan decided");
        Ok(loan)
    }

    /// Disburse today and start the repayment period.
    #[instrument(skip_all, fields(loan_id = %loan_id))]
    pub fn disburse(&self, caller: &CallerContext, loan_id: LoanId) -> ServiceResult<Loan> {
        let ctx = &self.context;
        let (institution_id, _) = self.context.locate_loan(loan_id)?;
        ctx.authorize(caller, institution_id)?;

        let command = LoanCommand::Disburse(DisburseLoan {
            institution_id,
            loan_id,
            disbursement_date: ctx.clock.today(),
            disbursed_by: Some(caller.user_id()),
            occurred_at: ctx.clock.now(),
        });
        let loan = self.run(institution_id, loan_id, "loans.disburse", &command)?;

        info!(
            disbursement_date = ?loan.disbursement_date(),
            installments = loan.schedule().len(),
            "loan disbursed"
        );
        Ok(loan)
    }

    #[instrument(skip_all, fields(loan_id = %request.loan_id, amount = %request.amount))]
    pub fn record_repayment(&self, caller: &CallerContext, request: RepaymentRequest) -> ServiceResult<LoanRepayment> {
        let ctx = &self.context;
        let (institution_id, loan) = self.context.locate_loan(request.loan_id)?;
        ctx.authorize(caller, institution_id)?;
        ensure_own_loan(caller, &loan)?;

        let repayment_id = RepaymentId::new();
        let command = LoanCommand::RecordRepayment(RecordRepayment {
            institution_id,
            loan_id: request.loan_id,
            repayment_id,
            amount: request.amount,
            payment_date: request.payment_date.unwrap_or_else(|| ctx.clock.today()),
            target_installment: request.installment_number,
            policy: ctx.config.allocation_policy,
            recorded_by: Some(caller.user_id()),
            occurred_at: ctx.clock.now(),
        });
        let loan = self.run(institution_id, request.loan_id, "loans.record_repayment", &command)?;
        let repayment = loan
            .repayments()
            .iter()
            .rev()
            .find(|r| r.id == repayment_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("repayment {repayment_id}")))?;

        info!(
            principal = %repayment.principal_component,
            interest = %repayment.interest_component,
            outstanding = %loan.derived_outstanding(),
            "repayment recorded"
        );
        if loan.status() == LoanStatus::Closed {
            info!("loan closed");
        }
        Ok(repayment)
    }

    /// The loan with its schedule; outstanding balance only while active.
    pub fn get_by_id(&self, caller: &CallerContext, loan_id: LoanId) -> ServiceResult<Loan> {
        let (institution_id, loan) = self.context.locate_loan(loan_id)?;
        self.context.authorize(caller, institution_id)?;
        ensure_own_loan(caller, &loan)?;
        Ok(loan)
    }

    pub fn list_by_member(&self, caller: &CallerContext, member_id: MemberId) -> ServiceResult<Vec<Loan>> {
        let ctx = &self.context;
        ensure_own_member(caller, member_id)?;
        let member = ctx.members.member(member_id)?;
        ctx.authorize(caller, member.sacco_id)?;

        Ok(ctx
            .loans_of(member.sacco_id)?
            .into_iter()
            .filter(|l| l.member_id() == Some(member_id))
            .collect())
    }

    pub fn list_by_sacco(&self, caller: &CallerContext, sacco_id: InstitutionId) -> ServiceResult<Vec<Loan>> {
        self.context.authorize(caller, sacco_id)?;
        self.context.loans_of(sacco_id)
    }

    /// Repayments of one loan, newest payment date first.
    pub fn list_repayments(&self, caller: &CallerContext, loan_id: LoanId) -> ServiceResult<Vec<LoanRepayment>> {
        let loan = self.get_by_id(caller, loan_id)?;
        let mut repayments = loan.repayments().to_vec();
        newest_first(&mut repayments);
        Ok(repayments)
    }

    /// Repayments across a SACCO, newest payment date first.
    pub fn list_repayments_by_sacco(
        &self,
        caller: &CallerContext,
        sacco_id: InstitutionId,
    ) -> ServiceResult<Vec<LoanRepayment>> {
        self.context.authorize(caller, sacco_id)?;
        let mut repayments: Vec<LoanRepayment> = self
            .context
            .loans_of(sacco_id)?
            .iter()
            .flat_map(|l| l.repayments().iter().cloned())
            .collect();
        newest_first(&mut repayments);
        Ok(repayments)
    }

    /// Execute one command against a loan stream and return the new state.
    fn run(
        &self,
        institution_id: InstitutionId,
        loan_id: LoanId,
        operation: &'static str,
        command: &LoanCommand,
    ) -> ServiceResult<Loan> {
        let ctx = &self.context;
        let (loan, committed) = ctx.with_retries(operation, || {
            let mut staged = ctx.load_loan(institution_id, loan_id)?;
            staged.execute(command)?;
            let loan = staged.state().clone();
            let committed = ctx.dispatcher.commit(vec![staged.into_append()?])?;
            Ok::<_, DispatchError>((loan, committed))
        })?;
        ctx.refresh(&committed)?;
        Ok(loan)
    }
}

fn ensure_own_loan(caller: &CallerContext, loan: &Loan) -> Result<(), AccessError> {
    match loan.member_id() {
        Some(member_id) => ensure_own_member(caller, member_id),
        None => Ok(()),
    }
}

fn newest_first(repayments: &mut [LoanRepayment]) {
    repayments.sort_by(|a, b| b.payment_date.cmp(&a.payment_date));
}
