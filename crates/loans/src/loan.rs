use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coop_core::money::{ensure_positive_money, round_money};
use coop_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, InstitutionId, MemberId, UserId,
    impl_uuid_newtype,
};
use coop_events::Event;

use crate::allocation::{AllocationPolicy, InstallmentAllocation, allocate};
use crate::schedule::{Installment, ScheduleRounding, generate_schedule};

/// Stream type tag for loan events.
pub const LOAN_AGGREGATE_TYPE: &str = "loans.loan";

/// Loan identifier (institution-scoped via `institution_id` in commands/events).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoanId(pub AggregateId);

impl LoanId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LoanId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of a recorded repayment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepaymentId(Uuid);

impl_uuid_newtype!(RepaymentId, "RepaymentId");

/// Loan lifecycle.
///
/// `PENDING_APPROVAL -> {APPROVED, REJECTED}`, `APPROVED -> DISBURSED -> REPAYING -> CLOSED`.
/// `REJECTED` and `CLOSED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    PendingApproval,
    Approved,
    Rejected,
    Disbursed,
    Repaying,
    Closed,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::PendingApproval => "PENDING_APPROVAL",
            LoanStatus::Approved => "APPROVED",
            LoanStatus::Rejected => "REJECTED",
            LoanStatus::Disbursed => "DISBURSED",
            LoanStatus::Repaying => "REPAYING",
            LoanStatus::Closed => "CLOSED",
        }
    }

    /// Money is out with the member and repayments are accepted.
    pub fn is_active(&self) -> bool {
        matches!(self, LoanStatus::Disbursed | LoanStatus::Repaying)
    }
}

impl core::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one payment and its split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanRepayment {
    pub id: RepaymentId,
    pub loan_id: LoanId,
    pub amount_paid: Decimal,
    pub principal_component: Decimal,
    pub interest_component: Decimal,
    pub payment_date: NaiveDate,
    pub recorded_by: Option<UserId>,
}

/// Aggregate root: Loan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loan {
    id: LoanId,
    institution_id: Option<InstitutionId>,
    member_id: Option<MemberId>,
    principal: Decimal,
    interest_rate: Decimal,
    term_months: u32,
    collateral_account_id: Option<AggregateId>,
    reason: Option<String>,
    schedule_rounding: ScheduleRounding,
    status: LoanStatus,
    disbursement_date: Option<NaiveDate>,
    created_at: Option<DateTime<Utc>>,
    schedule: Vec<Installment>,
    repayments: Vec<LoanRepayment>,
    principal_repaid: Decimal,
    version: u64,
    created: bool,
}

impl Loan {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: LoanId) -> Self {
        Self {
            id,
            institution_id: None,
            member_id: None,
            principal: Decimal::ZERO,
            interest_rate: Decimal::ZERO,
            term_months: 0,
            collateral_account_id: None,
            reason: None,
            schedule_rounding: ScheduleRounding::default(),
            status: LoanStatus::PendingApproval,
            disbursement_date: None,
            created_at: None,
            schedule: Vec::new(),
            repayments: Vec::new(),
            principal_repaid: Decimal::ZERO,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> LoanId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn institution_id(&self) -> Option<InstitutionId> {
        self.institution_id
    }

    pub fn member_id(&self) -> Option<MemberId> {
        self.member_id
    }

    pub fn principal(&self) -> Decimal {
        self.principal
    }

    /// Nominal annual rate, percent.
    pub fn interest_rate(&self) -> Decimal {
        self.interest_rate
    }

    pub fn term_months(&self) -> u32 {
        self.term_months
    }

    pub fn collateral_account_id(&self) -> Option<AggregateId> {
        self.collateral_account_id
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn status(&self) -> LoanStatus {
        self.status
    }

    pub fn disbursement_date(&self) -> Option<NaiveDate> {
        self.disbursement_date
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn schedule(&self) -> &[Installment] {
        &self.schedule
    }

    pub fn repayments(&self) -> &[LoanRepayment] {
        &self.repayments
    }

    /// Cumulative principal component across all repayments.
    pub fn principal_repaid(&self) -> Decimal {
        self.principal_repaid
    }

    /// Principal minus principal repaid, floored at zero.
    ///
    /// Derived from the repayment history, never stored.
    pub fn derived_outstanding(&self) -> Decimal {
        (self.principal - self.principal_repaid).max(Decimal::ZERO)
    }

    /// Outstanding balance, only while the loan is DISBURSED or REPAYING.
    pub fn outstanding_balance(&self) -> Option<Decimal> {
        self.status.is_active().then(|| self.derived_outstanding())
    }
}

impl AggregateRoot for Loan {
    type Id = LoanId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ApplyForLoan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyForLoan {
    pub institution_id: InstitutionId,
    pub loan_id: LoanId,
    pub member_id: MemberId,
    pub principal: Decimal,
    pub interest_rate: Decimal,
    pub term_months: u32,
    pub collateral_account_id: Option<AggregateId>,
    pub reason: Option<String>,
    /// Fixed at application so the schedule shape cannot change later.
    pub schedule_rounding: ScheduleRounding,
    pub applied_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DecideLoan (approve or reject).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecideLoan {
    pub institution_id: InstitutionId,
    pub loan_id: LoanId,
    pub approved: bool,
    pub decided_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DisburseLoan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisburseLoan {
    pub institution_id: InstitutionId,
    pub loan_id: LoanId,
    pub disbursement_date: NaiveDate,
    pub disbursed_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordRepayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRepayment {
    pub institution_id: InstitutionId,
    pub loan_id: LoanId,
    pub repayment_id: RepaymentId,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub target_installment: Option<u32>,
    pub policy: AllocationPolicy,
    pub recorded_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanCommand {
    Apply(ApplyForLoan),
    Decide(DecideLoan),
    Disburse(DisburseLoan),
    RecordRepayment(RecordRepayment),
}

/// Event: LoanApplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanApplied {
    pub institution_id: InstitutionId,
    pub loan_id: LoanId,
    pub member_id: MemberId,
    pub principal: Decimal,
    pub interest_rate: Decimal,
    pub term_months: u32,
    pub collateral_account_id: Option<AggregateId>,
    pub reason: Option<String>,
    pub schedule_rounding: ScheduleRounding,
    pub applied_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LoanApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanApproved {
    pub loan_id: LoanId,
    pub decided_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LoanRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanRejected {
    pub loan_id: LoanId,
    pub decided_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LoanDisbursed (carries the generated schedule).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanDisbursed {
    pub loan_id: LoanId,
    pub disbursement_date: NaiveDate,
    pub schedule: Vec<Installment>,
    pub disbursed_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RepaymentPeriodStarted (DISBURSED -> REPAYING).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepaymentPeriodStarted {
    pub loan_id: LoanId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RepaymentRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepaymentRecorded {
    pub repayment: LoanRepayment,
    pub allocations: Vec<InstallmentAllocation>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LoanClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanClosed {
    pub loan_id: LoanId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanEvent {
    LoanApplied(LoanApplied),
    LoanApproved(LoanApproved),
    LoanRejected(LoanRejected),
    LoanDisbursed(LoanDisbursed),
    RepaymentPeriodStarted(RepaymentPeriodStarted),
    RepaymentRecorded(RepaymentRecorded),
    LoanClosed(LoanClosed),
}

impl Event for LoanEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LoanEvent::LoanApplied(_) => "loans.loan.applied",
            LoanEvent::LoanApproved(_) => "loans.loan.approved",
            LoanEvent::LoanRejected(_) => "loans.loan.rejected",
            LoanEvent::LoanDisbursed(_) => "loans.loan.disbursed",
            LoanEvent::RepaymentPeriodStarted(_) => "loans.loan.repayment_period_started",
            LoanEvent::RepaymentRecorded(_) => "loans.loan.repayment_recorded",
            LoanEvent::LoanClosed(_) => "loans.loan.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LoanEvent::LoanApplied(e) => e.occurred_at,
            LoanEvent::LoanApproved(e) => e.occurred_at,
            LoanEvent::LoanRejected(e) => e.occurred_at,
            LoanEvent::LoanDisbursed(e) => e.occurred_at,
            LoanEvent::RepaymentPeriodStarted(e) => e.occurred_at,
            LoanEvent::RepaymentRecorded(e) => e.occurred_at,
            LoanEvent::LoanClosed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Loan {
    type Command = LoanCommand;
    type Event = LoanEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LoanEvent::LoanApplied(e) => {
                self.institution_id = Some(e.institution_id);
                self.member_id = Some(e.member_id);
                self.principal = e.principal;
                self.interest_rate = e.interest_rate;
                self.term_months = e.term_months;
                self.collateral_account_id = e.collateral_account_id;
                self.reason = e.reason.clone();
                self.schedule_rounding = e.schedule_rounding;
                self.status = LoanStatus::PendingApproval;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            LoanEvent::LoanApproved(_) => {
                self.status = LoanStatus::Approved;
            }
            LoanEvent::LoanRejected(_) => {
                self.status = LoanStatus::Rejected;
            }
            LoanEvent::LoanDisbursed(e) => {
                self.status = LoanStatus::Disbursed;
                self.disbursement_date = Some(e.disbursement_date);
                self.schedule = e.schedule.clone();
            }
            LoanEvent::RepaymentPeriodStarted(_) => {
                self.status = LoanStatus::Repaying;
            }
            LoanEvent::RepaymentRecorded(e) => {
                for part in &e.allocations {
                    if let Some(row) = self
                        .schedule
                        .iter_mut()
                        .find(|r| r.installment_number == part.installment_number)
                    {
                        row.interest_paid += part.interest;
                        row.principal_paid += part.principal;
                        row.paid = row.is_covered();
                    }
                }
                self.principal_repaid += e.repayment.principal_component;
                self.repayments.push(e.repayment.clone());
            }
            LoanEvent::LoanClosed(_) => {
                self.status = LoanStatus::Closed;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LoanCommand::Apply(cmd) => self.handle_apply(cmd),
            LoanCommand::Decide(cmd) => self.handle_decide(cmd),
            LoanCommand::Disburse(cmd) => self.handle_disburse(cmd),
            LoanCommand::RecordRepayment(cmd) => self.handle_repayment(cmd),
        }
    }
}

impl Loan {
    fn ensure_created(&self, institution_id: InstitutionId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("loan {}", self.id)));
        }
        if self.institution_id != Some(institution_id) {
            return Err(DomainError::invalid_argument(
                "loan belongs to a different institution",
            ));
        }
        Ok(())
    }

    fn handle_apply(&self, cmd: &ApplyForLoan) -> Result<Vec<LoanEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!("loan {} already exists", self.id)));
        }
        let principal = ensure_positive_money(cmd.principal, "principal")?;
        if cmd.term_months < 1 {
            return Err(DomainError::invalid_argument("term must be at least one month"));
        }
        if cmd.interest_rate.is_sign_negative() && !cmd.interest_rate.is_zero() {
            return Err(DomainError::invalid_argument("interest rate must not be negative"));
        }
        // The schedule must be constructible before the loan can be approved.
        generate_schedule(
            principal,
            cmd.interest_rate,
            cmd.term_months,
            cmd.occurred_at.date_naive(),
            cmd.schedule_rounding,
        )?;

        Ok(vec![LoanEvent::LoanApplied(LoanApplied {
            institution_id: cmd.institution_id,
            loan_id: cmd.loan_id,
            member_id: cmd.member_id,
            principal,
            interest_rate: cmd.interest_rate,
            term_months: cmd.term_months,
            collateral_account_id: cmd.collateral_account_id,
            reason: cmd.reason.clone(),
            schedule_rounding: cmd.schedule_rounding,
            applied_by: cmd.applied_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_decide(&self, cmd: &DecideLoan) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_created(cmd.institution_id)?;
        if self.status != LoanStatus::PendingApproval {
            return Err(DomainError::invalid_state(format!(
                "loan is {}, only PENDING_APPROVAL loans can be decided",
                self.status
            )));
        }

        let event = if cmd.approved {
            LoanEvent::LoanApproved(LoanApproved {
                loan_id: self.id,
                decided_by: cmd.decided_by,
                occurred_at: cmd.occurred_at,
            })
        } else {
            LoanEvent::LoanRejected(LoanRejected {
                loan_id: self.id,
                decided_by: cmd.decided_by,
                occurred_at: cmd.occurred_at,
            })
        };
        Ok(vec![event])
    }

    fn handle_disburse(&self, cmd: &DisburseLoan) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_created(cmd.institution_id)?;
        if self.status != LoanStatus::Approved {
            return Err(DomainError::invalid_state(format!(
                "loan is {}, only APPROVED loans can be disbursed",
                self.status
            )));
        }

        let schedule = generate_schedule(
            self.principal,
            self.interest_rate,
            self.term_months,
            cmd.disbursement_date,
            self.schedule_rounding,
        )?;

        Ok(vec![
            LoanEvent::LoanDisbursed(LoanDisbursed {
                loan_id: self.id,
                disbursement_date: cmd.disbursement_date,
                schedule,
                disbursed_by: cmd.disbursed_by,
                occurred_at: cmd.occurred_at,
            }),
            LoanEvent::RepaymentPeriodStarted(RepaymentPeriodStarted {
                loan_id: self.id,
                occurred_at: cmd.occurred_at,
            }),
        ])
    }

    fn handle_repayment(&self, cmd: &RecordRepayment) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_created(cmd.institution_id)?;
        if !self.status.is_active() {
            return Err(DomainError::invalid_state(format!(
                "loan is {}, repayments need DISBURSED or REPAYING",
                self.status
            )));
        }
        let amount = ensure_positive_money(cmd.amount, "amount paid")?;
        // Independent rounding can cover every row while principal stays short.
        if self.schedule.iter().all(|r| r.paid) {
            return Err(DomainError::invalid_state(
                "every installment is paid, nothing left to allocate",
            ));
        }

        let allocation = allocate(&self.schedule, amount, cmd.target_installment, cmd.policy)?;
        let repayment = LoanRepayment {
            id: cmd.repayment_id,
            loan_id: self.id,
            amount_paid: amount,
            principal_component: round_money(allocation.principal_component),
            interest_component: round_money(allocation.interest_component),
            payment_date: cmd.payment_date,
            recorded_by: cmd.recorded_by,
        };

        let outstanding = self.principal - (self.principal_repaid + repayment.principal_component);

        let mut events = vec![LoanEvent::RepaymentRecorded(RepaymentRecorded {
            repayment,
            allocations: allocation.installments,
            occurred_at: cmd.occurred_at,
        })];
        if outstanding <= Decimal::ZERO {
            events.push(LoanEvent::LoanClosed(LoanClosed {
                loan_id: self.id,
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn applied_loan(
        institution_id: InstitutionId,
        principal: Decimal,
        rate: Decimal,
        term: u32,
        rounding: ScheduleRounding,
    ) -> Loan {
        let id = LoanId::new(AggregateId::new());
        let mut loan = Loan::empty(id);
        loan.execute(&LoanCommand::Apply(ApplyForLoan {
            institution_id,
            loan_id: id,
            member_id: MemberId::new(),
            principal,
            interest_rate: rate,
            term_months: term,
            collateral_account_id: None,
            reason: Some("school fees".to_string()),
            schedule_rounding: rounding,
            applied_by: None,
            occurred_at: test_time(),
        }))
        .unwrap();
        loan
    }

    fn decide(loan: &mut Loan, institution_id: InstitutionId, approved: bool) -> Result<Vec<LoanEvent>, DomainError> {
        let loan_id = loan.id_typed();
        loan.execute(&LoanCommand::Decide(DecideLoan {
            institution_id,
            loan_id,
            approved,
            decided_by: None,
            occurred_at: test_time(),
        }))
    }

    fn disburse(loan: &mut Loan, institution_id: InstitutionId) -> Result<Vec<LoanEvent>, DomainError> {
        let loan_id = loan.id_typed();
        loan.execute(&LoanCommand::Disburse(DisburseLoan {
            institution_id,
            loan_id,
            disbursement_date: date(2025, 1, 15),
            disbursed_by: None,
            occurred_at: test_time(),
        }))
    }

    fn repay(
        loan: &mut Loan,
        institution_id: InstitutionId,
        amount: Decimal,
        target: Option<u32>,
    ) -> Result<Vec<LoanEvent>, DomainError> {
        let loan_id = loan.id_typed();
        loan.execute(&LoanCommand::RecordRepayment(RecordRepayment {
            institution_id,
            loan_id,
            repayment_id: RepaymentId::new(),
            amount,
            payment_date: date(2025, 2, 15),
            target_installment: target,
            policy: AllocationPolicy::InterestFirst,
            recorded_by: None,
            occurred_at: test_time(),
        }))
    }

    fn active_loan(institution_id: InstitutionId) -> Loan {
        let mut loan = applied_loan(
            institution_id,
            dec!(1200),
            dec!(12),
            12,
            ScheduleRounding::BalanceFinalInstallment,
        );
        decide(&mut loan, institution_id, true).unwrap();
        disburse(&mut loan, institution_id).unwrap();
        loan
    }

    #[test]
    fn apply_starts_pending_without_outstanding() {
        let inst = InstitutionId::new();
        let loan = applied_loan(inst, dec!(500), dec!(10), 6, ScheduleRounding::default());
        assert_eq!(loan.status(), LoanStatus::PendingApproval);
        assert_eq!(loan.outstanding_balance(), None);
        assert_eq!(loan.principal().to_string(), "500.00");
        assert_eq!(loan.version(), 1);
    }

    #[test]
    fn apply_rejects_bad_terms() {
        let inst = InstitutionId::new();
        let id = LoanId::new(AggregateId::new());
        let base = ApplyForLoan {
            institution_id: inst,
            loan_id: id,
            member_id: MemberId::new(),
            principal: dec!(100),
            interest_rate: dec!(12),
            term_months: 12,
            collateral_account_id: None,
            reason: None,
            schedule_rounding: ScheduleRounding::default(),
            applied_by: None,
            occurred_at: test_time(),
        };
        let loan = Loan::empty(id);

        for cmd in [
            ApplyForLoan { principal: dec!(0), ..base.clone() },
            ApplyForLoan { term_months: 0, ..base.clone() },
            ApplyForLoan { interest_rate: dec!(-1), ..base.clone() },
            ApplyForLoan {
                principal: dec!(5_000_000_000_000_000_000_000_000_000),
                interest_rate: dec!(100),
                term_months: 240,
                ..base.clone()
            },
        ] {
            let err = loan.handle(&LoanCommand::Apply(cmd)).unwrap_err();
            assert!(matches!(err, DomainError::InvalidArgument(_)));
        }
    }

    #[test]
    fn repayment_after_every_row_is_paid_is_refused() {
        let inst = InstitutionId::new();
        let mut loan = applied_loan(inst, dec!(1000), dec!(0), 3, ScheduleRounding::Independent);
        decide(&mut loan, inst, true).unwrap();
        disburse(&mut loan, inst).unwrap();

        for _ in 0..3 {
            repay(&mut loan, inst, dec!(333.33), None).unwrap();
        }
        assert!(loan.schedule().iter().all(|r| r.paid));
        assert_eq!(loan.status(), LoanStatus::Repaying);
        assert_eq!(loan.derived_outstanding(), dec!(0.01));

        let repayments = loan.repayments().len();
        assert!(matches!(
            repay(&mut loan, inst, dec!(0.01), None),
            Err(DomainError::InvalidState(_))
        ));
        assert_eq!(loan.repayments().len(), repayments);
    }

    #[test]
    fn reject_is_terminal() {
        let inst = InstitutionId::new();
        let mut loan = applied_loan(inst, dec!(500), dec!(10), 6, ScheduleRounding::default());
        decide(&mut loan, inst, false).unwrap();
        assert_eq!(loan.status(), LoanStatus::Rejected);

        assert!(matches!(decide(&mut loan, inst, true), Err(DomainError::InvalidState(_))));
        assert!(matches!(disburse(&mut loan, inst), Err(DomainError::InvalidState(_))));
    }

    #[test]
    fn disburse_requires_approval_and_moves_to_repaying() {
        let inst = InstitutionId::new();
        let mut loan = applied_loan(inst, dec!(1200), dec!(12), 12, ScheduleRounding::default());
        assert!(matches!(disburse(&mut loan, inst), Err(DomainError::InvalidState(_))));
        assert!(matches!(
            repay(&mut loan, inst, dec!(10), None),
            Err(DomainError::InvalidState(_))
        ));

        decide(&mut loan, inst, true).unwrap();
        let events = disburse(&mut loan, inst).unwrap();
        assert!(matches!(events[0], LoanEvent::LoanDisbursed(_)));
        assert!(matches!(events[1], LoanEvent::RepaymentPeriodStarted(_)));
        assert_eq!(loan.status(), LoanStatus::Repaying);
        assert_eq!(loan.disbursement_date(), Some(date(2025, 1, 15)));
        assert_eq!(loan.schedule().len(), 12);
        assert_eq!(loan.outstanding_balance(), Some(dec!(1200.00)));

        assert!(matches!(decide(&mut loan, inst, true), Err(DomainError::InvalidState(_))));
    }

    #[test]
    fn twelve_full_installments_close_the_loan() {
        let inst = InstitutionId::new();
        let mut loan = active_loan(inst);

        let events = repay(&mut loan, inst, dec!(112.00), Some(1)).unwrap();
        match &events[0] {
            LoanEvent::RepaymentRecorded(e) => {
                assert_eq!(e.repayment.interest_component, dec!(12.00));
                assert_eq!(e.repayment.principal_component, dec!(100.00));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(loan.schedule()[0].paid);
        assert_eq!(loan.outstanding_balance(), Some(dec!(1100.00)));

        for _ in 1..12 {
            repay(&mut loan, inst, dec!(112.00), None).unwrap();
        }
        assert_eq!(loan.status(), LoanStatus::Closed);
        assert_eq!(loan.derived_outstanding(), Decimal::ZERO);
        assert_eq!(loan.outstanding_balance(), None);
        assert!(loan.schedule().iter().all(|r| r.paid));

        assert!(matches!(
            repay(&mut loan, inst, dec!(1), None),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn non_positive_payment_is_rejected() {
        let inst = InstitutionId::new();
        let mut loan = active_loan(inst);
        assert!(matches!(
            repay(&mut loan, inst, dec!(0), None),
            Err(DomainError::InvalidArgument(_))
        ));
        assert!(matches!(
            repay(&mut loan, inst, dec!(-5), None),
            Err(DomainError::InvalidArgument(_))
        ));
    }

    #[test]
    fn overpayment_closes_without_credit_balance() {
        let inst = InstitutionId::new();
        let mut loan = active_loan(inst);
        let events = repay(&mut loan, inst, dec!(2000), None).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(loan.status(), LoanStatus::Closed);
        assert_eq!(loan.repayments()[0].amount_paid, dec!(2000.00));
        assert_eq!(loan.principal_repaid(), dec!(1200.00));
    }

    #[test]
    fn commands_for_another_institution_are_rejected() {
        let inst = InstitutionId::new();
        let mut loan = active_loan(inst);
        assert!(matches!(
            repay(&mut loan, InstitutionId::new(), dec!(10), None),
            Err(DomainError::InvalidArgument(_))
        ));
    }

    #[test]
    fn unknown_loan_is_not_found() {
        let mut loan = Loan::empty(LoanId::new(AggregateId::new()));
        assert!(matches!(
            decide(&mut loan, InstitutionId::new(), true),
            Err(DomainError::NotFound(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: outstanding never increases and hits zero exactly when
        /// the loan closes.
        #[test]
        fn outstanding_is_monotone_and_zero_iff_closed(
            principal_cents in 10_000i64..10_000_000i64,
            rate_bp in 0i64..3_000i64,
            term in 1u32..=36u32,
            payments in prop::collection::vec(1i64..500_000i64, 1..60),
        ) {
            let inst = InstitutionId::new();
            let mut loan = applied_loan(
                inst,
                Decimal::new(principal_cents, 2),
                Decimal::new(rate_bp, 2),
                term,
                ScheduleRounding::BalanceFinalInstallment,
            );
            decide(&mut loan, inst, true).unwrap();
            disburse(&mut loan, inst).unwrap();

            let mut previous = loan.derived_outstanding();
            for cents in payments {
                if loan.status() == LoanStatus::Closed {
                    break;
                }
                repay(&mut loan, inst, Decimal::new(cents, 2), None).unwrap();
                let now = loan.derived_outstanding();
                prop_assert!(now <= previous);
                prop_assert_eq!(now.is_zero(), loan.status() == LoanStatus::Closed);
                previous = now;
            }
        }
    }
}
