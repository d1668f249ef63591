//! Loans module: loan lifecycle, flat-interest schedules, repayment allocation.
//!
//! Pure domain logic only: no IO, no persistence concerns.

pub mod allocation;
pub mod loan;
pub mod schedule;

pub use allocation::{Allocation, AllocationPolicy, InstallmentAllocation, allocate};
pub use loan::{
    ApplyForLoan, DecideLoan, DisburseLoan, LOAN_AGGREGATE_TYPE, Loan, LoanApplied, LoanApproved,
    LoanClosed, LoanCommand, LoanDisbursed, LoanEvent, LoanId, LoanRejected, LoanRepayment,
    LoanStatus, RecordRepayment, RepaymentId, RepaymentPeriodStarted, RepaymentRecorded,
};
pub use schedule::{Installment, ScheduleRounding, generate_schedule, monthly_rate, total_interest};
