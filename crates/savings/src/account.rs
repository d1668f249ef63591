use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coop_accounting::AccountId;
use coop_core::money::{checked_add_money, ensure_positive_money};
use coop_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, InstitutionId, MemberId, UserId,
    impl_uuid_newtype,
};
use coop_events::Event;

use crate::SavingsProductId;

/// Stream type tag for member savings account events.
pub const SAVINGS_ACCOUNT_AGGREGATE_TYPE: &str = "savings.account";

const ACCOUNT_NAMESPACE: Uuid = Uuid::from_u128(0x2f8e_71c4_05ab_4d69_b3e0_9a17_c6d2_4e58);

/// Member savings account identifier.
///
/// Derived from (member, product), so a member can hold at most one account
/// per product and a duplicate open collides on the stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SavingsAccountId(pub AggregateId);

impl SavingsAccountId {
    pub fn for_member_product(member_id: MemberId, product_id: SavingsProductId) -> Self {
        let mut name = Vec::with_capacity(32);
        name.extend_from_slice(member_id.as_uuid().as_bytes());
        name.extend_from_slice(product_id.as_uuid().as_bytes());
        Self(AggregateId::derived(&ACCOUNT_NAMESPACE, &name))
    }
}

impl core::fmt::Display for SavingsAccountId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SavingsTransactionId(Uuid);

impl_uuid_newtype!(SavingsTransactionId, "SavingsTransactionId");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SavingsAccountStatus {
    Active,
    Frozen,
    Closed,
}

impl SavingsAccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SavingsAccountStatus::Active => "ACTIVE",
            SavingsAccountStatus::Frozen => "FROZEN",
            SavingsAccountStatus::Closed => "CLOSED",
        }
    }
}

impl core::fmt::Display for SavingsAccountStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
        }
    }
}

/// One deposit or withdrawal, as recorded on the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavingsTransaction {
    pub id: SavingsTransactionId,
    pub account_id: SavingsAccountId,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub transaction_date: NaiveDate,
    pub created_by: Option<UserId>,
    pub recorded_at: DateTime<Utc>,
}

impl SavingsTransaction {
    /// Signed effect on the account balance.
    pub fn signed_amount(&self) -> Decimal {
        match self.transaction_type {
            TransactionType::Deposit => self.amount,
            TransactionType::Withdrawal => -self.amount,
        }
    }
}

/// Aggregate root: MemberSavingsAccount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavingsAccount {
    id: SavingsAccountId,
    institution_id: Option<InstitutionId>,
    member_id: Option<MemberId>,
    product_id: Option<SavingsProductId>,
    account_number: String,
    opened_date: Option<NaiveDate>,
    status: SavingsAccountStatus,
    balance: Decimal,
    liability_account_id: Option<AccountId>,
    transactions: Vec<SavingsTransaction>,
    version: u64,
    created: bool,
}

impl SavingsAccount {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SavingsAccountId) -> Self {
        Self {
            id,
            institution_id: None,
            member_id: None,
            product_id: None,
            account_number: String::new(),
            opened_date: None,
            status: SavingsAccountStatus::Active,
            balance: Decimal::ZERO,
            liability_account_id: None,
            transactions: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SavingsAccountId {
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

    pub fn product_id(&self) -> Option<SavingsProductId> {
        self.product_id
    }

    pub fn account_number(&self) -> &str {
        &self.account_number
    }

    pub fn opened_date(&self) -> Option<NaiveDate> {
        self.opened_date
    }

    pub fn status(&self) -> SavingsAccountStatus {
        self.status
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn liability_account_id(&self) -> Option<AccountId> {
        self.liability_account_id
    }

    /// Transactions in recording order.
    pub fn transactions(&self) -> &[SavingsTransaction] {
        &self.transactions
    }

    /// Up to `limit` transactions, newest transaction date first.
    pub fn recent_transactions(&self, limit: usize) -> Vec<SavingsTransaction> {
        let mut txs: Vec<SavingsTransaction> = self.transactions.iter().rev().cloned().collect();
        txs.sort_by(|a, b| b.transaction_date.cmp(&a.transaction_date));
        txs.truncate(limit);
        txs
    }
}

impl AggregateRoot for SavingsAccount {
    type Id = SavingsAccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAccount {
    pub institution_id: InstitutionId,
    pub account_id: SavingsAccountId,
    pub member_id: MemberId,
    pub product_id: SavingsProductId,
    pub account_number: String,
    pub opened_date: NaiveDate,
    pub liability_account_id: Option<AccountId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: LinkLiabilityAccount (backfill for accounts opened without one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkLiabilityAccount {
    pub institution_id: InstitutionId,
    pub account_id: SavingsAccountId,
    pub liability_account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordTransaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTransaction {
    pub institution_id: InstitutionId,
    pub account_id: SavingsAccountId,
    pub transaction_id: SavingsTransactionId,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub transaction_date: NaiveDate,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeStatus (freeze, reactivate, close).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub institution_id: InstitutionId,
    pub account_id: SavingsAccountId,
    pub target: SavingsAccountStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SavingsAccountCommand {
    Open(OpenAccount),
    LinkLiabilityAccount(LinkLiabilityAccount),
    RecordTransaction(RecordTransaction),
    ChangeStatus(ChangeStatus),
}

/// Event: AccountOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub institution_id: InstitutionId,
    pub account_id: SavingsAccountId,
    pub member_id: MemberId,
    pub product_id: SavingsProductId,
    pub account_number: String,
    pub opened_date: NaiveDate,
    pub liability_account_id: Option<AccountId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LiabilityAccountLinked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiabilityAccountLinked {
    pub account_id: SavingsAccountId,
    pub liability_account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransactionRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecorded {
    pub transaction: SavingsTransaction,
    pub balance_after: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub account_id: SavingsAccountId,
    pub from: SavingsAccountStatus,
    pub to: SavingsAccountStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SavingsAccountEvent {
    AccountOpened(AccountOpened),
    LiabilityAccountLinked(LiabilityAccountLinked),
    TransactionRecorded(TransactionRecorded),
    StatusChanged(StatusChanged),
}

impl Event for SavingsAccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SavingsAccountEvent::AccountOpened(_) => "savings.account.opened",
            SavingsAccountEvent::LiabilityAccountLinked(_) => "savings.account.liability_linked",
            SavingsAccountEvent::TransactionRecorded(_) => "savings.account.transaction_recorded",
            SavingsAccountEvent::StatusChanged(_) => "savings.account.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SavingsAccountEvent::AccountOpened(e) => e.occurred_at,
            SavingsAccountEvent::LiabilityAccountLinked(e) => e.occurred_at,
            SavingsAccountEvent::TransactionRecorded(e) => e.occurred_at,
            SavingsAccountEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SavingsAccount {
    type Command = SavingsAccountCommand;
    type Event = SavingsAccountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SavingsAccountEvent::AccountOpened(e) => {
                self.institution_id = Some(e.institution_id);
                self.member_id = Some(e.member_id);
                self.product_id = Some(e.product_id);
                self.account_number = e.account_number.clone();
                self.opened_date = Some(e.opened_date);
                self.liability_account_id = e.liability_account_id;
                self.status = SavingsAccountStatus::Active;
                self.balance = Decimal::ZERO;
                self.created = true;
            }
            SavingsAccountEvent::LiabilityAccountLinked(e) => {
                self.liability_account_id = Some(e.liability_account_id);
            }
            SavingsAccountEvent::TransactionRecorded(e) => {
                self.balance = e.balance_after;
                self.transactions.push(e.transaction.clone());
            }
            SavingsAccountEvent::StatusChanged(e) => {
                self.status = e.to;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SavingsAccountCommand::Open(cmd) => {
                if self.created {
                    return Err(DomainError::conflict(
                        "member already has an account for this product",
                    ));
                }
                Ok(vec![SavingsAccountEvent::AccountOpened(AccountOpened {
                    institution_id: cmd.institution_id,
                    account_id: cmd.account_id,
                    member_id: cmd.member_id,
                    product_id: cmd.product_id,
                    account_number: cmd.account_number.clone(),
                    opened_date: cmd.opened_date,
                    liability_account_id: cmd.liability_account_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            SavingsAccountCommand::LinkLiabilityAccount(cmd) => {
                self.ensure_created(cmd.institution_id)?;
                if self.liability_account_id.is_some() {
                    return Ok(vec![]);
                }
                Ok(vec![SavingsAccountEvent::LiabilityAccountLinked(
                    LiabilityAccountLinked {
                        account_id: self.id,
                        liability_account_id: cmd.liability_account_id,
                        occurred_at: cmd.occurred_at,
                    },
                )])
            }
            SavingsAccountCommand::RecordTransaction(cmd) => self.handle_transaction(cmd),
            SavingsAccountCommand::ChangeStatus(cmd) => self.handle_status(cmd),
        }
    }
}

impl SavingsAccount {
    fn ensure_created(&self, institution_id: InstitutionId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("savings account {}", self.id)));
        }
        if self.institution_id != Some(institution_id) {
            return Err(DomainError::invalid_argument(
                "savings account belongs to a different institution",
            ));
        }
        Ok(())
    }

    fn handle_transaction(&self, cmd: &RecordTransaction) -> Result<Vec<SavingsAccountEvent>, DomainError> {
        self.ensure_created(cmd.institution_id)?;
        if self.status != SavingsAccountStatus::Active {
            return Err(DomainError::invalid_state(format!(
                "savings account is {}, transactions need ACTIVE",
                self.status
            )));
        }
        let amount = ensure_positive_money(cmd.amount, "amount")?;

        let balance_after = match cmd.transaction_type {
            TransactionType::Deposit => checked_add_money(self.balance, amount, "balance")?,
            TransactionType::Withdrawal => {
                if amount > self.balance {
                    return Err(DomainError::insufficient_balance(amount, self.balance));
                }
                self.balance - amount
            }
        };

        Ok(vec![SavingsAccountEvent::TransactionRecorded(TransactionRecorded {
            transaction: SavingsTransaction {
                id: cmd.transaction_id,
                account_id: self.id,
                transaction_type: cmd.transaction_type,
                amount,
                transaction_date: cmd.transaction_date,
                created_by: cmd.created_by,
                recorded_at: cmd.occurred_at,
            },
            balance_after,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_status(&self, cmd: &ChangeStatus) -> Result<Vec<SavingsAccountEvent>, DomainError> {
        use SavingsAccountStatus::*;

        self.ensure_created(cmd.institution_id)?;
        match (self.status, cmd.target) {
            (Active, Frozen) | (Frozen, Active) => {}
            (Active, Closed) => {
                if !self.balance.is_zero() {
                    return Err(DomainError::invalid_state(format!(
                        "cannot close a savings account holding {}",
                        self.balance
                    )));
                }
            }
            (from, to) => {
                return Err(DomainError::invalid_state(format!(
                    "cannot move savings account from {from} to {to}"
                )));
            }
        }

        Ok(vec![SavingsAccountEvent::StatusChanged(StatusChanged {
            account_id: self.id,
            from: self.status,
            to: cmd.target,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn opened(inst: InstitutionId) -> SavingsAccount {
        let member_id = MemberId::new();
        let product_id = SavingsProductId::new();
        let account_id = SavingsAccountId::for_member_product(member_id, product_id);
        let mut account = SavingsAccount::empty(account_id);
        account
            .execute(&SavingsAccountCommand::Open(OpenAccount {
                institution_id: inst,
                account_id,
                member_id,
                product_id,
                account_number: "SAV-000001".to_string(),
                opened_date: date(2025, 1, 1),
                liability_account_id: Some(AccountId::new()),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        account
    }

    fn transact(
        account: &mut SavingsAccount,
        inst: InstitutionId,
        transaction_type: TransactionType,
        amount: Decimal,
        day: u32,
    ) -> Result<Vec<SavingsAccountEvent>, DomainError> {
        let account_id = account.id_typed();
        account.execute(&SavingsAccountCommand::RecordTransaction(RecordTransaction {
            institution_id: inst,
            account_id,
            transaction_id: SavingsTransactionId::new(),
            transaction_type,
            amount,
            transaction_date: date(2025, 1, day),
            created_by: None,
            occurred_at: Utc::now(),
        }))
    }

    fn set_status(
        account: &mut SavingsAccount,
        inst: InstitutionId,
        target: SavingsAccountStatus,
    ) -> Result<Vec<SavingsAccountEvent>, DomainError> {
        let account_id = account.id_typed();
        account.execute(&SavingsAccountCommand::ChangeStatus(ChangeStatus {
            institution_id: inst,
            account_id,
            target,
            occurred_at: Utc::now(),
        }))
    }

    #[test]
    fn deposit_then_overdraw_is_insufficient_balance() {
        let inst = InstitutionId::new();
        let mut account = opened(inst);

        transact(&mut account, inst, TransactionType::Deposit, dec!(500), 2).unwrap();
        assert_eq!(account.balance(), dec!(500.00));

        let err = transact(&mut account, inst, TransactionType::Withdrawal, dec!(600), 3).unwrap_err();
        match err {
            DomainError::InsufficientBalance { requested, available } => {
                assert_eq!(requested, dec!(600.00));
                assert_eq!(available, dec!(500.00));
            }
            other => panic!("expected insufficient balance, got {other:?}"),
        }
        assert_eq!(account.transactions().len(), 1);
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let inst = InstitutionId::new();
        let mut account = opened(inst);
        assert!(matches!(
            transact(&mut account, inst, TransactionType::Deposit, dec!(0), 2),
            Err(DomainError::InvalidArgument(_))
        ));
    }

    #[test]
    fn oversized_deposit_is_invalid_argument() {
        let inst = InstitutionId::new();
        let mut account = opened(inst);
        transact(&mut account, inst, TransactionType::Deposit, dec!(10), 2).unwrap();

        let err = transact(&mut account, inst, TransactionType::Deposit, Decimal::MAX, 3).unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
        assert_eq!(account.balance(), dec!(10.00));
        assert_eq!(account.transactions().len(), 1);
    }

    #[test]
    fn frozen_accounts_refuse_transactions() {
        let inst = InstitutionId::new();
        let mut account = opened(inst);
        set_status(&mut account, inst, SavingsAccountStatus::Frozen).unwrap();
        assert!(matches!(
            transact(&mut account, inst, TransactionType::Deposit, dec!(10), 2),
            Err(DomainError::InvalidState(_))
        ));

        set_status(&mut account, inst, SavingsAccountStatus::Active).unwrap();
        transact(&mut account, inst, TransactionType::Deposit, dec!(10), 2).unwrap();
    }

    #[test]
    fn close_requires_zero_balance_and_is_terminal() {
        let inst = InstitutionId::new();
        let mut account = opened(inst);
        transact(&mut account, inst, TransactionType::Deposit, dec!(10), 2).unwrap();
        assert!(matches!(
            set_status(&mut account, inst, SavingsAccountStatus::Closed),
            Err(DomainError::InvalidState(_))
        ));

        transact(&mut account, inst, TransactionType::Withdrawal, dec!(10), 3).unwrap();
        set_status(&mut account, inst, SavingsAccountStatus::Closed).unwrap();
        assert!(matches!(
            set_status(&mut account, inst, SavingsAccountStatus::Active),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn reopening_conflicts() {
        let inst = InstitutionId::new();
        let account = opened(inst);
        let err = account
            .handle(&SavingsAccountCommand::Open(OpenAccount {
                institution_id: inst,
                account_id: account.id_typed(),
                member_id: MemberId::new(),
                product_id: SavingsProductId::new(),
                account_number: "SAV-000002".to_string(),
                opened_date: date(2025, 1, 1),
                liability_account_id: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn recent_transactions_are_newest_first() {
        let inst = InstitutionId::new();
        let mut account = opened(inst);
        for day in [5u32, 20, 10] {
            transact(&mut account, inst, TransactionType::Deposit, dec!(1), day).unwrap();
        }
        let recent = account.recent_transactions(2);
        let days: Vec<_> = recent.iter().map(|t| t.transaction_date).collect();
        assert_eq!(days, vec![date(2025, 1, 20), date(2025, 1, 10)]);
    }

    #[test]
    fn derived_ids_depend_on_member_and_product() {
        let member = MemberId::new();
        let product = SavingsProductId::new();
        assert_eq!(
            SavingsAccountId::for_member_product(member, product),
            SavingsAccountId::for_member_product(member, product)
        );
        assert_ne!(
            SavingsAccountId::for_member_product(member, product),
            SavingsAccountId::for_member_product(member, SavingsProductId::new())
        );
    }

    proptest! {
        /// Property: the balance equals the signed sum of recorded
        /// transactions and never goes negative.
        #[test]
        fn balance_matches_transaction_history(
            ops in prop::collection::vec((any::<bool>(), 1i64..100_000i64), 1..40)
        ) {
            let inst = InstitutionId::new();
            let mut account = opened(inst);

            for (deposit, cents) in ops {
                let kind = if deposit { TransactionType::Deposit } else { TransactionType::Withdrawal };
                let _ = transact(&mut account, inst, kind, Decimal::new(cents, 2), 15);
                prop_assert!(account.balance() >= Decimal::ZERO);
            }

            let sum: Decimal = account.transactions().iter().map(|t| t.signed_amount()).sum();
            prop_assert_eq!(account.balance(), sum);
        }
    }
}
