use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use coop_accounting::{AccountType, JournalEntryId, LedgerCommand, PostJournalEntry};
use coop_auth::{CallerContext, ensure_own_member};
use coop_core::{DomainError, InstitutionId, MemberId};
use coop_savings::{
    ChangeStatus, CreateProduct, LinkLiabilityAccount, OpenAccount, RecordTransaction, RegisterAccount,
    RegistryCommand, RegistryEvent, SavingsAccount, SavingsAccountCommand, SavingsAccountId, SavingsAccountStatus,
    SavingsCategory, SavingsProduct, SavingsProductId, SavingsRegistry, SavingsTransaction, SavingsTransactionId,
    TransactionType, liability_account_code, liability_account_name, posting_for,
};

use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStore;

use super::ledger::provision_account;
use super::{EngineContext, ServiceResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSavingsProduct {
    pub name: String,
    pub category: SavingsCategory,
    /// Annual percent; zero when absent.
    pub interest_rate: Option<Decimal>,
    pub requires_maturity: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub account_id: SavingsAccountId,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    /// Defaults to today.
    pub transaction_date: Option<NaiveDate>,
}

/// Outcome of a deposit or withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTransaction {
    pub transaction: SavingsTransaction,
    pub balance_after: Decimal,
    pub journal_entry_id: JournalEntryId,
}

/// Savings products, member accounts, and the deposit/withdrawal posting path.
pub struct SavingsService<S> {
    context: Arc<EngineContext<S>>,
}

impl<S> SavingsService<S>
where
    S: EventStore,
{
    pub fn new(context: Arc<EngineContext<S>>) -> Self {
        Self { context }
    }

    #[instrument(skip_all, fields(sacco_id = %sacco_id, category = request.category.as_str()))]
    pub fn create_product(
        &self,
        caller: &CallerContext,
        sacco_id: InstitutionId,
        request: NewSavingsProduct,
    ) -> ServiceResult<SavingsProduct> {
        let ctx = &self.context;
        ctx.institutions.institution(sacco_id)?;
        ctx.authorize(caller, sacco_id)?;

        let product_id = SavingsProductId::new();
        let (product, committed) = ctx.with_retries("savings.create_product", || {
            let mut registry = ctx.load_registry(sacco_id)?;
            registry.execute(&RegistryCommand::CreateProduct(CreateProduct {
                institution_id: sacco_id,
                product_id,
                name: request.name.clone(),
                category: request.category,
                interest_rate: request.interest_rate,
                requires_maturity: request.requires_maturity,
                occurred_at: ctx.clock.now(),
            }))?;
            let product = registry
                .state()
                .product(product_id)
                .cloned()
                .ok_or_else(|| DomainError::not_found(format!("savings product {product_id}")))?;
            let committed = ctx.dispatcher.commit(vec![registry.into_append()?])?;
            Ok((product, committed))
        })?;
        ctx.refresh(&committed)?;

        info!(product_id = %product.id, name = %product.name, "savings product created");
        Ok(product)
    }

    pub fn list_products(&self, caller: &CallerContext, sacco_id: InstitutionId) -> ServiceResult<Vec<SavingsProduct>> {
        self.context.authorize(caller, sacco_id)?;
        Ok(self.context.registry_snapshot(sacco_id)?.products().to_vec())
    }

    /// Open the member's account for a product, together with its
    /// member-liability ledger account.
    #[instrument(skip_all, fields(member_id = %member_id, product_id = %product_id))]
    pub fn open_account(
        &self,
        caller: &CallerContext,
        member_id: MemberId,
        product_id: SavingsProductId,
    ) -> ServiceResult<SavingsAccount> {
        let ctx = &self.context;
        let member = ctx.members.member(member_id)?;
        ctx.authorize(caller, member.sacco_id)?;
        ensure_own_member(caller, member_id)?;

        let sacco_id = member.sacco_id;
        let account_id = SavingsAccountId::for_member_product(member_id, product_id);
        let (account, committed) = ctx.with_retries("savings.open_account", || {
            let now = ctx.clock.now();
            let mut registry = ctx.load_registry(sacco_id)?;
            let product = registry
                .state()
                .product(product_id)
                .cloned()
                .ok_or_else(|| DomainError::not_found(format!("savings product {product_id}")))?;
            let registered = registry.execute(&RegistryCommand::RegisterAccount(RegisterAccount {
                institution_id: sacco_id,
                account_id,
                member_id,
                product_id,
                occurred_at: now,
            }))?;
            let account_number = registered
                .iter()
                .find_map(|e| match e {
                    RegistryEvent::AccountRegistered(r) => Some(r.account_number.clone()),
                    _ => None,
                })
                .ok_or_else(|| DomainError::not_found(format!("account number for {account_id}")))?;

            let mut ledger = ctx.load_ledger(sacco_id)?;
            let liability_account_id = provision_account(
                &mut ledger,
                sacco_id,
                &liability_account_code(member_id, product_id),
                &liability_account_name(&member.member_number, &product.name),
                AccountType::Liability,
                now,
            )?;

            let mut account = ctx.load_savings_account(sacco_id, account_id)?;
            account.execute(&SavingsAccountCommand::Open(OpenAccount {
                institution_id: sacco_id,
                account_id,
                member_id,
                product_id,
                account_number,
                opened_date: ctx.clock.today(),
                liability_account_id: Some(liability_account_id),
                occurred_at: now,
            }))?;
            let opened = account.state().clone();

            let committed = ctx.dispatcher.commit(vec![
                registry.into_append()?,
                ledger.into_append()?,
                account.into_append()?,
            ])?;
            Ok((opened, committed))
        })?;
        ctx.refresh(&committed)?;

        info!(account_id = %account_id, account_number = account.account_number(), "savings account opened");
        Ok(account)
    }

    /// Record a deposit or withdrawal and post its ledger entry in the same
    /// commit.
    #[instrument(skip_all, fields(
        account_id = %request.account_id,
        transaction_type = request.transaction_type.as_str(),
        amount = %request.amount
    ))]
    pub fn record_transaction(
        &self,
        caller: &CallerContext,
        request: TransactionRequest,
    ) -> ServiceResult<RecordedTransaction> {
        let ctx = &self.context;
        let (sacco_id, snapshot) = self.context.locate_savings_account(request.account_id)?;
        ctx.authorize(caller, sacco_id)?;
        if let Some(member_id) = snapshot.member_id() {
            ensure_own_member(caller, member_id)?;
        }

        let transaction_id = SavingsTransactionId::new();
        let entry_id = JournalEntryId::new();
        let transaction_date = request.transaction_date.unwrap_or_else(|| ctx.clock.today());

        let (recorded, committed) = ctx.with_retries("savings.record_transaction", || {
            let now = ctx.clock.now();
            let mut account = ctx.load_savings_account(sacco_id, request.account_id)?;
            let mut ledger = ctx.load_ledger(sacco_id)?;

            let liability_account_id = match account.state().liability_account_id() {
                Some(id) => id,
                None => {
                    let registry = ctx.load_registry(sacco_id)?;
                    let (code, name) = self.liability_identity(registry.state(), account.state())?;
                    let id = provision_account(&mut ledger, sacco_id, &code, &name, AccountType::Liability, now)?;
                    account.execute(&SavingsAccountCommand::LinkLiabilityAccount(LinkLiabilityAccount {
                        institution_id: sacco_id,
                        account_id: request.account_id,
                        liability_account_id: id,
                        occurred_at: now,
                    }))?;
                    id
                }
            };

            account.execute(&SavingsAccountCommand::RecordTransaction(RecordTransaction {
                institution_id: sacco_id,
                account_id: request.account_id,
                transaction_id,
                transaction_type: request.transaction_type,
                amount: request.amount,
                transaction_date,
                created_by: Some(caller.user_id()),
                occurred_at: now,
            }))?;
            let transaction = account
                .state()
                .transactions()
                .last()
                .filter(|t| t.id == transaction_id)
                .cloned()
                .ok_or_else(|| DomainError::not_found(format!("savings transaction {transaction_id}")))?;
            let balance_after = account.state().balance();

            let cash_account_id = provision_account(
                &mut ledger,
                sacco_id,
                &ctx.config.cash_account_code,
                &ctx.config.cash_account_name,
                AccountType::Asset,
                now,
            )?;
            let posting = posting_for(&transaction, cash_account_id, liability_account_id);
            ledger.execute(&LedgerCommand::PostJournalEntry(PostJournalEntry {
                institution_id: sacco_id,
                entry_id,
                entry_date: posting.entry_date,
                description: posting.description.to_string(),
                reference: posting.reference,
                lines: posting.lines,
                created_by: Some(caller.user_id()),
                occurred_at: now,
            }))?;

            let committed = ctx
                .dispatcher
                .commit(vec![account.into_append()?, ledger.into_append()?])?;
            let recorded = RecordedTransaction {
                transaction,
                balance_after,
                journal_entry_id: entry_id,
            };
            Ok((recorded, committed))
        })?;
        ctx.refresh(&committed)?;

        info!(
            transaction_id = %recorded.transaction.id,
            entry_id = %recorded.journal_entry_id,
            balance_after = %recorded.balance_after,
            "savings transaction posted"
        );
        Ok(recorded)
    }

    pub fn freeze(&self, caller: &CallerContext, account_id: SavingsAccountId) -> ServiceResult<SavingsAccount> {
        self.change_status(caller, account_id, SavingsAccountStatus::Frozen)
    }

    pub fn reactivate(&self, caller: &CallerContext, account_id: SavingsAccountId) -> ServiceResult<SavingsAccount> {
        self.change_status(caller, account_id, SavingsAccountStatus::Active)
    }

    /// Close an account; only allowed at zero balance.
    pub fn close(&self, caller: &CallerContext, account_id: SavingsAccountId) -> ServiceResult<SavingsAccount> {
        self.change_status(caller, account_id, SavingsAccountStatus::Closed)
    }

    pub fn get_account(&self, caller: &CallerContext, account_id: SavingsAccountId) -> ServiceResult<SavingsAccount> {
        let (sacco_id, account) = self.context.locate_savings_account(account_id)?;
        self.context.authorize(caller, sacco_id)?;
        if let Some(member_id) = account.member_id() {
            ensure_own_member(caller, member_id)?;
        }
        Ok(account)
    }

    pub fn list_accounts_by_member(
        &self,
        caller: &CallerContext,
        member_id: MemberId,
    ) -> ServiceResult<Vec<SavingsAccount>> {
        let ctx = &self.context;
        ensure_own_member(caller, member_id)?;
        let member = ctx.members.member(member_id)?;
        ctx.authorize(caller, member.sacco_id)?;

        Ok(ctx
            .savings_accounts_of(member.sacco_id)?
            .into_iter()
            .filter(|a| a.member_id() == Some(member_id))
            .collect())
    }

    /// Up to `limit` transactions, newest first.
    pub fn list_transactions(
        &self,
        caller: &CallerContext,
        account_id: SavingsAccountId,
        limit: usize,
    ) -> ServiceResult<Vec<SavingsTransaction>> {
        Ok(self.get_account(caller, account_id)?.recent_transactions(limit))
    }

    #[instrument(skip_all, fields(account_id = %account_id, target = %target))]
    fn change_status(
        &self,
        caller: &CallerContext,
        account_id: SavingsAccountId,
        target: SavingsAccountStatus,
    ) -> ServiceResult<SavingsAccount> {
        let ctx = &self.context;
        let (sacco_id, _) = self.context.locate_savings_account(account_id)?;
        ctx.authorize(caller, sacco_id)?;

        let (account, committed) = ctx.with_retries("savings.change_status", || {
            let mut account = ctx.load_savings_account(sacco_id, account_id)?;
            account.execute(&SavingsAccountCommand::ChangeStatus(ChangeStatus {
                institution_id: sacco_id,
                account_id,
                target,
                occurred_at: ctx.clock.now(),
            }))?;
            let updated = account.state().clone();
            let committed = ctx.dispatcher.commit(vec![account.into_append()?])?;
            Ok::<_, DispatchError>((updated, committed))
        })?;
        ctx.refresh(&committed)?;

        info!(status = %account.status(), "savings account status changed");
        Ok(account)
    }

    /// Deterministic code and name of an account's member-liability ledger account.
    fn liability_identity(
        &self,
        registry: &SavingsRegistry,
        account: &SavingsAccount,
    ) -> Result<(String, String), DispatchError> {
        let ctx = &self.context;
        let member_id = account
            .member_id()
            .ok_or_else(|| DomainError::not_found(format!("member of savings account {}", account.id_typed())))?;
        let product_id = account
            .product_id()
            .ok_or_else(|| DomainError::not_found(format!("product of savings account {}", account.id_typed())))?;
        let member = ctx.members.member(member_id)?;
        let product = registry
            .product(product_id)
            .ok_or_else(|| DomainError::not_found(format!("savings product {product_id}")))?;

        Ok((
            liability_account_code(member_id, product_id),
            liability_account_name(&member.member_number, &product.name),
        ))
    }
}
