use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, instrument};

use coop_accounting::{
    Account, AccountId, AccountType, CreateAccount, EntryReference, JournalEntry, JournalEntryId, Ledger,
    LedgerCommand, LineInput, PostJournalEntry,
};
use coop_auth::CallerContext;
use coop_core::{DomainError, InstitutionId};

use crate::command_dispatcher::{DispatchError, Staged};
use crate::event_store::EventStore;

use super::{EngineContext, ServiceResult};

/// Chart-of-accounts entry request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub name: String,
    pub code: String,
    pub account_type: AccountType,
    pub parent_account_id: Option<AccountId>,
}

/// Manual journal entry request. `entry_date` defaults to today.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJournalEntry {
    pub entry_date: Option<NaiveDate>,
    pub description: String,
    pub reference: EntryReference,
    pub lines: Vec<LineInput>,
}

/// Create the account with `code` on the staged ledger unless it already
/// exists; either way return its id.
pub(crate) fn provision_account(
    ledger: &mut Staged<Ledger>,
    institution_id: InstitutionId,
    code: &str,
    name: &str,
    account_type: AccountType,
    now: DateTime<Utc>,
) -> Result<AccountId, DispatchError> {
    if let Some(existing) = ledger.state().account_by_code(code) {
        return Ok(existing.id);
    }
    let account_id = AccountId::new();
    ledger.execute(&LedgerCommand::CreateAccount(CreateAccount {
        institution_id,
        account_id,
        code: code.to_string(),
        name: name.to_string(),
        account_type,
        parent_account_id: None,
        occurred_at: now,
    }))?;
    Ok(account_id)
}

/// General-ledger operations: chart of accounts and balanced postings.
pub struct LedgerService<S> {
    context: Arc<EngineContext<S>>,
}

impl<S> LedgerService<S>
where
    S: EventStore,
{
    pub fn new(context: Arc<EngineContext<S>>) -> Self {
        Self { context }
    }

    #[instrument(skip_all, fields(institution_id = %institution_id, code = %request.code))]
    pub fn create_account(
        &self,
        caller: &CallerContext,
        institution_id: InstitutionId,
        request: NewAccount,
    ) -> ServiceResult<Account> {
        let ctx = &self.context;
        ctx.institutions.institution(institution_id)?;
        ctx.authorize(caller, institution_id)?;

        let account_id = AccountId::new();
        let (account, committed) = ctx.with_retries("ledger.create_account", || {
            let mut ledger = ctx.load_ledger(institution_id)?;
            ledger.execute(&LedgerCommand::CreateAccount(CreateAccount {
                institution_id,
                account_id,
                code: request.code.clone(),
                name: request.name.clone(),
                account_type: request.account_type,
                parent_account_id: request.parent_account_id,
                occurred_at: ctx.clock.now(),
            }))?;
            let account = created_account(ledger.state(), account_id)?;
            let committed = ctx.dispatcher.commit(vec![ledger.into_append()?])?;
            Ok((account, committed))
        })?;
        ctx.refresh(&committed)?;

        info!(account_id = %account.id, account_type = %account.account_type, "account created");
        Ok(account)
    }

    /// Post a balanced entry. Nothing is stored unless debits equal credits.
    #[instrument(skip_all, fields(institution_id = %institution_id, lines = request.lines.len()))]
    pub fn post_entry(
        &self,
        caller: &CallerContext,
        institution_id: InstitutionId,
        request: NewJournalEntry,
    ) -> ServiceResult<JournalEntry> {
        let ctx = &self.context;
        ctx.institutions.institution(institution_id)?;
        ctx.authorize(caller, institution_id)?;

        let entry_id = JournalEntryId::new();
        let entry_date = request.entry_date.unwrap_or_else(|| ctx.clock.today());
        let (entry, committed) = ctx.with_retries("ledger.post_entry", || {
            let mut ledger = ctx.load_ledger(institution_id)?;
            ledger.execute(&LedgerCommand::PostJournalEntry(PostJournalEntry {
                institution_id,
                entry_id,
                entry_date,
                description: request.description.clone(),
                reference: request.reference,
                lines: request.lines.clone(),
                created_by: Some(caller.user_id()),
                occurred_at: ctx.clock.now(),
            }))?;
            let entry = posted_entry(ledger.state(), entry_id)?;
            let committed = ctx.dispatcher.commit(vec![ledger.into_append()?])?;
            Ok((entry, committed))
        })?;
        ctx.refresh(&committed)?;

        info!(
            entry_id = %entry.id,
            entry_date = %entry.entry_date,
            total = %entry.total_debit(),
            "journal entry posted"
        );
        Ok(entry)
    }

    /// Entries dated within `[start, end]`, ascending by date.
    pub fn list_entries(
        &self,
        caller: &CallerContext,
        institution_id: InstitutionId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> ServiceResult<Vec<JournalEntry>> {
        self.context.authorize(caller, institution_id)?;
        Ok(self.context.ledger_snapshot(institution_id)?.entries_between(start, end))
    }

    /// The full chart of accounts in creation order.
    pub fn list_accounts(&self, caller: &CallerContext, institution_id: InstitutionId) -> ServiceResult<Vec<Account>> {
        self.context.authorize(caller, institution_id)?;
        Ok(self.context.ledger_snapshot(institution_id)?.accounts().to_vec())
    }

    /// The configured cash account, created as an asset on first use.
    #[instrument(skip_all, fields(institution_id = %institution_id))]
    pub fn get_or_create_cash_account(
        &self,
        caller: &CallerContext,
        institution_id: InstitutionId,
    ) -> ServiceResult<Account> {
        let ctx = &self.context;
        ctx.institutions.institution(institution_id)?;
        ctx.authorize(caller, institution_id)?;

        let code = ctx.config.cash_account_code.as_str();
        if let Some(existing) = ctx.ledger_snapshot(institution_id)?.account_by_code(code) {
            return Ok(existing.clone());
        }

        let (account, committed) = ctx.with_retries("ledger.cash_account", || {
            let mut ledger = ctx.load_ledger(institution_id)?;
            let account_id = provision_account(
                &mut ledger,
                institution_id,
                code,
                &ctx.config.cash_account_name,
                AccountType::Asset,
                ctx.clock.now(),
            )?;
            let account = created_account(ledger.state(), account_id)?;
            let committed = ctx.dispatcher.commit(vec![ledger.into_append()?])?;
            Ok((account, committed))
        })?;
        ctx.refresh(&committed)?;
        Ok(account)
    }
}

fn created_account(ledger: &Ledger, account_id: AccountId) -> Result<Account, DispatchError> {
    ledger
        .account(account_id)
        .cloned()
        .ok_or_else(|| DomainError::not_found(format!("account {account_id}")).into())
}

fn posted_entry(ledger: &Ledger, entry_id: JournalEntryId) -> Result<JournalEntry, DispatchError> {
    ledger
        .entries()
        .iter()
        .rev()
        .find(|e| e.id == entry_id)
        .cloned()
        .ok_or_else(|| DomainError::not_found(format!("journal entry {entry_id}")).into())
}
