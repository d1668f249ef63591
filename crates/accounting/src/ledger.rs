use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use coop_core::money::{checked_add_money, ensure_money};
use coop_core::{Aggregate, AggregateId, AggregateRoot, DomainError, InstitutionId, UserId};
use coop_events::Event;

use crate::{
    Account, AccountId, AccountType, EntryReference, JournalEntry, JournalEntryId, JournalLine,
    LineInput,
};

/// Stream type tag for ledger events.
pub const LEDGER_AGGREGATE_TYPE: &str = "accounting.ledger";

/// Ledger identifier: exactly one ledger per institution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerId(pub AggregateId);

impl LedgerId {
    pub fn for_institution(institution_id: InstitutionId) -> Self {
        Self(AggregateId::from_uuid(*institution_id.as_uuid()))
    }
}

impl core::fmt::Display for LedgerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: an institution's general ledger.
///
/// Owns the chart of accounts and every balanced journal entry. Entries are
/// immutable once posted; there is no update or delete path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    id: LedgerId,
    institution_id: Option<InstitutionId>,
    accounts: Vec<Account>,
    account_index: HashMap<AccountId, usize>,
    code_index: HashMap<String, AccountId>,
    entries: Vec<JournalEntry>,
    version: u64,
}

impl Ledger {
    /// Empty aggregate for rehydration.
    pub fn empty(id: LedgerId) -> Self {
        Self {
            id,
            institution_id: None,
            accounts: Vec::new(),
            account_index: HashMap::new(),
            code_index: HashMap::new(),
            entries: Vec::new(),
            version: 0,
        }
    }

    pub fn for_institution(institution_id: InstitutionId) -> Self {
        Self::empty(LedgerId::for_institution(institution_id))
    }

    pub fn id_typed(&self) -> LedgerId {
        self.id
    }

    pub fn institution_id(&self) -> Option<InstitutionId> {
        self.institution_id
    }

    /// Chart of accounts in provisioning order.
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.account_index.get(&id).map(|&idx| &self.accounts[idx])
    }

    pub fn account_by_code(&self, code: &str) -> Option<&Account> {
        self.code_index.get(code).and_then(|id| self.account(*id))
    }

    /// Entries in posting order.
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Entries with `start <= entry_date <= end`, ascending by date.
    pub fn entries_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<JournalEntry> {
        let mut found: Vec<JournalEntry> = self
            .entries
            .iter()
            .filter(|e| e.entry_date >= start && e.entry_date <= end)
            .cloned()
            .collect();
        // Stable: same-day entries keep posting order.
        found.sort_by_key(|e| e.entry_date);
        found
    }
}

impl AggregateRoot for Ledger {
    type Id = LedgerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccount {
    pub institution_id: InstitutionId,
    pub account_id: AccountId,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub parent_account_id: Option<AccountId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostJournalEntry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostJournalEntry {
    pub institution_id: InstitutionId,
    pub entry_id: JournalEntryId,
    pub entry_date: NaiveDate,
    pub description: String,
    pub reference: EntryReference,
    pub lines: Vec<LineInput>,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    CreateAccount(CreateAccount),
    PostJournalEntry(PostJournalEntry),
}

/// Event: AccountCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCreated {
    pub account: Account,
    pub occurred_at: DateTime<Utc>,
}

/// Event: JournalEntryPosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryPosted {
    pub entry: JournalEntry,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    AccountCreated(AccountCreated),
    JournalEntryPosted(JournalEntryPosted),
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::AccountCreated(_) => "accounting.ledger.account_created",
            LedgerEvent::JournalEntryPosted(_) => "accounting.ledger.journal_entry_posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::AccountCreated(e) => e.occurred_at,
            LedgerEvent::JournalEntryPosted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Ledger {
    type Command = LedgerCommand;
    type Event = LedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LedgerEvent::AccountCreated(e) => {
                if self.institution_id.is_none() {
                    self.institution_id = Some(e.account.institution_id);
                }
                let idx = self.accounts.len();
                self.account_index.insert(e.account.id, idx);
                self.code_index.insert(e.account.code.clone(), e.account.id);
                self.accounts.push(e.account.clone());
            }
            LedgerEvent::JournalEntryPosted(e) => {
                if self.institution_id.is_none() {
                    self.institution_id = Some(e.entry.institution_id);
                }
                self.entries.push(e.entry.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LedgerCommand::CreateAccount(cmd) => self.handle_create_account(cmd),
            LedgerCommand::PostJournalEntry(cmd) => self.handle_post(cmd),
        }
    }
}

impl Ledger {
    fn ensure_institution(&self, institution_id: InstitutionId) -> Result<(), DomainError> {
        match self.institution_id {
            Some(owner) if owner != institution_id => Err(DomainError::invalid_argument(
                "ledger belongs to a different institution",
            )),
            _ => Ok(()),
        }
    }

    fn handle_create_account(&self, cmd: &CreateAccount) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_institution(cmd.institution_id)?;

        let code = cmd.code.trim();
        if code.is_empty() {
            return Err(DomainError::invalid_argument("account code must not be empty"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::invalid_argument("account name must not be empty"));
        }
        if self.account_by_code(code).is_some() {
            return Err(DomainError::conflict(format!(
                "account code '{code}' already exists"
            )));
        }
        if self.account(cmd.account_id).is_some() {
            return Err(DomainError::conflict(format!(
                "account {} already exists",
                cmd.account_id
            )));
        }
        // Parents must pre-exist, so the account tree can never form a cycle.
        if let Some(parent) = cmd.parent_account_id {
            if self.account(parent).is_none() {
                return Err(DomainError::not_found(format!("parent account {parent}")));
            }
        }

        Ok(vec![LedgerEvent::AccountCreated(AccountCreated {
            account: Account {
                id: cmd.account_id,
                institution_id: cmd.institution_id,
                code: code.to_string(),
                name: cmd.name.trim().to_string(),
                account_type: cmd.account_type,
                parent_account_id: cmd.parent_account_id,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_post(&self, cmd: &PostJournalEntry) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_institution(cmd.institution_id)?;

        if cmd.lines.is_empty() {
            return Err(DomainError::invalid_argument("journal entry must have lines"));
        }

        let mut debit_total = Decimal::ZERO;
        let mut credit_total = Decimal::ZERO;
        let mut lines = Vec::with_capacity(cmd.lines.len());

        for (idx, line) in cmd.lines.iter().enumerate() {
            let debit = ensure_money(line.debit, "debit")?;
            let credit = ensure_money(line.credit, "credit")?;
            if self.account(line.account_id).is_none() {
                return Err(DomainError::not_found(format!("account {}", line.account_id)));
            }
            debit_total = checked_add_money(debit_total, debit, "debit total")?;
            credit_total = checked_add_money(credit_total, credit, "credit total")?;
            lines.push(JournalLine {
                line_no: idx as u32 + 1,
                account_id: line.account_id,
                debit,
                credit,
            });
        }

        if debit_total != credit_total {
            return Err(DomainError::invalid_argument(format!(
                "debits must equal credits (debit {debit_total}, credit {credit_total})"
            )));
        }

        Ok(vec![LedgerEvent::JournalEntryPosted(JournalEntryPosted {
            entry: JournalEntry {
                id: cmd.entry_id,
                institution_id: cmd.institution_id,
                entry_date: cmd.entry_date,
                description: cmd.description.clone(),
                reference: cmd.reference,
                created_by: cmd.created_by,
                lines,
            },
            occurred_at: cmd.occurred_at,
        })])
    }
}
