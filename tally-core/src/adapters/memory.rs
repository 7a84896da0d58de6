//! In-memory store implementing every import port

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{
    Account, Category, CategoryRule, ImportBatch, RawTransactionRow, Transaction,
    SYSTEM_CATEGORIES,
};
use crate::ports::{
    AccountRegistry, BatchFilter, BatchRepository, CategoryRegistry, LedgerRepository,
    Pagination, RuleRepository,
};

#[derive(Default)]
struct State {
    accounts: HashMap<Uuid, Account>,
    categories: HashMap<String, Category>,
    rules: HashMap<Uuid, CategoryRule>,
    batches: HashMap<Uuid, ImportBatch>,
    rows: HashMap<Uuid, RawTransactionRow>,
    transactions: HashMap<Uuid, Transaction>,
}

/// Volatile store seeded with the system categories
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        let categories = SYSTEM_CATEGORIES
            .iter()
            .map(|(id, name)| (id.to_string(), Category::system(id, name)))
            .collect();
        Self {
            state: Mutex::new(State {
                categories,
                ..Default::default()
            }),
        }
    }

    /// Register a custom category
    pub fn add_category(&self, category: Category) -> Result<()> {
        self.lock()?.categories.insert(category.id.clone(), category);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::database("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl BatchRepository for InMemoryRepository {
    async fn insert_batch(&self, batch: &ImportBatch) -> Result<()> {
        self.lock()?.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn update_batch(&self, batch: &ImportBatch) -> Result<()> {
        let mut state = self.lock()?;
        match state.batches.get_mut(&batch.id) {
            Some(stored) => {
                *stored = batch.clone();
                Ok(())
            }
            None => Err(Error::not_found(format!("Import batch not found: {}", batch.id))),
        }
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<ImportBatch>> {
        Ok(self.lock()?.batches.get(&id).cloned())
    }

    async fn list_batches(&self, filter: &BatchFilter, page: Pagination) -> Result<Vec<ImportBatch>> {
        let state = self.lock()?;
        let mut batches: Vec<ImportBatch> = state
            .batches
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        batches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(batches
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn insert_rows(&self, rows: &[RawTransactionRow]) -> Result<()> {
        let mut state = self.lock()?;
        for row in rows {
            state.rows.insert(row.id, row.clone());
        }
        Ok(())
    }

    async fn update_row(&self, row: &RawTransactionRow) -> Result<()> {
        let mut state = self.lock()?;
        match state.rows.get_mut(&row.id) {
            Some(stored) => {
                *stored = row.clone();
                Ok(())
            }
            None => Err(Error::not_found(format!("Import row not found: {}", row.id))),
        }
    }

    async fn get_rows(&self, batch_id: Uuid) -> Result<Vec<RawTransactionRow>> {
        let state = self.lock()?;
        let mut rows: Vec<RawTransactionRow> = state
            .rows
            .values()
            .filter(|r| r.batch_id == batch_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.row_number);
        Ok(rows)
    }
}

#[async_trait]
impl LedgerRepository for InMemoryRepository {
    async fn commit_row(&self, row: &RawTransactionRow, tx: &Transaction) -> Result<()> {
        let mut state = self.lock()?;
        if state.transactions.values().any(|t| t.raw_row_id == row.id) {
            return Err(Error::invalid_state(format!(
                "Row {} of batch {} is already committed",
                row.row_number, row.batch_id
            )));
        }
        if !state.rows.contains_key(&row.id) {
            return Err(Error::not_found(format!("Import row not found: {}", row.id)));
        }
        state.transactions.insert(tx.id, tx.clone());
        state.rows.insert(row.id, row.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self.lock()?.transactions.get(&id).cloned())
    }

    async fn get_transactions_by_batch(&self, batch_id: Uuid) -> Result<Vec<Transaction>> {
        let state = self.lock()?;
        let mut transactions: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| t.import_batch_id == batch_id)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| {
            a.transaction_date
                .cmp(&b.transaction_date)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(transactions)
    }
}

#[async_trait]
impl AccountRegistry for InMemoryRepository {
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.lock()?.accounts.get(&id).cloned())
    }

    async fn add_account(&self, account: &Account) -> Result<()> {
        let mut state = self.lock()?;
        if state.accounts.contains_key(&account.id) {
            return Err(Error::validation(format!("Account already exists: {}", account.id)));
        }
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self.lock()?.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(accounts)
    }
}

#[async_trait]
impl CategoryRegistry for InMemoryRepository {
    async fn get_category(&self, id: &str) -> Result<Option<Category>> {
        Ok(self.lock()?.categories.get(id).cloned())
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        let mut categories: Vec<Category> = self.lock()?.categories.values().cloned().collect();
        categories.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(categories)
    }
}

#[async_trait]
impl RuleRepository for InMemoryRepository {
    async fn insert_rule(&self, rule: &CategoryRule) -> Result<()> {
        self.lock()?.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn update_rule(&self, rule: &CategoryRule) -> Result<()> {
        let mut state = self.lock()?;
        match state.rules.get_mut(&rule.id) {
            Some(stored) => {
                *stored = rule.clone();
                Ok(())
            }
            None => Err(Error::not_found(format!("Rule not found: {}", rule.id))),
        }
    }

    async fn delete_rule(&self, id: Uuid) -> Result<bool> {
        Ok(self.lock()?.rules.remove(&id).is_some())
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<CategoryRule>> {
        Ok(self.lock()?.rules.get(&id).cloned())
    }

    async fn list_rules(&self, user_id: &str) -> Result<Vec<CategoryRule>> {
        let mut rules: Vec<CategoryRule> = self
            .lock()?
            .rules
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(rules)
    }

    async fn active_rules(&self, user_id: &str) -> Result<Vec<CategoryRule>> {
        let mut rules = self.list_rules(user_id).await?;
        rules.retain(|r| r.is_active);
        Ok(rules)
    }
}
