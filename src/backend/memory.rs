//! In-memory backend
//!
//! Keeps the ledger in a `Vec` and records every executed statement instead
//! of running it. Used as the crate's test double and for dry-running a
//! registry without a database. Transaction support and statement failures
//! are configurable so both sides of the transactional rule can be
//! exercised.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::backend::{Backend, StepUnit};
use crate::error::{MigroError, MigroResult};
use crate::ledger::{LedgerEntry, LedgerFilter, LedgerRecord};

#[derive(Default)]
struct State {
    installed: bool,
    next_id: i64,
    rows: Vec<LedgerRecord>,
    statements: Vec<String>,
}

impl State {
    fn apply_insert(&mut self, entry: &LedgerEntry) {
        self.next_id += 1;
        self.rows.push(LedgerRecord {
            id: self.next_id,
            table: entry.table.clone(),
            tag: entry.tag.clone(),
            step: entry.step,
            batch: entry.batch,
            ran_at: Utc::now(),
        });
    }

    fn apply_delete(&mut self, id: i64) {
        self.rows.retain(|r| r.id != id);
    }
}

/// In-memory ledger and statement recorder
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
    transactional_ddl: bool,
    fail_on: Option<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            transactional_ddl: true,
            fail_on: None,
        }
    }

    /// Behave like a backend without transactional DDL
    pub fn without_ddl_transactions(mut self) -> Self {
        self.transactional_ddl = false;
        self
    }

    /// Fail any statement containing the given fragment
    pub fn fail_on_statement(mut self, fragment: impl Into<String>) -> Self {
        self.fail_on = Some(fragment.into());
        self
    }

    /// Statements executed so far, in execution order
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    /// Current ledger rows
    pub fn rows(&self) -> Vec<LedgerRecord> {
        self.state.lock().unwrap().rows.clone()
    }

    /// Applied step numbers for one lineage, ascending
    pub fn applied_steps(&self, table: &str, tag: Option<&str>) -> Vec<i32> {
        let mut steps: Vec<i32> = self
            .state
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|r| r.table == table && r.tag.as_deref() == tag)
            .map(|r| r.step)
            .collect();
        steps.sort_unstable();
        steps
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn supports_ddl_transactions(&self) -> bool {
        self.transactional_ddl
    }

    async fn install(&self) -> MigroResult<()> {
        self.state.lock().unwrap().installed = true;
        Ok(())
    }

    async fn is_installed(&self) -> MigroResult<bool> {
        Ok(self.state.lock().unwrap().installed)
    }

    async fn max_step(&self, table: &str, tag: Option<&str>) -> MigroResult<i32> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|r| r.table == table && r.tag.as_deref() == tag)
            .map(|r| r.step)
            .max()
            .unwrap_or(0))
    }

    async fn max_batch(&self, filter: &LedgerFilter) -> MigroResult<Option<i32>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| r.batch)
            .max())
    }

    async fn records(&self, filter: &LedgerFilter) -> MigroResult<Vec<LedgerRecord>> {
        let mut records: Vec<LedgerRecord> = self
            .state
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.step.cmp(&a.step));
        Ok(records)
    }

    async fn transaction(&self) -> MigroResult<Box<dyn StepUnit>> {
        Ok(Box::new(MemoryUnit {
            state: self.state.clone(),
            fail_on: self.fail_on.clone(),
            staged: Some(Staged::default()),
        }))
    }

    async fn autocommit(&self) -> MigroResult<Box<dyn StepUnit>> {
        Ok(Box::new(MemoryUnit {
            state: self.state.clone(),
            fail_on: self.fail_on.clone(),
            staged: None,
        }))
    }
}

#[derive(Default)]
struct Staged {
    statements: Vec<String>,
    inserts: Vec<LedgerEntry>,
    deletes: Vec<i64>,
}

/// Staging unit: with `staged` present, work is buffered until commit and
/// discarded on drop; without it, every call applies immediately
struct MemoryUnit {
    state: Arc<Mutex<State>>,
    fail_on: Option<String>,
    staged: Option<Staged>,
}

#[async_trait]
impl StepUnit for MemoryUnit {
    async fn execute(&mut self, sql: &str) -> MigroResult<()> {
        if let Some(fragment) = &self.fail_on {
            if sql.contains(fragment.as_str()) {
                return Err(MigroError::Database(format!(
                    "statement rejected: {}",
                    sql
                )));
            }
        }
        match &mut self.staged {
            Some(staged) => staged.statements.push(sql.to_string()),
            None => self.state.lock().unwrap().statements.push(sql.to_string()),
        }
        Ok(())
    }

    async fn insert_record(&mut self, entry: &LedgerEntry) -> MigroResult<()> {
        match &mut self.staged {
            Some(staged) => staged.inserts.push(entry.clone()),
            None => self.state.lock().unwrap().apply_insert(entry),
        }
        Ok(())
    }

    async fn delete_record(&mut self, id: i64) -> MigroResult<()> {
        match &mut self.staged {
            Some(staged) => staged.deletes.push(id),
            None => self.state.lock().unwrap().apply_delete(id),
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> MigroResult<()> {
        if let Some(staged) = self.staged.take() {
            let mut state = self.state.lock().unwrap();
            state.statements.extend(staged.statements);
            for entry in &staged.inserts {
                state.apply_insert(entry);
            }
            for id in staged.deletes {
                state.apply_delete(id);
            }
        }
        Ok(())
    }
}
