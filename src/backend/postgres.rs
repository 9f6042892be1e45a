//! PostgreSQL backend over sqlx
//!
//! Postgres has transactional DDL, so by default every step's statements
//! and its ledger mutation commit or roll back together. The ledger table
//! name comes from [`MigroConfig`]; the `table` column is quoted because it
//! collides with a reserved word.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Row, Transaction};

use crate::backend::{Backend, StepUnit};
use crate::config::MigroConfig;
use crate::error::{MigroError, MigroResult};
use crate::ledger::{LedgerEntry, LedgerFilter, LedgerRecord, TagFilter};

/// PostgreSQL-backed ledger and DDL executor
pub struct PgBackend {
    pool: PgPool,
    config: MigroConfig,
}

impl PgBackend {
    /// Create a backend with the default configuration
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(pool, MigroConfig::default())
    }

    pub fn with_config(pool: PgPool, config: MigroConfig) -> Self {
        Self { pool, config }
    }

    /// Create a backend from a database URL
    pub async fn connect(database_url: &str) -> MigroResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| MigroError::Database(format!("failed to connect: {}", e)))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &MigroConfig {
        &self.config
    }

    /// WHERE clause and bind order for a ledger filter. Binds must be
    /// applied in the same order: table, tag, batch, batch_after.
    fn filter_conditions(filter: &LedgerFilter) -> Vec<String> {
        let mut conditions = Vec::new();
        let mut idx = 0;

        if filter.table.is_some() {
            idx += 1;
            conditions.push(format!("\"table\" = ${}", idx));
        }
        match &filter.tag {
            TagFilter::Any => {}
            TagFilter::Untagged => conditions.push("tag IS NULL".to_string()),
            TagFilter::Is(_) => {
                idx += 1;
                conditions.push(format!("tag = ${}", idx));
            }
        }
        if filter.batch.is_some() {
            idx += 1;
            conditions.push(format!("batch = ${}", idx));
        }
        if filter.batch_after.is_some() {
            idx += 1;
            conditions.push(format!("batch > ${}", idx));
        }

        conditions
    }

    fn where_clause(conditions: &[String]) -> String {
        if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        }
    }

    fn bind_filter<'q>(
        mut query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
        filter: &'q LedgerFilter,
    ) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
        if let Some(table) = &filter.table {
            query = query.bind(table);
        }
        if let TagFilter::Is(tag) = &filter.tag {
            query = query.bind(tag);
        }
        if let Some(batch) = filter.batch {
            query = query.bind(batch);
        }
        if let Some(after) = filter.batch_after {
            query = query.bind(after);
        }
        query
    }
}

#[async_trait]
impl Backend for PgBackend {
    fn supports_ddl_transactions(&self) -> bool {
        true
    }

    async fn install(&self) -> MigroResult<()> {
        sqlx::query(&install_sql(&self.config.ledger_table))
            .execute(&self.pool)
            .await
            .map_err(|e| MigroError::Ledger(format!("failed to create ledger table: {}", e)))?;
        Ok(())
    }

    async fn is_installed(&self) -> MigroResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
        )
        .bind(&self.config.ledger_table)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MigroError::Ledger(format!("failed to check ledger table: {}", e)))?;

        row.try_get(0)
            .map_err(|e| MigroError::Ledger(format!("failed to decode ledger check: {}", e)))
    }

    async fn max_step(&self, table: &str, tag: Option<&str>) -> MigroResult<i32> {
        let sql = match tag {
            Some(_) => format!(
                "SELECT COALESCE(MAX(step), 0) FROM {} WHERE \"table\" = $1 AND tag = $2",
                self.config.ledger_table
            ),
            None => format!(
                "SELECT COALESCE(MAX(step), 0) FROM {} WHERE \"table\" = $1 AND tag IS NULL",
                self.config.ledger_table
            ),
        };

        let mut query = sqlx::query(&sql).bind(table);
        if let Some(tag) = tag {
            query = query.bind(tag);
        }

        let row = query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigroError::Ledger(format!("failed to query last step: {}", e)))?;

        row.try_get(0)
            .map_err(|e| MigroError::Ledger(format!("failed to decode last step: {}", e)))
    }

    async fn max_batch(&self, filter: &LedgerFilter) -> MigroResult<Option<i32>> {
        let conditions = Self::filter_conditions(filter);
        let sql = format!(
            "SELECT MAX(batch) FROM {}{}",
            self.config.ledger_table,
            Self::where_clause(&conditions)
        );

        let row = Self::bind_filter(sqlx::query(&sql), filter)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigroError::Ledger(format!("failed to query last batch: {}", e)))?;

        row.try_get(0)
            .map_err(|e| MigroError::Ledger(format!("failed to decode last batch: {}", e)))
    }

    async fn records(&self, filter: &LedgerFilter) -> MigroResult<Vec<LedgerRecord>> {
        let conditions = Self::filter_conditions(filter);
        let sql = format!(
            "SELECT id, \"table\", tag, step, batch, ran_at FROM {}{} ORDER BY step DESC",
            self.config.ledger_table,
            Self::where_clause(&conditions)
        );

        let rows = Self::bind_filter(sqlx::query(&sql), filter)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigroError::Ledger(format!("failed to query ledger rows: {}", e)))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(LedgerRecord {
                id: row
                    .try_get("id")
                    .map_err(|e| MigroError::Ledger(format!("failed to decode id: {}", e)))?,
                table: row
                    .try_get("table")
                    .map_err(|e| MigroError::Ledger(format!("failed to decode table: {}", e)))?,
                tag: row
                    .try_get("tag")
                    .map_err(|e| MigroError::Ledger(format!("failed to decode tag: {}", e)))?,
                step: row
                    .try_get("step")
                    .map_err(|e| MigroError::Ledger(format!("failed to decode step: {}", e)))?,
                batch: row
                    .try_get("batch")
                    .map_err(|e| MigroError::Ledger(format!("failed to decode batch: {}", e)))?,
                ran_at: row
                    .try_get("ran_at")
                    .map_err(|e| MigroError::Ledger(format!("failed to decode ran_at: {}", e)))?,
            });
        }

        Ok(records)
    }

    async fn transaction(&self) -> MigroResult<Box<dyn StepUnit>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MigroError::Database(format!("failed to start transaction: {}", e)))?;
        Ok(Box::new(PgTransactionUnit {
            tx,
            ledger_table: self.config.ledger_table.clone(),
        }))
    }

    async fn autocommit(&self) -> MigroResult<Box<dyn StepUnit>> {
        Ok(Box::new(PgAutocommitUnit {
            pool: self.pool.clone(),
            ledger_table: self.config.ledger_table.clone(),
        }))
    }
}

fn install_sql(ledger_table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    \
            id BIGSERIAL PRIMARY KEY,\n    \
            \"table\" VARCHAR(255) NOT NULL,\n    \
            tag VARCHAR(255),\n    \
            step INTEGER NOT NULL,\n    \
            batch INTEGER NOT NULL,\n    \
            ran_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP\n\
        );",
        ledger_table
    )
}

fn insert_sql(ledger_table: &str) -> String {
    format!(
        "INSERT INTO {} (\"table\", tag, step, batch) VALUES ($1, $2, $3, $4)",
        ledger_table
    )
}

fn delete_sql(ledger_table: &str) -> String {
    format!("DELETE FROM {} WHERE id = $1", ledger_table)
}

/// Step unit backed by a database transaction; rolls back on drop
struct PgTransactionUnit {
    tx: Transaction<'static, Postgres>,
    ledger_table: String,
}

#[async_trait]
impl StepUnit for PgTransactionUnit {
    async fn execute(&mut self, sql: &str) -> MigroResult<()> {
        sqlx::query(sql)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| MigroError::Database(format!("failed to execute statement: {}", e)))?;
        Ok(())
    }

    async fn insert_record(&mut self, entry: &LedgerEntry) -> MigroResult<()> {
        sqlx::query(&insert_sql(&self.ledger_table))
            .bind(&entry.table)
            .bind(&entry.tag)
            .bind(entry.step)
            .bind(entry.batch)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| MigroError::Ledger(format!("failed to record step: {}", e)))?;
        Ok(())
    }

    async fn delete_record(&mut self, id: i64) -> MigroResult<()> {
        sqlx::query(&delete_sql(&self.ledger_table))
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| MigroError::Ledger(format!("failed to delete ledger row: {}", e)))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> MigroResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| MigroError::Database(format!("failed to commit step: {}", e)))?;
        Ok(())
    }
}

/// Step unit for backends or steps that opted out of transactions;
/// every call takes effect immediately
struct PgAutocommitUnit {
    pool: PgPool,
    ledger_table: String,
}

#[async_trait]
impl StepUnit for PgAutocommitUnit {
    async fn execute(&mut self, sql: &str) -> MigroResult<()> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| MigroError::Database(format!("failed to execute statement: {}", e)))?;
        Ok(())
    }

    async fn insert_record(&mut self, entry: &LedgerEntry) -> MigroResult<()> {
        sqlx::query(&insert_sql(&self.ledger_table))
            .bind(&entry.table)
            .bind(&entry.tag)
            .bind(entry.step)
            .bind(entry.batch)
            .execute(&self.pool)
            .await
            .map_err(|e| MigroError::Ledger(format!("failed to record step: {}", e)))?;
        Ok(())
    }

    async fn delete_record(&mut self, id: i64) -> MigroResult<()> {
        sqlx::query(&delete_sql(&self.ledger_table))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| MigroError::Ledger(format!("failed to delete ledger row: {}", e)))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> MigroResult<()> {
        Ok(())
    }
}
