//! Configuration for the migration engine

/// Configuration for the migration engine
#[derive(Debug, Clone)]
pub struct MigroConfig {
    /// Table name for the progress ledger
    pub ledger_table: String,
}

impl Default for MigroConfig {
    fn default() -> Self {
        Self {
            ledger_table: "migro".to_string(),
        }
    }
}

impl MigroConfig {
    /// Create a configuration with a custom ledger table name
    pub fn with_ledger_table(table: impl Into<String>) -> Self {
        Self {
            ledger_table: table.into(),
        }
    }
}
