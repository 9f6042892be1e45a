//! Table alteration for ALTER TABLE statements

/// Ordered list of changes against an existing table
pub struct TableAlteration {
    table: String,
    statements: Vec<String>,
}

impl TableAlteration {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            statements: Vec::new(),
        }
    }

    /// Name of the table being altered
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Add a column
    pub fn add_column(&mut self, name: &str, column_type: &str) -> &mut Self {
        self.statements.push(format!(
            "ALTER TABLE {} ADD COLUMN {} {};",
            self.table, name, column_type
        ));
        self
    }

    /// Drop a column
    pub fn drop_column(&mut self, name: &str) -> &mut Self {
        self.statements.push(format!(
            "ALTER TABLE {} DROP COLUMN {};",
            self.table, name
        ));
        self
    }

    /// Rename a column
    pub fn rename_column(&mut self, from: &str, to: &str) -> &mut Self {
        self.statements.push(format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {};",
            self.table, from, to
        ));
        self
    }

    /// Change a column's type
    pub fn change_column_type(&mut self, name: &str, column_type: &str) -> &mut Self {
        self.statements.push(format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {};",
            self.table, name, column_type
        ));
        self
    }

    /// Create an index over the given columns
    pub fn create_index(&mut self, columns: &[&str], index_name: Option<&str>) -> &mut Self {
        let default_name = format!("idx_{}_{}", self.table, columns.join("_"));
        let index_name = index_name.unwrap_or(&default_name);
        self.statements.push(format!(
            "CREATE INDEX {} ON {} ({});",
            index_name,
            self.table,
            columns.join(", ")
        ));
        self
    }

    /// Drop an index
    pub fn drop_index(&mut self, index_name: &str) -> &mut Self {
        self.statements
            .push(format!("DROP INDEX IF EXISTS {};", index_name));
        self
    }

    /// All ALTER statements, in registration order
    pub fn to_sql(&self) -> Vec<String> {
        self.statements.clone()
    }
}
