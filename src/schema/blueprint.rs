//! Table blueprint for CREATE TABLE statements

/// Column and constraint collector for a new table
pub struct TableBlueprint {
    table: String,
    columns: Vec<String>,
    constraints: Vec<String>,
}

impl TableBlueprint {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Name of the table being defined
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Add a column with an explicit SQL type
    pub fn column(&mut self, name: &str, column_type: &str) -> &mut Self {
        self.columns.push(format!("{} {}", name, column_type));
        self
    }

    /// Add an auto-increment primary key column
    pub fn id(&mut self, name: &str) -> &mut Self {
        self.columns.push(format!("{} SERIAL PRIMARY KEY", name));
        self
    }

    /// Add a string column (VARCHAR with length, TEXT without)
    pub fn string(&mut self, name: &str, length: Option<u32>) -> &mut Self {
        let column_type = match length {
            Some(len) => format!("VARCHAR({})", len),
            None => "TEXT".to_string(),
        };
        self.columns.push(format!("{} {}", name, column_type));
        self
    }

    /// Add an integer column
    pub fn integer(&mut self, name: &str) -> &mut Self {
        self.columns.push(format!("{} INTEGER", name));
        self
    }

    /// Add a big integer column
    pub fn big_integer(&mut self, name: &str) -> &mut Self {
        self.columns.push(format!("{} BIGINT", name));
        self
    }

    /// Add a boolean column
    pub fn boolean(&mut self, name: &str) -> &mut Self {
        self.columns.push(format!("{} BOOLEAN", name));
        self
    }

    /// Add a timestamp column defaulting to the insertion time
    pub fn timestamp(&mut self, name: &str) -> &mut Self {
        self.columns.push(format!(
            "{} TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP",
            name
        ));
        self
    }

    /// Add created_at / updated_at bookkeeping columns
    pub fn timestamps(&mut self) -> &mut Self {
        self.timestamp("created_at");
        self.timestamp("updated_at");
        self
    }

    /// Mark the last added column NOT NULL
    pub fn not_null(&mut self) -> &mut Self {
        if let Some(last) = self.columns.last_mut() {
            last.push_str(" NOT NULL");
        }
        self
    }

    /// Add a composite primary key constraint
    pub fn primary_key(&mut self, columns: &[&str]) -> &mut Self {
        self.constraints
            .push(format!("PRIMARY KEY ({})", columns.join(", ")));
        self
    }

    /// Add a foreign key constraint
    pub fn foreign_key(
        &mut self,
        column: &str,
        references_table: &str,
        references_column: &str,
    ) -> &mut Self {
        self.constraints.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            column, references_table, references_column
        ));
        self
    }

    /// Add a unique constraint
    pub fn unique(&mut self, columns: &[&str]) -> &mut Self {
        self.constraints
            .push(format!("UNIQUE ({})", columns.join(", ")));
        self
    }

    /// Build the CREATE TABLE statement
    pub fn to_sql(&self) -> String {
        let mut parts = self.columns.clone();
        parts.extend(self.constraints.clone());

        format!(
            "CREATE TABLE {} (\n    {}\n);",
            self.table,
            parts.join(",\n    ")
        )
    }
}
