//! Table definitions.

use serde::{Deserialize, Serialize};

/// Opaque table identifier, unique within a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(String);

impl TableId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TableId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of transformation a table is defined by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionType {
    /// SQL query body.
    #[default]
    Sql,
    /// Script transform. Reserved; not executable yet.
    Script,
}

impl std::fmt::Display for FunctionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sql => write!(f, "sql"),
            Self::Script => write!(f, "script"),
        }
    }
}

/// A user-declared derived table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: TableId,

    /// Name used for reference matching (case-insensitive).
    pub name: String,

    #[serde(default)]
    pub function_type: FunctionType,

    /// Transformation text.
    pub definition: String,

    /// Column used for window bucketing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_column: Option<String>,

    /// Natural key columns. Empty means append-only.
    #[serde(default)]
    pub upsert_constraints: Vec<String>,
}

impl Table {
    /// Create a SQL table with a generated id.
    pub fn sql(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            id: TableId::generate(),
            name: name.into(),
            function_type: FunctionType::Sql,
            definition: definition.into(),
            time_column: None,
            upsert_constraints: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<TableId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_function_type(mut self, function_type: FunctionType) -> Self {
        self.function_type = function_type;
        self
    }

    pub fn with_time_column(mut self, column: impl Into<String>) -> Self {
        self.time_column = Some(column.into());
        self
    }

    /// Set the upsert key, dropping repeated columns while keeping order.
    pub fn with_upsert_constraints<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: Vec<String> = Vec::new();
        for column in columns {
            let column = column.into();
            if !keys.contains(&column) {
                keys.push(column);
            }
        }
        self.upsert_constraints = keys;
        self
    }

    /// Lowercased name used for case-insensitive comparisons.
    pub fn name_key(&self) -> String {
        self.name.to_lowercase()
    }

    /// Whether the table is filtered by window boundaries.
    pub fn is_windowed(&self) -> bool {
        self.time_column.is_some()
    }

    pub fn is_append_only(&self) -> bool {
        self.upsert_constraints.is_empty()
    }
}
