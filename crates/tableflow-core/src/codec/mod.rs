//! Workflow export and import.
//!
//! Documents are YAML by default, in the same `apiVersion`/`kind` envelope
//! style as other declarative pipeline formats. JSON is accepted for
//! tooling. `import(export(w))` reproduces `w` exactly.

mod document;
pub mod duration;

use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use crate::error::CodecError;
use crate::model::Workflow;

pub use document::{WorkflowDocument, API_VERSION, KIND};

/// Document encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Yaml,
    Json,
}

impl Format {
    /// Infer from a file extension, defaulting to YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

impl FromStr for Format {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yaml" | "yml" => Ok(Format::Yaml),
            "json" => Ok(Format::Json),
            other => Err(CodecError::Parse(format!("Unknown format: {other}"))),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Yaml => write!(f, "yaml"),
            Format::Json => write!(f, "json"),
        }
    }
}

/// Serialize a workflow.
pub fn export(workflow: &Workflow, format: Format) -> Result<String, CodecError> {
    let document = WorkflowDocument::from(workflow);
    match format {
        Format::Yaml => {
            serde_yaml::to_string(&document).map_err(|e| CodecError::Serialize(e.to_string()))
        }
        Format::Json => serde_json::to_string_pretty(&document)
            .map_err(|e| CodecError::Serialize(e.to_string())),
    }
}

/// Parse a document and rebuild a validated workflow.
pub fn import(text: &str, format: Format) -> Result<Workflow, CodecError> {
    let document: WorkflowDocument = match format {
        Format::Yaml => serde_yaml::from_str(text).map_err(|e| CodecError::Parse(e.to_string()))?,
        Format::Json => serde_json::from_str(text).map_err(|e| CodecError::Parse(e.to_string()))?,
    };
    debug!(
        workflow = %document.name,
        tables = document.tables.len(),
        format = %format,
        "Parsed workflow document"
    );
    document.into_workflow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkflowError;
    use crate::model::{FunctionType, Table, WindowConfig};

    fn orders_workflow() -> Workflow {
        Workflow::new("orders")
            .with_id("wf-1")
            .with_window(WindowConfig::tumbling(chrono::Duration::minutes(15)))
            .with_table(
                Table::sql("raw", "SELECT * FROM source_orders")
                    .with_id("t-1")
                    .with_time_column("created_at")
                    .with_upsert_constraints(["order_id"]),
            )
            .unwrap()
            .with_table(
                Table::sql("daily_agg", "SELECT day, count(*) AS n FROM raw GROUP BY day")
                    .with_id("t-2"),
            )
            .unwrap()
            .with_table(
                Table::sql("enrich", "")
                    .with_id("t-3")
                    .with_function_type(FunctionType::Script),
            )
            .unwrap()
    }

    #[test]
    fn test_yaml_round_trip() {
        let workflow = orders_workflow();
        let text = export(&workflow, Format::Yaml).unwrap();
        assert_eq!(import(&text, Format::Yaml).unwrap(), workflow);
    }

    #[test]
    fn test_json_round_trip() {
        let workflow = orders_workflow();
        let text = export(&workflow, Format::Json).unwrap();
        assert_eq!(import(&text, Format::Json).unwrap(), workflow);
    }

    #[test]
    fn test_empty_workflow_round_trip() {
        let workflow = Workflow::new("empty").with_id("wf-empty");
        let text = export(&workflow, Format::Yaml).unwrap();
        assert_eq!(import(&text, Format::Yaml).unwrap(), workflow);
    }

    #[test]
    fn test_export_shape() {
        let text = export(&orders_workflow(), Format::Yaml).unwrap();
        assert!(text.starts_with("apiVersion: tableflow.io/v1\nkind: Workflow\n"));
        assert!(text.contains("size: 15m"));
        assert!(text.contains("timeColumn: created_at"));
        assert!(text.contains("upsertConstraints:\n  - order_id"));
        // Only the first table has a time column.
        assert_eq!(text.matches("timeColumn").count(), 1);
    }

    #[test]
    fn test_import_applies_defaults() {
        let yaml = r#"
apiVersion: tableflow.io/v1
kind: Workflow
id: wf-2
name: minimal
tables:
  - id: t-1
    name: raw
    definition: SELECT 1
"#;
        let workflow = import(yaml, Format::Yaml).unwrap();
        assert_eq!(workflow.window, WindowConfig::default());
        let raw = &workflow.tables[0];
        assert_eq!(raw.function_type, FunctionType::Sql);
        assert!(raw.time_column.is_none());
        assert!(raw.upsert_constraints.is_empty());
    }

    #[test]
    fn test_import_rejects_wrong_header() {
        let yaml = "apiVersion: tableflow.io/v0\nkind: Workflow\nid: w\nname: n\n";
        assert!(matches!(
            import(yaml, Format::Yaml),
            Err(CodecError::UnsupportedApiVersion(_))
        ));

        let yaml = "apiVersion: tableflow.io/v1\nkind: Playbook\nid: w\nname: n\n";
        assert!(matches!(
            import(yaml, Format::Yaml),
            Err(CodecError::InvalidKind(_))
        ));
    }

    #[test]
    fn test_import_rejects_cycle() {
        let yaml = r#"
apiVersion: tableflow.io/v1
kind: Workflow
id: wf-3
name: loop
tables:
  - { id: a, name: x, definition: "SELECT * FROM y" }
  - { id: b, name: y, definition: "SELECT * FROM x" }
"#;
        match import(yaml, Format::Yaml) {
            Err(CodecError::Workflow(WorkflowError::CyclicDependency { cycle })) => {
                assert_eq!(cycle, vec!["x", "y"]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_import_rejects_duplicate_names() {
        let json = r#"{
            "apiVersion": "tableflow.io/v1", "kind": "Workflow", "id": "w", "name": "n",
            "tables": [
                {"id": "a", "name": "raw", "definition": "SELECT 1"},
                {"id": "b", "name": "Raw", "definition": "SELECT 2"}
            ]
        }"#;
        assert!(matches!(
            import(json, Format::Json),
            Err(CodecError::Workflow(WorkflowError::DuplicateTableName { .. }))
        ));
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            import("tables: [", Format::Yaml),
            Err(CodecError::Parse(_))
        ));
    }

    #[test]
    fn test_format_resolution() {
        assert_eq!("JSON".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("yml".parse::<Format>().unwrap(), Format::Yaml);
        assert!("toml".parse::<Format>().is_err());
        assert_eq!(Format::from_path(Path::new("wf.json")), Format::Json);
        assert_eq!(Format::from_path(Path::new("wf.yaml")), Format::Yaml);
    }
}
