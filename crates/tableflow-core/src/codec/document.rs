//! On-disk workflow document.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::model::{Table, WindowConfig, Workflow, WorkflowId};

pub const API_VERSION: &str = "tableflow.io/v1";
pub const KIND: &str = "Workflow";

/// Serialized form of a [`Workflow`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    pub api_version: String,
    pub kind: String,
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub tables: Vec<Table>,
}

impl From<&Workflow> for WorkflowDocument {
    fn from(workflow: &Workflow) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            id: workflow.id.clone(),
            name: workflow.name.clone(),
            window: workflow.window.clone(),
            tables: workflow.tables.clone(),
        }
    }
}

impl WorkflowDocument {
    /// Check the header, rebuild the workflow and make sure it is runnable.
    pub fn into_workflow(self) -> Result<Workflow, CodecError> {
        if self.api_version != API_VERSION {
            return Err(CodecError::UnsupportedApiVersion(format!(
                "{}. Expected {}",
                self.api_version, API_VERSION
            )));
        }
        if self.kind != KIND {
            return Err(CodecError::InvalidKind(format!(
                "{}. Expected {}",
                self.kind, KIND
            )));
        }

        let mut workflow = Workflow::new(self.name)
            .with_id(self.id)
            .with_window(self.window);
        for table in self.tables {
            workflow.add_table(table)?;
        }

        workflow.plan()?;
        Ok(workflow)
    }
}
