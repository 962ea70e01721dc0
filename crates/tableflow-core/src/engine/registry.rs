//! Registry of active workflow coordinators.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::CoordinatorConfig;
use crate::error::WorkflowError;
use crate::model::{Workflow, WorkflowId};

use super::coordinator::{Clock, CoordinatorHandle, SystemClock, WindowCoordinator};
use super::executor::TableExecutor;
use super::state::{CoordinatorState, WindowReport};

/// Owns one coordinator per loaded workflow.
///
/// Coordinators share nothing but the optional report channel; each gets
/// its own executor.
pub struct WorkflowRegistry {
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    reports: Option<mpsc::Sender<WindowReport>>,
    coordinators: HashMap<WorkflowId, CoordinatorHandle>,
}

impl WorkflowRegistry {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            reports: None,
            coordinators: HashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Create the shared report channel, sized from configuration.
    pub fn subscribe(&mut self) -> mpsc::Receiver<WindowReport> {
        let (tx, rx) = mpsc::channel(self.config.report_channel_capacity.max(1));
        self.reports = Some(tx);
        rx
    }

    /// Load a workflow and start its coordinator, replacing any coordinator
    /// already running under the same id.
    pub async fn start(
        &mut self,
        workflow: &Workflow,
        executor: Arc<TableExecutor>,
        start_at: Option<DateTime<Utc>>,
    ) -> Result<(), WorkflowError> {
        let mut coordinator = WindowCoordinator::new(workflow, executor, self.config.clone())?
            .with_clock(self.clock.clone());
        if let Some(reports) = &self.reports {
            coordinator = coordinator.with_reports(reports.clone());
        }
        if let Some(instant) = start_at {
            coordinator = coordinator.starting_at(instant);
        }

        if let Some(previous) = self.coordinators.remove(&workflow.id) {
            info!(workflow = %workflow.name, "Replacing running coordinator");
            previous.stop().await;
        }

        info!(
            workflow = %workflow.name,
            workflow_id = %workflow.id,
            tables = coordinator.plan().len(),
            "Starting coordinator"
        );
        self.coordinators
            .insert(workflow.id.clone(), coordinator.spawn());
        Ok(())
    }

    /// Stop and unload a workflow. Returns whether it was loaded.
    pub async fn stop(&mut self, id: &WorkflowId) -> bool {
        match self.coordinators.remove(id) {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    pub fn state(&self, id: &WorkflowId) -> Option<CoordinatorState> {
        self.coordinators.get(id).map(CoordinatorHandle::state)
    }

    pub fn ids(&self) -> Vec<WorkflowId> {
        let mut ids: Vec<WorkflowId> = self.coordinators.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.coordinators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinators.is_empty()
    }

    /// Stop every coordinator and release the report channel.
    pub async fn shutdown(&mut self) {
        let handles: Vec<_> = self.coordinators.drain().collect();
        info!(count = handles.len(), "Shutting down coordinators");
        for (_, handle) in handles {
            handle.stop().await;
        }
        self.reports = None;
    }
}
