//! Tumbling window configuration and boundaries.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// Window kinds. Only tumbling windows are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    #[default]
    Tumbling,
}

/// Window cadence for a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(rename = "type", default)]
    pub window_type: WindowType,

    #[serde(default = "default_window_size", with = "crate::codec::duration")]
    pub size: Duration,
}

fn default_window_size() -> Duration {
    Duration::hours(1)
}

impl WindowConfig {
    pub fn tumbling(size: Duration) -> Self {
        Self {
            window_type: WindowType::Tumbling,
            size,
        }
    }

    /// Reject sizes that cannot tile the timeline.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.size <= Duration::zero() {
            return Err(WorkflowError::InvalidWindow(format!(
                "window size must be positive, got {}ms",
                self.size.num_milliseconds()
            )));
        }
        if self.size.subsec_nanos() % 1_000_000 != 0 {
            return Err(WorkflowError::InvalidWindow(
                "window size must be a whole number of milliseconds".to_string(),
            ));
        }
        Ok(())
    }

    /// The window containing `instant`, aligned to multiples of `size`
    /// since the Unix epoch.
    pub fn window_containing(&self, instant: DateTime<Utc>) -> Window {
        Window::containing(instant, self.size)
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self::tumbling(default_window_size())
    }
}

/// Half-open execution interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, size: Duration) -> Self {
        Self {
            start,
            end: start + size,
        }
    }

    /// Window of `size` containing `instant`; `start` is `instant`
    /// truncated to a multiple of `size`.
    pub fn containing(instant: DateTime<Utc>, size: Duration) -> Self {
        let size_ms = size.num_milliseconds().max(1);
        let start_ms = instant.timestamp_millis().div_euclid(size_ms) * size_ms;
        let start = DateTime::from_timestamp_millis(start_ms).unwrap_or(instant);
        Self::new(start, size)
    }

    pub fn size(&self) -> Duration {
        self.end - self.start
    }

    /// The adjacent window that starts where this one ends.
    pub fn next(&self) -> Self {
        Self::new(self.end, self.size())
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}
