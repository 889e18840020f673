use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One step reported by a workflow task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEvent {
    pub task_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl TraceEvent {
    pub fn new(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    pub task_id: String,
    pub message: String,
    /// Milliseconds since the first event of the run.
    pub offset_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub steps: Vec<TraceStep>,
}

impl TraceSummary {
    pub fn from_events(events: &[TraceEvent]) -> Self {
        let start = events.first().map(|event| event.timestamp);
        let steps = events
            .iter()
            .enumerate()
            .map(|(idx, event)| TraceStep {
                index: idx + 1,
                task_id: event.task_id.clone(),
                message: event.message.clone(),
                offset_ms: start
                    .map(|start| (event.timestamp - start).num_milliseconds())
                    .unwrap_or_default(),
            })
            .collect();
        Self { steps }
    }

    pub fn render_markdown(&self) -> String {
        if self.steps.is_empty() {
            return "No trace events recorded.".to_string();
        }
        let mut output = String::from("### Trace Summary\n");
        for step in &self.steps {
            let _ = writeln!(
                output,
                "{}. [+{}ms] {} -> {}",
                step.index, step.offset_ms, step.task_id, step.message
            );
        }
        output
    }
}
