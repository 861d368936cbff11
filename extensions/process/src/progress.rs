//! Informational progress reporting. Sinks never influence control flow.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started { task: String },
    Info { task: String, message: String },
    Finished { task: String },
    Failed { task: String, message: String },
}

impl ProgressEvent {
    pub fn task(&self) -> &str {
        match self {
            ProgressEvent::Started { task }
            | ProgressEvent::Info { task, .. }
            | ProgressEvent::Finished { task }
            | ProgressEvent::Failed { task, .. } => task,
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Started { task } => write!(f, "{task}: started"),
            ProgressEvent::Info { task, message } => write!(f, "{task}: {message}"),
            ProgressEvent::Finished { task } => write!(f, "{task}: finished"),
            ProgressEvent::Failed { task, message } => write!(f, "{task}: failed ({message})"),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);

    fn started(&self, task: &str) {
        self.event(ProgressEvent::Started {
            task: task.to_string(),
        });
    }

    fn info(&self, task: &str, message: &str) {
        self.event(ProgressEvent::Info {
            task: task.to_string(),
            message: message.to_string(),
        });
    }

    fn finished(&self, task: &str) {
        self.event(ProgressEvent::Finished {
            task: task.to_string(),
        });
    }

    fn failed(&self, task: &str, message: &str) {
        self.event(ProgressEvent::Failed {
            task: task.to_string(),
            message: message.to_string(),
        });
    }
}

/// Forwards progress to `tracing` at info level (failures at warn).
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn event(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::Failed { .. } => tracing::warn!(task = event.task(), "{}", event),
            _ => tracing::info!(task = event.task(), "{}", event),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn event(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let event = ProgressEvent::Info {
            task: "mongod".into(),
            message: "waiting for connections".into(),
        };
        assert_eq!(event.to_string(), "mongod: waiting for connections");
        assert_eq!(event.task(), "mongod");
    }
}
