//! Event recording and transitions that report what they did.

use parking_lot::Mutex;
use rewind_core::{Dependencies, StateId, Transition};
use rewind_process::{ProgressEvent, ProgressSink};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Derived(String),
    Released(String),
    Failed(String),
}

/// Shared, ordered log of derive and release events.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

/// Test state named `name`; every recorded transition produces a `String`.
pub fn node(name: &str) -> StateId<String> {
    StateId::labeled(name)
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: Event) {
        tracing::trace!(?event, "recorded");
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Names of derived nodes, in derivation order.
    pub fn derived(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Derived(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Names of released nodes, in release order.
    pub fn released(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Released(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// A node producing its own name, recording derive and release.
    ///
    /// The derivation fails if any declared requirement is missing from its
    /// dependencies or if it is handed more than it declared.
    pub fn transition(&self, name: &str, requires: &[&str]) -> Transition {
        self.build(name, requires, Behaviour::Succeed)
    }

    /// A node whose derivation fails with `message` after recording
    /// [`Event::Failed`].
    pub fn failing(&self, name: &str, requires: &[&str], message: &str) -> Transition {
        self.build(name, requires, Behaviour::FailDerive(message.to_string()))
    }

    /// A node that derives normally but whose release returns an error (after
    /// recording the release).
    pub fn failing_release(&self, name: &str, requires: &[&str]) -> Transition {
        self.build(name, requires, Behaviour::FailRelease)
    }

    fn build(&self, name: &str, requires: &[&str], behaviour: Behaviour) -> Transition {
        let mut builder = Transition::builder(node(name));
        for required in requires {
            builder = builder.requires(&node(required));
        }

        let fail_release = matches!(behaviour, Behaviour::FailRelease);
        let releases = self.clone();
        let derives = self.clone();
        let name = name.to_string();
        let requires: Vec<String> = requires.iter().map(|r| r.to_string()).collect();

        builder
            .on_release(move |value: &String| {
                releases.record(Event::Released(value.clone()));
                if fail_release {
                    anyhow::bail!("release of {value} failed");
                }
                Ok(())
            })
            .derive_with(move |deps: Dependencies| {
                let recorder = derives.clone();
                let name = name.clone();
                let behaviour = behaviour.clone();
                let checked = check_dependencies(&deps, &requires);
                async move {
                    checked?;
                    if let Behaviour::FailDerive(message) = behaviour {
                        recorder.record(Event::Failed(name));
                        anyhow::bail!(message);
                    }
                    recorder.record(Event::Derived(name.clone()));
                    Ok(name)
                }
            })
    }
}

#[derive(Debug, Clone)]
enum Behaviour {
    Succeed,
    FailDerive(String),
    FailRelease,
}

fn check_dependencies(deps: &Dependencies, requires: &[String]) -> anyhow::Result<()> {
    for required in requires {
        let value = deps.get(&node(required))?;
        anyhow::ensure!(
            value.as_str() == required.as_str(),
            "dependency {required} carried {value}"
        );
    }
    anyhow::ensure!(
        deps.len() == requires.len(),
        "expected {} dependencies, got {}",
        requires.len(),
        deps.len()
    );
    Ok(())
}

/// Collects progress events for assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingProgress {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}
