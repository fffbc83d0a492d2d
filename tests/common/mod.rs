#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use gephase::phase::{PhaseEvent, PhaseEventKind};
use gephase::{NetRole, PhaseSubsystem};

/// Shared, ordered log of observer deliveries.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback that appends `"<name>:<tag> <started|ended>"` to the log.
    pub fn observer(&self, name: &'static str) -> impl Fn(&PhaseEvent) + Send + Sync + 'static {
        let log = Arc::clone(&self.0);
        move |event: &PhaseEvent| {
            let verb = match event.kind {
                PhaseEventKind::Started => "started",
                PhaseEventKind::Ended => "ended",
            };
            log.lock().unwrap().push(format!("{name}:{} {verb}", event.tag));
        }
    }

    pub fn push(&self, line: String) {
        self.0.lock().unwrap().push(line);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

pub fn authority() -> Arc<PhaseSubsystem> {
    Arc::new(PhaseSubsystem::new(NetRole::Authority))
}

pub fn client() -> Arc<PhaseSubsystem> {
    Arc::new(PhaseSubsystem::new(NetRole::Client))
}

pub fn tags(sub: &PhaseSubsystem) -> Vec<String> {
    sub.replication_snapshot()
        .iter()
        .map(ToString::to_string)
        .collect()
}
