//! Model change notifications.
//!
//! Observers are injected into the network that owns them; there is no
//! process-wide bus.

use std::sync::{Arc, Mutex};

use crate::model::VariableId;

#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    VariableAdded(VariableId),
    StructureChanged(VariableId),
    CpdChanged { variable: VariableId, offset: usize },
    EvidenceChanged { variable: VariableId, time: usize },
    QueryChanged { variable: VariableId, time: usize },
    HorizonChanged(usize),
    LearningCompleted,
    Calibrated { slices: usize },
}

pub trait ModelObserver: Send {
    fn on_event(&self, event: &ModelEvent);
}

/// Observer that records every event it sees; clones share the log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ModelEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ModelEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut e) = self.events.lock() {
            e.clear();
        }
    }
}

impl ModelObserver for EventLog {
    fn on_event(&self, event: &ModelEvent) {
        if let Ok(mut e) = self.events.lock() {
            e.push(event.clone());
        }
    }
}
