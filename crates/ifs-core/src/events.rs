// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Change notifications

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{IfsError, IfsResult};

/// Event kinds for filesystem change notifications
///
/// Paths are absolute IFS path strings (`owner:/a/b`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Created { path: String },
    Updated { path: String },
    Deleted { path: String },
}

/// Event sink trait for receiving filesystem change notifications
pub trait EventSink: Send + Sync {
    fn on_event(&self, evt: &EventKind);
}

/// Opaque event subscription identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Registered sinks of one provider
#[derive(Default)]
pub(crate) struct EventBus {
    subscriptions: Mutex<HashMap<SubscriptionId, Arc<dyn EventSink>>>,
    next_id: Mutex<u64>,
}

impl EventBus {
    pub(crate) fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionId {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let id = SubscriptionId::new(*next_id);
        subscriptions.insert(id, sink);
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> IfsResult<()> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        if subscriptions.remove(&id).is_none() {
            return Err(IfsError::not_found(format!("subscription {}", id.0)));
        }
        Ok(())
    }

    #[cfg(feature = "events")]
    pub(crate) fn emit(&self, event: EventKind) {
        // Snapshot so sinks may call back into the provider
        let sinks: Vec<Arc<dyn EventSink>> =
            self.subscriptions.lock().unwrap().values().cloned().collect();
        for sink in sinks {
            sink.on_event(&event);
        }
    }

    #[cfg(not(feature = "events"))]
    pub(crate) fn emit(&self, _event: EventKind) {}
}

/// Sink that records every event, for tests and diagnostics
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EventKind>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, evt: &EventKind) {
        self.events.lock().unwrap().push(evt.clone());
    }
}
