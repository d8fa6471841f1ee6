//! Registry of task queues keyed by namespace and queue name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::queue::TaskQueue;

/// In-process task broker.
///
/// Cloning a broker yields another handle to the same set of queues. Clients
/// and worker pools that ask for the same `(namespace, queue)` pair share one
/// [`TaskQueue`].
#[derive(Clone, Default)]
pub struct Broker {
    queues: Arc<Mutex<HashMap<(String, String), TaskQueue>>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the queue `name` in `namespace`
    pub fn queue(&self, namespace: &str, name: &str) -> TaskQueue {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());

        queues
            .entry((namespace.to_string(), name.to_string()))
            .or_insert_with(|| {
                debug!(namespace, queue = name, "Task queue created");
                TaskQueue::new(namespace, name)
            })
            .clone()
    }
}
