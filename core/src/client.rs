//! Request queue and execution entry points.
//!
//! # Design
//! `RequestClient` owns an arena of frozen descriptors keyed by
//! `RequestId`, each tagged with its `RequestState`, and the latest
//! `ResponseRecord` per id. Execution is strictly sequential: one request
//! runs to completion, body read included, before the next starts.
//!
//! Every mutating operation takes `&mut self`, so a drain and an `execute`
//! can never overlap on one client. Sharing a client between threads needs
//! an external lock such as `Mutex<RequestClient>`; independent clients run
//! in parallel freely.

use std::collections::HashMap;

use crate::config::ClientConfig;
use crate::descriptor::{RequestDescriptor, RequestId};
use crate::http::ResponseRecord;
use crate::reader;
use crate::transport;

/// Lifecycle of a queued descriptor. A faulted execution still ends in
/// `Processed`; the fault lives on the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Unprocessed,
    /// Set for the duration of one attempt. Every run holds `&mut self`, so
    /// callers only observe it on an entry whose attempt unwound mid-flight;
    /// such an entry is not picked up again by `drain_queue`.
    Processing,
    Processed,
}

#[derive(Debug)]
struct QueueEntry {
    descriptor: RequestDescriptor,
    state: RequestState,
}

/// Sequential executor for a set of request descriptors.
#[derive(Debug, Default)]
pub struct RequestClient {
    config: ClientConfig,
    entries: HashMap<RequestId, QueueEntry>,
    responses: HashMap<RequestId, ResponseRecord>,
}

impl RequestClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            responses: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Queue a descriptor. Returns `false` and leaves the queue untouched
    /// if its id is already registered.
    pub fn register(&mut self, descriptor: RequestDescriptor) -> bool {
        let id = descriptor.id();
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(
            id,
            QueueEntry {
                descriptor,
                state: RequestState::Unprocessed,
            },
        );
        true
    }

    /// Run `descriptor` now, whatever its state, and store the response.
    /// The descriptor is registered (or replaces the registered copy).
    pub fn execute(&mut self, descriptor: RequestDescriptor) -> &ResponseRecord {
        let id = descriptor.id();
        self.entries.insert(
            id,
            QueueEntry {
                descriptor,
                state: RequestState::Unprocessed,
            },
        );
        self.run(id)
    }

    /// Re-run a registered descriptor by id. `None` if the id is unknown.
    pub fn execute_registered(&mut self, id: RequestId) -> Option<&ResponseRecord> {
        if !self.entries.contains_key(&id) {
            return None;
        }
        Some(self.run(id))
    }

    /// Execute every `Unprocessed` descriptor, one at a time, and return
    /// how many ran. Faults are recorded per request and never stop the
    /// drain. Selection order is unspecified.
    pub fn drain_queue(&mut self) -> usize {
        let mut executed = 0;
        while let Some(id) = self.next_unprocessed() {
            let response = self.run(id);
            if let Some(failure) = &response.failure {
                tracing::debug!(%id, %failure, "request failed during drain");
            }
            executed += 1;
        }
        tracing::debug!(executed, pending = self.pending(), "queue drained");
        executed
    }

    pub fn response(&self, id: RequestId) -> Option<&ResponseRecord> {
        self.responses.get(&id)
    }

    pub fn state(&self, id: RequestId) -> Option<RequestState> {
        self.entries.get(&id).map(|entry| entry.state)
    }

    pub fn descriptor(&self, id: RequestId) -> Option<&RequestDescriptor> {
        self.entries.get(&id).map(|entry| &entry.descriptor)
    }

    /// Number of descriptors still waiting for a drain.
    pub fn pending(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.state == RequestState::Unprocessed)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn next_unprocessed(&self) -> Option<RequestId> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.state == RequestState::Unprocessed)
            .map(|(id, _)| *id)
    }

    /// Callers guarantee `id` is registered.
    fn run(&mut self, id: RequestId) -> &ResponseRecord {
        let record = match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.state = RequestState::Processing;
                let settings = self.config.settings_for(&entry.descriptor);
                let record = execute_once(&entry.descriptor, &settings);
                entry.state = RequestState::Processed;
                record
            }
            None => ResponseRecord::default(),
        };
        self.responses.insert(id, record);
        &self.responses[&id]
    }
}

/// Full pipeline for one attempt: transport, then reader. Never fails;
/// faults end up in `ResponseRecord::failure`.
pub fn execute_once(
    descriptor: &RequestDescriptor,
    settings: &transport::ExecutionSettings,
) -> ResponseRecord {
    match transport::execute(descriptor, settings) {
        Ok((connection, mut record)) => {
            reader::read(connection, &mut record, descriptor, settings);
            record
        }
        Err(failure) => {
            tracing::warn!(id = %descriptor.id(), url = %descriptor.url(), %failure, "request did not reach the server");
            ResponseRecord::failed(descriptor.url().as_str(), failure)
        }
    }
}
