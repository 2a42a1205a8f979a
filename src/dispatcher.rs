//! Write dispatch: local mutation intents to remote writes.

use crate::config::AdapterConfig;
use crate::deferred::{deferred, Deferred, Resolver};
use crate::guard::{EchoGuard, InFlightWrite};
use crate::remote::{RemoteCollection, WriteCallback};
use crate::types::{Fields, MutationIntent, Operation, RecordId, WriteOutcome};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Issues remote writes for local edits.
///
/// The target id is marked in the view's [`EchoGuard`] before the write is
/// issued and unmarked when its result arrives, before the returned result
/// settles. Failures are reported, never retried.
pub struct WriteDispatcher {
    config: Arc<AdapterConfig>,
}

impl WriteDispatcher {
    pub fn new(config: Arc<AdapterConfig>) -> Self {
        Self { config }
    }

    pub fn dispatch(
        &self,
        collection: &Arc<dyn RemoteCollection>,
        guard: &Arc<EchoGuard>,
        intent: MutationIntent,
    ) -> Deferred<WriteOutcome> {
        let capabilities = self.config.effective_capabilities(collection.capabilities());
        let (resolver, result) = deferred();

        match intent {
            MutationIntent::Insert { mut data } => {
                self.strip_id(&mut data);
                let id = collection.allocate_id();
                let marker = guard.begin(id.clone());
                let done = completion(
                    marker,
                    resolver,
                    Operation::Insert,
                    WriteOutcome::inserted(id.clone()),
                );
                debug!(path = %collection.path(), id = %id, "dispatching insert");
                collection.create(&id, data, done);
            }
            MutationIntent::Update { id, mut data } => {
                self.strip_id(&mut data);
                let marker = guard.begin(id.clone());
                let done = completion(marker, resolver, Operation::Update, WriteOutcome::default());
                debug!(path = %collection.path(), id = %id, "dispatching update");
                collection.update(&id, data, done);
            }
            MutationIntent::Delete { id } => {
                let marker = guard.begin(id.clone());
                let done = completion(marker, resolver, Operation::Delete, WriteOutcome::default());
                if capabilities.native_delete {
                    debug!(path = %collection.path(), id = %id, "dispatching delete");
                    collection.delete(&id, done);
                } else {
                    debug!(path = %collection.path(), id = %id, "dispatching tombstone");
                    collection.set(&id, Value::Null, done);
                }
            }
        }
        result
    }

    fn strip_id(&self, data: &mut Fields) {
        data.remove(&self.config.id_field);
    }
}

/// Completion that clears the in-flight mark, then settles the result.
fn completion(
    marker: InFlightWrite,
    resolver: Resolver<WriteOutcome>,
    operation: Operation,
    outcome: WriteOutcome,
) -> WriteCallback {
    Box::new(move |result| {
        let id: RecordId = marker.id().clone();
        drop(marker);
        match result {
            Ok(()) => {
                debug!(id = %id, op = ?operation, "write acknowledged");
                resolver.resolve(outcome);
            }
            Err(error) => {
                warn!(id = %id, op = ?operation, %error, "write failed");
                resolver.reject(error);
            }
        }
    })
}
