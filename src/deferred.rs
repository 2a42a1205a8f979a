//! One-shot asynchronous results.
//!
//! Every public adapter operation returns a [`Deferred`] immediately and
//! settles it later, from whatever callback the remote store completes on.

use crate::error::{Result, SyncError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Create a linked resolver/deferred pair.
pub fn deferred<T>() -> (Resolver<T>, Deferred<T>) {
    let (sender, receiver) = bounded(1);
    (Resolver { sender }, Deferred { receiver })
}

/// Settling side of a deferred result. Consumed on use.
pub struct Resolver<T> {
    sender: Sender<Result<T>>,
}

impl<T> Resolver<T> {
    pub fn resolve(self, value: T) {
        self.settle(Ok(value));
    }

    pub fn reject(self, error: impl Into<SyncError>) {
        self.settle(Err(error.into()));
    }

    pub fn settle(self, result: Result<T>) {
        // The receiving side may already be gone; nobody is waiting then.
        let _ = self.sender.try_send(result);
    }
}

/// Receiving side of a deferred result.
pub struct Deferred<T> {
    receiver: Receiver<Result<T>>,
}

impl<T> Deferred<T> {
    /// An already resolved result.
    pub fn resolved(value: T) -> Self {
        let (resolver, deferred) = deferred();
        resolver.resolve(value);
        deferred
    }

    /// An already rejected result.
    pub fn rejected(error: impl Into<SyncError>) -> Self {
        let (resolver, deferred) = deferred();
        resolver.reject(error);
        deferred
    }

    /// Block until the result is settled.
    pub fn wait(self) -> Result<T> {
        self.receiver.recv().unwrap_or(Err(SyncError::Abandoned))
    }

    /// Block until the result is settled or `timeout` passes.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(SyncError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(SyncError::Abandoned),
        }
    }

    /// Take the result if it is already settled.
    ///
    /// Returns `None` while pending. Once a result has been taken, later polls
    /// report `Abandoned`.
    pub fn poll(&self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(SyncError::Abandoned)),
        }
    }
}
