//! Capability contract shared by every component the registry coordinates.
//!
//! A service is started, asked to stop, and observed through a single-use
//! completion signal. The registry never looks past this contract, so an RPC
//! listener, a supervised child process and a test double are all driven the
//! same way.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::ServiceError;

/// Terminal outcome of a service.
pub type ServiceResult = Result<(), ServiceError>;

/// The unit of work returned by [`Service::start`]; the registry spawns it on
/// its own task.
pub type ServiceFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A long-running component managed by [`crate::ServiceRegistry`].
///
/// `Display` is the service identity used in logs and in the aggregate error.
pub trait Service: fmt::Display + Send + Sync + 'static {
    /// Runs the service. Setup failures must be reported through the
    /// completion signal rather than by blocking.
    fn start(self: Arc<Self>) -> ServiceFuture;

    /// Requests cooperative shutdown. Must return promptly and must be safe to
    /// call before `start` or after the service has finished.
    fn stop(&self);

    /// Hands out the completion signal. Returns `None` once it has been
    /// claimed.
    fn done(&self) -> Option<Completion>;
}

/// Single-fire completion slot owned by a service.
#[derive(Debug)]
pub struct CompletionSignal {
    sender: Mutex<Option<oneshot::Sender<ServiceResult>>>,
    receiver: Mutex<Option<oneshot::Receiver<ServiceResult>>>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Publishes the outcome. Only the first call has any effect; returns
    /// whether this call was the one that fired.
    pub fn complete(&self, outcome: ServiceResult) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => {
                // Nobody listening is fine; the outcome is simply unobserved.
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Claims the receiving half. Only one caller ever gets it.
    pub fn subscribe(&self) -> Option<Completion> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|receiver| Completion { receiver })
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Future resolving to a service's terminal outcome.
///
/// Resolves to [`ServiceError::Abandoned`] if the owning
/// [`CompletionSignal`] is dropped without firing.
#[derive(Debug)]
pub struct Completion {
    receiver: oneshot::Receiver<ServiceResult>,
}

impl Future for Completion {
    type Output = ServiceResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(ServiceError::Abandoned)))
    }
}
