//! Lifecycle coordination for a set of [`Service`]s.
//!
//! The registry starts every service on its own task, watches each
//! completion signal, and stops everything as soon as one service fails
//! (fail-fast). `wait()` still waits for every service to report before it
//! returns, so the aggregate error lists every failure that was observed.
//!
//! ```text
//! Idle → Starting → Running → Stopping → Terminated { success }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::{RegistryError, ServiceError, ServiceFailure};
use crate::service::{Completion, Service, ServiceResult};

/// Observable lifecycle phase of the registry as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryPhase {
    Idle,
    Starting,
    Running,
    Stopping,
    Terminated { success: bool },
}

impl RegistryPhase {
    pub fn is_terminated(&self) -> bool {
        matches!(self, RegistryPhase::Terminated { .. })
    }
}

/// Coordinates start-up, shutdown and failure aggregation of services.
pub struct ServiceRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    services: RwLock<Vec<Arc<dyn Service>>>,
    tasks: Mutex<Vec<Option<JoinHandle<()>>>>,
    ledger: Mutex<Ledger>,
    started: AtomicBool,
    stopping: AtomicBool,
    phase: watch::Sender<RegistryPhase>,
}

#[derive(Default)]
struct Ledger {
    finished: Vec<bool>,
    failures: Vec<ServiceFailure>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(RegistryPhase::Idle);
        Self {
            inner: Arc::new(Inner {
                services: RwLock::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                ledger: Mutex::new(Ledger::default()),
                started: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                phase,
            }),
        }
    }

    /// Appends a service. Services added after `start()` are ignored.
    pub fn add(&self, service: Arc<dyn Service>) {
        if self.inner.started.load(Ordering::SeqCst) {
            tracing::warn!(
                registry = %self,
                service = %service,
                "ignoring service added after start",
            );
            return;
        }
        tracing::debug!(registry = %self, service = %service, "add service to registry");
        write(&self.inner.services).push(service);
    }

    pub fn len(&self) -> usize {
        read(&self.inner.services).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn phase(&self) -> RegistryPhase {
        *self.inner.phase.borrow()
    }

    /// Spawns every registered service's `start()` in registration order and
    /// returns without waiting for them. Must be called inside a Tokio
    /// runtime; a second call is ignored.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            tracing::warn!(registry = %self, "registry already started");
            return;
        }
        // A stop requested before start keeps the registry in Stopping.
        self.inner.phase.send_if_modified(|phase| {
            if *phase == RegistryPhase::Idle {
                *phase = RegistryPhase::Starting;
                true
            } else {
                false
            }
        });

        tracing::debug!(registry = %self, "starting services");
        let services = self.inner.snapshot();
        let mut tasks = lock(&self.inner.tasks);
        for service in services {
            tracing::debug!(registry = %self, service = %service, "starting service");
            tasks.push(Some(tokio::spawn(service.start())));
        }
        drop(tasks);

        self.inner.phase.send_if_modified(|phase| {
            if *phase == RegistryPhase::Starting {
                *phase = RegistryPhase::Running;
                true
            } else {
                false
            }
        });
    }

    /// Asks every service to stop, in registration order. Only the first call
    /// reaches the services.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Installs SIGINT/SIGTERM handlers that route into [`Self::stop`].
    ///
    /// The handler task exits once the registry terminates. Signals after the
    /// first are logged and otherwise ignored.
    pub fn setup_signal_handler(&self) -> Result<(), RegistryError> {
        tracing::debug!(registry = %self, "setting up signal handler");
        let mut interrupt = signal(SignalKind::interrupt())
            .map_err(|source| RegistryError::SignalInstall { source })?;
        let mut terminate = signal(SignalKind::terminate())
            .map_err(|source| RegistryError::SignalInstall { source })?;

        let inner = Arc::clone(&self.inner);
        let mut phase = self.inner.phase.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = interrupt.recv() => {
                        tracing::info!("caught SIGINT, stopping services");
                        inner.stop();
                    }
                    _ = terminate.recv() => {
                        tracing::info!("caught SIGTERM, stopping services");
                        inner.stop();
                    }
                    changed = phase.changed() => {
                        if changed.is_err() || phase.borrow().is_terminated() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(())
    }

    /// Waits until every service has reported completion.
    ///
    /// One watcher task per service; any failure is recorded and triggers a
    /// registry-wide stop. Returns [`RegistryError::Failed`] listing every
    /// failure, or `Ok(())` when all services finished cleanly.
    pub async fn wait(&self) -> Result<(), RegistryError> {
        let services = self.inner.snapshot();
        let mut tasks = std::mem::take(&mut *lock(&self.inner.tasks));
        lock(&self.inner.ledger).finished = vec![false; services.len()];

        let mut watchers = JoinSet::new();
        for (index, service) in services.into_iter().enumerate() {
            let task = tasks.get_mut(index).and_then(Option::take);
            let inner = Arc::clone(&self.inner);
            watchers.spawn(async move { inner.watch(index, service, task).await });
        }

        while let Some(joined) = watchers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(registry = %self, error = %err, "service watcher failed");
                lock(&self.inner.ledger).failures.push(ServiceFailure {
                    service: "watcher".to_string(),
                    error: ServiceError::Panicked(err.to_string()),
                });
                self.inner.stop();
            }
        }

        let failures = std::mem::take(&mut lock(&self.inner.ledger).failures);
        let success = failures.is_empty();
        self.inner
            .phase
            .send_replace(RegistryPhase::Terminated { success });

        if success {
            tracing::debug!(registry = %self, "all services finished");
            Ok(())
        } else {
            Err(RegistryError::Failed(failures))
        }
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceRegistry{{registered: {}}}", self.len())
    }
}

impl Inner {
    fn snapshot(&self) -> Vec<Arc<dyn Service>> {
        read(&self.services).clone()
    }

    fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            tracing::debug!("stop already requested");
            return;
        }
        self.phase.send_if_modified(|phase| {
            if phase.is_terminated() {
                false
            } else {
                *phase = RegistryPhase::Stopping;
                true
            }
        });

        tracing::debug!("stopping services");
        for service in self.snapshot() {
            tracing::debug!(service = %service, "stopping service");
            service.stop();
        }
    }

    async fn watch(
        self: Arc<Self>,
        index: usize,
        service: Arc<dyn Service>,
        task: Option<JoinHandle<()>>,
    ) {
        tracing::debug!(service = %service, "waiting for service");
        let outcome = match (service.done(), task) {
            (None, _) => Err(ServiceError::AlreadyClaimed),
            (Some(completion), Some(task)) => settle(completion, task).await,
            (Some(completion), None) => completion.await,
        };
        self.record(index, &service, outcome);
    }

    fn record(&self, index: usize, service: &Arc<dyn Service>, outcome: ServiceResult) {
        let (failed, remaining) = {
            let mut ledger = lock(&self.ledger);
            if let Some(slot) = ledger.finished.get_mut(index) {
                *slot = true;
            }
            let failed = match outcome {
                Ok(()) => false,
                Err(error) => {
                    tracing::error!(service = %service, error = %error, "service failed");
                    ledger.failures.push(ServiceFailure {
                        service: service.to_string(),
                        error,
                    });
                    true
                }
            };
            let remaining = ledger.finished.iter().filter(|done| !**done).count();
            (failed, remaining)
        };

        tracing::debug!(service = %service, remaining, "service finished");
        if failed {
            tracing::error!("error encountered, stopping all services");
            self.stop();
        }
    }
}

/// Resolves a service's outcome, treating a panicked start task as a failure
/// since its completion signal can then never fire.
async fn settle(mut completion: Completion, task: JoinHandle<()>) -> ServiceResult {
    tokio::select! {
        biased;
        outcome = &mut completion => outcome,
        joined = task => match joined {
            Err(err) if err.is_panic() => Err(ServiceError::Panicked(err.to_string())),
            _ => completion.await,
        },
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
