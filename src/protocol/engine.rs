use crate::prelude::*;

use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use super::command::ProtocolCommand;
use super::response::ProtocolResponse;
use super::transport::Transport;

type DeviceLock = Arc<tokio::sync::Mutex<()>>;

// {{{ LockSlot
/// The per-device lock paired with a sentinel task on the runtime that
/// created it. The channel closes when either side goes away: the slot is
/// dropped with its engine, or the runtime shuts down and drops the task.
struct LockSlot {
    lock: DeviceLock,
    sentinel: oneshot::Sender<()>,
}

impl LockSlot {
    fn new() -> Self {
        let (sentinel, released) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = released.await;
        });

        Self {
            lock: Arc::new(tokio::sync::Mutex::new(())),
            sentinel,
        }
    }

    fn is_live(&self) -> bool {
        !self.sentinel.is_closed()
    }
}
// }}}

enum Failure {
    Exhausted,
    Io(io::Error),
}

/// Executes commands against one device: send, wait up to `timeout`, retry on
/// timeout or invalid reply, at most `retries` attempts. Executions on the same
/// engine never overlap.
pub struct Engine {
    transport: Box<dyn Transport>,
    timeout: Duration,
    retries: u32,
    lock: Mutex<Option<LockSlot>>,
    generation: AtomicU64,
    failures: AtomicU32,
}

impl Engine {
    pub fn new(transport: Box<dyn Transport>, timeout: Duration, retries: u32) -> Self {
        Self {
            transport,
            timeout,
            retries,
            lock: Mutex::new(None),
            generation: AtomicU64::new(0),
            failures: AtomicU32::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// How many times the device lock has been (re)created.
    pub fn lock_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn device_lock(&self) -> DeviceLock {
        let mut slot = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(current) if current.is_live() => current.lock.clone(),
            _ => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("creating device lock for current runtime (generation {})", generation);
                let fresh = LockSlot::new();
                let lock = fresh.lock.clone();
                *slot = Some(fresh);
                lock
            }
        }
    }

    pub async fn execute(&self, command: &ProtocolCommand) -> Result<ProtocolResponse> {
        let lock = self.device_lock();
        let _guard = lock.lock().await;

        match self.attempt(command).await {
            Ok(response) => {
                self.failures.store(0, Ordering::SeqCst);
                Ok(response)
            }
            Err(Failure::Exhausted) => Err(Error::MaxRetries {
                attempts: self.retries,
                consecutive_failures: self.record_failure(),
            }),
            Err(Failure::Io(source)) => Err(Error::RequestFailed {
                source,
                consecutive_failures: self.record_failure(),
            }),
        }
    }

    fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn attempt(&self, command: &ProtocolCommand) -> Result<ProtocolResponse, Failure> {
        self.transport.renew().await.map_err(Failure::Io)?;

        for attempt in 1..=self.retries {
            debug!("TX {:?}", command.request());
            self.transport
                .send(command.request())
                .await
                .map_err(Failure::Io)?;

            match tokio::time::timeout(self.timeout, self.transport.recv()).await {
                Ok(Ok(frame)) => {
                    debug!("RX {:?}", frame);
                    match command.check(&frame) {
                        Ok(()) => return Ok(command.response(frame)),
                        Err(rejection) => warn!(
                            "invalid response: {} (attempt {} of {})",
                            rejection, attempt, self.retries
                        ),
                    }
                }
                Ok(Err(err)) => return Err(Failure::Io(err)),
                Err(_) => warn!(
                    "no response within {:?} (attempt {} of {})",
                    self.timeout, attempt, self.retries
                ),
            }
        }

        Err(Failure::Exhausted)
    }
}
