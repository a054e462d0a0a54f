use std::{future::Future, time::Duration};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::modules::{common::signal::SIGNAL_MANAGER, error::PostroomResult};

/// Consecutive non-transient tick failures before logging escalates from
/// warn to error.
const FAILURE_ESCALATION_THRESHOLD: u32 = 3;

/// One background concern driven at a fixed cadence.
///
/// Transient transport failures are not retried inside the tick; the next
/// tick is the retry policy. Persistent failures keep the driver alive but
/// escalate in the log once they repeat.
pub struct Driver {
    name: &'static str,
    interval: Duration,
    run_immediately: bool,
}

/// Handle to a spawned driver. `stop` drains the in-flight tick before
/// returning; dropping the handle without stopping ends the driver at its
/// next loop turn.
pub struct DriverHandle {
    name: &'static str,
    stop_tx: oneshot::Sender<()>,
    joined: JoinHandle<()>,
}

impl DriverHandle {
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.joined.await;
        info!("Driver '{}' drained", self.name);
    }
}

impl Driver {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval,
            run_immediately: false,
        }
    }

    /// The first tick fires on spawn instead of one interval later.
    pub fn immediate(mut self) -> Self {
        self.run_immediately = true;
        self
    }

    pub fn spawn<T, F>(self, tick: T) -> DriverHandle
    where
        T: Fn() -> F + Send + Sync + 'static,
        F: Future<Output = PostroomResult<()>> + Send + 'static,
    {
        let Driver {
            name,
            interval,
            run_immediately,
        } = self;
        info!("Driver '{}' started (every {:?})", name, interval);

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let joined = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut shutdown = SIGNAL_MANAGER.subscribe();
            if !run_immediately {
                ticker.tick().await; // discard the immediate first tick
            }
            let mut consecutive_failures = 0u32;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match tick().await {
                            Ok(()) => consecutive_failures = 0,
                            Err(err) if err.code().is_retryable() => {
                                debug!(
                                    "Driver '{}' hit transient trouble, retrying next tick: {:?}",
                                    name, err
                                );
                            }
                            Err(err) => {
                                consecutive_failures += 1;
                                if consecutive_failures >= FAILURE_ESCALATION_THRESHOLD {
                                    error!(
                                        "Driver '{}' failed {} ticks in a row: {:?}",
                                        name, consecutive_failures, err
                                    );
                                } else {
                                    warn!("Driver '{}' tick failed: {:?}", name, err);
                                }
                            }
                        }
                        // A tick that outlived the shutdown broadcast still
                        // ends the loop here.
                        if SIGNAL_MANAGER.is_shutting_down() {
                            info!("Driver '{}' observed shutdown after its tick", name);
                            break;
                        }
                    }
                    _ = &mut stop_rx => {
                        info!("Driver '{}' stop requested", name);
                        break;
                    }
                    _ = shutdown.recv() => {
                        info!("Driver '{}' shutting down", name);
                        break;
                    }
                }
            }
            info!("Driver '{}' stopped", name);
        });

        DriverHandle {
            name,
            stop_tx,
            joined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::error::code::ErrorCode;
    use crate::raise_error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn stop_drains_and_halts_ticking() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let handle = Driver::new("tick-counter", Duration::from_millis(20))
            .immediate()
            .spawn(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });

        tokio::time::sleep(Duration::from_millis(70)).await;
        handle.stop().await;
        let at_stop = ticks.load(Ordering::SeqCst);
        assert!(at_stop >= 2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), at_stop);
    }

    #[tokio::test]
    async fn failing_ticks_keep_the_driver_alive() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let handle = Driver::new("always-failing", Duration::from_millis(15))
            .immediate()
            .spawn(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(raise_error!(
                        "scripted tick failure".into(),
                        ErrorCode::InternalError
                    ))
                }
            });

        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.stop().await;
        // The loop survived repeated failures and kept ticking.
        assert!(attempts.load(Ordering::SeqCst) >= 3);
    }
}
