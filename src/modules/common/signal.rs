use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;

use tokio::signal;
use tokio::sync::broadcast;

use crate::modules::{context::Initialize, error::PostroomResult};

pub static SIGNAL_MANAGER: LazyLock<SignalManager> = LazyLock::new(SignalManager::new);

/// Process-wide shutdown fan-out. Drivers subscribe to the broadcast for
/// their select loops; code in the middle of a long tick polls
/// `is_shutting_down` so a pass ends at the next batch boundary instead of
/// the next wakeup. Shutdown can come from the OS (Ctrl+C, SIGTERM) or be
/// triggered programmatically.
pub struct SignalManager {
    sender: broadcast::Sender<()>,
    shutting_down: AtomicBool,
}

impl SignalManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(4);
        SignalManager {
            sender,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Flips the process into shutdown: the flag first, then the broadcast,
    /// so anything woken by the send already observes the flag.
    pub fn trigger_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        let _ = self.sender.send(());
    }

    async fn os_shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Error installing Ctrl+C signal handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Error installing terminate signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        };
    }
}

impl Initialize for SignalManager {
    async fn initialize() -> PostroomResult<()> {
        tokio::spawn(async {
            Self::os_shutdown_signal().await;
            println!("\nShutdown signal received");
            SIGNAL_MANAGER.trigger_shutdown();
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_sets_the_flag_and_wakes_subscribers() {
        let manager = SignalManager::new();
        let mut early = manager.subscribe();
        assert!(!manager.is_shutting_down());

        manager.trigger_shutdown();
        assert!(manager.is_shutting_down());
        early.recv().await.unwrap();

        // Late subscribers miss the broadcast but still see the flag.
        assert!(manager.is_shutting_down());
    }

    #[tokio::test]
    async fn trigger_is_idempotent() {
        let manager = SignalManager::new();
        manager.trigger_shutdown();
        manager.trigger_shutdown();
        assert!(manager.is_shutting_down());
    }
}
