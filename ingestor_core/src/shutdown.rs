use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{self, Either, FutureExt, Shared};

/// The process-wide cancellation signal.
///
/// Every long running wait (reconnect backoff, write retries, the delivery
/// loop) holds a clone and races against it, so firing the signal unblocks
/// the whole pipeline within one polling interval.
#[derive(Clone)]
pub struct Shutdown {
    fired: Shared<oneshot::Receiver<()>>,
}

impl Shutdown {
    /// Create the signal; send on the returned sender to fire it.
    ///
    /// Dropping the sender without sending also counts as a shutdown.
    pub fn new() -> (oneshot::Sender<()>, Shutdown) {
        let (sender, receiver) = oneshot::channel();
        let shutdown = Shutdown {
            fired: receiver.shared(),
        };
        (sender, shutdown)
    }

    /// Whether the signal has fired.
    pub fn is_shutdown(&self) -> bool {
        self.fired.clone().now_or_never().is_some()
    }

    /// Wait until the signal fires.
    pub async fn wait(&self) {
        let _ = self.fired.clone().await;
    }

    /// Sleep for `delay`, waking early if the signal fires.
    ///
    /// Returns false if the sleep was interrupted by shutdown.
    pub async fn sleep(&self, delay: Duration) -> bool {
        let sleep = async_std::task::sleep(delay);
        let stop = self.wait();
        futures::pin_mut!(sleep, stop);
        match future::select(sleep, stop).await {
            Either::Left(_) => true,
            Either::Right(_) => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Instant;

    #[test]
    fn sleep_completes_without_a_signal() {
        async_std::task::block_on(async {
            let (_sender, shutdown) = Shutdown::new();

            assert!(!shutdown.is_shutdown());
            assert!(shutdown.sleep(Duration::from_millis(5)).await);
        });
    }

    #[test]
    fn sleep_is_interrupted_by_the_signal() {
        async_std::task::block_on(async {
            let (sender, shutdown) = Shutdown::new();
            sender.send(()).unwrap();

            // It returns well before the requested delay
            let start = Instant::now();
            assert!(!shutdown.sleep(Duration::from_secs(60)).await);
            assert!(start.elapsed() < Duration::from_secs(1));

            assert!(shutdown.is_shutdown());
        });
    }

    #[test]
    fn a_dropped_sender_counts_as_shutdown() {
        async_std::task::block_on(async {
            let (sender, shutdown) = Shutdown::new();
            drop(sender);

            assert!(shutdown.is_shutdown());
            assert!(!shutdown.sleep(Duration::from_secs(60)).await);
            shutdown.wait().await;
        });
    }

    #[test]
    fn clones_observe_the_same_signal() {
        async_std::task::block_on(async {
            let (sender, shutdown) = Shutdown::new();
            let clone = shutdown.clone();

            assert!(!clone.is_shutdown());
            sender.send(()).unwrap();
            assert!(clone.is_shutdown());
            assert!(shutdown.is_shutdown());
        });
    }
}
