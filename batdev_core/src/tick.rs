//! Hosted tick source.
//!
//! Spawns a thread that advances the shared [`TimerBank`] once per period and
//! wakes the foreground through a bounded channel. The wake is a hint: if the
//! foreground has not consumed the previous one the send is dropped, and the
//! timer flags carry the real state.
//!
//! Each `TickDriver` owns exactly one thread, shut down and joined on drop.
use crossbeam_channel as xch;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use batdev_traits::Clock;

use crate::timers::TimerBank;

pub struct TickDriver {
    wake_rx: xch::Receiver<()>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl TickDriver {
    pub fn spawn<C: Clock + Send + 'static>(
        timers: Arc<TimerBank>,
        period: Duration,
        clock: C,
    ) -> Self {
        let (tx, rx) = xch::bounded(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("tick thread received shutdown signal");
                    break;
                }
                clock.sleep(period);
                // Masks the foreground's critical sections the way an ISR would be masked.
                critical_section::with(|_| timers.advance_tick());
                match tx.try_send(()) {
                    Ok(()) | Err(xch::TrySendError::Full(())) => {}
                    Err(xch::TrySendError::Disconnected(())) => {
                        tracing::debug!("tick consumer disconnected, exiting thread");
                        break;
                    }
                }
            }
            tracing::trace!("tick thread exiting cleanly");
        });

        Self {
            wake_rx: rx,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Block until the next tick or `timeout`. Returns `false` on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.wake_rx.recv_timeout(timeout).is_ok()
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("tick thread joined"),
                Err(e) => tracing::warn!(?e, "tick thread panicked during shutdown"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimerCfg;
    use batdev_traits::MonotonicClock;

    #[test]
    fn driver_advances_ticks_and_wakes() {
        let timers = Arc::new(TimerBank::new(&TimerCfg::default()).unwrap());
        let driver = TickDriver::spawn(timers.clone(), Duration::from_millis(1), MonotonicClock::new());
        assert!(driver.wait(Duration::from_secs(2)));
        assert!(driver.wait(Duration::from_secs(2)));
        drop(driver);
        assert!(timers.now() >= 2);
    }
}
