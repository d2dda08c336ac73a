use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use retouch_contracts::progress::{ProgressCurve, ProgressEstimator};
use tracing::warn;

/// Drives a [`ProgressEstimator`] from its own thread for as long as a
/// request is pending. Purely cosmetic: nothing in the session waits on it.
pub struct ProgressTicker {
    estimator: Arc<Mutex<ProgressEstimator>>,
    tick: Duration,
    stop: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProgressTicker {
    pub fn new(curve: ProgressCurve, tick: Duration) -> Self {
        Self {
            estimator: Arc::new(Mutex::new(ProgressEstimator::new(curve))),
            tick,
            stop: None,
            handle: None,
        }
    }

    pub fn start(&mut self) {
        self.halt();
        if let Ok(mut estimator) = self.estimator.lock() {
            estimator.start();
        }

        let (tx, rx) = mpsc::channel::<()>();
        let shared = Arc::clone(&self.estimator);
        let tick = self.tick;
        let spawned = thread::Builder::new()
            .name("retouch-progress".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(tick) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        let Ok(mut estimator) = shared.lock() else {
                            break;
                        };
                        if !estimator.is_active() {
                            break;
                        }
                        estimator.tick();
                    }
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            });
        match spawned {
            Ok(handle) => {
                self.stop = Some(tx);
                self.handle = Some(handle);
            }
            Err(err) => warn!(error = %err, "progress ticker thread spawn failed"),
        }
    }

    /// Stops ticking and pins the value at 100.
    pub fn finish(&mut self) {
        self.halt();
        if let Ok(mut estimator) = self.estimator.lock() {
            estimator.finish();
        }
    }

    pub fn value(&self) -> f64 {
        self.estimator
            .lock()
            .map(|estimator| estimator.value())
            .unwrap_or(100.0)
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn halt(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.halt();
    }
}
