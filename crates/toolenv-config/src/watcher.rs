use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};

use crate::store::{Baseline, Fingerprint};
use crate::ConfigStore;

/// Poll period used by the host.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The backing document changed without going through this process's store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalChange {
    pub path: PathBuf,
    /// The document disappeared rather than being rewritten.
    pub removed: bool,
}

type ChangeCallback = Box<dyn Fn(ExternalChange) + Send + Sync>;

struct Poller {
    path: PathBuf,
    baseline: Baseline,
    on_change: ChangeCallback,
}

impl Poller {
    fn poll(&self) -> bool {
        let mut baseline = self.baseline.lock();
        let current = Fingerprint::of(&self.path);
        if current == *baseline {
            return false;
        }
        *baseline = current;
        drop(baseline);

        let change = ExternalChange {
            path: self.path.clone(),
            removed: current.is_none(),
        };
        tracing::info!(
            path = %change.path.display(),
            removed = change.removed,
            "configuration changed outside this process"
        );
        (self.on_change)(change);
        true
    }
}

/// Modification-time poller for a [`ConfigStore`]'s backing file.
///
/// The watcher never touches the store's values. Each detected change is
/// reported once through the callback, which is expected to hand it to the
/// host's main loop.
pub struct ConfigWatcher {
    poller: Arc<Poller>,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ConfigWatcher {
    /// Starts the background poller thread.
    pub fn spawn<F>(store: &ConfigStore, interval: Duration, on_change: F) -> std::io::Result<Self>
    where
        F: Fn(ExternalChange) + Send + Sync + 'static,
    {
        let mut watcher = Self::manual(store, on_change);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let ticker = tick(interval);
        let poller = Arc::clone(&watcher.poller);
        let thread = thread::Builder::new()
            .name("toolenv-config-watch".into())
            .spawn(move || loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        poller.poll();
                    }
                }
            })?;
        watcher.stop = Some(stop_tx);
        watcher.thread = Some(thread);
        tracing::debug!(interval_ms = interval.as_millis() as u64, "config watcher started");
        Ok(watcher)
    }

    /// Builds a watcher without a thread; call [`poll_now`](Self::poll_now)
    /// to check for changes.
    pub fn manual<F>(store: &ConfigStore, on_change: F) -> Self
    where
        F: Fn(ExternalChange) + Send + Sync + 'static,
    {
        Self {
            poller: Arc::new(Poller {
                path: store.path().to_path_buf(),
                baseline: store.baseline(),
                on_change: Box::new(on_change),
            }),
            stop: None,
            thread: None,
        }
    }

    /// Runs one poll cycle on the calling thread. Returns whether a change was
    /// reported.
    pub fn poll_now(&self) -> bool {
        self.poller.poll()
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stops and joins the poller thread, if any.
    pub fn stop(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("config watcher thread panicked");
            }
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("path", &self.poller.path)
            .field("running", &self.is_running())
            .finish()
    }
}
