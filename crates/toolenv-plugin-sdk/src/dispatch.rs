use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use toolenv_config::ExternalChange;

use crate::{DispatchError, ProgressReport};

/// How long a worker thread waits for the main loop to run its request.
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

pub type Job = Box<dyn FnOnce() + Send>;

const QUEUED: u8 = 0;
const STARTED: u8 = 1;
const ABANDONED: u8 = 2;

/// Everything that crosses from another thread onto the main loop.
pub enum MainThreadMessage {
    /// Mutation requested off the main thread; run it in place.
    Run(Job),
    ConfigChangedExternally(ExternalChange),
    ConfigSaved { silent: bool },
    Progress(ProgressReport),
}

impl fmt::Debug for MainThreadMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MainThreadMessage::Run(_) => f.write_str("Run(..)"),
            MainThreadMessage::ConfigChangedExternally(change) => f
                .debug_tuple("ConfigChangedExternally")
                .field(change)
                .finish(),
            MainThreadMessage::ConfigSaved { silent } => f
                .debug_struct("ConfigSaved")
                .field("silent", silent)
                .finish(),
            MainThreadMessage::Progress(report) => {
                f.debug_tuple("Progress").field(report).finish()
            }
        }
    }
}

/// Cloneable handle for posting work to the [`MainLoop`].
#[derive(Clone)]
pub struct Dispatcher {
    sender: Sender<MainThreadMessage>,
    main_thread: ThreadId,
    timeout: Duration,
}

impl Dispatcher {
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread
    }

    /// Queues `message` without waiting.
    pub fn post(&self, message: MainThreadMessage) -> Result<(), DispatchError> {
        self.sender.send(message).map_err(|_| DispatchError::Closed)
    }

    /// Runs `job` on the main thread and returns its result.
    ///
    /// On the main thread the job runs inline. Elsewhere it is queued and the
    /// caller blocks until the main loop has run it or the timeout expires.
    /// A job still queued at the timeout is abandoned and never runs; one the
    /// main loop has already started is waited for.
    pub fn run_on_main<R, F>(&self, job: F) -> Result<R, DispatchError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_main_thread() {
            return Ok(job());
        }
        let state = Arc::new(AtomicU8::new(QUEUED));
        let job_state = Arc::clone(&state);
        let (reply_tx, reply_rx) = bounded(1);
        self.post(MainThreadMessage::Run(Box::new(move || {
            if job_state
                .compare_exchange(QUEUED, STARTED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                tracing::debug!("skipping main-thread request abandoned by its caller");
                return;
            }
            let _ = reply_tx.send(job());
        })))?;
        match reply_rx.recv_timeout(self.timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => {
                if state
                    .compare_exchange(QUEUED, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    tracing::warn!(timeout = ?self.timeout, "main-thread request timed out");
                    return Err(DispatchError::Timeout(self.timeout));
                }
                reply_rx.recv().map_err(|_| DispatchError::Closed)
            }
            Err(RecvTimeoutError::Disconnected) => Err(DispatchError::Closed),
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("main_thread", &self.main_thread)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// The single consumer of [`MainThreadMessage`]s, owned by the thread that
/// created it.
pub struct MainLoop {
    receiver: Receiver<MainThreadMessage>,
    dispatcher: Dispatcher,
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MainLoop {
    /// Binds the loop to the calling thread.
    pub fn new() -> Self {
        Self::with_timeout(DISPATCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            receiver,
            dispatcher: Dispatcher {
                sender,
                main_thread: thread::current().id(),
                timeout,
            },
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Drains the queue: runs every job and hands all other messages to
    /// `handle`. Returns the number of messages processed.
    pub fn run_pending(&self, mut handle: impl FnMut(MainThreadMessage)) -> usize {
        debug_assert!(
            self.dispatcher.is_main_thread(),
            "main loop pumped from a foreign thread"
        );
        let mut processed = 0;
        while let Ok(message) = self.receiver.try_recv() {
            processed += 1;
            match message {
                MainThreadMessage::Run(job) => job(),
                other => handle(other),
            }
        }
        processed
    }

    /// Waits up to `timeout` for a message, then drains the queue.
    pub fn run_for(&self, timeout: Duration, mut handle: impl FnMut(MainThreadMessage)) -> usize {
        match self.receiver.recv_timeout(timeout) {
            Ok(MainThreadMessage::Run(job)) => job(),
            Ok(other) => handle(other),
            Err(_) => return 0,
        }
        1 + self.run_pending(handle)
    }
}

impl fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainLoop")
            .field("pending", &self.receiver.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::ProgressState;

    #[test]
    fn main_thread_jobs_run_inline() {
        let main_loop = MainLoop::new();
        let dispatcher = main_loop.dispatcher();
        assert!(dispatcher.is_main_thread());
        assert_eq!(dispatcher.run_on_main(|| 6 * 7).unwrap(), 42);
        assert_eq!(main_loop.run_pending(|_| {}), 0);
    }

    #[test]
    fn worker_jobs_wait_for_the_main_loop() {
        let main_loop = MainLoop::new();
        let dispatcher = main_loop.dispatcher();
        let counter = Arc::new(AtomicUsize::new(0));
        let main_thread = thread::current().id();

        let worker_counter = Arc::clone(&counter);
        let worker = thread::spawn(move || {
            assert!(!dispatcher.is_main_thread());
            dispatcher.run_on_main(move || {
                assert_eq!(thread::current().id(), main_thread);
                worker_counter.fetch_add(1, Ordering::SeqCst)
            })
        });

        let mut processed = 0;
        while processed == 0 {
            processed = main_loop.run_for(Duration::from_secs(5), |_| {});
        }
        assert_eq!(worker.join().unwrap().unwrap(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn worker_times_out_when_main_loop_is_busy() {
        let main_loop = MainLoop::with_timeout(Duration::from_millis(50));
        let dispatcher = main_loop.dispatcher();
        let result = thread::spawn(move || dispatcher.run_on_main(|| ()))
            .join()
            .unwrap();
        assert!(matches!(result, Err(DispatchError::Timeout(_))));
    }

    #[test]
    fn abandoned_jobs_are_skipped_by_the_main_loop() {
        let main_loop = MainLoop::with_timeout(Duration::from_millis(50));
        let dispatcher = main_loop.dispatcher();
        let ran = Arc::new(AtomicUsize::new(0));

        let worker_ran = Arc::clone(&ran);
        let result = thread::spawn(move || {
            dispatcher.run_on_main(move || worker_ran.fetch_add(1, Ordering::SeqCst))
        })
        .join()
        .unwrap();
        assert!(matches!(result, Err(DispatchError::Timeout(_))));

        assert_eq!(main_loop.run_pending(|_| {}), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn started_jobs_are_waited_for_past_the_timeout() {
        let main_loop = MainLoop::with_timeout(Duration::from_millis(200));
        let dispatcher = main_loop.dispatcher();
        let worker = thread::spawn(move || {
            dispatcher.run_on_main(|| {
                thread::sleep(Duration::from_millis(400));
                7
            })
        });

        while main_loop.run_for(Duration::from_secs(5), |_| {}) == 0 {}
        assert_eq!(worker.join().unwrap().unwrap(), 7);
    }

    #[test]
    fn non_job_messages_reach_the_handler() {
        let main_loop = MainLoop::new();
        let dispatcher = main_loop.dispatcher();
        dispatcher
            .post(MainThreadMessage::Progress(ProgressReport::new(
                250,
                ProgressState::Normal,
            )))
            .unwrap();
        dispatcher
            .post(MainThreadMessage::ConfigSaved { silent: true })
            .unwrap();

        let mut seen = Vec::new();
        assert_eq!(main_loop.run_pending(|message| seen.push(message)), 2);
        assert!(matches!(
            seen[0],
            MainThreadMessage::Progress(ProgressReport { percent: 100, .. })
        ));
        assert!(matches!(seen[1], MainThreadMessage::ConfigSaved { silent: true }));
    }

    #[test]
    fn posting_after_shutdown_fails() {
        let main_loop = MainLoop::new();
        let dispatcher = main_loop.dispatcher();
        drop(main_loop);
        assert!(matches!(
            dispatcher.post(MainThreadMessage::ConfigSaved { silent: false }),
            Err(DispatchError::Closed)
        ));
    }
}
