//! Deadline-bounded execution of blocking provider calls.
//!
//! A [`Worker`] owns one provider (a sensor or a duty writer) on a dedicated
//! thread. Callers submit a job, get a [`Pending`] handle back immediately,
//! and wait on it with a deadline. A worker whose previous job has not
//! finished refuses new ones instead of queueing them, so a hung device
//! costs one timeout and then fails fast every tick until it recovers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const JOIN_GRACE: Duration = Duration::from_millis(250);
const JOIN_POLL: Duration = Duration::from_millis(5);

type Job<T> = Box<dyn FnOnce(&mut T) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerError {
    /// The previous job is still running.
    Busy,
    /// The deadline passed before the job replied.
    TimedOut,
    /// The worker thread is gone (the job panicked or the worker shut down).
    Gone,
}

pub struct Worker<T> {
    name: String,
    tx: Option<SyncSender<Job<T>>>,
    busy: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Worker<T> {
    pub fn spawn(name: impl Into<String>, mut inner: T) -> std::io::Result<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::sync_channel::<Job<T>>(1);
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            for job in rx {
                job(&mut inner);
            }
        })?;
        Ok(Self {
            name,
            tx: Some(tx),
            busy: Arc::new(AtomicBool::new(false)),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Hands `f` to the worker thread without waiting for it.
    pub fn submit<R, F>(&self, f: F) -> Result<Pending<R>, WorkerError>
    where
        R: Send + 'static,
        F: FnOnce(&mut T) -> R + Send + 'static,
    {
        let tx = self.tx.as_ref().ok_or(WorkerError::Gone)?;
        if self.handle.as_ref().map_or(true, |h| h.is_finished()) {
            return Err(WorkerError::Gone);
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(WorkerError::Busy);
        }

        let (reply_tx, reply_rx) = mpsc::channel();
        let busy = Arc::clone(&self.busy);
        let job: Job<T> = Box::new(move |inner| {
            let out = f(inner);
            // Cleared before replying so a caller that got the reply can
            // submit again immediately.
            busy.store(false, Ordering::Release);
            let _ = reply_tx.send(out);
        });

        match tx.try_send(job) {
            Ok(()) => Ok(Pending { rx: reply_rx }),
            Err(TrySendError::Full(_)) => {
                self.busy.store(false, Ordering::Release);
                Err(WorkerError::Busy)
            }
            Err(TrySendError::Disconnected(_)) => Err(WorkerError::Gone),
        }
    }

    /// Submits `f` and waits at most `timeout` for its result.
    pub fn call<R, F>(&self, timeout: Duration, f: F) -> Result<R, WorkerError>
    where
        R: Send + 'static,
        F: FnOnce(&mut T) -> R + Send + 'static,
    {
        self.submit(f)?.wait_until(Instant::now() + timeout)
    }
}

impl<T> Drop for Worker<T> {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop once the current job returns;
        // the provider is dropped on the worker thread.
        self.tx.take();
        let Some(handle) = self.handle.take() else {
            return;
        };
        let deadline = Instant::now() + JOIN_GRACE;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(JOIN_POLL);
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            log::warn!(
                "worker {} still blocked after {:?}, detaching",
                self.name,
                JOIN_GRACE
            );
        }
    }
}

/// Reply handle for a submitted job.
pub struct Pending<R> {
    rx: Receiver<R>,
}

impl<R> Pending<R> {
    pub fn wait_until(self, deadline: Instant) -> Result<R, WorkerError> {
        let timeout = deadline.saturating_duration_since(Instant::now());
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => WorkerError::TimedOut,
            RecvTimeoutError::Disconnected => WorkerError::Gone,
        })
    }
}
