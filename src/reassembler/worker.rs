//! Background thread driving the request cycle.
//!
//! The worker sleeps for a jittered [`missing_fragment_timeout`] between
//! cycles. Shutdown is two-phase: [`RequestWorker::request_termination`] wakes
//! the sleeping thread, which exits before its next cycle, and
//! [`RequestWorker::join`] waits for it.
//!
//! [`missing_fragment_timeout`]: crate::config::ReassemblerConfig::missing_fragment_timeout

use std::{
    io,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{info, warn};
use rand::rngs::StdRng;

use super::Reassembler;
use crate::{backoff, metrics};

/// Handle to a running request worker.
///
/// Dropping the handle stops the worker and waits for it.
#[derive(Debug)]
pub struct RequestWorker {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl RequestWorker {
    /// Start a worker running cycles on `reassembler`.
    ///
    /// # Errors
    ///
    /// Returns any error raised while spawning the thread.
    pub fn spawn(reassembler: Reassembler, rng: StdRng) -> io::Result<Self> {
        let (shutdown, signal) = channel::bounded(1);
        let handle = thread::Builder::new()
            .name("dissemination-requests".into())
            .spawn(move || run(&reassembler, &signal, rng))?;
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Ask the worker to stop; returns without waiting.
    pub fn request_termination(&self) { let _ = self.shutdown.try_send(()); }

    /// Whether the worker thread is still running.
    #[must_use]
    pub fn is_running(&self) -> bool { self.handle.as_ref().is_some_and(|h| !h.is_finished()) }

    /// Wait for the worker to exit.
    ///
    /// # Errors
    ///
    /// Returns the thread's panic payload if it panicked.
    pub fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

impl Drop for RequestWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.request_termination();
            if handle.join().is_err() {
                warn!("request worker panicked");
            }
        }
    }
}

fn run(reassembler: &Reassembler, signal: &Receiver<()>, mut rng: StdRng) {
    let base = reassembler.config().missing_fragment_timeout;
    info!("request worker started");
    loop {
        match signal.recv_timeout(backoff::jittered(base, &mut rng)) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if let Err(err) = reassembler.run_request_cycle() {
            warn!("request cycle failed: {err}");
            metrics::inc_errors();
        }
    }
    info!("request worker stopped");
}
