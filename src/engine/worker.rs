//! Background prioritization worker
//!
//! Full passes can take minutes, so interactive callers never run them
//! inline. They enqueue a request on a bounded channel consumed by one
//! dedicated worker task and get a [`PassHandle`] back: await it to observe
//! completion, or drop it to fire and forget.
//!
//! Requests are served one at a time, in order; every queued request runs
//! exactly one pass. Requesting never blocks: once the queue is full, a new
//! request joins the next pass to start instead of waiting for room.

use super::prioritizer::{PassSummary, Prioritizer};
use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const QUEUE_CAPACITY: usize = 32;

type Reply = oneshot::Sender<Result<PassSummary, String>>;

struct PassRequest {
    reply: Reply,
}

/// Replies of requests that arrived while the queue was full
type Coalesced = Arc<Mutex<Vec<Reply>>>;

fn take_coalesced(coalesced: &Coalesced) -> Vec<Reply> {
    std::mem::take(&mut *coalesced.lock().unwrap_or_else(|p| p.into_inner()))
}

/// Completion handle of one requested pass
#[derive(Debug)]
pub struct PassHandle {
    rx: oneshot::Receiver<Result<PassSummary, String>>,
}

impl PassHandle {
    /// Wait for the pass to finish.
    ///
    /// Errors if the pass failed or the worker stopped before running it.
    pub async fn wait(self) -> Result<PassSummary> {
        match self.rx.await {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(message)) => Err(anyhow::anyhow!(message)),
            Err(_) => anyhow::bail!("prioritization worker stopped before running the pass"),
        }
    }
}

/// Cheaply cloneable handle to the worker's queue
#[derive(Clone)]
pub struct PrioritizationWorker {
    tx: mpsc::Sender<PassRequest>,
    coalesced: Coalesced,
    prioritizer: Arc<Prioritizer>,
}

impl PrioritizationWorker {
    /// Spawn the worker loop. It exits when `cancel` fires or every handle
    /// is dropped.
    pub fn spawn(prioritizer: Arc<Prioritizer>, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        Self::spawn_with_capacity(prioritizer, cancel, QUEUE_CAPACITY)
    }

    pub fn spawn_with_capacity(
        prioritizer: Arc<Prioritizer>,
        cancel: CancellationToken,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let coalesced = Coalesced::default();
        let join = tokio::spawn(run_loop(prioritizer.clone(), rx, coalesced.clone(), cancel));
        let worker = Self {
            tx,
            coalesced,
            prioritizer,
        };
        (worker, join)
    }

    /// Queue one full pass.
    ///
    /// Never waits for room: with a full queue the request shares the result
    /// of the next pass to start, which begins after this call.
    pub async fn request_pass(&self) -> Result<PassHandle> {
        let (reply, rx) = oneshot::channel();
        match self.tx.try_send(PassRequest { reply }) {
            Ok(()) => debug!("Prioritization pass queued"),
            Err(TrySendError::Full(request)) => {
                self.coalesced
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push(request.reply);
                if self.tx.is_closed() {
                    take_coalesced(&self.coalesced);
                    anyhow::bail!("prioritization worker is not running");
                }
                debug!("Prioritization queue full, joining the next pass");
            }
            Err(TrySendError::Closed(_)) => anyhow::bail!("prioritization worker is not running"),
        }
        Ok(PassHandle { rx })
    }

    /// Number of full passes finished so far
    pub fn passes_completed(&self) -> u64 {
        self.prioritizer.passes_completed()
    }
}

async fn run_loop(
    prioritizer: Arc<Prioritizer>,
    mut rx: mpsc::Receiver<PassRequest>,
    coalesced: Coalesced,
    cancel: CancellationToken,
) {
    info!("Prioritization worker started");
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = rx.recv() => match request {
                Some(r) => r,
                None => break,
            },
        };

        let joined = take_coalesced(&coalesced);
        if !joined.is_empty() {
            debug!(joined = joined.len(), "Coalesced requests join this pass");
        }

        // Run the pass in its own task so a panic fails this request only.
        let p = prioritizer.clone();
        let token = cancel.child_token();
        let result = match tokio::spawn(async move { p.prioritize_all(&token).await }).await {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(e)) => {
                error!("Prioritization pass failed: {:#}", e);
                Err(format!("{:#}", e))
            }
            Err(join_err) if join_err.is_panic() => {
                error!("Prioritization pass panicked: {}", join_err);
                Err(format!("prioritization pass panicked: {}", join_err))
            }
            Err(join_err) => Err(format!("prioritization pass aborted: {}", join_err)),
        };

        // Requesters may have dropped their handles; that is fine.
        for reply in joined {
            let _ = reply.send(result.clone());
        }
        let _ = request.reply.send(result);
    }
    rx.close();
    // Pending joiners see the worker stop instead of waiting forever
    take_coalesced(&coalesced);
    info!("Prioritization worker stopped");
}
