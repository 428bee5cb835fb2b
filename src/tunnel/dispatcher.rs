use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;

use crate::config::Config;

use super::event::Event;
use super::server::Connection;
use super::stats::GlobalStats;
use super::udsapi::UDSApiProvider;

/// How long a worker gets to drain its sessions on shutdown before it is
/// hard-killed.
pub const STOP_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// Accepted sockets queued per worker before the dispatcher blocks.
const DISPATCH_QUEUE: usize = 64;

/// Everything a worker needs to serve its connections.
#[derive(Clone)]
pub struct WorkerContext {
    pub acceptor: TlsAcceptor,
    pub config: Config,
    pub udsapi: Arc<dyn UDSApiProvider>,
    pub stats: Arc<GlobalStats>,
    pub stop_event: Event,
}

struct Worker {
    slot: usize,
    tx: mpsc::Sender<TcpStream>,
    /// Live sessions on this worker; the dispatch load probe.
    active: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

/// Fixed-size pool of worker tasks. The listener owner hands each
/// accepted socket to the least loaded worker; a worker found dead at
/// dispatch time is reaped and respawned in its slot.
pub struct WorkerPool {
    workers: Vec<Worker>,
    context: WorkerContext,
}

impl WorkerPool {
    pub fn new(count: usize, context: WorkerContext) -> Self {
        let workers = (0..count.max(1))
            .map(|slot| spawn_worker(slot, &context))
            .collect();
        WorkerPool { workers, context }
    }

    /// Sends the accepted socket to the least loaded live worker. Load
    /// balancing is by live session count: sessions vary wildly in
    /// throughput, so round robin would let one bulky session starve
    /// its queue neighbours.
    pub async fn dispatch(&mut self, stream: TcpStream) {
        let mut stream = stream;
        for _ in 0..=self.workers.len() {
            self.reap();
            let best = match self
                .workers
                .iter()
                .min_by_key(|w| w.active.load(Ordering::Relaxed))
            {
                Some(worker) => worker,
                None => break,
            };
            match best.tx.send(stream).await {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    // Worker died between the liveness check and the send
                    log::warn!("Worker {} is gone, retrying dispatch", best.slot);
                    stream = returned;
                }
            }
        }
        log::error!("No live worker accepted the connection, dropping it");
    }

    fn reap(&mut self) {
        for i in 0..self.workers.len() {
            if self.workers[i].handle.is_finished() {
                let slot = self.workers[i].slot;
                log::warn!("Worker {} finished unexpectedly, respawning", slot);
                self.workers[i] = spawn_worker(slot, &self.context);
            }
        }
    }

    /// Graceful stop: closing the pipes lets every worker drain its
    /// in-flight sessions; whoever outlives the grace period is aborted.
    pub async fn shutdown(self) {
        let handles: Vec<(usize, JoinHandle<()>)> = self
            .workers
            .into_iter()
            .map(|worker| (worker.slot, worker.handle))
            .collect();
        // Senders dropped above with the workers, receivers see the close

        for (slot, mut handle) in handles {
            if timeout(STOP_GRACE, &mut handle).await.is_err() {
                log::warn!("Worker {} did not stop in time, killing it", slot);
                handle.abort();
            }
        }
    }
}

fn spawn_worker(slot: usize, context: &WorkerContext) -> Worker {
    let (tx, rx) = mpsc::channel(DISPATCH_QUEUE);
    let active = Arc::new(AtomicUsize::new(0));
    let handle = tokio::spawn(worker_loop(slot, rx, active.clone(), context.clone()));
    Worker {
        slot,
        tx,
        active,
        handle,
    }
}

/// One worker: receives accepted sockets from its pipe and runs each as
/// an independent session task. A session failure never takes the worker
/// down. When the pipe closes, in-flight sessions are drained.
async fn worker_loop(
    slot: usize,
    mut rx: mpsc::Receiver<TcpStream>,
    active: Arc<AtomicUsize>,
    context: WorkerContext,
) {
    log::debug!("Worker {} started", slot);
    let mut sessions = JoinSet::new();
    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(stream) => {
                        active.fetch_add(1, Ordering::Relaxed);
                        let guard = ActiveGuard(active.clone());
                        let mut connection = Connection::new(stream, &context);
                        sessions.spawn(async move {
                            let _guard = guard;
                            if let Err(e) = connection.process().await {
                                log::error!("Connection error: {:?}", e);
                            }
                        });
                    }
                    None => break,
                }
            }
            // Reap finished sessions so the set does not grow unbounded
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }

    while sessions.join_next().await.is_some() {}
    log::debug!("Worker {} stopped", slot);
}

// Keeps the load gauge honest even if a session task panics
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
