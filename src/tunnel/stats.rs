use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How often a connection may push its buffered deltas into the shared
/// namespace. Closing always flushes.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// Process wide counters, shared by every worker. `sent` accumulates
/// bytes relayed toward the backends, `recv` bytes relayed back to the
/// clients.
#[derive(Debug, Default)]
pub struct GlobalStats {
    current: AtomicU64,
    total: AtomicU64,
    sent: AtomicU64,
    recv: AtomicU64,
}

impl GlobalStats {
    pub fn new() -> Self {
        GlobalStats::default()
    }

    pub fn current_connections(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn total_connections(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn recv_bytes(&self) -> u64 {
        self.recv.load(Ordering::Relaxed)
    }

    /// One line, semicolon joined, newline terminated. Callers may grow
    /// the record with new fields, so consumers should split and take
    /// what they know.
    pub fn snapshot(&self) -> String {
        format!(
            "{};{};{};{}\n",
            self.current_connections(),
            self.total_connections(),
            self.sent_bytes(),
            self.recv_bytes()
        )
    }

    fn connection_opened(&self) {
        self.current.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    fn connection_closed(&self) {
        self.current.fetch_sub(1, Ordering::Relaxed);
    }

    fn add_sent(&self, bytes: u64) {
        self.sent.fetch_add(bytes, Ordering::Relaxed);
    }

    fn add_recv(&self, bytes: u64) {
        self.recv.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Per connection handle over the shared namespace. Byte counts are kept
/// local and batched into [`GlobalStats`] at most every [`FLUSH_INTERVAL`]
/// and on close. Close is idempotent and decrements `current` exactly once.
#[derive(Debug)]
pub struct ConnectionStats {
    globals: Arc<GlobalStats>,
    sent: AtomicU64,
    recv: AtomicU64,
    // Flush bookkeeping, only touched under the lock
    flush_state: Mutex<FlushState>,
    start: Instant,
    closed: AtomicBool,
}

#[derive(Debug)]
struct FlushState {
    flushed_sent: u64,
    flushed_recv: u64,
    last: Instant,
}

impl ConnectionStats {
    /// Registers a new live connection in the shared namespace.
    pub fn open(globals: Arc<GlobalStats>) -> Arc<Self> {
        globals.connection_opened();
        let now = Instant::now();
        Arc::new(ConnectionStats {
            globals,
            sent: AtomicU64::new(0),
            recv: AtomicU64::new(0),
            flush_state: Mutex::new(FlushState {
                flushed_sent: 0,
                flushed_recv: 0,
                last: now,
            }),
            start: now,
            closed: AtomicBool::new(false),
        })
    }

    pub fn add_sent(&self, bytes: u64) {
        self.sent.fetch_add(bytes, Ordering::Relaxed);
        self.maybe_flush();
    }

    pub fn add_recv(&self, bytes: u64) {
        self.recv.fetch_add(bytes, Ordering::Relaxed);
        self.maybe_flush();
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn recv(&self) -> u64 {
        self.recv.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn maybe_flush(&self) {
        let mut state = self.flush_state.lock().unwrap_or_else(|e| e.into_inner());
        if state.last.elapsed() >= FLUSH_INTERVAL {
            self.flush(&mut state);
        }
    }

    fn flush(&self, state: &mut FlushState) {
        let sent = self.sent.load(Ordering::Relaxed);
        let recv = self.recv.load(Ordering::Relaxed);
        self.globals.add_sent(sent - state.flushed_sent);
        self.globals.add_recv(recv - state.flushed_recv);
        state.flushed_sent = sent;
        state.flushed_recv = recv;
        state.last = Instant::now();
    }

    /// Final flush plus the `current` decrement. Safe to call twice.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.flush_state.lock().unwrap_or_else(|e| e.into_inner());
        self.flush(&mut state);
        self.globals.connection_closed();
    }
}

// A connection dropped by a panicking task must still release its slot
impl Drop for ConnectionStats {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close_tracks_current() {
        let globals = Arc::new(GlobalStats::new());
        let conn = ConnectionStats::open(globals.clone());
        assert_eq!(globals.current_connections(), 1);
        assert_eq!(globals.total_connections(), 1);

        conn.close();
        assert_eq!(globals.current_connections(), 0);
        // total is lifetime, never decremented
        assert_eq!(globals.total_connections(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let globals = Arc::new(GlobalStats::new());
        let conn = ConnectionStats::open(globals.clone());
        conn.close();
        conn.close();
        drop(conn); // close() via Drop, already closed
        assert_eq!(globals.current_connections(), 0);
    }

    #[test]
    fn test_deltas_are_batched_until_close() {
        let globals = Arc::new(GlobalStats::new());
        let conn = ConnectionStats::open(globals.clone());

        conn.add_sent(100);
        conn.add_recv(50);
        // Interval has not elapsed, globals untouched
        assert_eq!(globals.sent_bytes(), 0);
        assert_eq!(globals.recv_bytes(), 0);
        assert_eq!(conn.sent(), 100);
        assert_eq!(conn.recv(), 50);

        conn.close();
        assert_eq!(globals.sent_bytes(), 100);
        assert_eq!(globals.recv_bytes(), 50);
    }

    #[test]
    fn test_flush_only_pushes_new_deltas() {
        let globals = Arc::new(GlobalStats::new());
        let conn = ConnectionStats::open(globals.clone());

        conn.add_sent(100);
        {
            let mut state = conn.flush_state.lock().unwrap();
            conn.flush(&mut state);
        }
        assert_eq!(globals.sent_bytes(), 100);

        conn.add_sent(11);
        conn.close();
        // 100 already flushed, only the remaining 11 now
        assert_eq!(globals.sent_bytes(), 111);
    }

    #[test]
    fn test_snapshot_format() {
        let globals = Arc::new(GlobalStats::new());
        let conn = ConnectionStats::open(globals.clone());
        conn.add_sent(1048576);
        conn.add_recv(2097152);
        conn.close();

        assert_eq!(globals.snapshot(), "0;1;1048576;2097152\n");
    }
}
