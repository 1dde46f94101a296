//! One persistent TCP connection to a remote playout engine (spec §4.2).
//!
//! At most one batch is in flight per connection; additional batches queue
//! FIFO. A single background worker task owns the socket end-to-end —
//! the teacher's "one task per connection, pull batches off a queue" idiom
//! (`connectivity/monitor.rs`, generalized from a ping loop to a command
//! channel).

use crate::batch::Batch;
use crate::error::{NetworkError, ProtocolError, RemoteCallError, RemoteError};
use crate::remote::protocol::{parse_frame_reply, read_reply, ReadError, Reply};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
const BACKOFF_MULTIPLIER: f64 = 2.0;
const JITTER_FRACTION: f64 = 0.2;

/// Observable connection lifecycle state (spec §4.2 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    Busy,
    Reconnecting,
}

struct Job {
    batch: Batch,
    reply: oneshot::Sender<Result<Vec<Reply>, RemoteCallError>>,
}

/// One `(host, port)` connection, shared by every slot that targets it.
pub struct Connection {
    pub host: String,
    pub port: u16,
    tx: mpsc::UnboundedSender<Job>,
    state: Arc<RwLock<ConnState>>,
}

impl Connection {
    /// Spawns the worker task and returns a handle. The socket is not opened
    /// until the first batch is sent.
    pub fn spawn(host: String, port: u16) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(ConnState::Disconnected));
        let worker_state = state.clone();
        let worker_host = host.clone();
        tokio::spawn(run_worker(worker_host, port, rx, worker_state));
        Arc::new(Self { host, port, tx, state })
    }

    /// Sends a batch and awaits its terminal result. Fails with
    /// [`NetworkError`] if the worker has already shut down.
    pub async fn send(&self, batch: Batch) -> Result<(), RemoteCallError> {
        self.send_and_collect_replies(batch).await.map(|_| ())
    }

    /// Sends a single-command `CALL ch-layer FRAME` batch and parses the
    /// reply's integer body. `Ok(None)` is a malformed-but-successful reply
    /// (spec §4.6 step 2: treated as an unknown sample, not an error).
    pub async fn call_frame(&self, channel: u32, layer: u32) -> Result<Option<i64>, RemoteCallError> {
        let mut batch = Batch::new();
        batch.push(crate::batch::Command::CallFrame { channel, layer });
        let replies = self.send_and_collect_replies(batch).await?;
        Ok(replies.first().and_then(parse_frame_reply))
    }

    async fn send_and_collect_replies(&self, batch: Batch) -> Result<Vec<Reply>, RemoteCallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Job { batch, reply: reply_tx })
            .map_err(|_| NetworkError::Closed { host: self.host.clone(), port: self.port })?;
        reply_rx
            .await
            .map_err(|_| NetworkError::Closed { host: self.host.clone(), port: self.port })?
    }

    pub async fn state(&self) -> ConnState {
        *self.state.read().await
    }
}

/// Backoff pacing shared across connect attempts on one worker — computed
/// fresh on each failure, reset to `INITIAL_BACKOFF` on success.
struct Backoff {
    delay: Duration,
    not_before: Option<Instant>,
}

impl Backoff {
    fn new() -> Self {
        Self { delay: INITIAL_BACKOFF, not_before: None }
    }

    fn reset(&mut self) {
        self.delay = INITIAL_BACKOFF;
        self.not_before = None;
    }

    /// `true` if an attempt is allowed right now (the backoff window elapsed).
    fn ready(&self) -> bool {
        match self.not_before {
            Some(t) => Instant::now() >= t,
            None => true,
        }
    }

    /// Records a failed attempt and advances the backoff window with ±20% jitter.
    fn record_failure(&mut self) {
        let jitter = 1.0 + rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
        let jittered_ms = (self.delay.as_millis() as f64 * jitter).max(0.0) as u64;
        self.not_before = Some(Instant::now() + Duration::from_millis(jittered_ms));

        let next_ms = (self.delay.as_millis() as f64 * BACKOFF_MULTIPLIER) as u64;
        self.delay = Duration::from_millis(next_ms).min(MAX_BACKOFF);
    }
}

async fn run_worker(
    host: String,
    port: u16,
    mut rx: mpsc::UnboundedReceiver<Job>,
    state: Arc<RwLock<ConnState>>,
) {
    let mut stream: Option<BufReader<TcpStream>> = None;
    let mut backoff = Backoff::new();

    while let Some(job) = rx.recv().await {
        if stream.is_none() {
            if !backoff.ready() {
                let _ = job.reply.send(Err(NetworkError::Closed {
                    host: host.clone(),
                    port,
                }
                .into()));
                continue;
            }
            *state.write().await = ConnState::Connecting;
            match TcpStream::connect((host.as_str(), port)).await {
                Ok(s) => {
                    info!(%host, port, "connected to remote playout engine");
                    stream = Some(BufReader::new(s));
                    backoff.reset();
                    *state.write().await = ConnState::Connected;
                }
                Err(e) => {
                    warn!(%host, port, err = %e, "connect failed — backing off");
                    backoff.record_failure();
                    *state.write().await = ConnState::Reconnecting;
                    let _ = job.reply.send(Err(NetworkError::Connect {
                        host: host.clone(),
                        port,
                        source: e,
                    }
                    .into()));
                    continue;
                }
            }
        }

        *state.write().await = ConnState::Busy;
        let outcome = send_batch(stream.as_mut().unwrap(), &job.batch, &host, port).await;

        match &outcome {
            Ok(_) => {
                *state.write().await = ConnState::Connected;
            }
            Err(RemoteCallError::Network(_)) => {
                warn!(%host, port, "network error mid-batch — dropping connection and pending queue");
                stream = None;
                *state.write().await = ConnState::Reconnecting;
                backoff.record_failure();
                let _ = job.reply.send(outcome);
                drain_with_network_error(&mut rx, &host, port);
                continue;
            }
            Err(RemoteCallError::Protocol(_)) => {
                warn!(%host, port, "protocol error — assuming desync, dropping connection");
                stream = None;
                *state.write().await = ConnState::Reconnecting;
            }
            Err(RemoteCallError::Remote(_)) => {
                // Does not trigger reconnect — connection stays open.
                *state.write().await = ConnState::Connected;
            }
        }

        let _ = job.reply.send(outcome);
    }

    debug!(%host, port, "connection worker exiting — no more references");
}

fn drain_with_network_error(rx: &mut mpsc::UnboundedReceiver<Job>, host: &str, port: u16) {
    while let Ok(job) = rx.try_recv() {
        let _ = job.reply.send(Err(NetworkError::Closed {
            host: host.to_string(),
            port,
        }
        .into()));
    }
}

/// Writes every line of the batch's `DEFER`/`RESUME` envelope and reads the
/// matching reply for each, returning every parsed reply in order (only the
/// command replies carry a useful body — `CALL ... FRAME`). The first
/// non-success reply aborts the batch (spec §4.3: partial failure of a batch
/// aborts it on the remote).
async fn send_batch(
    stream: &mut BufReader<TcpStream>,
    batch: &Batch,
    host: &str,
    port: u16,
) -> Result<Vec<Reply>, RemoteCallError> {
    let lines = batch.to_lines();
    let last_index = lines.len() - 1;
    let mut first_error: Option<RemoteCallError> = None;
    let mut replies = Vec::with_capacity(batch.len());

    for (index, line) in lines.iter().enumerate() {
        let mut wire = line.clone();
        wire.push_str("\r\n");
        stream
            .get_mut()
            .write_all(wire.as_bytes())
            .await
            .map_err(|e| NetworkError::Write { host: host.to_string(), port, source: e })?;

        // Lines 0 and last are the DEFER/RESUME envelope itself — their
        // replies only count toward success/failure, not the per-command
        // reply list callers like `call_frame` correlate against.
        let is_envelope_line = index == 0 || index == last_index;

        let reply = read_reply(stream).await;
        match reply {
            Ok(r) if r.is_success() => {
                if !is_envelope_line {
                    replies.push(r);
                }
            }
            Ok(r) => {
                if first_error.is_none() {
                    first_error = Some(RemoteError { code: r.code, message: r.message }.into());
                }
            }
            Err(ReadError::Closed) => {
                return Err(NetworkError::Closed { host: host.to_string(), port }.into());
            }
            Err(ReadError::Io(e)) => {
                return Err(NetworkError::Read { host: host.to_string(), port, source: e }.into());
            }
            Err(ReadError::Malformed(msg)) => {
                return Err(ProtocolError(msg).into());
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(replies),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Command;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn fake_engine_always_ok(listener: TcpListener) {
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        loop {
            line.clear();
            use tokio::io::AsyncBufReadExt;
            let n = reader.read_line(&mut line).await.unwrap();
            if n == 0 {
                break;
            }
            write_half.write_all(b"202 OK\r\n\r\n").await.unwrap();
        }
    }

    #[tokio::test]
    async fn successful_batch_round_trips() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(fake_engine_always_ok(listener));

        let conn = Connection::spawn(addr.ip().to_string(), addr.port());
        let mut batch = Batch::new();
        batch.push(Command::Pause { channel: 1, layer: 10 });
        let result = conn.send(batch).await;
        assert!(result.is_ok());
    }

    async fn fake_engine_errors_second_command(listener: TcpListener) {
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        let mut count = 0;
        loop {
            line.clear();
            use tokio::io::AsyncBufReadExt;
            let n = reader.read_line(&mut line).await.unwrap();
            if n == 0 {
                break;
            }
            count += 1;
            if count == 2 {
                write_half.write_all(b"501 ERROR\r\n\r\n").await.unwrap();
            } else {
                write_half.write_all(b"202 OK\r\n\r\n").await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn remote_error_surfaces_without_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(fake_engine_errors_second_command(listener));

        let conn = Connection::spawn(addr.ip().to_string(), addr.port());
        let mut batch = Batch::new();
        batch.push(Command::Pause { channel: 1, layer: 10 });
        let result = conn.send(batch).await;
        match result {
            Err(RemoteCallError::Remote(e)) => assert_eq!(e.code, 501),
            other => panic!("expected RemoteError, got {other:?}"),
        }
        // Connection should still be usable (no reconnect triggered).
        assert_eq!(conn.state().await, ConnState::Connected);
    }

    #[tokio::test]
    async fn connect_failure_surfaces_network_error() {
        // Port 0 never accepts; pick an unused local port instead by binding
        // and then dropping the listener so connect() fails deterministically.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let conn = Connection::spawn(addr.ip().to_string(), addr.port());
        let mut batch = Batch::new();
        batch.push(Command::Pause { channel: 1, layer: 10 });
        let result = conn.send(batch).await;
        assert!(matches!(result, Err(RemoteCallError::Network(_))));
    }
}
