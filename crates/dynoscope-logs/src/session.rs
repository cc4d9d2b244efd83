use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use dynoscope_api::{ApiResult, ByteStream, LogSessionRequest, PlatformApi};
use dynoscope_types::App;

use crate::assemble::LineAssembler;
use crate::buffer::LineRing;
use crate::visibility::VisibilityArbiter;

/// Default ring buffer capacity, in lines
pub const DEFAULT_RING_CAPACITY: usize = 100;

/// Session lifecycle signals, consumed by the multiplexer
#[derive(Clone, Debug)]
pub enum SessionLifecycle {
    /// The read loop observed end-of-stream (normal close, error, or
    /// abort). Ending is irreversible; a fresh session must be opened if
    /// the app's logs are needed again.
    Ended { app: String },
}

/// One live log stream connection for one application.
///
/// Owns the connection, a cancellation token, the mute flag, a bounded ring
/// buffer of recent lines, and the set of attached raw-line subscribers.
/// Created muted; visibility is granted through the [`VisibilityArbiter`].
pub struct LogStreamSession {
    app: App,
    cancel: CancellationToken,
    muted: AtomicBool,
    buffer: LineRing,
    subscribers: RwLock<HashMap<u64, mpsc::UnboundedSender<String>>>,
    next_subscriber: AtomicU64,
    resume_lines: usize,
    ended: AtomicBool,
}

impl LogStreamSession {
    /// Establish the streaming connection and start the read loop.
    ///
    /// Connection failure is fatal to this session and surfaces to the
    /// caller; there is no retry at this layer.
    pub async fn open(
        app: App,
        api: Arc<dyn PlatformApi>,
        resume_lines: usize,
        capacity: usize,
        arbiter: Arc<VisibilityArbiter>,
        lifecycle: mpsc::UnboundedSender<SessionLifecycle>,
    ) -> ApiResult<Arc<Self>> {
        let cancel = CancellationToken::new();
        let request = LogSessionRequest {
            lines: resume_lines,
            tail: true,
        };
        let descriptor = api.create_log_session(&app.name, &request, &cancel).await?;
        let stream = api.open_log_stream(&descriptor.url, &cancel).await?;

        let session = Arc::new(Self {
            app,
            cancel,
            muted: AtomicBool::new(true),
            buffer: LineRing::new(capacity),
            subscribers: RwLock::new(HashMap::new()),
            next_subscriber: AtomicU64::new(0),
            resume_lines,
            ended: AtomicBool::new(false),
        });

        tokio::spawn(Arc::clone(&session).read_loop(stream, arbiter, lifecycle));
        Ok(session)
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    /// Attach a raw-line subscriber, optionally replaying up to `replay`
    /// buffered lines before live ones. Returns the id to detach with.
    pub fn attach(&self, replay: usize) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        if replay > 0 {
            for line in self.buffer.tail(replay) {
                let _ = tx.send(line);
            }
        }
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().insert(id, tx);
        (id, rx)
    }

    pub fn detach(&self, id: u64) {
        self.subscribers.write().remove(&id);
    }

    /// Explicit mute flag OR cancellation already fired
    pub fn effective_mute(&self) -> bool {
        self.muted.load(Ordering::SeqCst) || self.cancel.is_cancelled()
    }

    /// Set the mute flag. No effect if the new value equals the current
    /// effective value. Unmuting triggers arbitration: the previously
    /// visible sibling is force-muted, the surface is cleared, and this
    /// session's buffered lines are replayed.
    pub fn set_mute(self: &Arc<Self>, muted: bool, arbiter: &VisibilityArbiter) {
        if muted == self.effective_mute() {
            return;
        }
        if muted {
            self.muted.store(true, Ordering::SeqCst);
            arbiter.retire(self);
        } else {
            // A cancelled session cannot come back; ignore the unmute
            if self.cancel.is_cancelled() {
                return;
            }
            self.muted.store(false, Ordering::SeqCst);
            arbiter.make_visible(self);
        }
    }

    pub(crate) fn force_mute(&self) {
        self.muted.store(true, Ordering::SeqCst);
    }

    /// Buffered lines to replay on unmute, bounded by the resume depth
    pub(crate) fn replay_lines(&self) -> Vec<String> {
        self.buffer.tail(self.resume_lines)
    }

    /// Last N buffered lines
    pub fn buffered(&self, n: usize) -> Vec<String> {
        self.buffer.tail(n)
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Abort the read loop. Idempotent; the only way to stop a session.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn read_loop(
        self: Arc<Self>,
        mut stream: ByteStream,
        arbiter: Arc<VisibilityArbiter>,
        lifecycle: mpsc::UnboundedSender<SessionLifecycle>,
    ) {
        let mut assembler = LineAssembler::new();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            for line in assembler.feed(&bytes) {
                                self.deliver(line, &arbiter);
                            }
                        }
                        Some(Err(e)) => {
                            debug!(app = %self.app.name, error = %e, "log stream read failed");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        // Ending is irreversible; firing the token makes the session
        // effectively muted from here on
        self.cancel.cancel();
        self.ended.store(true, Ordering::SeqCst);
        arbiter.retire(&self);
        let _ = lifecycle.send(SessionLifecycle::Ended {
            app: self.app.name.clone(),
        });
    }

    /// Fan one complete line out to the buffer, the subscribers, and (when
    /// visible) the presentation surface.
    fn deliver(&self, line: String, arbiter: &VisibilityArbiter) {
        self.buffer.push(line.clone());

        {
            let mut subscribers = self.subscribers.write();
            subscribers.retain(|_, tx| tx.send(line.clone()).is_ok());
        }

        if !self.effective_mute() {
            arbiter.surface().append(&self.app.name, &line);
        }
    }
}
