use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use dynoscope_api::{ApiResult, PlatformApi};
use dynoscope_types::{App, StreamEvent};

use crate::extract::EventExtractor;
use crate::session::{LogStreamSession, SessionLifecycle};
use crate::visibility::{PresentationSurface, VisibilityArbiter};

/// Grace period after opening a session before its lines are treated as
/// live. The platform replays recent history on connect; reacting to those
/// lines would re-apply stale transitions.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

struct SessionEntry {
    session: Arc<LogStreamSession>,
    subscriber: u64,
}

/// Owns one log stream session per tracked application and republishes
/// typed events derived from their lines on a single outward channel.
pub struct LogStreamMultiplexer {
    api: Arc<dyn PlatformApi>,
    arbiter: Arc<VisibilityArbiter>,
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
    events: mpsc::UnboundedSender<StreamEvent>,
    lifecycle_tx: mpsc::UnboundedSender<SessionLifecycle>,
    cancel: CancellationToken,
    resume_lines: usize,
    capacity: usize,
}

impl LogStreamMultiplexer {
    /// Create the multiplexer and the receiving end of its event channel
    pub fn new(
        api: Arc<dyn PlatformApi>,
        surface: Arc<dyn PresentationSurface>,
        resume_lines: usize,
        capacity: usize,
    ) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
        let sessions: Arc<Mutex<HashMap<String, SessionEntry>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        tokio::spawn(watch_lifecycle(
            lifecycle_rx,
            Arc::clone(&sessions),
            events_tx.clone(),
            cancel.clone(),
        ));

        let mux = Self {
            api,
            arbiter: Arc::new(VisibilityArbiter::new(surface)),
            sessions,
            events: events_tx,
            lifecycle_tx,
            cancel,
            resume_lines,
            capacity,
        };
        (mux, events_rx)
    }

    pub fn arbiter(&self) -> &Arc<VisibilityArbiter> {
        &self.arbiter
    }

    /// Reconcile the session set against the tracked applications.
    ///
    /// Sessions for no-longer-tracked apps are detached and aborted; newly
    /// tracked apps get fresh sessions, opened muted. A failure to open one
    /// app's session never affects the others.
    pub async fn set_tracked_applications(&self, apps: &[App]) {
        let desired: HashMap<String, App> =
            apps.iter().map(|app| (app.name.clone(), app.clone())).collect();

        let removed: Vec<(String, SessionEntry)> = {
            let mut sessions = self.sessions.lock();
            let gone: Vec<String> = sessions
                .keys()
                .filter(|name| !desired.contains_key(*name))
                .cloned()
                .collect();
            gone.into_iter()
                .filter_map(|name| sessions.remove(&name).map(|entry| (name, entry)))
                .collect()
        };
        for (name, entry) in removed {
            entry.session.detach(entry.subscriber);
            entry.session.shutdown();
            let _ = self.events.send(StreamEvent::SessionEnded { app: name });
        }

        for (name, app) in desired {
            let already_attached = self.sessions.lock().contains_key(&name);
            if already_attached {
                continue;
            }
            if let Err(e) = self.open_session(app).await {
                warn!(app = %name, error = %e, "failed to open log session");
            }
        }
    }

    async fn open_session(&self, app: App) -> ApiResult<()> {
        let session = LogStreamSession::open(
            app.clone(),
            Arc::clone(&self.api),
            self.resume_lines,
            self.capacity,
            Arc::clone(&self.arbiter),
            self.lifecycle_tx.clone(),
        )
        .await?;

        let (subscriber, lines) = session.attach(0);
        tokio::spawn(pump_lines(
            app.clone(),
            lines,
            self.events.clone(),
            self.cancel.clone(),
        ));

        self.sessions.lock().insert(
            app.name.clone(),
            SessionEntry {
                session,
                subscriber,
            },
        );
        let _ = self.events.send(StreamEvent::SessionStarted { app: app.name });
        Ok(())
    }

    /// The session currently attached for an app, if any
    pub fn session(&self, app: &str) -> Option<Arc<LogStreamSession>> {
        self.sessions
            .lock()
            .get(app)
            .map(|entry| Arc::clone(&entry.session))
    }

    /// Unmute one app's session, muting whichever sibling was visible
    pub fn set_visible(&self, app: &str) -> bool {
        match self.session(app) {
            Some(session) => {
                session.set_mute(false, &self.arbiter);
                true
            }
            None => false,
        }
    }

    pub fn mute(&self, app: &str) {
        if let Some(session) = self.session(app) {
            session.set_mute(true, &self.arbiter);
        }
    }

    pub fn tracked(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    /// Cancel every owned session and the multiplexer itself
    pub fn shutdown(&self) {
        for entry in self.sessions.lock().values() {
            entry.session.shutdown();
        }
        self.cancel.cancel();
    }
}

impl Drop for LogStreamMultiplexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Remove ended sessions from the map and republish the ending.
/// A session that was already removed by an untrack emits nothing here.
async fn watch_lifecycle(
    mut lifecycle: mpsc::UnboundedReceiver<SessionLifecycle>,
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
    events: mpsc::UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            message = lifecycle.recv() => match message {
                Some(SessionLifecycle::Ended { app }) => {
                    let removed = sessions.lock().remove(&app).is_some();
                    if removed {
                        debug!(app = %app, "log stream session ended");
                        let _ = events.send(StreamEvent::SessionEnded { app });
                    }
                }
                None => break,
            }
        }
    }
}

/// Per-session pump: complete lines in, typed events out.
///
/// Lines arriving during the settle window are replayed history, not live
/// activity, and are not fed to the extractor.
async fn pump_lines(
    app: App,
    mut lines: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
) {
    let live_at = Instant::now() + SETTLE_DELAY;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            line = lines.recv() => match line {
                Some(line) => {
                    if Instant::now() < live_at {
                        continue;
                    }
                    if let Some(event) = EventExtractor::extract(&line) {
                        let send = events.send(StreamEvent::Event {
                            app: app.clone(),
                            event,
                        });
                        if send.is_err() {
                            break;
                        }
                    }
                }
                None => break,
            }
        }
    }
}
