//! Visibility arbitration between sibling stream sessions.
//!
//! At most one session across the whole process is visible (unmuted) at a
//! time; its lines flow to the single shared presentation surface. The
//! arbiter owns that invariant as an explicit slot swap rather than a
//! module-level static. Arbitration only runs on the event-processing path,
//! one action at a time, so a plain mutex around the slot is enough.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::session::LogStreamSession;

/// The single shared output surface log lines are rendered to.
///
/// The real renderer lives in the embedding layer; the core only appends
/// and clears.
pub trait PresentationSurface: Send + Sync {
    fn append(&self, app: &str, line: &str);
    fn clear(&self);
}

/// Holder of the at-most-one-visible-session invariant
pub struct VisibilityArbiter {
    surface: Arc<dyn PresentationSurface>,
    visible: Mutex<Option<Arc<LogStreamSession>>>,
}

impl VisibilityArbiter {
    pub fn new(surface: Arc<dyn PresentationSurface>) -> Self {
        Self {
            surface,
            visible: Mutex::new(None),
        }
    }

    pub fn surface(&self) -> &Arc<dyn PresentationSurface> {
        &self.surface
    }

    /// Make a session the visible one: force-mute the previous occupant,
    /// clear the surface, and replay the new session's buffered lines up to
    /// its resume depth.
    pub(crate) fn make_visible(&self, session: &Arc<LogStreamSession>) {
        let mut slot = self.visible.lock();
        if let Some(previous) = slot.take() {
            if Arc::ptr_eq(&previous, session) {
                *slot = Some(previous);
                return;
            }
            previous.force_mute();
        }
        self.surface.clear();
        let app = session.app().name.clone();
        for line in session.replay_lines() {
            self.surface.append(&app, &line);
        }
        *slot = Some(Arc::clone(session));
    }

    /// Drop a session from the visible slot if it currently holds it.
    /// Called on explicit mute and when a session ends.
    pub(crate) fn retire(&self, session: &Arc<LogStreamSession>) {
        let mut slot = self.visible.lock();
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, session)) {
            *slot = None;
        }
    }

    pub fn is_visible(&self, session: &Arc<LogStreamSession>) -> bool {
        self.visible
            .lock()
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, session))
    }

    /// Name of the currently visible app, if any
    pub fn visible_app(&self) -> Option<String> {
        self.visible
            .lock()
            .as_ref()
            .map(|session| session.app().name.clone())
    }
}
