use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use dynoscope_api::{ApiError, PlatformApi};
use dynoscope_types::{App, AppSetDiff, Change, LogEvent, StreamEvent, SyncPhase};

use crate::cache::ResourceCache;
use crate::snapshot::SnapshotStore;

/// Point-query attempts for a log-referenced resource before giving up
pub const FETCH_RETRY_ATTEMPTS: u32 = 5;

/// Delay between those attempts
pub const FETCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Settle time before an add-on reconciliation pass queries the platform,
/// letting a burst of related log lines land first
pub const ADDON_PASS_DEBOUNCE: Duration = Duration::from_secs(1);

/// Consumes typed events from the multiplexer and tracked-set diffs from
/// the outside, and patches the resource cache incrementally, falling back
/// to authoritative re-fetches when a log-referenced resource is not yet
/// visible through point queries.
pub struct SyncEngine {
    api: Arc<dyn PlatformApi>,
    cache: Arc<ResourceCache>,
    snapshot: SnapshotStore,
    changes: mpsc::UnboundedSender<Change>,
    // At most one add-on pass may be pending or in flight for the process;
    // a trigger arriving meanwhile is dropped, not queued.
    addon_pass_pending: AtomicBool,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        api: Arc<dyn PlatformApi>,
        cache: Arc<ResourceCache>,
        snapshot: SnapshotStore,
        cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Change>) {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            api,
            cache,
            snapshot,
            changes: changes_tx,
            addon_pass_pending: AtomicBool::new(false),
            cancel,
        });
        (engine, changes_rx)
    }

    /// Seed the cache from the persisted snapshot so the tree renders
    /// before the platform is consulted
    pub fn restore_snapshot(&self) {
        match self.snapshot.load() {
            Ok(entries) if !entries.is_empty() => {
                for (name, app) in entries {
                    self.cache.get_or_create(&app);
                    self.cache.set_phase(&name, SyncPhase::Uninitialized);
                }
                self.notify(Change::Everything);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to restore snapshot"),
        }
    }

    /// Drive the engine until cancellation. Events for different
    /// applications are independent; within one application they apply in
    /// arrival order.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<StreamEvent>,
        mut diffs: mpsc::UnboundedReceiver<AppSetDiff>,
    ) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                event = events.recv() => match event {
                    Some(StreamEvent::SessionStarted { app })
                    | Some(StreamEvent::SessionEnded { app }) => {
                        self.notify(Change::App { app });
                    }
                    Some(StreamEvent::Event { app, event }) => {
                        self.handle_event(&app, event);
                    }
                    None => break,
                },

                diff = diffs.recv() => match diff {
                    Some(diff) => self.apply_diff(diff).await,
                    None => break,
                },
            }
        }
    }

    /// Apply one typed event as an idempotent cache patch
    pub fn handle_event(self: &Arc<Self>, app: &App, event: LogEvent) {
        match event {
            LogEvent::StateChanged { dyno_name, to, .. } => {
                if self.cache.set_dyno_state(&app.name, &dyno_name, to) {
                    self.notify(Change::Dyno {
                        app: app.name.clone(),
                        name: dyno_name.clone(),
                    });
                    if to.is_terminal() {
                        // A down report for a cached dyno may mean it is
                        // gone entirely; one confirming query decides.
                        let engine = Arc::clone(self);
                        let app = app.name.clone();
                        tokio::spawn(async move {
                            engine.confirm_down(app, dyno_name).await;
                        });
                    }
                } else {
                    // New dynos often log a transition before they are
                    // queryable; treat as not-yet-visible.
                    self.spawn_lazy_fetch(&app.name, &dyno_name);
                }
            }

            LogEvent::StartingProcess { dyno_name, .. } => {
                self.spawn_lazy_fetch(&app.name, &dyno_name);
            }

            LogEvent::ScaledTo { quantity, size, .. } => {
                if self
                    .cache
                    .set_formation_quantity_by_size(&app.name, &size, quantity)
                {
                    self.notify(Change::Formations {
                        app: app.name.clone(),
                    });
                } else {
                    // Unknown size/type combination: the incremental patch
                    // cannot be trusted, re-fetch the whole list.
                    self.cache.invalidate_formations(&app.name);
                    let engine = Arc::clone(self);
                    let app = app.name.clone();
                    tokio::spawn(async move {
                        engine.refresh_formations(app).await;
                    });
                }
            }

            LogEvent::AttachmentAttached { reference, .. }
            | LogEvent::AttachmentUpdated { reference, .. } => {
                match reference.as_deref().and_then(|r| self.resolve_addon(&app.name, r)) {
                    Some(id) => self.notify(Change::AddOn {
                        app: app.name.clone(),
                        id,
                    }),
                    None => self.schedule_addon_pass(&app.name),
                }
            }

            LogEvent::AttachmentDetached { .. } | LogEvent::ProvisioningCompleted { .. } => {
                // Add-on identity is not reliably derivable from the line
                self.schedule_addon_pass(&app.name);
            }
        }
    }

    fn resolve_addon(&self, app: &str, reference: &str) -> Option<String> {
        self.cache.cached_addons(app).and_then(|addons| {
            addons
                .iter()
                .find(|a| a.id == reference || a.name == reference)
                .map(|a| a.id.clone())
        })
    }

    fn spawn_lazy_fetch(self: &Arc<Self>, app: &str, dyno: &str) {
        let engine = Arc::clone(self);
        let app = app.to_string();
        let dyno = dyno.to_string();
        tokio::spawn(async move {
            engine.lazy_fetch_dyno(app, dyno).await;
        });
    }

    /// Point-query a dyno referenced by name but not cached, retrying
    /// through the eventual-consistency window. Exhausting the attempts is
    /// routine and silent; only the log knows.
    async fn lazy_fetch_dyno(&self, app: String, dyno: String) {
        for attempt in 1..=FETCH_RETRY_ATTEMPTS {
            if self.cancel.is_cancelled() {
                return;
            }
            match self.api.get_dyno(&app, &dyno, &self.cancel).await {
                Ok(fetched) => {
                    if self.cache.upsert_dyno(&app, fetched) {
                        self.notify(Change::Dyno { app, name: dyno });
                    }
                    return;
                }
                Err(ApiError::Cancelled) => return,
                Err(e) if e.is_not_found() => {
                    debug!(app = %app, dyno = %dyno, attempt, "dyno not yet visible");
                    if attempt < FETCH_RETRY_ATTEMPTS {
                        sleep(FETCH_RETRY_DELAY).await;
                    }
                }
                Err(e) => {
                    debug!(app = %app, dyno = %dyno, error = %e, "dyno fetch failed");
                    return;
                }
            }
        }
        debug!(app = %app, dyno = %dyno, "dyno never became visible, giving up");
    }

    /// After a terminal state report for a cached dyno, confirm it still
    /// exists; a not-found answer converts the log line into a removal.
    async fn confirm_down(&self, app: String, dyno: String) {
        match self.api.get_dyno(&app, &dyno, &self.cancel).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                if self.cache.remove_dyno(&app, &dyno) {
                    self.notify(Change::Dyno { app, name: dyno });
                }
            }
            Err(e) => debug!(app = %app, dyno = %dyno, error = %e, "down confirmation failed"),
        }
    }

    async fn refresh_formations(&self, app: String) {
        match self.api.list_formations(&app, &self.cancel).await {
            Ok(formations) => {
                if self.cache.store_formations(&app, formations) {
                    self.notify(Change::Formations { app });
                }
            }
            Err(e) => debug!(app = %app, error = %e, "formation refresh failed"),
        }
    }

    /// Request an add-on reconciliation pass. If one is already pending or
    /// in flight, the trigger is dropped; the periodic re-triggers from the
    /// log stream make up for it.
    fn schedule_addon_pass(self: &Arc<Self>, app: &str) {
        if self.addon_pass_pending.swap(true, Ordering::SeqCst) {
            debug!(app = %app, "add-on pass already pending, trigger dropped");
            return;
        }
        let engine = Arc::clone(self);
        let app = app.to_string();
        tokio::spawn(async move {
            engine.addon_pass(app).await;
        });
    }

    /// Debounced authoritative re-list of an app's add-ons, diffed by id
    async fn addon_pass(&self, app: String) {
        sleep(ADDON_PASS_DEBOUNCE).await;

        if !self.cancel.is_cancelled() {
            match self.api.list_addons(&app, &self.cancel).await {
                Ok(fresh) => {
                    let previous = self.cache.cached_addons(&app).unwrap_or_default();
                    let previous_ids: BTreeSet<&str> =
                        previous.iter().map(|a| a.id.as_str()).collect();
                    let fresh_ids: BTreeSet<&str> = fresh.iter().map(|a| a.id.as_str()).collect();
                    let identifiers_differ = previous_ids != fresh_ids;

                    // Storing the fresh list both carries updated fields
                    // onto survivors and applies additions/removals
                    if self.cache.store_addons(&app, fresh) && identifiers_differ {
                        self.notify(Change::AddOns { app });
                    }
                }
                Err(e) => debug!(app = %app, error = %e, "add-on reconciliation failed"),
            }
        }

        self.addon_pass_pending.store(false, Ordering::SeqCst);
    }

    /// Reconcile the tracked-application set.
    ///
    /// Removed apps are evicted outright. Added apps are fetched
    /// concurrently; one failure never blocks the others. On success the
    /// snapshot is rewritten; on authentication loss the cache drains, the
    /// snapshot is deleted, and nothing retries until the next diff.
    pub async fn apply_diff(self: &Arc<Self>, diff: AppSetDiff) {
        if diff.is_empty() {
            return;
        }

        for name in &diff.removed {
            self.cache.remove(name);
        }
        for name in &diff.added {
            if self.cache.contains(name) {
                self.cache.set_phase(name, SyncPhase::Syncing);
            }
        }

        let fetches = diff.added.iter().map(|name| {
            let api = Arc::clone(&self.api);
            let cancel = self.cancel.clone();
            let name = name.clone();
            async move {
                let result = api.get_app(&name, &cancel).await;
                (name, result)
            }
        });

        let mut auth_lost = false;
        for (name, result) in join_all(fetches).await {
            match result {
                Ok(app) => {
                    self.cache.get_or_create(&app);
                    self.cache.set_phase(&name, SyncPhase::Synced);
                }
                Err(ApiError::Unauthorized) => auth_lost = true,
                Err(e) => {
                    warn!(app = %name, error = %e, "not found on the platform, excluded from the tree");
                    self.cache.remove(&name);
                }
            }
        }

        if auth_lost {
            self.cache.clear();
            if let Err(e) = self.snapshot.delete() {
                warn!(error = %e, "failed to delete snapshot");
            }
            self.notify(Change::Everything);
            return;
        }

        self.notify(Change::Everything);
        if let Err(e) = self.snapshot.save(&self.cache.snapshot_entries()) {
            warn!(error = %e, "failed to persist snapshot");
        }
    }

    fn notify(&self, change: Change) {
        let _ = self.changes.send(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use dynoscope_api::{ApiResult, ByteStream, LogSessionDescriptor, LogSessionRequest};
    use dynoscope_types::{AddOn, AddOnState, Dyno, DynoState, Formation};

    /// Platform fake with per-call scripted dyno lookups and call counters
    #[derive(Default)]
    struct ScriptedApi {
        dyno_results: Mutex<VecDeque<ApiResult<Dyno>>>,
        get_dyno_calls: AtomicUsize,
        addons: Mutex<Vec<AddOn>>,
        list_addon_calls: AtomicUsize,
        formations: Mutex<Vec<Formation>>,
        list_formation_calls: AtomicUsize,
        missing_apps: Mutex<HashSet<String>>,
        unauthorized: AtomicBool,
    }

    #[async_trait]
    impl PlatformApi for ScriptedApi {
        async fn get_app(&self, name: &str, _c: &CancellationToken) -> ApiResult<App> {
            if self.unauthorized.load(Ordering::SeqCst) {
                return Err(ApiError::Unauthorized);
            }
            if self.missing_apps.lock().contains(name) {
                return Err(ApiError::NotFound(name.to_string()));
            }
            Ok(App::new(format!("id-{name}"), name.to_string()))
        }

        async fn list_dynos(&self, _a: &str, _c: &CancellationToken) -> ApiResult<Vec<Dyno>> {
            Ok(Vec::new())
        }

        async fn get_dyno(&self, _a: &str, dyno: &str, _c: &CancellationToken) -> ApiResult<Dyno> {
            self.get_dyno_calls.fetch_add(1, Ordering::SeqCst);
            self.dyno_results
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ApiError::NotFound(dyno.to_string())))
        }

        async fn list_formations(
            &self,
            _a: &str,
            _c: &CancellationToken,
        ) -> ApiResult<Vec<Formation>> {
            self.list_formation_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.formations.lock().clone())
        }

        async fn list_addons(&self, _a: &str, _c: &CancellationToken) -> ApiResult<Vec<AddOn>> {
            self.list_addon_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.addons.lock().clone())
        }

        async fn create_log_session(
            &self,
            app: &str,
            _r: &LogSessionRequest,
            _c: &CancellationToken,
        ) -> ApiResult<LogSessionDescriptor> {
            Err(ApiError::NotFound(app.to_string()))
        }

        async fn open_log_stream(
            &self,
            url: &str,
            _c: &CancellationToken,
        ) -> ApiResult<ByteStream> {
            Err(ApiError::NotFound(url.to_string()))
        }
    }

    fn app(name: &str) -> App {
        App::new(format!("id-{name}"), name.to_string())
    }

    fn dyno(name: &str, state: DynoState) -> Dyno {
        Dyno::new(format!("id-{name}"), name.to_string(), state)
    }

    struct Fixture {
        api: Arc<ScriptedApi>,
        engine: Arc<SyncEngine>,
        changes: mpsc::UnboundedReceiver<Change>,
        cache: Arc<ResourceCache>,
        cancel: CancellationToken,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let api = Arc::new(ScriptedApi::default());
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ResourceCache::new(
            Arc::clone(&api) as Arc<dyn PlatformApi>
        ));
        let cancel = CancellationToken::new();
        let snapshot = SnapshotStore::new(dir.path().join("apps.json"));
        let (engine, changes) = SyncEngine::new(
            Arc::clone(&api) as Arc<dyn PlatformApi>,
            Arc::clone(&cache),
            snapshot,
            cancel.clone(),
        );
        Fixture {
            api,
            engine,
            changes,
            cache,
            cancel,
            _dir: dir,
        }
    }

    fn state_change(dyno_name: &str, from: DynoState, to: DynoState) -> LogEvent {
        LogEvent::StateChanged {
            dyno_name: dyno_name.to_string(),
            from,
            to,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_leaves_cache_untouched() {
        let mut fx = fixture();
        fx.cache.get_or_create(&app("demo"));

        // Every lookup 404s; five attempts, then silent abandonment
        fx.engine
            .handle_event(&app("demo"), state_change("web.1", DynoState::Starting, DynoState::Up));
        sleep(Duration::from_secs(10)).await;

        assert_eq!(fx.api.get_dyno_calls.load(Ordering::SeqCst), 5);
        assert!(fx.cache.cached_dynos("demo").is_none_or(|d| d.is_empty()));
        assert!(fx.changes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_success_on_final_attempt_inserts_once() {
        let mut fx = fixture();
        fx.cache.get_or_create(&app("demo"));
        {
            let mut script = fx.api.dyno_results.lock();
            for _ in 0..4 {
                script.push_back(Err(ApiError::NotFound("web.1".into())));
            }
            script.push_back(Ok(dyno("web.1", DynoState::Up)));
        }

        fx.engine
            .handle_event(&app("demo"), state_change("web.1", DynoState::Starting, DynoState::Up));
        sleep(Duration::from_secs(10)).await;

        assert_eq!(fx.api.get_dyno_calls.load(Ordering::SeqCst), 5);
        let dynos = fx.cache.cached_dynos("demo").unwrap();
        assert_eq!(dynos.len(), 1);
        assert_eq!(dynos[0].name, "web.1");
        assert!(matches!(
            fx.changes.try_recv().unwrap(),
            Change::Dyno { ref name, .. } if name == "web.1"
        ));
        assert!(fx.changes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_pending_retries() {
        let mut fx = fixture();
        fx.cache.get_or_create(&app("demo"));

        fx.engine
            .handle_event(&app("demo"), state_change("web.1", DynoState::Starting, DynoState::Up));
        sleep(Duration::from_millis(1500)).await;
        fx.cancel.cancel();
        sleep(Duration::from_secs(10)).await;

        assert_eq!(fx.api.get_dyno_calls.load(Ordering::SeqCst), 2);
        assert!(fx.changes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn addon_pass_triggers_within_debounce_window_coalesce() {
        let mut fx = fixture();
        fx.cache.get_or_create(&app("demo"));
        fx.api
            .addons
            .lock()
            .push(AddOn::new("a1".into(), "demo-db".into(), AddOnState::Provisioned));

        fx.engine.handle_event(
            &app("demo"),
            LogEvent::ProvisioningCompleted {
                reference: "postgresql-solid-12345".into(),
            },
        );
        fx.engine.handle_event(
            &app("demo"),
            LogEvent::AttachmentDetached {
                config_var: "DATABASE".into(),
                reference: None,
            },
        );
        sleep(Duration::from_secs(5)).await;

        assert_eq!(fx.api.list_addon_calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            fx.changes.try_recv().unwrap(),
            Change::AddOns { ref app } if app == "demo"
        ));
        assert!(fx.changes.try_recv().is_err());

        // The pass completed, so a later trigger runs a fresh one; the id
        // set is unchanged this time, so no notification fires.
        fx.engine.handle_event(
            &app("demo"),
            LogEvent::ProvisioningCompleted {
                reference: "postgresql-solid-12345".into(),
            },
        );
        sleep(Duration::from_secs(5)).await;
        assert_eq!(fx.api.list_addon_calls.load(Ordering::SeqCst), 2);
        assert!(fx.changes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn attachment_update_resolving_to_cached_addon_notifies_directly() {
        let mut fx = fixture();
        fx.cache.get_or_create(&app("demo"));
        fx.cache.store_addons(
            "demo",
            vec![AddOn::new("a1".into(), "demo-db".into(), AddOnState::Provisioned)],
        );

        fx.engine.handle_event(
            &app("demo"),
            LogEvent::AttachmentUpdated {
                config_var: "DATABASE".into(),
                reference: Some("demo-db".into()),
            },
        );

        assert!(matches!(
            fx.changes.try_recv().unwrap(),
            Change::AddOn { ref id, .. } if id == "a1"
        ));
        // Resolved directly, no reconciliation pass scheduled
        sleep(Duration::from_secs(3)).await;
        assert_eq!(fx.api.list_addon_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scale_event_patches_matching_formation() {
        let mut fx = fixture();
        fx.cache.get_or_create(&app("demo"));
        fx.cache.store_formations(
            "demo",
            vec![Formation::new("f1".into(), "web".into(), "Standard-1X".into(), 1)],
        );

        fx.engine.handle_event(
            &app("demo"),
            LogEvent::ScaledTo {
                dyno_type: "web".into(),
                quantity: 4,
                size: "Standard-1X".into(),
            },
        );

        assert_eq!(fx.cache.cached_formations("demo").unwrap()[0].quantity, 4);
        assert!(matches!(fx.changes.try_recv().unwrap(), Change::Formations { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn scale_event_for_unknown_size_refetches_formations() {
        let mut fx = fixture();
        fx.cache.get_or_create(&app("demo"));
        fx.cache.store_formations(
            "demo",
            vec![Formation::new("f1".into(), "web".into(), "Standard-1X".into(), 1)],
        );
        *fx.api.formations.lock() = vec![Formation::new(
            "f2".into(),
            "web".into(),
            "Performance-M".into(),
            2,
        )];

        fx.engine.handle_event(
            &app("demo"),
            LogEvent::ScaledTo {
                dyno_type: "web".into(),
                quantity: 2,
                size: "Performance-M".into(),
            },
        );
        sleep(Duration::from_millis(100)).await;

        assert_eq!(fx.api.list_formation_calls.load(Ordering::SeqCst), 1);
        let formations = fx.cache.cached_formations("demo").unwrap();
        assert_eq!(formations.len(), 1);
        assert_eq!(formations[0].size, "Performance-M");
        assert!(matches!(fx.changes.try_recv().unwrap(), Change::Formations { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_state_confirmed_missing_removes_dyno() {
        let mut fx = fixture();
        fx.cache.get_or_create(&app("demo"));
        fx.cache.upsert_dyno("demo", dyno("web.1", DynoState::Up));

        // The confirming point query 404s: the dyno is really gone
        fx.engine
            .handle_event(&app("demo"), state_change("web.1", DynoState::Up, DynoState::Down));
        sleep(Duration::from_secs(1)).await;

        assert!(fx.cache.cached_dynos("demo").unwrap().is_empty());
        // One notification for the state change, one for the removal
        assert!(matches!(fx.changes.try_recv().unwrap(), Change::Dyno { .. }));
        assert!(matches!(fx.changes.try_recv().unwrap(), Change::Dyno { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_state_still_present_keeps_dyno() {
        let mut fx = fixture();
        fx.cache.get_or_create(&app("demo"));
        fx.cache.upsert_dyno("demo", dyno("web.1", DynoState::Up));
        fx.api
            .dyno_results
            .lock()
            .push_back(Ok(dyno("web.1", DynoState::Down)));

        fx.engine
            .handle_event(&app("demo"), state_change("web.1", DynoState::Up, DynoState::Down));
        sleep(Duration::from_secs(1)).await;

        let dynos = fx.cache.cached_dynos("demo").unwrap();
        assert_eq!(dynos.len(), 1);
        assert_eq!(dynos[0].state, DynoState::Down);
    }

    #[tokio::test(start_paused = true)]
    async fn tracked_set_diff_is_idempotent() {
        let mut fx = fixture();
        let diff = AppSetDiff::adding(["app1"]);

        fx.engine.apply_diff(diff.clone()).await;
        fx.engine.apply_diff(diff).await;

        assert_eq!(fx.cache.apps().len(), 1);
        assert_eq!(fx.cache.phase("app1"), Some(SyncPhase::Synced));

        let snapshot = SnapshotStore::new(fx._dir.path().join("apps.json"));
        let persisted = snapshot.load().unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].0, "app1");

        assert!(matches!(fx.changes.try_recv().unwrap(), Change::Everything));
        assert!(matches!(fx.changes.try_recv().unwrap(), Change::Everything));
    }

    #[tokio::test(start_paused = true)]
    async fn one_missing_app_does_not_block_the_others() {
        let mut fx = fixture();
        fx.api.missing_apps.lock().insert("ghost".to_string());

        fx.engine.apply_diff(AppSetDiff::adding(["app1", "ghost"])).await;

        let apps = fx.cache.apps();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "app1");
        assert!(matches!(fx.changes.try_recv().unwrap(), Change::Everything));
    }

    #[tokio::test(start_paused = true)]
    async fn removed_apps_are_evicted() {
        let mut fx = fixture();
        fx.engine.apply_diff(AppSetDiff::adding(["app1", "app2"])).await;
        assert_eq!(fx.cache.apps().len(), 2);

        let mut diff = AppSetDiff::default();
        diff.removed.insert("app1".to_string());
        fx.engine.apply_diff(diff).await;

        let apps = fx.cache.apps();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "app2");
        let _ = fx.changes.try_recv();
    }

    #[tokio::test(start_paused = true)]
    async fn auth_loss_drains_cache_and_deletes_snapshot() {
        let mut fx = fixture();
        fx.engine.apply_diff(AppSetDiff::adding(["app1"])).await;
        assert_eq!(fx.cache.apps().len(), 1);
        let _ = fx.changes.try_recv();

        fx.api.unauthorized.store(true, Ordering::SeqCst);
        fx.engine.apply_diff(AppSetDiff::adding(["app2"])).await;

        assert!(fx.cache.apps().is_empty());
        let snapshot = SnapshotStore::new(fx._dir.path().join("apps.json"));
        assert!(snapshot.load().unwrap().is_empty());
        assert!(matches!(fx.changes.try_recv().unwrap(), Change::Everything));
        assert!(fx.changes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_restore_seeds_the_cache() {
        let mut fx = fixture();
        let snapshot = SnapshotStore::new(fx._dir.path().join("apps.json"));
        snapshot
            .save(&[("app1".to_string(), app("app1"))])
            .unwrap();

        fx.engine.restore_snapshot();

        assert_eq!(fx.cache.apps().len(), 1);
        assert_eq!(fx.cache.phase("app1"), Some(SyncPhase::Uninitialized));
        assert!(matches!(fx.changes.try_recv().unwrap(), Change::Everything));
    }
}
