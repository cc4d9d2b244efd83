use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use dynoscope_api::{ApiResult, PlatformApi};
use dynoscope_types::{AddOn, App, Category, Dyno, DynoState, Formation, SyncPhase};

/// Per-application cache entry owning its child collections.
///
/// Children never outlive the entry; other entries refer to them by
/// name/id only, never by reference.
struct AppEntry {
    app: App,
    phase: SyncPhase,
    dynos: Option<Vec<Dyno>>,
    formations: Option<Vec<Formation>>,
    addons: Option<Vec<AddOn>>,
    categories: Vec<Category>,
}

impl AppEntry {
    fn new(app: App) -> Self {
        Self {
            app,
            phase: SyncPhase::Uninitialized,
            dynos: None,
            formations: None,
            addons: None,
            categories: Category::ALL.to_vec(),
        }
    }
}

/// Application-keyed cache of dynos, formations and add-ons.
///
/// Reads are memoized per application until explicitly invalidated; the
/// first access fetches from the platform. Mutation goes through the
/// in-place primitives, which the sync engine alone drives; all other
/// components treat the returned collections as read-only snapshots.
pub struct ResourceCache {
    api: Arc<dyn PlatformApi>,
    entries: RwLock<HashMap<String, AppEntry>>,
}

impl ResourceCache {
    pub fn new(api: Arc<dyn PlatformApi>) -> Self {
        Self {
            api,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert an entry for the app if absent; refresh its identity fields
    /// if present. Idempotent.
    pub fn get_or_create(&self, app: &App) {
        let mut entries = self.entries.write();
        match entries.get_mut(&app.name) {
            Some(entry) => entry.app = app.clone(),
            None => {
                entries.insert(app.name.clone(), AppEntry::new(app.clone()));
            }
        }
    }

    pub fn contains(&self, app: &str) -> bool {
        self.entries.read().contains_key(app)
    }

    pub fn app(&self, name: &str) -> Option<App> {
        self.entries.read().get(name).map(|entry| entry.app.clone())
    }

    /// All cached apps, ordered by name
    pub fn apps(&self) -> Vec<App> {
        let entries = self.entries.read();
        let mut apps: Vec<App> = entries.values().map(|entry| entry.app.clone()).collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        apps
    }

    pub fn phase(&self, app: &str) -> Option<SyncPhase> {
        self.entries.read().get(app).map(|entry| entry.phase)
    }

    pub fn set_phase(&self, app: &str, phase: SyncPhase) {
        if let Some(entry) = self.entries.write().get_mut(app) {
            entry.phase = phase;
        }
    }

    /// Presentation category nodes for an app
    pub fn categories(&self, app: &str) -> Vec<Category> {
        self.entries
            .read()
            .get(app)
            .map(|entry| entry.categories.clone())
            .unwrap_or_default()
    }

    /// Evict an app and everything it owns
    pub fn remove(&self, app: &str) -> bool {
        self.entries.write().remove(app).is_some()
    }

    /// Drop every entry (authentication loss)
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Ordered `(name, app)` pairs for the snapshot
    pub fn snapshot_entries(&self) -> Vec<(String, App)> {
        self.apps()
            .into_iter()
            .map(|app| (app.name.clone(), app))
            .collect()
    }

    // ------------------------------------------------------------------
    // Dynos
    // ------------------------------------------------------------------

    /// Dynos for an app, fetching and memoizing on first access
    pub async fn dynos(&self, app: &str, cancel: &CancellationToken) -> ApiResult<Vec<Dyno>> {
        if let Some(dynos) = self.cached_dynos(app) {
            return Ok(dynos);
        }
        let mut fetched = self.api.list_dynos(app, cancel).await?;
        sort_dynos(&mut fetched);
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(app) {
            match &entry.dynos {
                // Another access won the race; keep its result
                Some(existing) => return Ok(existing.clone()),
                None => entry.dynos = Some(fetched.clone()),
            }
        }
        Ok(fetched)
    }

    pub fn cached_dynos(&self, app: &str) -> Option<Vec<Dyno>> {
        self.entries.read().get(app).and_then(|entry| entry.dynos.clone())
    }

    pub fn cached_dyno(&self, app: &str, name: &str) -> Option<Dyno> {
        self.entries.read().get(app).and_then(|entry| {
            entry
                .dynos
                .as_ref()
                .and_then(|dynos| dynos.iter().find(|d| d.name == name).cloned())
        })
    }

    /// Insert or replace a dyno, matching by name. A recycled name with a
    /// different underlying id overwrites in place rather than duplicating.
    /// The order invariant (numeric name suffix) is enforced here, not by
    /// callers.
    pub fn upsert_dyno(&self, app: &str, dyno: Dyno) -> bool {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(app) else {
            return false;
        };
        let dynos = entry.dynos.get_or_insert_with(Vec::new);
        match dynos.iter_mut().find(|d| d.name == dyno.name) {
            Some(existing) => *existing = dyno,
            None => dynos.push(dyno),
        }
        sort_dynos(dynos);
        true
    }

    pub fn set_dyno_state(&self, app: &str, name: &str, state: DynoState) -> bool {
        let mut entries = self.entries.write();
        let Some(dynos) = entries.get_mut(app).and_then(|entry| entry.dynos.as_mut()) else {
            return false;
        };
        match dynos.iter_mut().find(|d| d.name == name) {
            Some(dyno) => {
                dyno.state = state;
                true
            }
            None => false,
        }
    }

    pub fn remove_dyno(&self, app: &str, name: &str) -> bool {
        let mut entries = self.entries.write();
        let Some(dynos) = entries.get_mut(app).and_then(|entry| entry.dynos.as_mut()) else {
            return false;
        };
        let before = dynos.len();
        dynos.retain(|d| d.name != name);
        dynos.len() != before
    }

    // ------------------------------------------------------------------
    // Formations
    // ------------------------------------------------------------------

    pub async fn formations(
        &self,
        app: &str,
        cancel: &CancellationToken,
    ) -> ApiResult<Vec<Formation>> {
        if let Some(formations) = self.cached_formations(app) {
            return Ok(formations);
        }
        let fetched = self.api.list_formations(app, cancel).await?;
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(app) {
            match &entry.formations {
                Some(existing) => return Ok(existing.clone()),
                None => entry.formations = Some(fetched.clone()),
            }
        }
        Ok(fetched)
    }

    pub fn cached_formations(&self, app: &str) -> Option<Vec<Formation>> {
        self.entries
            .read()
            .get(app)
            .and_then(|entry| entry.formations.clone())
    }

    pub fn store_formations(&self, app: &str, formations: Vec<Formation>) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(app) {
            Some(entry) => {
                entry.formations = Some(formations);
                true
            }
            None => false,
        }
    }

    pub fn upsert_formation(&self, app: &str, formation: Formation) -> bool {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(app) else {
            return false;
        };
        let formations = entry.formations.get_or_insert_with(Vec::new);
        match formations
            .iter_mut()
            .find(|f| f.process_type == formation.process_type && f.size == formation.size)
        {
            Some(existing) => *existing = formation,
            None => formations.push(formation),
        }
        true
    }

    /// Set the quantity on the cached formation with the given size.
    /// Returns false when no cached formation matches.
    pub fn set_formation_quantity_by_size(&self, app: &str, size: &str, quantity: i64) -> bool {
        let mut entries = self.entries.write();
        let Some(formations) = entries
            .get_mut(app)
            .and_then(|entry| entry.formations.as_mut())
        else {
            return false;
        };
        match formations.iter_mut().find(|f| f.size == size) {
            Some(formation) => {
                formation.quantity = quantity;
                true
            }
            None => false,
        }
    }

    /// Forget the formation list so the next access re-fetches
    pub fn invalidate_formations(&self, app: &str) {
        if let Some(entry) = self.entries.write().get_mut(app) {
            entry.formations = None;
        }
    }

    // ------------------------------------------------------------------
    // Add-ons
    // ------------------------------------------------------------------

    pub async fn addons(&self, app: &str, cancel: &CancellationToken) -> ApiResult<Vec<AddOn>> {
        if let Some(addons) = self.cached_addons(app) {
            return Ok(addons);
        }
        let fetched = self.api.list_addons(app, cancel).await?;
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(app) {
            match &entry.addons {
                Some(existing) => return Ok(existing.clone()),
                None => entry.addons = Some(fetched.clone()),
            }
        }
        Ok(fetched)
    }

    pub fn cached_addons(&self, app: &str) -> Option<Vec<AddOn>> {
        self.entries
            .read()
            .get(app)
            .and_then(|entry| entry.addons.clone())
    }

    pub fn store_addons(&self, app: &str, addons: Vec<AddOn>) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(app) {
            Some(entry) => {
                entry.addons = Some(addons);
                true
            }
            None => false,
        }
    }

    pub fn upsert_addon(&self, app: &str, addon: AddOn) -> bool {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(app) else {
            return false;
        };
        let addons = entry.addons.get_or_insert_with(Vec::new);
        match addons.iter_mut().find(|a| a.id == addon.id) {
            Some(existing) => *existing = addon,
            None => addons.push(addon),
        }
        true
    }

    pub fn remove_addon(&self, app: &str, id: &str) -> bool {
        let mut entries = self.entries.write();
        let Some(addons) = entries.get_mut(app).and_then(|entry| entry.addons.as_mut()) else {
            return false;
        };
        let before = addons.len();
        addons.retain(|a| a.id != id);
        addons.len() != before
    }

    pub fn invalidate_addons(&self, app: &str) {
        if let Some(entry) = self.entries.write().get_mut(app) {
            entry.addons = None;
        }
    }

    /// Forget every memoized collection for an app (full resync)
    pub fn invalidate(&self, app: &str) {
        if let Some(entry) = self.entries.write().get_mut(app) {
            entry.dynos = None;
            entry.formations = None;
            entry.addons = None;
        }
    }
}

fn sort_dynos(dynos: &mut [Dyno]) {
    dynos.sort_by(|a, b| a.ordinal().cmp(&b.ordinal()).then_with(|| a.name.cmp(&b.name)));
}
