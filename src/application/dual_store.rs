use crate::application::policy::{Backend, RemoteScope, StoragePolicy};
use crate::application::records::{RecordOrder, StoreRecord};
use crate::domain::models::{LOCAL_OWNER_ID, TimerDurations, TimerSettings};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_storage::LocalStorage;
use crate::infrastructure::tables_client::{SelectRequest, SortDirection, TablesClient};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(1);

fn next_local_id(prefix: &str) -> String {
    let sequence = NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// One ordered collection backed either by a device-local slot or by a
/// hosted table, whichever the policy selects at call time.
///
/// Remote failures are logged and leave the collection untouched. Local
/// mutations write the whole collection to the slot before the in-memory
/// view changes, so the slot always mirrors what `list` returns.
pub struct DualModeStore<R: StoreRecord> {
    local_storage: Arc<dyn LocalStorage>,
    tables: Option<Arc<dyn TablesClient>>,
    policy: Arc<dyn StoragePolicy>,
    records: Mutex<Vec<R>>,
    loaded_from: Mutex<Option<Backend>>,
    now_provider: NowProvider,
}

impl<R: StoreRecord> DualModeStore<R> {
    pub fn new(
        local_storage: Arc<dyn LocalStorage>,
        tables: Option<Arc<dyn TablesClient>>,
        policy: Arc<dyn StoragePolicy>,
    ) -> Self {
        Self {
            local_storage,
            tables,
            policy,
            records: Mutex::new(Vec::new()),
            loaded_from: Mutex::new(None),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn is_remote(&self) -> bool {
        self.policy.backend().is_remote()
    }

    pub fn list(&self) -> Result<Vec<R>, InfraError> {
        Ok(self.lock_records()?.clone())
    }

    /// True when the view holds a successful load for the owner the policy
    /// currently selects.
    pub fn is_loaded(&self) -> Result<bool, InfraError> {
        let backend = self.policy.backend();
        Ok(self.lock_loaded_from()?.as_ref().is_some_and(|loaded| loaded.same_owner(&backend)))
    }

    /// Replaces the view with the active backend's contents. Nothing is
    /// carried over from the previous backend. A failed remote load empties
    /// the view; a load that lands after the session changed is dropped.
    pub async fn reload(&self) -> Result<Vec<R>, InfraError> {
        let origin = self.policy.backend();
        let loaded = match &origin {
            Backend::Local => Ok(self.load_local()),
            Backend::Remote(scope) => self.load_remote(scope).await,
        };
        if !self.policy.backend().same_owner(&origin) {
            log::debug!("discarding {} reload for a previous session", R::TABLE);
            return self.list();
        }

        let mut records = self.lock_records()?;
        let mut loaded_from = self.lock_loaded_from()?;
        match loaded {
            Ok(loaded) => {
                *records = loaded.clone();
                *loaded_from = Some(origin);
                Ok(loaded)
            }
            Err(error) => {
                log::error!("failed to load {}: {error}", R::TABLE);
                records.clear();
                *loaded_from = None;
                Ok(Vec::new())
            }
        }
    }

    pub async fn add(&self, draft: R::Draft) -> Result<Option<R>, InfraError> {
        match self.policy.backend() {
            Backend::Local => {
                let record = R::from_local_draft(&draft, next_local_id(R::ID_PREFIX), LOCAL_OWNER_ID, self.now());
                let inserted = self.mutate_local(|records| {
                    insert_ordered(records, record.clone());
                    true
                })?;
                Ok(inserted.then_some(record))
            }
            Backend::Remote(scope) => {
                let tables = match self.remote_client() {
                    Ok(tables) => tables,
                    Err(error) => {
                        log_remote_failure::<R>("add", &error);
                        return Ok(None);
                    }
                };
                let row = R::insert_row(&draft, &scope.owner_id);
                let rows = match tables.insert(&scope.access_token, R::TABLE, row).await {
                    Ok(rows) => rows,
                    Err(error) => {
                        log_remote_failure::<R>("add", &error);
                        return Ok(None);
                    }
                };
                let Some(record) = rows.into_iter().find_map(parse_row::<R>) else {
                    log::warn!("{} insert returned no usable row", R::TABLE);
                    return Ok(None);
                };
                if self.still_scoped_to(&scope) {
                    let mut records = self.lock_records()?;
                    insert_ordered(&mut *records, record.clone());
                }
                Ok(Some(record))
            }
        }
    }

    /// Applies `edit` to the record with `id`; `None` when it is unknown or
    /// the backend rejected the change.
    pub async fn update<F>(&self, id: &str, edit: F) -> Result<Option<R>, InfraError>
    where
        F: FnOnce(&mut R),
    {
        let now = self.now();
        match self.policy.backend() {
            Backend::Local => {
                let mut updated = None;
                self.mutate_local(|records| {
                    let Some(record) = records.iter_mut().find(|record| record.id() == id) else {
                        return false;
                    };
                    edit(record);
                    record.touch(now);
                    updated = Some(record.clone());
                    true
                })?;
                Ok(updated)
            }
            Backend::Remote(scope) => {
                let Some(mut record) = self.lock_records()?.iter().find(|record| record.id() == id).cloned() else {
                    return Ok(None);
                };
                edit(&mut record);
                record.touch(now);

                let tables = match self.remote_client() {
                    Ok(tables) => tables,
                    Err(error) => {
                        log_remote_failure::<R>("update", &error);
                        return Ok(None);
                    }
                };
                if let Err(error) = tables
                    .update(&scope.access_token, R::TABLE, &scope.owner_id, id, record.update_row())
                    .await
                {
                    log_remote_failure::<R>("update", &error);
                    return Ok(None);
                }

                if self.still_scoped_to(&scope) {
                    let mut records = self.lock_records()?;
                    if let Some(slot) = records.iter_mut().find(|existing| existing.id() == id) {
                        *slot = record.clone();
                    }
                }
                Ok(Some(record))
            }
        }
    }

    pub async fn remove(&self, id: &str) -> Result<bool, InfraError> {
        match self.policy.backend() {
            Backend::Local => self.mutate_local(|records| {
                let before = records.len();
                records.retain(|record| record.id() != id);
                records.len() != before
            }),
            Backend::Remote(scope) => {
                let tables = match self.remote_client() {
                    Ok(tables) => tables,
                    Err(error) => {
                        log_remote_failure::<R>("remove", &error);
                        return Ok(false);
                    }
                };
                if let Err(error) = tables
                    .delete(&scope.access_token, R::TABLE, &scope.owner_id, id)
                    .await
                {
                    log_remote_failure::<R>("remove", &error);
                    return Ok(false);
                }
                if self.still_scoped_to(&scope) {
                    self.lock_records()?.retain(|record| record.id() != id);
                }
                Ok(true)
            }
        }
    }

    /// Runs `change` on a copy and persists it; the view is replaced only
    /// after the slot write succeeds. A failed write is logged and the
    /// operation becomes a no-op.
    fn mutate_local<F>(&self, change: F) -> Result<bool, InfraError>
    where
        F: FnOnce(&mut Vec<R>) -> bool,
    {
        let mut records = self.lock_records()?;
        let mut next = records.clone();
        if !change(&mut next) {
            return Ok(false);
        }

        let persisted = serde_json::to_string(&next)
            .map_err(InfraError::from)
            .and_then(|payload| self.local_storage.write_slot(R::LOCAL_SLOT, &payload));
        if let Err(error) = persisted {
            log::error!("failed to persist {}: {error}", R::LOCAL_SLOT);
            return Ok(false);
        }

        *records = next;
        Ok(true)
    }

    fn load_local(&self) -> Vec<R> {
        let raw = match self.local_storage.read_slot(R::LOCAL_SLOT) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(error) => {
                log::error!("failed to read {}: {error}", R::LOCAL_SLOT);
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<R>>(&raw) {
            Ok(records) => records,
            Err(error) => {
                log::warn!("ignoring unreadable {} snapshot: {error}", R::LOCAL_SLOT);
                Vec::new()
            }
        }
    }

    async fn load_remote(&self, scope: &RemoteScope) -> Result<Vec<R>, InfraError> {
        let tables = self.remote_client()?;
        let direction = match R::ORDER {
            RecordOrder::NewestFirst => SortDirection::Descending,
            RecordOrder::OldestFirst => SortDirection::Ascending,
        };
        let request = SelectRequest {
            table: R::TABLE,
            owner_id: scope.owner_id.clone(),
            order_by: Some(("created_at", direction)),
        };
        let rows = tables.select(&scope.access_token, request).await?;
        Ok(rows.into_iter().filter_map(parse_row::<R>).collect())
    }

    fn remote_client(&self) -> Result<&Arc<dyn TablesClient>, InfraError> {
        self.tables
            .as_ref()
            .ok_or_else(|| InfraError::InvalidConfig("no hosted backend is configured".to_string()))
    }

    /// Responses that arrive after a sign-in or sign-out belong to a view
    /// that no longer exists.
    fn still_scoped_to(&self, scope: &RemoteScope) -> bool {
        matches!(self.policy.backend(), Backend::Remote(current) if current.owner_id == scope.owner_id)
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    fn lock_records(&self) -> Result<MutexGuard<'_, Vec<R>>, InfraError> {
        self.records
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("{} lock poisoned: {error}", R::TABLE)))
    }

    fn lock_loaded_from(&self) -> Result<MutexGuard<'_, Option<Backend>>, InfraError> {
        self.loaded_from
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("{} load marker poisoned: {error}", R::TABLE)))
    }
}

impl DualModeStore<TimerSettings> {
    /// The owner's singleton settings row, created with the defaults on
    /// first access. The defaults come back unsaved when the owner's rows
    /// cannot be loaded or the insert fails; nothing is inserted unless the
    /// load confirmed there is no row yet.
    pub async fn current_or_create(&self) -> Result<TimerSettings, InfraError> {
        if !self.is_loaded()? {
            self.reload().await?;
        }

        let defaults = TimerDurations::default();
        if self.is_loaded()? {
            let existing = self.lock_records()?.first().cloned();
            if let Some(existing) = existing {
                return Ok(existing);
            }
            if let Some(created) = self.add(defaults).await? {
                return Ok(created);
            }
        } else {
            log::warn!("{} unavailable; using unsaved defaults", TimerSettings::TABLE);
        }

        let owner_id = match self.policy.backend() {
            Backend::Remote(scope) => scope.owner_id,
            Backend::Local => LOCAL_OWNER_ID.to_string(),
        };
        Ok(TimerSettings::from_local_draft(
            &defaults,
            next_local_id(TimerSettings::ID_PREFIX),
            &owner_id,
            self.now(),
        ))
    }
}

fn insert_ordered<R: StoreRecord>(records: &mut Vec<R>, record: R) {
    match R::ORDER {
        RecordOrder::NewestFirst => records.insert(0, record),
        RecordOrder::OldestFirst => records.push(record),
    }
}

fn log_remote_failure<R: StoreRecord>(action: &str, error: &InfraError) {
    log::error!("failed to {action} in {}: {error}", R::TABLE);
}

fn parse_row<R: StoreRecord>(row: serde_json::Value) -> Option<R> {
    match serde_json::from_value::<R>(row) {
        Ok(record) => Some(record),
        Err(error) => {
            log::warn!("skipping malformed {} row: {error}", R::TABLE);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Task, TaskDraft};
    use crate::infrastructure::local_storage::InMemoryLocalStorage;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::{Notify, Semaphore};

    #[derive(Debug)]
    struct SwitchablePolicy {
        backend: Mutex<Backend>,
    }

    impl SwitchablePolicy {
        fn local() -> Self {
            Self {
                backend: Mutex::new(Backend::Local),
            }
        }

        fn sign_in(&self, owner_id: &str) {
            *self.backend.lock().expect("policy lock") = Backend::Remote(RemoteScope {
                owner_id: owner_id.to_string(),
                access_token: format!("token-{owner_id}"),
            });
        }

        fn sign_out(&self) {
            *self.backend.lock().expect("policy lock") = Backend::Local;
        }
    }

    impl StoragePolicy for SwitchablePolicy {
        fn backend(&self) -> Backend {
            self.backend.lock().expect("policy lock").clone()
        }
    }

    /// Owner-scoped rows keyed by table, with an optional outage switch.
    #[derive(Debug, Default)]
    struct FakeTablesClient {
        rows: Mutex<HashMap<&'static str, Vec<Value>>>,
        offline: Mutex<bool>,
        fail_inserts: Mutex<bool>,
        next_row: AtomicUsize,
        requests: AtomicUsize,
    }

    impl FakeTablesClient {
        fn set_offline(&self, offline: bool) {
            *self.offline.lock().expect("offline lock") = offline;
        }

        fn check(&self) -> Result<(), InfraError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if *self.offline.lock().expect("offline lock") {
                return Err(InfraError::Http("connection refused".to_string()));
            }
            Ok(())
        }

        fn rows_for(&self, table: &'static str) -> Vec<Value> {
            self.rows.lock().expect("rows lock").get(table).cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl TablesClient for FakeTablesClient {
        async fn select(&self, _access_token: &str, request: SelectRequest) -> Result<Vec<Value>, InfraError> {
            self.check()?;
            let mut rows: Vec<Value> = self
                .rows_for(request.table)
                .into_iter()
                .filter(|row| row["user_id"] == request.owner_id.as_str())
                .collect();
            if let Some((_, SortDirection::Descending)) = request.order_by {
                rows.reverse();
            }
            Ok(rows)
        }

        async fn insert(&self, _access_token: &str, table: &'static str, mut row: Value) -> Result<Vec<Value>, InfraError> {
            self.check()?;
            if *self.fail_inserts.lock().expect("insert flag lock") {
                return Err(InfraError::Http("insert rejected: http 500".to_string()));
            }
            let sequence = self.next_row.fetch_add(1, Ordering::SeqCst);
            let created_at = Utc::now().to_rfc3339();
            row["id"] = json!(format!("row-{sequence}"));
            row["created_at"] = json!(created_at);
            row["updated_at"] = json!(created_at);
            self.rows.lock().expect("rows lock").entry(table).or_default().push(row.clone());
            Ok(vec![row])
        }

        async fn update(
            &self,
            _access_token: &str,
            table: &'static str,
            owner_id: &str,
            row_id: &str,
            patch: Value,
        ) -> Result<(), InfraError> {
            self.check()?;
            let mut rows = self.rows.lock().expect("rows lock");
            for row in rows.entry(table).or_default().iter_mut() {
                if row["id"] == row_id && row["user_id"] == owner_id {
                    if let (Some(target), Some(changes)) = (row.as_object_mut(), patch.as_object()) {
                        for (key, value) in changes {
                            target.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
            Ok(())
        }

        async fn delete(
            &self,
            _access_token: &str,
            table: &'static str,
            owner_id: &str,
            row_id: &str,
        ) -> Result<(), InfraError> {
            self.check()?;
            self.rows
                .lock()
                .expect("rows lock")
                .entry(table)
                .or_default()
                .retain(|row| !(row["id"] == row_id && row["user_id"] == owner_id));
            Ok(())
        }
    }

    /// Parks every request until the test hands out a permit, so a session
    /// switch can happen while the request is in flight.
    struct GatedTablesClient {
        inner: Arc<FakeTablesClient>,
        entered: Notify,
        release: Semaphore,
    }

    impl GatedTablesClient {
        fn new(inner: Arc<FakeTablesClient>) -> Self {
            Self {
                inner,
                entered: Notify::new(),
                release: Semaphore::new(0),
            }
        }

        async fn pass(&self) -> Result<(), InfraError> {
            self.entered.notify_one();
            let permit = self
                .release
                .acquire()
                .await
                .map_err(|error| InfraError::Http(error.to_string()))?;
            permit.forget();
            Ok(())
        }
    }

    #[async_trait]
    impl TablesClient for GatedTablesClient {
        async fn select(&self, access_token: &str, request: SelectRequest) -> Result<Vec<Value>, InfraError> {
            self.pass().await?;
            self.inner.select(access_token, request).await
        }

        async fn insert(&self, access_token: &str, table: &'static str, row: Value) -> Result<Vec<Value>, InfraError> {
            self.pass().await?;
            self.inner.insert(access_token, table, row).await
        }

        async fn update(
            &self,
            access_token: &str,
            table: &'static str,
            owner_id: &str,
            row_id: &str,
            patch: Value,
        ) -> Result<(), InfraError> {
            self.pass().await?;
            self.inner.update(access_token, table, owner_id, row_id, patch).await
        }

        async fn delete(
            &self,
            access_token: &str,
            table: &'static str,
            owner_id: &str,
            row_id: &str,
        ) -> Result<(), InfraError> {
            self.pass().await?;
            self.inner.delete(access_token, table, owner_id, row_id).await
        }
    }

    /// Local storage whose writes can be made to fail.
    #[derive(Debug, Default)]
    struct FlakyLocalStorage {
        inner: InMemoryLocalStorage,
        fail_writes: Mutex<bool>,
    }

    impl LocalStorage for FlakyLocalStorage {
        fn read_slot(&self, name: &str) -> Result<Option<String>, InfraError> {
            self.inner.read_slot(name)
        }

        fn write_slot(&self, name: &str, value: &str) -> Result<(), InfraError> {
            if *self.fail_writes.lock().expect("flag lock") {
                return Err(InfraError::Io(std::io::Error::other("quota exceeded")));
            }
            self.inner.write_slot(name, value)
        }
    }

    struct Harness {
        local: Arc<InMemoryLocalStorage>,
        tables: Arc<FakeTablesClient>,
        policy: Arc<SwitchablePolicy>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                local: Arc::new(InMemoryLocalStorage::default()),
                tables: Arc::new(FakeTablesClient::default()),
                policy: Arc::new(SwitchablePolicy::local()),
            }
        }

        fn store<R: StoreRecord>(&self) -> DualModeStore<R> {
            DualModeStore::new(
                self.local.clone(),
                Some(self.tables.clone() as Arc<dyn TablesClient>),
                self.policy.clone(),
            )
        }

        fn gated_store<R: StoreRecord>(&self) -> (DualModeStore<R>, Arc<GatedTablesClient>) {
            let gated = Arc::new(GatedTablesClient::new(self.tables.clone()));
            let store = DualModeStore::new(
                self.local.clone(),
                Some(gated.clone() as Arc<dyn TablesClient>),
                self.policy.clone(),
            );
            (store, gated)
        }

        fn slot(&self, name: &str) -> Option<String> {
            self.local.read_slot(name).expect("read slot")
        }
    }

    fn draft(text: &str) -> TaskDraft {
        TaskDraft::new(text).expect("non-empty draft")
    }

    fn texts(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|task| task.text.as_str()).collect()
    }

    #[tokio::test]
    async fn local_tasks_are_newest_first_and_written_through() {
        let harness = Harness::new();
        let store = harness.store::<Task>();
        store.reload().await.expect("reload");

        let first = store.add(draft("first")).await.expect("add").expect("added");
        store.add(draft("second")).await.expect("add").expect("added");
        assert_eq!(first.user_id, LOCAL_OWNER_ID);

        let listed = store.list().expect("list");
        assert_eq!(texts(&listed), vec!["second", "first"]);
        assert_eq!(
            harness.slot(Task::LOCAL_SLOT),
            Some(serde_json::to_string(&listed).expect("serialize"))
        );
        assert_eq!(harness.tables.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn local_update_and_remove_round_trip_through_slot() {
        let harness = Harness::new();
        let store = harness.store::<Task>();
        let task = store.add(draft("water plants")).await.expect("add").expect("added");

        let toggled = store
            .update(&task.id, |task| task.completed = !task.completed)
            .await
            .expect("update")
            .expect("updated");
        assert!(toggled.completed);
        assert!(toggled.updated_at >= toggled.created_at);

        let reopened = harness.store::<Task>();
        let reloaded = reopened.reload().await.expect("reload");
        assert_eq!(reloaded, vec![toggled.clone()]);

        assert!(store.remove(&task.id).await.expect("remove"));
        assert!(!store.remove(&task.id).await.expect("remove again"));
        assert_eq!(store.update("missing", |_| {}).await.expect("update"), None);
        assert_eq!(harness.slot(Task::LOCAL_SLOT).as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn corrupt_snapshot_loads_empty_and_store_keeps_working() {
        let harness = Harness::new();
        harness
            .local
            .write_slot(Task::LOCAL_SLOT, "{not json")
            .expect("seed corrupt slot");
        let store = harness.store::<Task>();

        assert!(store.reload().await.expect("reload").is_empty());
        store.add(draft("recover")).await.expect("add").expect("added");
        assert_eq!(texts(&store.list().expect("list")), vec!["recover"]);
    }

    #[tokio::test]
    async fn failed_local_write_leaves_view_unchanged() {
        let local = Arc::new(FlakyLocalStorage::default());
        let store: DualModeStore<Task> =
            DualModeStore::new(local.clone(), None, Arc::new(SwitchablePolicy::local()));
        store.add(draft("kept")).await.expect("add").expect("added");

        *local.fail_writes.lock().expect("flag lock") = true;
        assert_eq!(store.add(draft("lost")).await.expect("add"), None);
        assert_eq!(texts(&store.list().expect("list")), vec!["kept"]);
    }

    #[tokio::test]
    async fn remote_rows_are_owner_scoped_and_disjoint_from_local() {
        let harness = Harness::new();
        let store = harness.store::<Task>();
        store.add(draft("offline note")).await.expect("add");

        harness.policy.sign_in("user-1");
        assert!(store.reload().await.expect("reload").is_empty());
        let remote = store.add(draft("synced")).await.expect("add").expect("added");
        assert_eq!(remote.user_id, "user-1");
        assert_eq!(remote.id, "row-0");

        harness.policy.sign_in("user-2");
        assert!(store.reload().await.expect("reload").is_empty());

        harness.policy.sign_out();
        assert_eq!(texts(&store.reload().await.expect("reload")), vec!["offline note"]);
    }

    #[tokio::test]
    async fn remote_failures_are_no_ops() {
        let harness = Harness::new();
        harness.policy.sign_in("user-1");
        let store = harness.store::<Task>();
        let task = store.add(draft("draft essay")).await.expect("add").expect("added");

        harness.tables.set_offline(true);
        assert_eq!(store.add(draft("never lands")).await.expect("add"), None);
        assert_eq!(store.update(&task.id, |task| task.completed = true).await.expect("update"), None);
        assert!(!store.remove(&task.id).await.expect("remove"));
        assert_eq!(store.list().expect("list"), vec![task]);

        assert!(store.reload().await.expect("reload").is_empty());
    }

    #[tokio::test]
    async fn remote_update_patches_row() {
        let harness = Harness::new();
        harness.policy.sign_in("user-1");
        let store = harness.store::<Task>();
        let task = store.add(draft("submit form")).await.expect("add").expect("added");

        store
            .update(&task.id, |task| task.completed = true)
            .await
            .expect("update")
            .expect("updated");
        let reloaded = store.reload().await.expect("reload");
        assert!(reloaded[0].completed);

        assert!(store.remove(&task.id).await.expect("remove"));
        assert!(store.reload().await.expect("reload").is_empty());
    }

    #[tokio::test]
    async fn sign_out_then_in_without_local_data_yields_empty_collection() {
        let harness = Harness::new();
        let store = harness.store::<Task>();
        harness.policy.sign_in("user-1");
        store.reload().await.expect("reload");
        store.add(draft("remote only")).await.expect("add");

        harness.policy.sign_out();
        assert!(store.reload().await.expect("reload").is_empty());
        harness.policy.sign_in("user-9");
        assert!(store.reload().await.expect("reload").is_empty());
    }

    #[tokio::test]
    async fn settings_are_created_once_per_owner() {
        let harness = Harness::new();
        let store = harness.store::<TimerSettings>();
        store.reload().await.expect("reload");

        let created = store.current_or_create().await.expect("settings");
        assert_eq!(created.durations(), TimerDurations::default());
        let again = store.current_or_create().await.expect("settings");
        assert_eq!(again.id, created.id);
        assert_eq!(store.list().expect("list").len(), 1);
    }

    #[tokio::test]
    async fn settings_fall_back_to_unsaved_defaults_when_backend_is_down() {
        let harness = Harness::new();
        harness.policy.sign_in("user-1");
        harness.tables.set_offline(true);
        let store = harness.store::<TimerSettings>();

        let settings = store.current_or_create().await.expect("settings");
        assert_eq!(settings.durations(), TimerDurations::default());
        assert_eq!(settings.user_id, "user-1");
        assert!(store.list().expect("list").is_empty());
        assert!(!store.is_loaded().expect("loaded flag"));
    }

    #[tokio::test]
    async fn settings_fall_back_to_unsaved_defaults_when_insert_fails() {
        let harness = Harness::new();
        harness.policy.sign_in("user-1");
        *harness.tables.fail_inserts.lock().expect("insert flag lock") = true;
        let store = harness.store::<TimerSettings>();

        let settings = store.current_or_create().await.expect("settings");
        assert_eq!(settings.durations(), TimerDurations::default());
        assert!(store.is_loaded().expect("loaded flag"));
        assert!(harness.tables.rows_for(TimerSettings::TABLE).is_empty());
    }

    #[tokio::test]
    async fn failed_settings_load_never_inserts_a_second_row() {
        let harness = Harness::new();
        harness.policy.sign_in("user-1");
        let created = harness
            .store::<TimerSettings>()
            .current_or_create()
            .await
            .expect("settings");
        assert_eq!(harness.tables.rows_for(TimerSettings::TABLE).len(), 1);

        let reopened = harness.store::<TimerSettings>();
        harness.tables.set_offline(true);
        assert!(reopened.reload().await.expect("reload").is_empty());
        let fallback = reopened.current_or_create().await.expect("settings");
        assert_ne!(fallback.id, created.id);

        harness.tables.set_offline(false);
        let recovered = reopened.current_or_create().await.expect("settings");
        assert_eq!(recovered.id, created.id);
        assert_eq!(harness.tables.rows_for(TimerSettings::TABLE).len(), 1);
    }

    #[tokio::test]
    async fn remote_reload_landing_after_sign_out_is_discarded() {
        let harness = Harness::new();
        harness.policy.sign_in("user-1");
        harness
            .store::<Task>()
            .add(draft("remote secret"))
            .await
            .expect("add")
            .expect("added");
        let (store, gated) = harness.gated_store::<Task>();

        let (stale, _) = tokio::join!(store.reload(), async {
            gated.entered.notified().await;
            harness.policy.sign_out();
            store.reload().await.expect("local reload");
            gated.release.add_permits(1);
        });
        assert!(stale.expect("reload").is_empty());

        store.add(draft("mine")).await.expect("add").expect("added");
        assert_eq!(texts(&store.list().expect("list")), vec!["mine"]);
        let slot = harness.slot(Task::LOCAL_SLOT).expect("slot written");
        assert!(!slot.contains("remote secret"));
    }

    #[tokio::test]
    async fn remote_insert_landing_after_sign_out_stays_out_of_local_view() {
        let harness = Harness::new();
        harness.policy.sign_in("user-1");
        let (store, gated) = harness.gated_store::<Task>();

        let (late, _) = tokio::join!(store.add(draft("late remote")), async {
            gated.entered.notified().await;
            harness.policy.sign_out();
            store.reload().await.expect("local reload");
            gated.release.add_permits(1);
        });
        let late = late.expect("add").expect("stored remotely");
        assert_eq!(late.user_id, "user-1");
        assert!(store.list().expect("list").is_empty());
        assert_eq!(harness.slot(Task::LOCAL_SLOT), None);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Add(String),
        Remove(usize),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            "[a-z]{1,12}".prop_map(Step::Add),
            (0usize..8).prop_map(Step::Remove),
        ]
    }

    proptest! {
        #[test]
        fn local_slot_always_mirrors_the_view(steps in prop::collection::vec(step(), 1..24)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
            runtime.block_on(async move {
                let harness = Harness::new();
                let store = harness.store::<Task>();
                for step in steps {
                    match step {
                        Step::Add(text) => {
                            store.add(draft(&text)).await.expect("add");
                        }
                        Step::Remove(index) => {
                            let listed = store.list().expect("list");
                            if let Some(task) = listed.get(index % listed.len().max(1)) {
                                store.remove(&task.id).await.expect("remove");
                            }
                        }
                    }
                    let listed = store.list().expect("list");
                    let slot = harness.slot(Task::LOCAL_SLOT).unwrap_or_else(|| "[]".to_string());
                    assert_eq!(slot, serde_json::to_string(&listed).expect("serialize"));
                }
            });
        }
    }
}
