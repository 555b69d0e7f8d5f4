//! Facade over the managed backend.
//!
//! Authentication, storage and realtime delivery belong to the hosted service; the rest of
//! the crate only sees the [`Backend`] and [`SubscriptionStore`] traits. [`MemoryBackend`] is
//! the in-process implementation used by the development server and the tests.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

use crate::cell::Row;
use crate::spreadsheet::{
    Column, Dataset, Folder, SharePermission, SharedFolder, SharedFolderItem, TableShare, View,
};

const REALTIME_CAPACITY: usize = 256;

/// The signed-in user as reported by the auth provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub id: String,
    pub email: String,
}

impl UserContext {
    pub fn new(id: &str, email: &str) -> Self {
        UserContext {
            id: id.to_string(),
            email: email.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Access denied to {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Row limit of {limit} exceeded ({rows} rows)")]
    RowLimitExceeded { limit: usize, rows: usize },
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Realtime payload. View changes always carry the full replacement row set.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChangeEvent {
    ViewRows {
        table_id: String,
        view_id: String,
        rows: Vec<Row>,
    },
    ViewUpdated {
        table_id: String,
        view: Box<View>,
    },
    ViewDeleted {
        table_id: String,
        view_id: String,
    },
    TableColumns {
        table_id: String,
        columns: Vec<Column>,
    },
}

impl ChangeEvent {
    pub fn table_id(&self) -> &str {
        match self {
            ChangeEvent::ViewRows { table_id, .. }
            | ChangeEvent::ViewUpdated { table_id, .. }
            | ChangeEvent::ViewDeleted { table_id, .. }
            | ChangeEvent::TableColumns { table_id, .. } => table_id,
        }
    }
}

/// Receiver for one dataset's change channel.
pub struct RealtimeSubscription {
    table_id: String,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl RealtimeSubscription {
    /// Waits for the next event of this dataset. `None` once the backend is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.table_id() == self.table_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "realtime channel for {} lagged, {} events skipped",
                        self.table_id,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already delivered event of this dataset, without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.table_id() == self.table_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Cancelled,
    PastDue,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub plan: String,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub payment_intent_id: Option<String>,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub current_period_end: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Still running: active, or cancelled but not yet past the end of the period.
    pub fn is_cancel_pending(&self) -> bool {
        self.cancel_at_period_end && self.status == SubscriptionStatus::Cancelled
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active && !self.cancel_at_period_end
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub subscription_status: String,
    #[serde(default)]
    pub plan: Option<String>,
}

/// CRUD and realtime over the workspace collections.
///
/// Every call is made on behalf of a user and checked against ownership and shares.
pub trait Backend: Clone + Send + Sync + 'static {
    fn list_tables(
        &self,
        user: &UserContext,
    ) -> impl Future<Output = Result<Vec<Dataset>, BackendError>> + Send;

    fn get_table(
        &self,
        user: &UserContext,
        table_id: &str,
    ) -> impl Future<Output = Result<Dataset, BackendError>> + Send;

    fn insert_table(
        &self,
        user: &UserContext,
        dataset: Dataset,
    ) -> impl Future<Output = Result<Dataset, BackendError>> + Send;

    fn rename_table(
        &self,
        user: &UserContext,
        table_id: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn update_columns(
        &self,
        user: &UserContext,
        table_id: &str,
        columns: Vec<Column>,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn delete_table(
        &self,
        user: &UserContext,
        table_id: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn list_views(
        &self,
        user: &UserContext,
        table_id: &str,
    ) -> impl Future<Output = Result<Vec<View>, BackendError>> + Send;

    fn get_view(
        &self,
        user: &UserContext,
        view_id: &str,
    ) -> impl Future<Output = Result<View, BackendError>> + Send;

    fn insert_view(
        &self,
        user: &UserContext,
        view: View,
    ) -> impl Future<Output = Result<View, BackendError>> + Send;

    /// Replaces a view's configuration and rows.
    fn update_view(
        &self,
        user: &UserContext,
        view: View,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn update_view_rows(
        &self,
        user: &UserContext,
        view_id: &str,
        rows: Vec<Row>,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn delete_view(
        &self,
        user: &UserContext,
        view_id: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn list_folders(
        &self,
        user: &UserContext,
    ) -> impl Future<Output = Result<Vec<Folder>, BackendError>> + Send;

    fn upsert_folder(
        &self,
        user: &UserContext,
        folder: Folder,
    ) -> impl Future<Output = Result<Folder, BackendError>> + Send;

    fn delete_folder(
        &self,
        user: &UserContext,
        folder_id: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn create_shared_folder(
        &self,
        user: &UserContext,
        folder: SharedFolder,
    ) -> impl Future<Output = Result<SharedFolder, BackendError>> + Send;

    fn add_shared_folder_item(
        &self,
        user: &UserContext,
        item: SharedFolderItem,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn share_table(
        &self,
        user: &UserContext,
        share: TableShare,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn subscribe(&self, table_id: &str) -> RealtimeSubscription;
}

/// Server-side access to billing records. Not scoped to a user session.
pub trait SubscriptionStore: Clone + Send + Sync + 'static {
    fn latest_subscription(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<Subscription>, BackendError>> + Send;

    fn upsert_subscription(
        &self,
        subscription: Subscription,
    ) -> impl Future<Output = Result<Subscription, BackendError>> + Send;

    fn set_profile_status(
        &self,
        user_id: &str,
        status: &str,
        plan: Option<String>,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn profile(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<Profile>, BackendError>> + Send;
}

/// Every backend collection, as persisted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Store {
    pub tables: IndexMap<String, Dataset>,
    pub views: IndexMap<String, View>,
    pub folders: IndexMap<String, Folder>,
    pub shared_folders: IndexMap<String, SharedFolder>,
    pub shared_folder_items: Vec<SharedFolderItem>,
    pub table_shares: Vec<TableShare>,
    pub subscriptions: IndexMap<String, Subscription>,
    pub profiles: IndexMap<String, Profile>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

impl Store {
    fn permits(&self, user: &UserContext, table_id: &str, access: Access) -> bool {
        let Some(table) = self.tables.get(table_id) else {
            return false;
        };
        if table.owner_id == user.id {
            return true;
        }
        let email = user.email.to_lowercase();
        let shared = self.table_shares.iter().any(|s| {
            s.table_id == table_id
                && s.shared_with_email.to_lowercase() == email
                && (access == Access::Read || s.permission == SharePermission::Edit)
        });
        if shared {
            return true;
        }
        access == Access::Read
            && self
                .shared_folder_items
                .iter()
                .filter(|item| item.table_id == table_id)
                .filter_map(|item| self.shared_folders.get(&item.folder_id))
                .any(|folder| {
                    folder.owner_id == user.id
                        || folder
                            .member_emails
                            .iter()
                            .any(|m| m.to_lowercase() == email)
                })
    }

    fn check(&self, user: &UserContext, table_id: &str, access: Access) -> Result<(), BackendError> {
        if !self.tables.contains_key(table_id) {
            return Err(BackendError::NotFound(format!("table {}", table_id)));
        }
        if self.permits(user, table_id, access) {
            Ok(())
        } else {
            Err(BackendError::Forbidden(format!("table {}", table_id)))
        }
    }

    fn view_table(&self, view_id: &str) -> Result<String, BackendError> {
        self.views
            .get(view_id)
            .map(|v| v.table_id.clone())
            .ok_or_else(|| BackendError::NotFound(format!("view {}", view_id)))
    }
}

/// In-process backend. Cloning shares the same store and realtime channel.
#[derive(Clone)]
pub struct MemoryBackend {
    store: Arc<RwLock<Store>>,
    events: broadcast::Sender<ChangeEvent>,
    row_limit: Option<usize>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::from_store(Store::default())
    }

    pub fn from_store(store: Store) -> Self {
        let (events, _) = broadcast::channel(REALTIME_CAPACITY);
        MemoryBackend {
            store: Arc::new(RwLock::new(store)),
            events,
            row_limit: None,
        }
    }

    /// Rejects any view write that would hold more than `limit` rows.
    pub fn with_row_limit(mut self, limit: usize) -> Self {
        self.row_limit = Some(limit);
        self
    }

    /// Copy of every collection, for snapshots.
    pub fn snapshot(&self) -> Store {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: ChangeEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn check_row_limit(&self, rows: usize) -> Result<(), BackendError> {
        match self.row_limit {
            Some(limit) if rows > limit => Err(BackendError::RowLimitExceeded { limit, rows }),
            _ => Ok(()),
        }
    }
}

impl Backend for MemoryBackend {
    async fn list_tables(&self, user: &UserContext) -> Result<Vec<Dataset>, BackendError> {
        let store = self.read();
        Ok(store
            .tables
            .values()
            .filter(|t| store.permits(user, &t.id, Access::Read))
            .cloned()
            .collect())
    }

    async fn get_table(&self, user: &UserContext, table_id: &str) -> Result<Dataset, BackendError> {
        let store = self.read();
        store.check(user, table_id, Access::Read)?;
        Ok(store.tables[table_id].clone())
    }

    async fn insert_table(
        &self,
        user: &UserContext,
        mut dataset: Dataset,
    ) -> Result<Dataset, BackendError> {
        let mut store = self.write();
        if store.tables.contains_key(&dataset.id) {
            return Err(BackendError::Conflict(format!("table {} exists", dataset.id)));
        }
        dataset.owner_id = user.id.clone();
        store.tables.insert(dataset.id.clone(), dataset.clone());
        Ok(dataset)
    }

    async fn rename_table(
        &self,
        user: &UserContext,
        table_id: &str,
        name: &str,
    ) -> Result<(), BackendError> {
        let mut store = self.write();
        store.check(user, table_id, Access::Write)?;
        if let Some(table) = store.tables.get_mut(table_id) {
            table.name = name.to_string();
            table.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_columns(
        &self,
        user: &UserContext,
        table_id: &str,
        columns: Vec<Column>,
    ) -> Result<(), BackendError> {
        {
            let mut store = self.write();
            store.check(user, table_id, Access::Write)?;
            if let Some(table) = store.tables.get_mut(table_id) {
                table.columns = columns.clone();
                table.updated_at = Utc::now();
            }
        }
        self.publish(ChangeEvent::TableColumns {
            table_id: table_id.to_string(),
            columns,
        });
        Ok(())
    }

    async fn delete_table(&self, user: &UserContext, table_id: &str) -> Result<(), BackendError> {
        let mut store = self.write();
        store.check(user, table_id, Access::Read)?;
        if store.tables[table_id].owner_id != user.id {
            return Err(BackendError::Forbidden(format!("table {}", table_id)));
        }
        store.tables.shift_remove(table_id);
        store.views.retain(|_, v| v.table_id != table_id);
        store.table_shares.retain(|s| s.table_id != table_id);
        store.shared_folder_items.retain(|i| i.table_id != table_id);
        for folder in store.folders.values_mut() {
            folder.table_ids.retain(|t| t != table_id);
        }
        Ok(())
    }

    async fn list_views(&self, user: &UserContext, table_id: &str) -> Result<Vec<View>, BackendError> {
        let store = self.read();
        store.check(user, table_id, Access::Read)?;
        Ok(store
            .views
            .values()
            .filter(|v| v.table_id == table_id)
            .cloned()
            .collect())
    }

    async fn get_view(&self, user: &UserContext, view_id: &str) -> Result<View, BackendError> {
        let store = self.read();
        let table_id = store.view_table(view_id)?;
        store.check(user, &table_id, Access::Read)?;
        Ok(store.views[view_id].clone())
    }

    async fn insert_view(&self, user: &UserContext, view: View) -> Result<View, BackendError> {
        self.check_row_limit(view.rows.len())?;
        let mut store = self.write();
        store.check(user, &view.table_id, Access::Write)?;
        if store.views.contains_key(&view.id) {
            return Err(BackendError::Conflict(format!("view {} exists", view.id)));
        }
        store.views.insert(view.id.clone(), view.clone());
        Ok(view)
    }

    async fn update_view(&self, user: &UserContext, view: View) -> Result<(), BackendError> {
        self.check_row_limit(view.rows.len())?;
        {
            let mut store = self.write();
            let table_id = store.view_table(&view.id)?;
            store.check(user, &table_id, Access::Write)?;
            if view.table_id != table_id {
                return Err(BackendError::Conflict(format!(
                    "view {} belongs to table {}",
                    view.id, table_id
                )));
            }
            store.views.insert(view.id.clone(), view.clone());
        }
        self.publish(ChangeEvent::ViewUpdated {
            table_id: view.table_id.clone(),
            view: Box::new(view),
        });
        Ok(())
    }

    async fn update_view_rows(
        &self,
        user: &UserContext,
        view_id: &str,
        rows: Vec<Row>,
    ) -> Result<(), BackendError> {
        self.check_row_limit(rows.len())?;
        let table_id = {
            let mut store = self.write();
            let table_id = store.view_table(view_id)?;
            store.check(user, &table_id, Access::Write)?;
            if let Some(view) = store.views.get_mut(view_id) {
                view.rows = rows.clone();
            }
            table_id
        };
        self.publish(ChangeEvent::ViewRows {
            table_id,
            view_id: view_id.to_string(),
            rows,
        });
        Ok(())
    }

    async fn delete_view(&self, user: &UserContext, view_id: &str) -> Result<(), BackendError> {
        let table_id = {
            let mut store = self.write();
            let table_id = store.view_table(view_id)?;
            store.check(user, &table_id, Access::Write)?;
            store.views.shift_remove(view_id);
            table_id
        };
        self.publish(ChangeEvent::ViewDeleted {
            table_id,
            view_id: view_id.to_string(),
        });
        Ok(())
    }

    async fn list_folders(&self, user: &UserContext) -> Result<Vec<Folder>, BackendError> {
        Ok(self
            .read()
            .folders
            .values()
            .filter(|f| f.owner_id == user.id)
            .cloned()
            .collect())
    }

    async fn upsert_folder(&self, user: &UserContext, mut folder: Folder) -> Result<Folder, BackendError> {
        let mut store = self.write();
        if let Some(existing) = store.folders.get(&folder.id) {
            if existing.owner_id != user.id {
                return Err(BackendError::Forbidden(format!("folder {}", folder.id)));
            }
        }
        folder.owner_id = user.id.clone();
        store.folders.insert(folder.id.clone(), folder.clone());
        Ok(folder)
    }

    async fn delete_folder(&self, user: &UserContext, folder_id: &str) -> Result<(), BackendError> {
        let mut store = self.write();
        match store.folders.get(folder_id) {
            None => Err(BackendError::NotFound(format!("folder {}", folder_id))),
            Some(f) if f.owner_id != user.id => {
                Err(BackendError::Forbidden(format!("folder {}", folder_id)))
            }
            Some(_) => {
                store.folders.shift_remove(folder_id);
                Ok(())
            }
        }
    }

    async fn create_shared_folder(
        &self,
        user: &UserContext,
        mut folder: SharedFolder,
    ) -> Result<SharedFolder, BackendError> {
        let mut store = self.write();
        folder.owner_id = user.id.clone();
        store.shared_folders.insert(folder.id.clone(), folder.clone());
        Ok(folder)
    }

    async fn add_shared_folder_item(
        &self,
        user: &UserContext,
        item: SharedFolderItem,
    ) -> Result<(), BackendError> {
        let mut store = self.write();
        match store.shared_folders.get(&item.folder_id) {
            None => return Err(BackendError::NotFound(format!("shared folder {}", item.folder_id))),
            Some(f) if f.owner_id != user.id => {
                return Err(BackendError::Forbidden(format!("shared folder {}", item.folder_id)));
            }
            Some(_) => {}
        }
        store.check(user, &item.table_id, Access::Write)?;
        if !store.shared_folder_items.contains(&item) {
            store.shared_folder_items.push(item);
        }
        Ok(())
    }

    async fn share_table(&self, user: &UserContext, share: TableShare) -> Result<(), BackendError> {
        let mut store = self.write();
        store.check(user, &share.table_id, Access::Read)?;
        if store.tables[&share.table_id].owner_id != user.id {
            return Err(BackendError::Forbidden(format!("table {}", share.table_id)));
        }
        let email = share.shared_with_email.to_lowercase();
        store
            .table_shares
            .retain(|s| !(s.table_id == share.table_id && s.shared_with_email.to_lowercase() == email));
        store.table_shares.push(share);
        Ok(())
    }

    fn subscribe(&self, table_id: &str) -> RealtimeSubscription {
        RealtimeSubscription {
            table_id: table_id.to_string(),
            rx: self.events.subscribe(),
        }
    }
}

impl SubscriptionStore for MemoryBackend {
    async fn latest_subscription(&self, user_id: &str) -> Result<Option<Subscription>, BackendError> {
        Ok(self
            .read()
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| s.updated_at)
            .cloned())
    }

    async fn upsert_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<Subscription, BackendError> {
        self.write()
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(subscription)
    }

    async fn set_profile_status(
        &self,
        user_id: &str,
        status: &str,
        plan: Option<String>,
    ) -> Result<(), BackendError> {
        let mut store = self.write();
        let profile = store
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| Profile {
                user_id: user_id.to_string(),
                subscription_status: String::new(),
                plan: None,
            });
        profile.subscription_status = status.to_string();
        if plan.is_some() {
            profile.plan = plan;
        }
        Ok(())
    }

    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError> {
        Ok(self.read().profiles.get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::ViewType;

    fn owner() -> UserContext {
        UserContext::new("u1", "owner@example.com")
    }

    fn guest() -> UserContext {
        UserContext::new("u2", "Guest@Example.com")
    }

    #[tokio::test]
    async fn shares_grant_access_by_email() {
        let backend = MemoryBackend::new();
        let table = backend
            .insert_table(&owner(), Dataset::new("T", ""))
            .await
            .unwrap();
        assert_eq!(
            backend.get_table(&guest(), &table.id).await,
            Err(BackendError::Forbidden(format!("table {}", table.id)))
        );

        backend
            .share_table(
                &owner(),
                TableShare {
                    table_id: table.id.clone(),
                    shared_with_email: "guest@example.com".into(),
                    permission: SharePermission::View,
                },
            )
            .await
            .unwrap();
        assert!(backend.get_table(&guest(), &table.id).await.is_ok());
        assert!(matches!(
            backend.rename_table(&guest(), &table.id, "x").await,
            Err(BackendError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn row_writes_are_broadcast_per_table() {
        let backend = MemoryBackend::new();
        let table = backend
            .insert_table(&owner(), Dataset::new("T", ""))
            .await
            .unwrap();
        let view = backend
            .insert_view(&owner(), View::new(&table.id, "Grid", ViewType::Grid))
            .await
            .unwrap();
        let mut sub = backend.subscribe(&table.id);
        let mut other = backend.subscribe("elsewhere");

        backend
            .update_view_rows(&owner(), &view.id, vec![Row::with_id("1")])
            .await
            .unwrap();

        match sub.try_recv() {
            Some(ChangeEvent::ViewRows { rows, .. }) => assert_eq!(rows.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn row_limit_rejects_oversized_writes() {
        let backend = MemoryBackend::new().with_row_limit(1);
        let table = backend
            .insert_table(&owner(), Dataset::new("T", ""))
            .await
            .unwrap();
        let view = backend
            .insert_view(&owner(), View::new(&table.id, "Grid", ViewType::Grid))
            .await
            .unwrap();
        let rows = vec![Row::with_id("1"), Row::with_id("2")];
        assert_eq!(
            backend.update_view_rows(&owner(), &view.id, rows).await,
            Err(BackendError::RowLimitExceeded { limit: 1, rows: 2 })
        );
    }

    #[tokio::test]
    async fn views_cannot_move_between_tables() {
        let backend = MemoryBackend::new();
        let mine = backend
            .insert_table(&owner(), Dataset::new("Mine", ""))
            .await
            .unwrap();
        let theirs = backend
            .insert_table(&guest(), Dataset::new("Theirs", ""))
            .await
            .unwrap();
        let view = backend
            .insert_view(&owner(), View::new(&mine.id, "Grid", ViewType::Grid))
            .await
            .unwrap();

        let mut moved = view.clone();
        moved.table_id = theirs.id.clone();
        assert!(matches!(
            backend.update_view(&owner(), moved).await,
            Err(BackendError::Conflict(_))
        ));
        let stored = backend.get_view(&owner(), &view.id).await.unwrap();
        assert_eq!(stored.table_id, mine.id);
        assert!(backend.list_views(&guest(), &theirs.id).await.unwrap().is_empty());
    }
}
