//! The workspace page: one dataset, its views and the session looking at them.
//!
//! Structural edits are written to the backend first and applied locally once acknowledged,
//! so a failed write leaves the previous state untouched. Cell edits are the exception: they
//! show up locally at once and are written after [`CELL_EDIT_DEBOUNCE`] of quiet on that cell.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::{Backend, BackendError, ChangeEvent, RealtimeSubscription, UserContext};
use crate::cell::{CellValue, ColumnType, Row};
use crate::chart::{self, ChartSeries};
use crate::debounce::{CELL_EDIT_DEBOUNCE, COLOR_RULE_DEBOUNCE, Debouncer};
use crate::pipeline::{self, CellColorMap, PipelineOutput, compute_cell_colors};
use crate::rules::CellColorRule;
use crate::session::{SessionAction, SessionState};
use crate::spreadsheet::{Column, Dataset, SheetError, UndoAction, UndoLog, View, ViewType};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Sheet(#[from] SheetError),
    #[error("No view selected")]
    NoActiveView,
}

/// (view id, row id, column id)
type CellKey = (String, String, String);

struct Shared {
    dataset: Dataset,
    views: Vec<View>,
    session: SessionState,
    cell_colors: HashMap<String, CellColorMap>,
    /// Value a cell had before the first keystroke of a pending edit.
    pending_old: HashMap<CellKey, CellValue>,
}

impl Shared {
    fn dispatch(&mut self, action: SessionAction) {
        self.session = std::mem::take(&mut self.session).reduce(action);
    }

    fn view_mut(&mut self, view_id: &str) -> Result<&mut View, SheetError> {
        self.views
            .iter_mut()
            .find(|v| v.id == view_id)
            .ok_or_else(|| SheetError::ViewNotFound(view_id.to_string()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Rows a view presents: its own, or the first grid's for views that borrow rows.
fn view_rows<'a>(dataset: &'a Dataset, views: &'a [View], view: &'a View) -> &'a [Row] {
    if view.view_type.owns_rows() {
        view.effective_rows(dataset)
    } else {
        chart::source_rows(dataset, views, view)
    }
}

pub struct Workspace<B: Backend> {
    backend: B,
    user: UserContext,
    shared: Arc<Mutex<Shared>>,
    undo: Arc<Mutex<UndoLog>>,
    cell_edits: Debouncer<CellKey>,
    color_refresh: Debouncer<String>,
}

impl<B: Backend> Workspace<B> {
    /// Loads a dataset and its views and selects the first view.
    pub async fn open(backend: B, user: UserContext, table_id: &str) -> Result<Self, WorkspaceError> {
        let dataset = backend.get_table(&user, table_id).await?;
        let mut views = backend.list_views(&user, table_id).await?;
        for view in &mut views {
            if view.adopt_legacy_rows(&dataset) {
                log::debug!("view {} takes over {} legacy rows", view.id, dataset.rows.len());
            }
        }

        let mut session = SessionState::default();
        if let Some(first) = views.first() {
            session = session.reduce(SessionAction::SelectView(first.id.clone()));
        }
        let cell_colors = views
            .iter()
            .map(|v| {
                let rows = view_rows(&dataset, &views, v);
                (
                    v.id.clone(),
                    compute_cell_colors(rows, &dataset.columns, &v.cell_color_rules),
                )
            })
            .collect();
        log::info!(
            "opened table {} ({} views) for {}",
            dataset.id,
            views.len(),
            user.id
        );

        Ok(Workspace {
            backend,
            user,
            shared: Arc::new(Mutex::new(Shared {
                dataset,
                views,
                session,
                cell_colors,
                pending_old: HashMap::new(),
            })),
            undo: Arc::new(Mutex::new(UndoLog::default())),
            cell_edits: Debouncer::new(CELL_EDIT_DEBOUNCE),
            color_refresh: Debouncer::new(COLOR_RULE_DEBOUNCE),
        })
    }

    pub fn dataset(&self) -> Dataset {
        lock(&self.shared).dataset.clone()
    }

    pub fn views(&self) -> Vec<View> {
        lock(&self.shared).views.clone()
    }

    pub fn view(&self, view_id: &str) -> Result<View, WorkspaceError> {
        lock(&self.shared)
            .views
            .iter()
            .find(|v| v.id == view_id)
            .cloned()
            .ok_or_else(|| SheetError::ViewNotFound(view_id.to_string()).into())
    }

    pub fn session(&self) -> SessionState {
        lock(&self.shared).session.clone()
    }

    pub fn dispatch(&self, action: SessionAction) {
        lock(&self.shared).dispatch(action);
    }

    pub fn undo_len(&self) -> usize {
        lock(&self.undo).len()
    }

    /// Cell edits still waiting for their debounce window.
    pub fn pending_edits(&self) -> usize {
        self.cell_edits.pending_count()
    }

    pub fn cell_colors(&self, view_id: &str) -> CellColorMap {
        lock(&self.shared)
            .cell_colors
            .get(view_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Evaluates the active view under the current session.
    pub fn render(&self) -> Result<PipelineOutput, WorkspaceError> {
        let shared = lock(&self.shared);
        let view_id = shared
            .session
            .active_view_id
            .clone()
            .ok_or(WorkspaceError::NoActiveView)?;
        let view = shared
            .views
            .iter()
            .find(|v| v.id == view_id)
            .ok_or_else(|| SheetError::ViewNotFound(view_id.clone()))?;
        let rows = view_rows(&shared.dataset, &shared.views, view);
        let config = shared.session.view_config(view);
        let cell_colors = match shared.cell_colors.get(&view_id) {
            Some(colors) => colors.clone(),
            None => compute_cell_colors(rows, &shared.dataset.columns, &view.cell_color_rules),
        };
        Ok(pipeline::run_with_cell_colors(
            rows,
            &shared.dataset.columns,
            &config,
            cell_colors,
        ))
    }

    pub fn chart_series(&self, view_id: &str) -> Result<ChartSeries, WorkspaceError> {
        let shared = lock(&self.shared);
        let view = shared
            .views
            .iter()
            .find(|v| v.id == view_id)
            .ok_or_else(|| SheetError::ViewNotFound(view_id.to_string()))?;
        let config = view.chart_config.clone().unwrap_or_default();
        Ok(chart::build_series(
            view_rows(&shared.dataset, &shared.views, view),
            &config,
        ))
    }

    fn fail(&self, context: &str, error: &impl Display) {
        log::warn!("{} failed: {}", context, error);
        self.dispatch(SessionAction::Failed(error.to_string()));
    }

    async fn write_rows(&self, view_id: &str, rows: Vec<Row>, context: &str) -> Result<(), WorkspaceError> {
        self.backend
            .update_view_rows(&self.user, view_id, rows)
            .await
            .map_err(|e| {
                self.fail(context, &e);
                e.into()
            })
    }

    async fn write_schema(&self, dataset: &Dataset, views: &[View]) -> Result<(), BackendError> {
        self.backend
            .update_columns(&self.user, &dataset.id, dataset.columns.clone())
            .await?;
        for view in views {
            self.backend.update_view(&self.user, view.clone()).await?;
        }
        Ok(())
    }

    fn refresh_colors(&self, view_id: &str) {
        let shared = Arc::clone(&self.shared);
        let target = view_id.to_string();
        self.color_refresh.schedule(view_id.to_string(), async move {
            let mut guard = lock(&shared);
            let shared = &mut *guard;
            if let Some(view) = shared.views.iter().find(|v| v.id == target) {
                let rows = view_rows(&shared.dataset, &shared.views, view);
                let colors = compute_cell_colors(rows, &shared.dataset.columns, &view.cell_color_rules);
                shared.cell_colors.insert(target, colors);
            }
        });
    }

    pub fn select_view(&self, view_id: &str) -> Result<(), WorkspaceError> {
        let mut shared = lock(&self.shared);
        if !shared.views.iter().any(|v| v.id == view_id) {
            return Err(SheetError::ViewNotFound(view_id.to_string()).into());
        }
        shared.dispatch(SessionAction::SelectView(view_id.to_string()));
        Ok(())
    }

    pub async fn create_view(&self, name: &str, view_type: ViewType) -> Result<View, WorkspaceError> {
        let (table_id, visible_columns) = {
            let shared = lock(&self.shared);
            let columns = shared.dataset.columns.iter().map(|c| c.id.clone()).collect();
            (shared.dataset.id.clone(), columns)
        };
        let mut view = View::new(&table_id, name, view_type);
        view.visible_columns = visible_columns;
        let view = self
            .backend
            .insert_view(&self.user, view)
            .await
            .inspect_err(|e| self.fail("creating view", e))?;
        let mut shared = lock(&self.shared);
        let mut local = view.clone();
        local.adopt_legacy_rows(&shared.dataset);
        shared.views.push(local);
        Ok(view)
    }

    pub async fn delete_view(&self, view_id: &str) -> Result<(), WorkspaceError> {
        self.backend
            .delete_view(&self.user, view_id)
            .await
            .inspect_err(|e| self.fail("deleting view", e))?;
        let mut shared = lock(&self.shared);
        remove_view(&mut shared, view_id);
        Ok(())
    }

    pub async fn add_row(&self, view_id: &str) -> Result<Row, WorkspaceError> {
        let mut view = self.view(view_id)?;
        let row = view.add_row();
        self.write_rows(view_id, view.rows, "adding row").await?;

        lock(&self.shared)
            .view_mut(view_id)?
            .insert_row(usize::MAX, row.clone());
        lock(&self.undo).record(UndoAction::RowAdd {
            view_id: view_id.to_string(),
            row_id: row.id.clone(),
        });
        self.refresh_colors(view_id);
        Ok(row)
    }

    pub async fn delete_row(&self, view_id: &str, row_id: &str) -> Result<Row, WorkspaceError> {
        let mut view = self.view(view_id)?;
        let (index, row) = view.delete_row(row_id)?;
        self.write_rows(view_id, view.rows, "deleting row").await?;

        {
            let mut shared = lock(&self.shared);
            // The row may already be gone through a realtime refresh.
            let _ = shared.view_mut(view_id)?.delete_row(row_id);
            shared.dispatch(SessionAction::RowsRemoved(vec![row_id.to_string()]));
        }
        lock(&self.undo).record(UndoAction::RowDelete {
            view_id: view_id.to_string(),
            index,
            row: row.clone(),
        });
        self.refresh_colors(view_id);
        Ok(row)
    }

    pub async fn set_row_color(
        &self,
        view_id: &str,
        row_id: &str,
        color: Option<String>,
    ) -> Result<(), WorkspaceError> {
        let mut view = self.view(view_id)?;
        view.set_row_color(row_id, color.clone())?;
        self.write_rows(view_id, view.rows, "setting row color").await?;
        lock(&self.shared)
            .view_mut(view_id)?
            .set_row_color(row_id, color)?;
        Ok(())
    }

    /// Adds a column to the dataset and shows it in every view that owns rows.
    pub async fn add_column(&self, name: &str, column_type: ColumnType) -> Result<Column, WorkspaceError> {
        let (mut dataset, mut views) = {
            let shared = lock(&self.shared);
            (shared.dataset.clone(), shared.views.clone())
        };
        let column = dataset.add_column(name, column_type);
        for view in views.iter_mut().filter(|v| v.view_type.owns_rows()) {
            view.show_column(&column.id);
        }
        self.write_schema(&dataset, &views)
            .await
            .inspect_err(|e| self.fail("adding column", e))?;

        {
            let mut shared = lock(&self.shared);
            shared.dataset.columns = dataset.columns.clone();
            for view in &views {
                if let Ok(local) = shared.view_mut(&view.id) {
                    local.visible_columns = view.visible_columns.clone();
                }
            }
        }
        lock(&self.undo).record(UndoAction::ColumnAdd {
            table_id: dataset.id.clone(),
            column_id: column.id.clone(),
        });
        Ok(column)
    }

    /// Deletes a column from the dataset and from every one of its views.
    pub async fn delete_column(&self, column_id: &str) -> Result<Column, WorkspaceError> {
        let (mut dataset, mut views) = {
            let shared = lock(&self.shared);
            (shared.dataset.clone(), shared.views.clone())
        };
        let column = dataset.delete_column(&mut views, column_id)?;
        self.write_schema(&dataset, &views)
            .await
            .inspect_err(|e| self.fail("deleting column", e))?;

        let view_ids: Vec<String> = views.iter().map(|v| v.id.clone()).collect();
        {
            let mut shared = lock(&self.shared);
            shared.dataset = dataset;
            shared.views = views;
            shared.pending_old.retain(|(_, _, c), _| c != column_id);
        }
        for view_id in &view_ids {
            self.refresh_colors(view_id);
        }
        Ok(column)
    }

    pub async fn rename_column(&self, column_id: &str, name: &str) -> Result<(), WorkspaceError> {
        let mut dataset = self.dataset();
        dataset.rename_column(column_id, name)?;
        self.backend
            .update_columns(&self.user, &dataset.id, dataset.columns.clone())
            .await
            .inspect_err(|e| self.fail("renaming column", e))?;
        lock(&self.shared).dataset.columns = dataset.columns;
        Ok(())
    }

    /// Writes a cell locally and schedules the backend write.
    ///
    /// Keystrokes on the same cell within [`CELL_EDIT_DEBOUNCE`] collapse into one write and
    /// one undo entry. Must be called from within a tokio runtime.
    pub fn edit_cell(
        &self,
        view_id: &str,
        row_id: &str,
        column_id: &str,
        raw: &str,
    ) -> Result<(), WorkspaceError> {
        let key: CellKey = (view_id.to_string(), row_id.to_string(), column_id.to_string());
        {
            let mut guard = lock(&self.shared);
            let shared = &mut *guard;
            let column_type = shared
                .dataset
                .column(column_id)
                .map(|c| c.column_type)
                .unwrap_or_default();
            let value = CellValue::from_input(raw, column_type);
            let old = shared.view_mut(view_id)?.edit_cell(row_id, column_id, value)?;
            shared.pending_old.entry(key.clone()).or_insert(old);
        }

        let backend = self.backend.clone();
        let user = self.user.clone();
        let shared = Arc::clone(&self.shared);
        let undo = Arc::clone(&self.undo);
        self.cell_edits.schedule(key.clone(), async move {
            let (view_id, row_id, column_id) = key;
            let (old, rows, new) = {
                let mut guard = lock(&shared);
                let old = guard
                    .pending_old
                    .remove(&(view_id.clone(), row_id.clone(), column_id.clone()));
                let Some(view) = guard.views.iter().find(|v| v.id == view_id) else {
                    return;
                };
                let new = view
                    .row(&row_id)
                    .map(|r| r.get(&column_id).clone())
                    .unwrap_or_default();
                (old, view.rows.clone(), new)
            };

            match backend.update_view_rows(&user, &view_id, rows).await {
                Ok(()) => {
                    if let Some(old) = old.filter(|old| *old != new) {
                        lock(&undo).record(UndoAction::CellEdit {
                            view_id,
                            row_id,
                            column_id,
                            old,
                            new,
                        });
                    }
                }
                Err(e) => {
                    log::warn!("saving cell {}/{} failed: {}", row_id, column_id, e);
                    lock(&shared).dispatch(SessionAction::Failed(e.to_string()));
                }
            }
        });
        self.refresh_colors(view_id);
        Ok(())
    }

    /// Applies `change` to a view's configuration and saves it. Rows are left alone.
    pub async fn configure_view<F>(&self, view_id: &str, change: F) -> Result<View, WorkspaceError>
    where
        F: FnOnce(&mut View),
    {
        let mut view = self.view(view_id)?;
        change(&mut view);
        self.backend
            .update_view(&self.user, view.clone())
            .await
            .inspect_err(|e| self.fail("saving view", e))?;
        {
            let mut shared = lock(&self.shared);
            let local = shared.view_mut(view_id)?;
            let rows = std::mem::take(&mut local.rows);
            *local = view.clone();
            local.rows = rows;
        }
        self.refresh_colors(view_id);
        Ok(view)
    }

    /// Saves new cell color rules. The color map follows after [`COLOR_RULE_DEBOUNCE`].
    pub async fn set_cell_color_rules(
        &self,
        view_id: &str,
        rules: Vec<CellColorRule>,
    ) -> Result<(), WorkspaceError> {
        self.configure_view(view_id, |v| v.cell_color_rules = rules)
            .await
            .map(|_| ())
    }

    /// Reverts the most recent acknowledged action and writes the result.
    ///
    /// Returns `None` when there is nothing to undo. A failed write puts the action back.
    pub async fn undo(&self) -> Result<Option<UndoAction>, WorkspaceError> {
        let Some(action) = lock(&self.undo).pop() else {
            return Ok(None);
        };
        let (mut dataset, mut views) = {
            let shared = lock(&self.shared);
            (shared.dataset.clone(), shared.views.clone())
        };
        if let Err(e) = action.revert(&mut dataset, &mut views) {
            self.fail("undo", &e);
            return Err(e.into());
        }

        let written = match action.view_id() {
            Some(view_id) => {
                let rows = views
                    .iter()
                    .find(|v| v.id == view_id)
                    .map(|v| v.rows.clone())
                    .unwrap_or_default();
                self.backend.update_view_rows(&self.user, view_id, rows).await
            }
            None => self.write_schema(&dataset, &views).await,
        };
        if let Err(e) = written {
            lock(&self.undo).record(action);
            self.fail("undo", &e);
            return Err(e.into());
        }

        let affected: Vec<String> = {
            let mut shared = lock(&self.shared);
            match action.view_id() {
                Some(view_id) => {
                    if let Some(reverted) = views.into_iter().find(|v| v.id == view_id) {
                        shared.view_mut(view_id)?.rows = reverted.rows;
                    }
                    if let UndoAction::RowAdd { row_id, .. } = &action {
                        shared.dispatch(SessionAction::RowsRemoved(vec![row_id.clone()]));
                    }
                    vec![view_id.to_string()]
                }
                None => {
                    let ids = views.iter().map(|v| v.id.clone()).collect();
                    shared.dataset = dataset;
                    shared.views = views;
                    ids
                }
            }
        };
        for view_id in &affected {
            self.refresh_colors(view_id);
        }
        log::debug!("undid {:?}", action);
        Ok(Some(action))
    }

    /// Applies a realtime event. Returns whether local state changed.
    ///
    /// View refreshes are dropped while any cell is being edited. Must be called from within
    /// a tokio runtime.
    pub fn apply_change(&self, event: ChangeEvent) -> bool {
        let mut shared = lock(&self.shared);
        match event {
            ChangeEvent::TableColumns { columns, .. } => {
                shared.dataset.columns = columns;
                true
            }
            ChangeEvent::ViewDeleted { view_id, .. } => {
                remove_view(&mut shared, &view_id);
                true
            }
            _ if !shared.session.accepts_realtime() => {
                shared.dispatch(SessionAction::RealtimeSuppressed);
                false
            }
            ChangeEvent::ViewRows { view_id, rows, .. } => {
                let Ok(view) = shared.view_mut(&view_id) else {
                    return false;
                };
                let removed: Vec<String> = view
                    .rows
                    .iter()
                    .filter(|old| !rows.iter().any(|r| r.id == old.id))
                    .map(|old| old.id.clone())
                    .collect();
                view.rows = rows;
                if !removed.is_empty() {
                    shared.dispatch(SessionAction::RowsRemoved(removed));
                }
                drop(shared);
                self.refresh_colors(&view_id);
                true
            }
            ChangeEvent::ViewUpdated { mut view, .. } => {
                let view_id = view.id.clone();
                view.adopt_legacy_rows(&shared.dataset);
                match shared.view_mut(&view_id) {
                    Ok(local) => *local = *view,
                    Err(_) => shared.views.push(*view),
                }
                drop(shared);
                self.refresh_colors(&view_id);
                true
            }
        }
    }

    pub fn subscribe(&self) -> RealtimeSubscription {
        let table_id = lock(&self.shared).dataset.id.clone();
        self.backend.subscribe(&table_id)
    }

    /// Applies events from `subscription` until the backend closes the channel.
    pub async fn follow(&self, mut subscription: RealtimeSubscription) {
        while let Some(event) = subscription.recv().await {
            self.apply_change(event);
        }
    }
}

fn remove_view(shared: &mut Shared, view_id: &str) {
    shared.views.retain(|v| v.id != view_id);
    shared.cell_colors.remove(view_id);
    if shared.session.active_view_id.as_deref() == Some(view_id) {
        match shared.views.first().map(|v| v.id.clone()) {
            Some(next) => shared.dispatch(SessionAction::SelectView(next)),
            None => shared.session.active_view_id = None,
        }
    }
}
