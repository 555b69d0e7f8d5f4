use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cell::{CellValue, ColumnType, Row};
use crate::chart::{ChartConfig, DashboardWidget};
use crate::pipeline::ViewConfig;
use crate::rules::{CellColorRule, ColorRule, ColumnHighlight, FilterRule, SortRule};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SheetError {
    #[error("Column not found: {0}")]
    ColumnNotFound(String),
    #[error("Column already exists: {0}")]
    DuplicateColumn(String),
    #[error("Row not found: {0}")]
    RowNotFound(String),
    #[error("View not found: {0}")]
    ViewNotFound(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
}

impl Column {
    pub fn new(id: &str, name: &str, column_type: ColumnType) -> Self {
        Column {
            id: id.to_string(),
            name: name.to_string(),
            column_type,
            width: None,
        }
    }

    pub fn text(id: &str, name: &str) -> Self {
        Self::new(id, name, ColumnType::Text)
    }
}

/// A user's table: the column schema shared by all of its views.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    /// Rows stored on the table itself, read only while no grid view owns any rows.
    #[serde(default)]
    pub rows: Vec<Row>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dataset {
    pub fn new(name: &str, owner_id: &str) -> Self {
        let now = Utc::now();
        Dataset {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            owner_id: owner_id.to_string(),
            columns: Vec::new(),
            rows: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn column(&self, column_id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == column_id)
    }

    /// Appends a column with a freshly generated id.
    pub fn add_column(&mut self, name: &str, column_type: ColumnType) -> Column {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let column = Column::new(&format!("col_{}", &suffix[..12]), name, column_type);
        self.columns.push(column.clone());
        self.updated_at = Utc::now();
        column
    }

    pub fn insert_column(&mut self, column: Column) -> Result<(), SheetError> {
        if self.column(&column.id).is_some() {
            return Err(SheetError::DuplicateColumn(column.id));
        }
        self.columns.push(column);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Adds a text column for every key not already present, keeping the given order.
    /// Returns the columns that were added.
    pub fn upsert_columns(&mut self, keys: &[String]) -> Vec<Column> {
        let mut added = Vec::new();
        for key in keys {
            if self.column(key).is_none() {
                let column = Column::text(key, key);
                self.columns.push(column.clone());
                added.push(column);
            }
        }
        if !added.is_empty() {
            self.updated_at = Utc::now();
        }
        added
    }

    pub fn rename_column(&mut self, column_id: &str, name: &str) -> Result<(), SheetError> {
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.id == column_id)
            .ok_or_else(|| SheetError::ColumnNotFound(column_id.to_string()))?;
        column.name = name.to_string();
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Deletes a column and purges it from every view of this dataset.
    ///
    /// This is the one edit that crosses owners: the dataset drops the column definition and
    /// each view drops the key from every row, from `visible_columns` and from any rule that
    /// points at it.
    pub fn delete_column(
        &mut self,
        views: &mut [View],
        column_id: &str,
    ) -> Result<Column, SheetError> {
        let index = self
            .columns
            .iter()
            .position(|c| c.id == column_id)
            .ok_or_else(|| SheetError::ColumnNotFound(column_id.to_string()))?;
        let column = self.columns.remove(index);
        for row in &mut self.rows {
            row.remove(column_id);
        }
        for view in views.iter_mut().filter(|v| v.table_id == self.id) {
            view.purge_column(column_id);
        }
        self.updated_at = Utc::now();
        Ok(column)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewType {
    #[default]
    Grid,
    Chart,
    Dashboard,
    Returns,
    Kanban,
    Calendar,
    #[serde(other)]
    Other,
}

impl ViewType {
    /// Whether the view keeps its own row set. Chart views borrow the rows of the first grid.
    pub fn owns_rows(self) -> bool {
        !matches!(self, ViewType::Chart)
    }
}

/// One sheet of a dataset. Owns its rows and its formatting rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub id: String,
    pub table_id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub view_type: ViewType,
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default)]
    pub visible_columns: Vec<String>,
    #[serde(default)]
    pub filters: Vec<FilterRule>,
    #[serde(default)]
    pub sorts: Vec<SortRule>,
    #[serde(default)]
    pub color_rules: Vec<ColorRule>,
    #[serde(default)]
    pub group_by: Option<String>,
    #[serde(default)]
    pub cell_color_rules: Vec<CellColorRule>,
    #[serde(default)]
    pub column_highlights: Vec<ColumnHighlight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_config: Option<ChartConfig>,
    #[serde(default)]
    pub dashboard_widgets: Vec<DashboardWidget>,
    pub created_at: DateTime<Utc>,
}

impl View {
    pub fn new(table_id: &str, name: &str, view_type: ViewType) -> Self {
        View {
            id: uuid::Uuid::new_v4().to_string(),
            table_id: table_id.to_string(),
            name: name.to_string(),
            view_type,
            rows: Vec::new(),
            visible_columns: Vec::new(),
            filters: Vec::new(),
            sorts: Vec::new(),
            color_rules: Vec::new(),
            group_by: None,
            cell_color_rules: Vec::new(),
            column_highlights: Vec::new(),
            chart_config: None,
            dashboard_widgets: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// The rows this view presents, falling back to the dataset's legacy rows.
    pub fn effective_rows<'a>(&'a self, dataset: &'a Dataset) -> &'a [Row] {
        if self.rows.is_empty() && !dataset.rows.is_empty() {
            &dataset.rows
        } else {
            &self.rows
        }
    }

    /// Copies the dataset's legacy rows into a row-owning view that has none of its own, so
    /// row edits address what the view presents. Returns whether anything was copied.
    pub fn adopt_legacy_rows(&mut self, dataset: &Dataset) -> bool {
        if !self.view_type.owns_rows() || !self.rows.is_empty() || dataset.rows.is_empty() {
            return false;
        }
        self.rows = dataset.rows.clone();
        true
    }

    /// Persisted toolbar state as a pipeline configuration. Search and paging are session
    /// state and start out empty.
    pub fn config(&self) -> ViewConfig {
        ViewConfig {
            filters: self.filters.clone(),
            sorts: self.sorts.clone(),
            group_by: self.group_by.clone(),
            color_rules: self.color_rules.clone(),
            cell_color_rules: self.cell_color_rules.clone(),
            ..Default::default()
        }
    }

    pub fn row(&self, row_id: &str) -> Option<&Row> {
        self.rows.iter().find(|r| r.id == row_id)
    }

    pub fn row_index(&self, row_id: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.id == row_id)
    }

    /// Appends an empty row with a new id.
    pub fn add_row(&mut self) -> Row {
        let mut row = Row::new();
        for column_id in &self.visible_columns {
            row.set(column_id, CellValue::Text(String::new()));
        }
        self.rows.push(row.clone());
        row
    }

    /// Puts a row back at `index` (clamped). Ids stay unique: a row with the same id is
    /// replaced in place instead.
    pub fn insert_row(&mut self, index: usize, row: Row) {
        if let Some(existing) = self.rows.iter_mut().find(|r| r.id == row.id) {
            *existing = row;
            return;
        }
        let index = index.min(self.rows.len());
        self.rows.insert(index, row);
    }

    pub fn delete_row(&mut self, row_id: &str) -> Result<(usize, Row), SheetError> {
        let index = self
            .row_index(row_id)
            .ok_or_else(|| SheetError::RowNotFound(row_id.to_string()))?;
        Ok((index, self.rows.remove(index)))
    }

    /// Writes one cell, returning the previous value.
    pub fn edit_cell(
        &mut self,
        row_id: &str,
        column_id: &str,
        value: CellValue,
    ) -> Result<CellValue, SheetError> {
        let row = self
            .rows
            .iter_mut()
            .find(|r| r.id == row_id)
            .ok_or_else(|| SheetError::RowNotFound(row_id.to_string()))?;
        Ok(row.set(column_id, value))
    }

    pub fn set_row_color(&mut self, row_id: &str, color: Option<String>) -> Result<(), SheetError> {
        let row = self
            .rows
            .iter_mut()
            .find(|r| r.id == row_id)
            .ok_or_else(|| SheetError::RowNotFound(row_id.to_string()))?;
        row.row_color = color;
        Ok(())
    }

    pub fn show_column(&mut self, column_id: &str) {
        if !self.visible_columns.iter().any(|c| c == column_id) {
            self.visible_columns.push(column_id.to_string());
        }
    }

    /// Removes every trace of a column from this view.
    pub fn purge_column(&mut self, column_id: &str) {
        for row in &mut self.rows {
            row.remove(column_id);
        }
        self.visible_columns.retain(|c| c != column_id);
        self.filters.retain(|f| f.column_id != column_id);
        self.sorts.retain(|s| s.column_id != column_id);
        self.color_rules.retain(|r| r.column_id != column_id);
        self.cell_color_rules.retain(|r| r.column_id != column_id);
        self.column_highlights.retain(|h| h.column_id != column_id);
        if self.group_by.as_deref() == Some(column_id) {
            self.group_by = None;
        }
        if let Some(chart) = &mut self.chart_config {
            chart.forget_column(column_id);
        }
        self.dashboard_widgets
            .retain(|w| w.column_id.as_deref() != Some(column_id));
    }
}

/// Named container of datasets. Folders do not nest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    #[serde(default)]
    pub table_ids: Vec<String>,
}

impl Folder {
    pub fn new(name: &str, owner_id: &str) -> Self {
        Folder {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            owner_id: owner_id.to_string(),
            table_ids: Vec::new(),
        }
    }
}

/// Folder shared with a list of collaborators by email. Its datasets are the
/// `shared_folder_items` rows pointing at it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SharedFolder {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    #[serde(default)]
    pub member_emails: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SharedFolderItem {
    pub folder_id: String,
    pub table_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharePermission {
    #[default]
    View,
    Edit,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableShare {
    pub table_id: String,
    pub shared_with_email: String,
    #[serde(default)]
    pub permission: SharePermission,
}

/// An acknowledged edit that can be reverted.
#[derive(Clone, Debug, PartialEq)]
pub enum UndoAction {
    CellEdit {
        view_id: String,
        row_id: String,
        column_id: String,
        old: CellValue,
        new: CellValue,
    },
    RowAdd {
        view_id: String,
        row_id: String,
    },
    RowDelete {
        view_id: String,
        index: usize,
        row: Row,
    },
    ColumnAdd {
        table_id: String,
        column_id: String,
    },
}

impl UndoAction {
    /// Applies the inverse of this action to local state. The caller persists the result.
    pub fn revert(&self, dataset: &mut Dataset, views: &mut [View]) -> Result<(), SheetError> {
        match self {
            UndoAction::CellEdit {
                view_id,
                row_id,
                column_id,
                old,
                ..
            } => {
                find_view(views, view_id)?.edit_cell(row_id, column_id, old.clone())?;
            }
            UndoAction::RowAdd { view_id, row_id } => {
                find_view(views, view_id)?.delete_row(row_id)?;
            }
            UndoAction::RowDelete { view_id, index, row } => {
                find_view(views, view_id)?.insert_row(*index, row.clone());
            }
            UndoAction::ColumnAdd { column_id, .. } => {
                dataset.delete_column(views, column_id)?;
            }
        }
        Ok(())
    }

    /// View whose rows change when this action is reverted, if any.
    pub fn view_id(&self) -> Option<&str> {
        match self {
            UndoAction::CellEdit { view_id, .. }
            | UndoAction::RowAdd { view_id, .. }
            | UndoAction::RowDelete { view_id, .. } => Some(view_id),
            UndoAction::ColumnAdd { .. } => None,
        }
    }
}

fn find_view<'a>(views: &'a mut [View], view_id: &str) -> Result<&'a mut View, SheetError> {
    views
        .iter_mut()
        .find(|v| v.id == view_id)
        .ok_or_else(|| SheetError::ViewNotFound(view_id.to_string()))
}

/// Client-local LIFO of acknowledged actions. There is no redo.
#[derive(Clone, Debug, Default)]
pub struct UndoLog {
    actions: Vec<UndoAction>,
}

impl UndoLog {
    pub fn record(&mut self, action: UndoAction) {
        self.actions.push(action);
    }

    pub fn pop(&mut self) -> Option<UndoAction> {
        self.actions.pop()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_delete_row() {
        let mut view = View::new("t", "Sheet 1", ViewType::Grid);
        view.visible_columns = vec!["a".into()];
        let row = view.add_row();
        assert_eq!(view.rows.len(), 1);
        assert!(view.rows[0].has_column("a"));
        let (index, removed) = view.delete_row(&row.id).unwrap();
        assert_eq!(index, 0);
        assert_eq!(removed.id, row.id);
        assert_eq!(
            view.delete_row(&row.id),
            Err(SheetError::RowNotFound(row.id.clone()))
        );
    }

    #[test]
    fn upsert_columns_skips_existing() {
        let mut dataset = Dataset::new("Sales", "u1");
        dataset.insert_column(Column::text("name", "Name")).unwrap();
        let added = dataset.upsert_columns(&["name".into(), "qty".into()]);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].id, "qty");
        assert_eq!(dataset.columns.len(), 2);
        assert_eq!(
            dataset.insert_column(Column::text("qty", "Qty")),
            Err(SheetError::DuplicateColumn("qty".into()))
        );
    }

    #[test]
    fn undo_log_is_lifo() {
        let mut log = UndoLog::default();
        log.record(UndoAction::RowAdd {
            view_id: "v".into(),
            row_id: "1".into(),
        });
        log.record(UndoAction::RowAdd {
            view_id: "v".into(),
            row_id: "2".into(),
        });
        assert_eq!(log.len(), 2);
        match log.pop() {
            Some(UndoAction::RowAdd { row_id, .. }) => assert_eq!(row_id, "2"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn legacy_rows_are_used_when_view_is_empty() {
        let mut dataset = Dataset::new("Old", "u1");
        dataset.rows.push(Row::with_id("legacy"));
        let view = View::new(&dataset.id, "Grid", ViewType::Grid);
        assert_eq!(view.effective_rows(&dataset)[0].id, "legacy");
    }

    #[test]
    fn only_empty_row_owning_views_adopt_legacy_rows() {
        let mut dataset = Dataset::new("Old", "u1");
        dataset.rows.push(Row::with_id("legacy"));

        let mut grid = View::new(&dataset.id, "Grid", ViewType::Grid);
        assert!(grid.adopt_legacy_rows(&dataset));
        assert_eq!(grid.row_index("legacy"), Some(0));
        assert!(!grid.adopt_legacy_rows(&dataset));

        let mut chart = View::new(&dataset.id, "Chart", ViewType::Chart);
        assert!(!chart.adopt_legacy_rows(&dataset));
        assert!(chart.rows.is_empty());

        let mut own = View::new(&dataset.id, "Own", ViewType::Grid);
        own.rows.push(Row::with_id("mine"));
        assert!(!own.adopt_legacy_rows(&dataset));
        assert_eq!(own.rows.len(), 1);
    }
}
