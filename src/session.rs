//! View-session state.
//!
//! Everything the workspace page tracks between renders lives in one immutable
//! [`SessionState`]. Changes go through [`SessionState::reduce`], which consumes the old state
//! and returns the new one, so any sequence of UI events can be replayed in a test.

use serde::{Deserialize, Serialize};

use crate::pipeline::{DEFAULT_PAGE_SIZE, ViewConfig};
use crate::rules::DateRangeFilter;
use crate::spreadsheet::View;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Panel {
    Filter,
    Sort,
    Group,
    ColorRules,
    CellColorRules,
    Import,
    Share,
    Export,
    ColumnSettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditingCell {
    pub row_id: String,
    pub column_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub active_view_id: Option<String>,
    pub search: String,
    pub page: usize,
    pub page_size: usize,
    pub date_range: Option<DateRangeFilter>,
    pub editing: Option<EditingCell>,
    pub selected_rows: Vec<String>,
    pub open_panel: Option<Panel>,
    pub loading: bool,
    pub importing: bool,
    pub last_error: Option<String>,
    /// Realtime refreshes dropped because a cell was being edited.
    pub suppressed_refreshes: usize,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState {
            active_view_id: None,
            search: String::new(),
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
            date_range: None,
            editing: None,
            selected_rows: Vec::new(),
            open_panel: None,
            loading: false,
            importing: false,
            last_error: None,
            suppressed_refreshes: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionAction {
    SelectView(String),
    SetSearch(String),
    SetPage(usize),
    SetPageSize(usize),
    SetDateRange(Option<DateRangeFilter>),
    BeginEdit { row_id: String, column_id: String },
    EndEdit,
    ToggleRowSelection(String),
    ClearSelection,
    OpenPanel(Panel),
    ClosePanel,
    LoadStarted,
    LoadFinished,
    ImportStarted,
    ImportFinished,
    Failed(String),
    DismissError,
    RealtimeSuppressed,
    RowsRemoved(Vec<String>),
}

impl SessionState {
    pub fn reduce(self, action: SessionAction) -> SessionState {
        use SessionAction::*;
        match action {
            SelectView(id) => SessionState {
                active_view_id: Some(id),
                page: 0,
                editing: None,
                selected_rows: Vec::new(),
                open_panel: None,
                ..self
            },
            // A new query always starts from the first page.
            SetSearch(search) => SessionState {
                search,
                page: 0,
                ..self
            },
            SetPage(page) => SessionState { page, ..self },
            SetPageSize(page_size) => SessionState {
                page_size: page_size.max(1),
                page: 0,
                ..self
            },
            SetDateRange(date_range) => SessionState {
                date_range,
                page: 0,
                ..self
            },
            BeginEdit { row_id, column_id } => SessionState {
                editing: Some(EditingCell { row_id, column_id }),
                ..self
            },
            EndEdit => SessionState {
                editing: None,
                ..self
            },
            ToggleRowSelection(row_id) => {
                let mut selected_rows = self.selected_rows;
                match selected_rows.iter().position(|r| *r == row_id) {
                    Some(i) => {
                        selected_rows.remove(i);
                    }
                    None => selected_rows.push(row_id),
                }
                SessionState {
                    selected_rows,
                    ..self
                }
            }
            ClearSelection => SessionState {
                selected_rows: Vec::new(),
                ..self
            },
            OpenPanel(panel) => SessionState {
                open_panel: Some(panel),
                ..self
            },
            ClosePanel => SessionState {
                open_panel: None,
                ..self
            },
            LoadStarted => SessionState {
                loading: true,
                ..self
            },
            LoadFinished => SessionState {
                loading: false,
                ..self
            },
            ImportStarted => SessionState {
                importing: true,
                last_error: None,
                ..self
            },
            ImportFinished => SessionState {
                importing: false,
                ..self
            },
            Failed(message) => SessionState {
                last_error: Some(message),
                loading: false,
                importing: false,
                ..self
            },
            DismissError => SessionState {
                last_error: None,
                ..self
            },
            RealtimeSuppressed => SessionState {
                suppressed_refreshes: self.suppressed_refreshes + 1,
                ..self
            },
            RowsRemoved(ids) => {
                let editing = self
                    .editing
                    .filter(|e| !ids.iter().any(|id| *id == e.row_id));
                let selected_rows = self
                    .selected_rows
                    .into_iter()
                    .filter(|r| !ids.contains(r))
                    .collect();
                SessionState {
                    editing,
                    selected_rows,
                    ..self
                }
            }
        }
    }

    /// Incoming view refreshes are dropped while any cell of the view is being edited.
    pub fn accepts_realtime(&self) -> bool {
        self.editing.is_none()
    }

    /// Pipeline configuration for `view` under this session.
    pub fn view_config(&self, view: &View) -> ViewConfig {
        ViewConfig {
            search: self.search.clone(),
            page: self.page,
            page_size: self.page_size,
            date_range: self.date_range.clone(),
            ..view.config()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_resets_page() {
        let state = SessionState::default()
            .reduce(SessionAction::SetPage(3))
            .reduce(SessionAction::SetSearch("abc".into()));
        assert_eq!(state.page, 0);
        assert_eq!(state.search, "abc");
    }

    #[test]
    fn editing_blocks_realtime() {
        let state = SessionState::default().reduce(SessionAction::BeginEdit {
            row_id: "r".into(),
            column_id: "c".into(),
        });
        assert!(!state.accepts_realtime());
        assert!(state.reduce(SessionAction::EndEdit).accepts_realtime());
    }

    #[test]
    fn removed_rows_leave_selection_and_edit() {
        let state = SessionState::default()
            .reduce(SessionAction::ToggleRowSelection("a".into()))
            .reduce(SessionAction::ToggleRowSelection("b".into()))
            .reduce(SessionAction::BeginEdit {
                row_id: "a".into(),
                column_id: "c".into(),
            })
            .reduce(SessionAction::RowsRemoved(vec!["a".into()]));
        assert_eq!(state.selected_rows, ["b"]);
        assert!(state.editing.is_none());
    }

    #[test]
    fn toggling_twice_deselects() {
        let state = SessionState::default()
            .reduce(SessionAction::ToggleRowSelection("a".into()))
            .reduce(SessionAction::ToggleRowSelection("a".into()));
        assert!(state.selected_rows.is_empty());
    }

    #[test]
    fn failure_clears_progress_flags() {
        let state = SessionState::default()
            .reduce(SessionAction::ImportStarted)
            .reduce(SessionAction::Failed("boom".into()));
        assert!(!state.importing);
        assert_eq!(state.last_error.as_deref(), Some("boom"));
    }
}
