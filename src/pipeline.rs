//! Row view pipeline.
//!
//! Turns a view's raw rows plus the toolbar configuration into what the grid renders:
//! search → rule filters → date range → sort → group → row colors → pagination, with the
//! cell color map computed up front because cell-color filters read it.
//!
//! The pipeline is pure and total. Unknown operators and references to columns the dataset
//! does not have are misses, never errors.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cell::Row;
use crate::rules::{
    CellColorRule, ColorRule, DateRangeFilter, FilterRule, SortRule,
};
use crate::spreadsheet::Column;

/// Group key for rows whose group-by value is missing or empty.
pub const UNGROUPED: &str = "Ungrouped";
/// Row color when no override or rule applies.
pub const TRANSPARENT: &str = "transparent";
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Everything the toolbar contributes to one evaluation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewConfig {
    pub filters: Vec<FilterRule>,
    pub date_range: Option<DateRangeFilter>,
    pub sorts: Vec<SortRule>,
    pub group_by: Option<String>,
    pub color_rules: Vec<ColorRule>,
    pub cell_color_rules: Vec<CellColorRule>,
    pub search: String,
    pub page: usize,
    pub page_size: usize,
}

/// Resolved cell colors, row id → column id → color.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellColorMap(IndexMap<String, IndexMap<String, String>>);

impl CellColorMap {
    pub fn get(&self, row_id: &str, column_id: &str) -> Option<&str> {
        self.0
            .get(row_id)
            .and_then(|cells| cells.get(column_id))
            .map(String::as_str)
    }

    /// Sets the color unless the cell already has one.
    pub fn insert_if_absent(&mut self, row_id: &str, column_id: &str, color: &str) {
        self.0
            .entry(row_id.to_string())
            .or_default()
            .entry(column_id.to_string())
            .or_insert_with(|| color.to_string());
    }

    pub fn row(&self, row_id: &str) -> Option<&IndexMap<String, String>> {
        self.0.get(row_id)
    }

    pub fn len(&self) -> usize {
        self.0.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowGroup {
    /// Stringified group-by value; empty for the implicit group when nothing is grouped.
    pub key: String,
    /// Rows of the requested page.
    pub rows: Vec<Row>,
    /// Size of the group before pagination.
    pub total: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    pub groups: Vec<RowGroup>,
    pub grouped: bool,
    /// Row id → background color for every row that survived filtering.
    pub row_colors: IndexMap<String, String>,
    pub cell_colors: CellColorMap,
    pub total_rows: usize,
    pub total_pages: usize,
    pub page: usize,
    pub page_size: usize,
}

impl PipelineOutput {
    /// Rows of the current page across all groups, in render order.
    pub fn visible_rows(&self) -> impl Iterator<Item = &Row> {
        self.groups.iter().flat_map(|g| g.rows.iter())
    }
}

fn column_known(columns: &[Column], column_id: &str) -> bool {
    columns.is_empty() || columns.iter().any(|c| c.id == column_id)
}

/// Evaluates every enabled cell color rule against every row.
///
/// Rules are tried in list order and the first one that matches a cell wins, the same
/// precedence row color rules use.
pub fn compute_cell_colors(
    rows: &[Row],
    columns: &[Column],
    rules: &[CellColorRule],
) -> CellColorMap {
    let mut map = CellColorMap::default();
    let active: Vec<&CellColorRule> = rules
        .iter()
        .filter(|r| r.enabled && column_known(columns, &r.column_id))
        .collect();
    if active.is_empty() {
        return map;
    }
    for row in rows {
        for rule in &active {
            if rule.matches(row) {
                map.insert_if_absent(&row.id, &rule.column_id, &rule.color);
            }
        }
    }
    map
}

/// Color of a cell as the user sees it: rule output first, then the color captured at import.
pub fn effective_cell_color<'a>(
    row: &'a Row,
    column_id: &str,
    cell_colors: &'a CellColorMap,
) -> Option<&'a str> {
    cell_colors
        .get(&row.id, column_id)
        .or_else(|| row.cell_colors.get(column_id).map(String::as_str))
}

fn matches_cell_color(row: &Row, rule: &FilterRule, cell_colors: &CellColorMap) -> bool {
    let (column, color) = rule.cell_color_target();
    let wanted = color.trim().to_lowercase();
    if wanted.is_empty() {
        return false;
    }
    let same = |c: Option<&str>| c.is_some_and(|c| c.trim().to_lowercase() == wanted);
    match column {
        Some(column_id) => same(effective_cell_color(row, column_id, cell_colors)),
        None => {
            let ruled = cell_colors
                .row(&row.id)
                .is_some_and(|cells| cells.values().any(|c| same(Some(c))));
            ruled
                || row
                    .cell_colors
                    .keys()
                    .any(|col| same(effective_cell_color(row, col, cell_colors)))
        }
    }
}

/// Stage 1: a row passes when every rule matches.
pub fn passes_filters(
    row: &Row,
    filters: &[FilterRule],
    columns: &[Column],
    cell_colors: &CellColorMap,
) -> bool {
    filters.iter().all(|rule| {
        if rule.targets_cell_color() {
            return matches_cell_color(row, rule, cell_colors);
        }
        column_known(columns, &rule.column_id)
            && rule.operator.evaluate(row.get(&rule.column_id), &rule.value)
    })
}

/// Free-text search over every value of the row.
pub fn matches_search(row: &Row, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    query.is_empty() || row.values.values().any(|v| v.lower_text().contains(&query))
}

/// Stage 2: stable multi-key sort. Rules are tried in order until one separates the pair.
pub fn sort_rows(rows: &mut [Row], sorts: &[SortRule], columns: &[Column]) {
    let sorts: Vec<&SortRule> = sorts
        .iter()
        .filter(|s| column_known(columns, &s.column_id))
        .collect();
    if sorts.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        sorts
            .iter()
            .map(|rule| rule.compare(a, b))
            .find(|ord| ord.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Stage 3: partition by the stringified value of `group_by`, groups in first-seen order.
pub fn group_rows(rows: Vec<Row>, group_by: Option<&str>) -> IndexMap<String, Vec<Row>> {
    let mut groups: IndexMap<String, Vec<Row>> = IndexMap::new();
    match group_by {
        Some(column_id) => {
            for row in rows {
                let value = row.get(column_id);
                let key = if value.is_empty() {
                    UNGROUPED.to_string()
                } else {
                    value.to_text()
                };
                groups.entry(key).or_default().push(row);
            }
        }
        None => {
            groups.insert(String::new(), rows);
        }
    }
    groups
}

/// Stage 4 (row path): manual override, else the first matching rule, else transparent.
pub fn row_color(row: &Row, rules: &[ColorRule], columns: &[Column]) -> String {
    if let Some(color) = row.row_color.as_deref().filter(|c| !c.is_empty()) {
        return color.to_string();
    }
    rules
        .iter()
        .filter(|r| column_known(columns, &r.column_id))
        .find(|r| r.matches(row))
        .map(|r| r.color.clone())
        .unwrap_or_else(|| TRANSPARENT.to_string())
}

/// Stage 5: the `[page * size, page * size + size)` slice of `rows`.
pub fn paginate<T: Clone>(rows: &[T], page: usize, page_size: usize) -> Vec<T> {
    let page_size = page_size.max(1);
    let start = page.saturating_mul(page_size).min(rows.len());
    let end = start.saturating_add(page_size).min(rows.len());
    rows[start..end].to_vec()
}

pub fn page_count(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size.max(1))
}

/// Runs the full pipeline, computing cell colors from the configured rules.
pub fn run(rows: &[Row], columns: &[Column], config: &ViewConfig) -> PipelineOutput {
    let cell_colors = compute_cell_colors(rows, columns, &config.cell_color_rules);
    run_with_cell_colors(rows, columns, config, cell_colors)
}

/// Runs the pipeline with an already resolved cell color map, for callers that debounce the
/// color computation separately.
pub fn run_with_cell_colors(
    rows: &[Row],
    columns: &[Column],
    config: &ViewConfig,
    cell_colors: CellColorMap,
) -> PipelineOutput {
    let page_size = if config.page_size == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        config.page_size
    };

    let mut kept: Vec<Row> = rows
        .iter()
        .filter(|row| matches_search(row, &config.search))
        .filter(|row| passes_filters(row, &config.filters, columns, &cell_colors))
        .filter(|row| config.date_range.as_ref().is_none_or(|range| range.contains(row)))
        .cloned()
        .collect();

    sort_rows(&mut kept, &config.sorts, columns);

    let row_colors: IndexMap<String, String> = kept
        .iter()
        .map(|row| (row.id.clone(), row_color(row, &config.color_rules, columns)))
        .collect();

    let group_by = config
        .group_by
        .as_deref()
        .filter(|g| !g.is_empty() && column_known(columns, g));
    let mut groups = group_rows(kept, group_by);
    if groups.is_empty() {
        groups.insert(String::new(), Vec::new());
    }

    let total_rows: usize = groups.values().map(Vec::len).sum();
    let groups = groups
        .into_iter()
        .map(|(key, rows)| RowGroup {
            total: rows.len(),
            rows: paginate(&rows, config.page, page_size),
            key,
        })
        .collect();

    PipelineOutput {
        groups,
        grouped: group_by.is_some(),
        row_colors,
        cell_colors,
        total_rows,
        total_pages: page_count(total_rows, page_size),
        page: config.page,
        page_size,
    }
}
