//! Chart and dashboard views.
//!
//! Neither kind owns rows. A chart view reads the rows of the dataset's first grid view and
//! turns them into a label/value series; dashboard widgets reduce the same rows to a single
//! figure. Drawing is left to the client.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cell::Row;
use crate::spreadsheet::{Dataset, View, ViewType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    #[default]
    Bar,
    Line,
    Area,
    Pie,
    Scatter,
}

/// How the values sharing one label are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    #[default]
    Sum,
    Count,
    #[serde(alias = "average")]
    Avg,
    Min,
    Max,
}

impl Aggregate {
    /// Reduces `values`. `Count` counts rows, the others ignore rows whose value is not
    /// numeric. An empty input reduces to 0.
    pub fn apply(self, rows: usize, values: &[f64]) -> f64 {
        match self {
            Aggregate::Count => rows as f64,
            Aggregate::Sum => values.iter().sum(),
            Aggregate::Avg if values.is_empty() => 0.0,
            Aggregate::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Aggregate::Min => values.iter().copied().reduce(f64::min).unwrap_or(0.0),
            Aggregate::Max => values.iter().copied().reduce(f64::max).unwrap_or(0.0),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    #[serde(default, rename = "type")]
    pub kind: ChartKind,
    #[serde(default, alias = "xAxis")]
    pub x_column: Option<String>,
    #[serde(default, alias = "yAxis")]
    pub y_column: Option<String>,
    #[serde(default)]
    pub aggregate: Aggregate,
    #[serde(default)]
    pub title: Option<String>,
}

impl ChartConfig {
    pub(crate) fn forget_column(&mut self, column_id: &str) {
        if self.x_column.as_deref() == Some(column_id) {
            self.x_column = None;
        }
        if self.y_column.as_deref() == Some(column_id) {
            self.y_column = None;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSeries {
    pub kind: ChartKind,
    pub title: Option<String>,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

/// Rows a chart or dashboard view reads: those the first grid view of the same dataset
/// presents, legacy dataset rows included.
pub fn source_rows<'a>(dataset: &'a Dataset, views: &'a [View], view: &View) -> &'a [Row] {
    views
        .iter()
        .find(|v| v.table_id == view.table_id && v.view_type == ViewType::Grid)
        .map(|v| v.effective_rows(dataset))
        .unwrap_or(&[])
}

/// Builds the series for a chart: one point per distinct x label, in first-seen order.
/// Without a y column every aggregate degrades to a row count.
pub fn build_series(rows: &[Row], config: &ChartConfig) -> ChartSeries {
    let mut buckets: IndexMap<String, (usize, Vec<f64>)> = IndexMap::new();
    if let Some(x) = config.x_column.as_deref() {
        for row in rows {
            let label = row.get(x).to_text();
            let bucket = buckets.entry(label).or_default();
            bucket.0 += 1;
            if let Some(y) = config
                .y_column
                .as_deref()
                .and_then(|y| row.get(y).as_number())
            {
                bucket.1.push(y);
            }
        }
    }

    let aggregate = if config.y_column.is_some() {
        config.aggregate
    } else {
        Aggregate::Count
    };
    let (labels, values): (Vec<String>, Vec<f64>) = buckets
        .into_iter()
        .map(|(label, (count, values))| (label, aggregate.apply(count, &values)))
        .unzip();

    ChartSeries {
        kind: config.kind,
        title: config.title.clone(),
        labels,
        values,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    #[default]
    Stat,
    Chart,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardWidget {
    pub id: String,
    #[serde(default)]
    pub kind: WidgetKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub column_id: Option<String>,
    #[serde(default)]
    pub aggregate: Aggregate,
    #[serde(default)]
    pub chart: Option<ChartConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum WidgetOutput {
    Stat { id: String, title: String, value: f64 },
    Chart { id: String, series: ChartSeries },
}

pub fn evaluate_widget(rows: &[Row], widget: &DashboardWidget) -> WidgetOutput {
    match (widget.kind, &widget.chart) {
        (WidgetKind::Chart, Some(chart)) => WidgetOutput::Chart {
            id: widget.id.clone(),
            series: build_series(rows, chart),
        },
        _ => {
            let values: Vec<f64> = match widget.column_id.as_deref() {
                Some(column) => rows.iter().filter_map(|r| r.get(column).as_number()).collect(),
                None => Vec::new(),
            };
            WidgetOutput::Stat {
                id: widget.id.clone(),
                title: widget.title.clone(),
                value: widget.aggregate.apply(rows.len(), &values),
            }
        }
    }
}
