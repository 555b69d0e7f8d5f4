//! Filter, sort and color rules attached to a view.
//!
//! Rule payloads are stored by the backend as JSON exactly as the grid toolbar produces them,
//! so every type here accepts camelCase field names and the older `field` spelling for the
//! target column.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::cell::{CellValue, Row, string_or_number};

/// Synthetic filter target: match on a cell's background color instead of its value.
pub const CELL_COLOR_TARGET: &str = "__cell_color__";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    #[serde(alias = "equals")]
    Is,
    #[serde(alias = "not_equals")]
    IsNot,
    Contains,
    DoesNotContain,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    #[serde(alias = "greater_than_or_equals")]
    GreaterThanOrEqual,
    #[serde(alias = "less_than_or_equals")]
    LessThanOrEqual,
    IsEmpty,
    IsNotEmpty,
    /// Anything the toolbar may send that this build does not know. Never matches.
    #[serde(other)]
    Unknown,
}

impl FilterOperator {
    /// Evaluates `cell <op> target`.
    ///
    /// Textual operators compare lowercase text forms. Comparison operators compare numeric
    /// forms and fail when either side does not parse as a number.
    pub fn evaluate(self, cell: &CellValue, target: &str) -> bool {
        use FilterOperator::*;
        match self {
            Is => cell.lower_text() == target.to_lowercase(),
            IsNot => cell.lower_text() != target.to_lowercase(),
            Contains => cell.lower_text().contains(&target.to_lowercase()),
            DoesNotContain => !cell.lower_text().contains(&target.to_lowercase()),
            StartsWith => cell.lower_text().starts_with(&target.to_lowercase()),
            EndsWith => cell.lower_text().ends_with(&target.to_lowercase()),
            GreaterThan | LessThan | GreaterThanOrEqual | LessThanOrEqual => {
                let (Some(lhs), Some(rhs)) = (cell.as_number(), crate::cell::parse_number(target))
                else {
                    return false;
                };
                match self {
                    GreaterThan => lhs > rhs,
                    LessThan => lhs < rhs,
                    GreaterThanOrEqual => lhs >= rhs,
                    _ => lhs <= rhs,
                }
            }
            IsEmpty => cell.is_empty(),
            IsNotEmpty => !cell.is_empty(),
            Unknown => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRule {
    #[serde(alias = "field", alias = "column_id")]
    pub column_id: String,
    pub operator: FilterOperator,
    #[serde(default, deserialize_with = "string_or_number")]
    pub value: String,
}

impl FilterRule {
    pub fn new(column_id: &str, operator: FilterOperator, value: &str) -> Self {
        FilterRule {
            column_id: column_id.to_string(),
            operator,
            value: value.to_string(),
        }
    }

    pub fn targets_cell_color(&self) -> bool {
        self.column_id == CELL_COLOR_TARGET
    }

    /// For a cell-color rule, splits the value into an optional column and the color.
    /// `"status:#10b981"` targets one column, `"#10b981"` any column of the row.
    pub fn cell_color_target(&self) -> (Option<&str>, &str) {
        match self.value.split_once(':') {
            Some((column, color)) if !column.is_empty() && !column.starts_with('#') => {
                (Some(column), color)
            }
            _ => (None, self.value.as_str()),
        }
    }
}

/// Keeps rows whose date-typed field falls within `[start, end]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeFilter {
    #[serde(alias = "field", alias = "column_id")]
    pub column_id: String,
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

impl DateRangeFilter {
    pub fn contains(&self, row: &Row) -> bool {
        let Some(date) = row.get(&self.column_id).as_date() else {
            return false;
        };
        self.start.is_none_or(|start| date >= start) && self.end.is_none_or(|end| date <= end)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "ascending")]
    Asc,
    #[serde(alias = "descending")]
    Desc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortRule {
    #[serde(alias = "field", alias = "column_id")]
    pub column_id: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortRule {
    pub fn new(column_id: &str, direction: SortDirection) -> Self {
        SortRule {
            column_id: column_id.to_string(),
            direction,
        }
    }

    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let ord = compare_values(a.get(&self.column_id), b.get(&self.column_id));
        match self.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }
}

// Sort rank: empty values, then numbers, then dates, then text.
#[derive(PartialEq, PartialOrd)]
enum SortKey {
    Empty,
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl SortKey {
    fn of(value: &CellValue) -> Self {
        match value {
            CellValue::Empty => SortKey::Empty,
            CellValue::Text(s) if s.trim().is_empty() => SortKey::Empty,
            CellValue::Number(n) if n.is_nan() => SortKey::Empty,
            CellValue::Number(n) => SortKey::Number(*n),
            CellValue::Date(d) => SortKey::Date(*d),
            CellValue::Text(s) => match s.trim().parse::<f64>() {
                Ok(n) if !n.is_nan() => SortKey::Number(n),
                _ => SortKey::Text(s.to_string()),
            },
        }
    }
}

/// Total order over cell values used by sorting.
///
/// Values that read fully as numbers compare numerically whatever their tag, so a column of
/// numeric text sorts the same as a column of numbers. Mixed columns order by rank:
/// empty < numbers < dates < text, so blanks lead ascending and trail descending.
pub fn compare_values(a: &CellValue, b: &CellValue) -> Ordering {
    SortKey::of(a)
        .partial_cmp(&SortKey::of(b))
        .unwrap_or(Ordering::Equal)
}

/// Whole-row color: equality match on one column, case-insensitive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorRule {
    #[serde(alias = "field", alias = "column_id")]
    pub column_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub value: String,
    pub color: String,
}

impl ColorRule {
    pub fn matches(&self, row: &Row) -> bool {
        FilterOperator::Is.evaluate(row.get(&self.column_id), &self.value)
    }
}

/// Per-cell conditional color using the full filter operator set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellColorRule {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "field", alias = "column_id")]
    pub column_id: String,
    pub operator: FilterOperator,
    #[serde(default, deserialize_with = "string_or_number")]
    pub value: String,
    pub color: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl CellColorRule {
    pub fn matches(&self, row: &Row) -> bool {
        self.enabled && self.operator.evaluate(row.get(&self.column_id), &self.value)
    }
}

/// Static highlight of a whole column, passed through to renderers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnHighlight {
    #[serde(alias = "field", alias = "column_id")]
    pub column_id: String,
    pub color: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> CellValue {
        CellValue::text(s)
    }

    #[test]
    fn textual_operators_ignore_case() {
        assert!(FilterOperator::Is.evaluate(&v("Done"), "done"));
        assert!(FilterOperator::Contains.evaluate(&v("Hello World"), "WORLD"));
        assert!(FilterOperator::StartsWith.evaluate(&v("Apple"), "ap"));
        assert!(FilterOperator::EndsWith.evaluate(&v("Apple"), "LE"));
        assert!(FilterOperator::DoesNotContain.evaluate(&v("Apple"), "z"));
        assert!(FilterOperator::IsNot.evaluate(&CellValue::Number(3.0), "4"));
    }

    #[test]
    fn numeric_operators_fail_on_unparsable_input() {
        assert!(FilterOperator::GreaterThan.evaluate(&v("15"), "10"));
        assert!(!FilterOperator::GreaterThan.evaluate(&v("5"), "10"));
        assert!(!FilterOperator::GreaterThan.evaluate(&v(""), "10"));
        assert!(!FilterOperator::LessThan.evaluate(&v("abc"), "10"));
        assert!(!FilterOperator::LessThan.evaluate(&v("5"), "ten"));
        assert!(FilterOperator::LessThanOrEqual.evaluate(&CellValue::Number(10.0), "10"));
        assert!(FilterOperator::GreaterThanOrEqual.evaluate(&v("10"), "10"));
    }

    #[test]
    fn unknown_operator_never_matches() {
        let rule: FilterRule =
            serde_json::from_str(r#"{"columnId":"a","operator":"sounds_like","value":"x"}"#)
                .unwrap();
        assert_eq!(rule.operator, FilterOperator::Unknown);
        assert!(!rule.operator.evaluate(&v("x"), "x"));
    }

    #[test]
    fn rules_accept_field_alias_and_numeric_values() {
        let rule: SortRule = serde_json::from_str(r#"{"field":"qty","direction":"desc"}"#).unwrap();
        assert_eq!(rule.column_id, "qty");
        assert_eq!(rule.direction, SortDirection::Desc);

        let filter: FilterRule =
            serde_json::from_str(r#"{"columnId":"qty","operator":"greater_than","value":10}"#)
                .unwrap();
        assert_eq!(filter.value, "10");
    }

    #[test]
    fn compare_values_is_numeric_for_numeric_text() {
        assert_eq!(compare_values(&v("5"), &v("15")), Ordering::Less);
        assert_eq!(compare_values(&CellValue::Number(15.0), &v("5")), Ordering::Greater);
        assert_eq!(compare_values(&v("b"), &v("a")), Ordering::Greater);
        assert_eq!(compare_values(&v("a"), &CellValue::Number(1.0)), Ordering::Greater);
        assert_eq!(compare_values(&v(""), &CellValue::Number(1.0)), Ordering::Less);
        assert_eq!(compare_values(&v(" "), &CellValue::Number(-1e9)), Ordering::Less);
        assert_eq!(compare_values(&CellValue::Empty, &v("")), Ordering::Equal);
    }

    #[test]
    fn cell_color_target_splits_column_and_color() {
        let rule = FilterRule::new(CELL_COLOR_TARGET, FilterOperator::Is, "status:#10b981");
        assert_eq!(rule.cell_color_target(), (Some("status"), "#10b981"));
        let any = FilterRule::new(CELL_COLOR_TARGET, FilterOperator::Is, "#10b981");
        assert_eq!(any.cell_color_target(), (None, "#10b981"));
    }

    #[test]
    fn disabled_cell_color_rule_never_matches() {
        let mut rule = CellColorRule {
            id: "r1".into(),
            column_id: "qty".into(),
            operator: FilterOperator::GreaterThan,
            value: "1".into(),
            color: "#f00".into(),
            enabled: true,
        };
        let row = Row::with_id("1").with("qty", "5");
        assert!(rule.matches(&row));
        rule.enabled = false;
        assert!(!rule.matches(&row));
    }
}
