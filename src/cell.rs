use chrono::{DateTime, NaiveDate};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::value::{MapAccessDeserializer, SeqAccessDeserializer};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

lazy_static! {
    // Leading numeric prefix, the same slice a browser's parseFloat would accept.
    static ref NUMBER_PREFIX: Regex =
        Regex::new(r"^\s*[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").unwrap();
    static ref US_DATE: Regex = Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").unwrap();
}

static EMPTY: CellValue = CellValue::Empty;

/// A single cell value.
///
/// Rows arrive from the backend as loose JSON, so every value is carried with an explicit tag
/// and all comparisons go through the coercions below instead of ad hoc parsing.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    #[default]
    Empty,
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        CellValue::Text(s.into())
    }

    /// Empty values and whitespace-only text both count as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Display form of the value. Integral numbers print without a fractional part.
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            CellValue::Empty => String::new(),
        }
    }

    pub fn lower_text(&self) -> String {
        self.to_text().to_lowercase()
    }

    /// Numeric form. Text is read the way a lenient float parser reads it (leading numeric
    /// prefix, "12kg" is 12). Anything else is `None`, never an error.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) if !n.is_nan() => Some(*n),
            CellValue::Text(s) => parse_number(s),
            _ => None,
        }
    }

    /// Date form. Accepts ISO dates, RFC 3339 timestamps and `m/d/yyyy`.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::Date(d) => Some(*d),
            CellValue::Text(s) => parse_date(s),
            _ => None,
        }
    }

    /// Builds a value for a column of the given type from raw user input.
    /// Input that does not fit the column type is kept as text.
    pub fn from_input(raw: &str, column_type: ColumnType) -> Self {
        if raw.is_empty() {
            return CellValue::Text(String::new());
        }
        match column_type {
            ColumnType::Number => match raw.trim().parse::<f64>() {
                Ok(n) => CellValue::Number(n),
                Err(_) => CellValue::text(raw),
            },
            ColumnType::Date => match parse_date(raw) {
                Some(d) => CellValue::Date(d),
                None => CellValue::text(raw),
            },
            ColumnType::Text => CellValue::text(raw),
        }
    }
}

/// Declared type of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    Text,
    Number,
    Date,
}

pub fn parse_number(s: &str) -> Option<f64> {
    let m = NUMBER_PREFIX.find(s)?;
    m.as_str().trim().parse::<f64>().ok()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if s.len() > 10 && s.is_char_boundary(10) {
        if let Ok(d) = NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d") {
            return Some(d);
        }
    }
    let caps = US_DATE.captures(s)?;
    let month = caps[1].parse().ok()?;
    let day = caps[2].parse().ok()?;
    let year = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(d: NaiveDate) -> Self {
        CellValue::Date(d)
    }
}

impl From<serde_json::Value> for CellValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CellValue::Empty,
            serde_json::Value::Bool(b) => CellValue::Text(b.to_string()),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(CellValue::Number)
                .unwrap_or_else(|| CellValue::Text(n.to_string())),
            serde_json::Value::String(s) => CellValue::Text(s),
            other => CellValue::Text(other.to_string()),
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Text(s) => serializer.serialize_str(s),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => {
                serializer.serialize_i64(*n as i64)
            }
            CellValue::Number(n) => serializer.serialize_f64(*n),
            CellValue::Date(d) => serializer.collect_str(&d.format("%Y-%m-%d")),
            CellValue::Empty => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for CellValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CellValueVisitor;

        impl<'de> Visitor<'de> for CellValueVisitor {
            type Value = CellValue;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a scalar cell value")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<CellValue, E> {
                Ok(CellValue::Text(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<CellValue, E> {
                Ok(CellValue::Number(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<CellValue, E> {
                Ok(CellValue::Number(v as f64))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<CellValue, E> {
                Ok(CellValue::Number(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<CellValue, E> {
                Ok(CellValue::Text(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<CellValue, E> {
                Ok(CellValue::Text(v))
            }

            fn visit_none<E: de::Error>(self) -> Result<CellValue, E> {
                Ok(CellValue::Empty)
            }

            fn visit_unit<E: de::Error>(self) -> Result<CellValue, E> {
                Ok(CellValue::Empty)
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<CellValue, D::Error> {
                CellValue::deserialize(d)
            }

            // Nested structures are not cell values; keep their JSON text.
            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<CellValue, A::Error> {
                let value = serde_json::Value::deserialize(MapAccessDeserializer::new(map))?;
                Ok(CellValue::Text(value.to_string()))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<CellValue, A::Error> {
                let value = serde_json::Value::deserialize(SeqAccessDeserializer::new(seq))?;
                Ok(CellValue::Text(value.to_string()))
            }
        }

        deserializer.deserialize_any(CellValueVisitor)
    }
}

/// Accepts ids and rule values written either as JSON strings or numbers.
pub fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    struct StringOrNumber;

    impl<'de> Visitor<'de> for StringOrNumber {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a string or a number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_unit<E: de::Error>(self) -> Result<String, E> {
            Ok(String::new())
        }

        fn visit_none<E: de::Error>(self) -> Result<String, E> {
            Ok(String::new())
        }
    }

    deserializer.deserialize_any(StringOrNumber)
}

/// One record of a view: a stable id plus a sparse mapping from column id to value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Background colors captured from the source file at import time, keyed by column id.
    #[serde(rename = "_cellColors", default, skip_serializing_if = "IndexMap::is_empty")]
    pub cell_colors: IndexMap<String, String>,
    /// Manual whole-row color override.
    #[serde(rename = "_rowColor", default, skip_serializing_if = "Option::is_none")]
    pub row_color: Option<String>,
    #[serde(flatten)]
    pub values: IndexMap<String, CellValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Row {
            id: id.into(),
            cell_colors: IndexMap::new(),
            row_color: None,
            values: IndexMap::new(),
        }
    }

    /// Builder form of [`Row::set`].
    pub fn with(mut self, column_id: &str, value: impl Into<CellValue>) -> Self {
        self.set(column_id, value.into());
        self
    }

    /// Missing keys read as [`CellValue::Empty`].
    pub fn get(&self, column_id: &str) -> &CellValue {
        self.values.get(column_id).unwrap_or(&EMPTY)
    }

    /// Stores `value` and returns what was there before.
    pub fn set(&mut self, column_id: &str, value: CellValue) -> CellValue {
        self.values
            .insert(column_id.to_string(), value)
            .unwrap_or_default()
    }

    /// Drops the column from this row, including any imported cell color.
    pub fn remove(&mut self, column_id: &str) -> Option<CellValue> {
        self.cell_colors.shift_remove(column_id);
        self.values.shift_remove(column_id)
    }

    pub fn has_column(&self, column_id: &str) -> bool {
        self.values.contains_key(column_id)
    }
}

impl Default for Row {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_coercion_reads_leading_prefix() {
        assert_eq!(CellValue::text("15").as_number(), Some(15.0));
        assert_eq!(CellValue::text(" 2.5kg").as_number(), Some(2.5));
        assert_eq!(CellValue::text("").as_number(), None);
        assert_eq!(CellValue::text("abc").as_number(), None);
        assert_eq!(CellValue::Empty.as_number(), None);
        assert_eq!(CellValue::Number(f64::NAN).as_number(), None);
    }

    #[test]
    fn text_form_of_numbers_drops_trailing_zero() {
        assert_eq!(CellValue::Number(15.0).to_text(), "15");
        assert_eq!(CellValue::Number(1.5).to_text(), "1.5");
        assert_eq!(CellValue::Empty.to_text(), "");
    }

    #[test]
    fn date_coercion_accepts_common_shapes() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(CellValue::text("2024-03-09").as_date(), Some(d));
        assert_eq!(CellValue::text("2024-03-09T10:00:00Z").as_date(), Some(d));
        assert_eq!(CellValue::text("3/9/2024").as_date(), Some(d));
        assert_eq!(CellValue::text("soon").as_date(), None);
    }

    #[test]
    fn row_round_trips_through_json() {
        let json = r##"{"id":1,"qty":"5","price":12.5,"note":null,"_cellColors":{"qty":"#ff0000"}}"##;
        let row: Row = serde_json::from_str(json).unwrap();
        assert_eq!(row.id, "1");
        assert_eq!(row.get("qty"), &CellValue::text("5"));
        assert_eq!(row.get("price"), &CellValue::Number(12.5));
        assert_eq!(row.get("note"), &CellValue::Empty);
        assert_eq!(row.get("missing"), &CellValue::Empty);
        assert_eq!(row.cell_colors.get("qty").map(String::as_str), Some("#ff0000"));

        let back = serde_json::to_value(&row).unwrap();
        assert_eq!(back["price"], serde_json::json!(12.5));
        assert_eq!(back["_cellColors"]["qty"], "#ff0000");
        assert!(back.get("_rowColor").is_none());
    }

    #[test]
    fn removing_a_column_drops_its_color() {
        let mut row = Row::with_id("r").with("a", "x");
        row.cell_colors.insert("a".into(), "#fff".into());
        assert_eq!(row.remove("a"), Some(CellValue::text("x")));
        assert!(row.cell_colors.is_empty());
    }
}
