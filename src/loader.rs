//! File import parsing.
//!
//! CSV, JSON and Excel uploads are all turned into the same [`ParsedImport`]: rows with fresh
//! ids plus the union of their keys, in first-seen order. Every inferred column is text.

use std::collections::HashMap;
use std::error::Error;
use std::io::{Cursor, Read};

use indexmap::IndexSet;

use crate::cell::{CellValue, Row};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("File is empty")]
    Empty,
    #[error("File is not valid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("JSON must be an object or an array of objects")]
    JsonShape,
    #[error("Could not read workbook: {0}")]
    Excel(#[from] calamine::Error),
    #[error("Workbook has no worksheets")]
    NoWorksheet,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportFormat {
    Csv,
    Json,
    Excel,
}

impl ImportFormat {
    /// Picks the format from a file name's extension.
    pub fn from_filename(name: &str) -> Result<Self, ImportError> {
        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "csv" => Ok(ImportFormat::Csv),
            "json" => Ok(ImportFormat::Json),
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Ok(ImportFormat::Excel),
            _ => Err(ImportError::UnsupportedFormat(name.to_string())),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedImport {
    pub rows: Vec<Row>,
    /// Keys across all rows, in the order they were first seen.
    pub columns: Vec<String>,
}

impl ParsedImport {
    fn from_rows(rows: Vec<Row>) -> Self {
        let mut keys: IndexSet<String> = IndexSet::new();
        for row in &rows {
            keys.extend(row.values.keys().cloned());
        }
        ParsedImport {
            rows,
            columns: keys.into_iter().collect(),
        }
    }
}

/// Parses an upload in the given format.
pub fn parse(bytes: &[u8], format: ImportFormat) -> Result<ParsedImport, ImportError> {
    match format {
        ImportFormat::Csv => parse_csv(std::str::from_utf8(bytes)?),
        ImportFormat::Json => parse_json(std::str::from_utf8(bytes)?),
        ImportFormat::Excel => parse_excel(bytes),
    }
}

/// Parses CSV text. The first line is the header; blank lines are skipped.
///
/// # Arguments
/// * `text` - The file contents
///
/// # Returns
/// * `Result<ParsedImport, ImportError>` - One row per data line, keyed by header
pub fn parse_csv(text: &str) -> Result<ParsedImport, ImportError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text
        .lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty());

    let header_line = lines.next().ok_or(ImportError::Empty)?;
    let headers: Vec<String> = parse_csv_row(header_line)
        .into_iter()
        .enumerate()
        .map(|(i, h)| header_name(h.trim(), i))
        .collect();

    let rows = lines
        .map(|line| {
            let mut row = Row::new();
            for (header, value) in headers.iter().zip(parse_csv_row(line)) {
                if !is_reserved_key(header) {
                    row.set(header, CellValue::Text(value));
                }
            }
            row
        })
        .collect();
    Ok(ParsedImport::from_rows(rows))
}

/// Splits one CSV line into fields. Quotes group commas; a doubled quote inside a quoted
/// field is a literal quote.
pub fn parse_csv_row(line: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                result.push(std::mem::take(&mut current_field));
            }
            _ => current_field.push(c),
        }
    }
    result.push(current_field);
    result
}

fn header_name(raw: &str, index: usize) -> String {
    if raw.is_empty() {
        format!("Column {}", index + 1)
    } else {
        raw.to_string()
    }
}

// Keys the backend reserves on stored rows.
fn is_reserved_key(key: &str) -> bool {
    matches!(key, "id" | "_cellColors" | "_rowColor")
}

/// Parses a JSON array of objects, or a single object as a one-row import.
pub fn parse_json(text: &str) -> Result<ParsedImport, ImportError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let objects = match value {
        serde_json::Value::Array(items) => items,
        object @ serde_json::Value::Object(_) => vec![object],
        _ => return Err(ImportError::JsonShape),
    };

    let mut rows = Vec::with_capacity(objects.len());
    for item in objects {
        let serde_json::Value::Object(fields) = item else {
            return Err(ImportError::JsonShape);
        };
        let mut row = Row::new();
        for (key, value) in fields {
            if !is_reserved_key(&key) {
                row.set(&key, CellValue::from(value));
            }
        }
        rows.push(row);
    }
    Ok(ParsedImport::from_rows(rows))
}

/// Cells and fill colors of a workbook's first sheet, read together.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExcelSheet {
    /// Row-major cell values, starting at the sheet's first used cell.
    pub cells: Vec<Vec<CellValue>>,
    /// Solid fill colors as `#RRGGBB`, keyed by (row, column) of `cells`.
    pub styles: HashMap<(usize, usize), String>,
}

/// Reads the first worksheet. Fill colors are best effort: a workbook whose styles cannot
/// be read still imports, just without colors.
pub fn read_excel(bytes: &[u8]) -> Result<ExcelSheet, ImportError> {
    use calamine::{Reader, open_workbook_auto_from_rs};

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ImportError::NoWorksheet)??;
    let (row_offset, col_offset) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));

    let cells: Vec<Vec<CellValue>> = range
        .rows()
        .map(|row| row.iter().map(excel_value).collect())
        .collect();

    let styles = match read_fill_colors(bytes) {
        Ok(fills) => fills
            .into_iter()
            .filter_map(|((r, c), color)| {
                let r = r.checked_sub(row_offset)?;
                let c = c.checked_sub(col_offset)?;
                Some(((r, c), color))
            })
            .collect(),
        Err(e) => {
            log::warn!("skipping cell colors: {}", e);
            HashMap::new()
        }
    };

    Ok(ExcelSheet { cells, styles })
}

fn excel_value(data: &calamine::Data) -> CellValue {
    use calamine::{Data, DataType};

    match data {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Text(b.to_string()),
        Data::DateTime(dt) => data
            .as_date()
            .map(CellValue::Date)
            .unwrap_or(CellValue::Number(dt.as_f64())),
        Data::DateTimeIso(s) => data
            .as_date()
            .map(CellValue::Date)
            .unwrap_or_else(|| CellValue::Text(s.clone())),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(format!("{:?}", e)),
    }
}

/// Parses an Excel upload: first row is the header, the rest become rows carrying their
/// fill colors in `_cellColors`.
pub fn parse_excel(bytes: &[u8]) -> Result<ParsedImport, ImportError> {
    let sheet = read_excel(bytes)?;
    let mut cells = sheet.cells.into_iter();
    let header_row = cells.next().ok_or(ImportError::Empty)?;
    let headers: Vec<String> = header_row
        .iter()
        .enumerate()
        .map(|(i, h)| header_name(h.to_text().trim(), i))
        .collect();

    let mut rows = Vec::new();
    for (i, values) in cells.enumerate() {
        let source_row = i + 1;
        if values.iter().all(CellValue::is_empty) {
            continue;
        }
        let mut row = Row::new();
        for (c, (header, value)) in headers.iter().zip(values).enumerate() {
            if let Some(color) = sheet.styles.get(&(source_row, c)) {
                row.cell_colors.insert(header.clone(), color.clone());
            }
            if !matches!(value, CellValue::Empty) {
                row.set(header, value);
            }
        }
        rows.push(row);
    }
    Ok(ParsedImport::from_rows(rows))
}

type FillMap = HashMap<(usize, usize), String>;

fn read_zip_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<String, Box<dyn Error>> {
    let mut entry = archive.by_name(name)?;
    let mut text = String::new();
    entry.read_to_string(&mut text)?;
    Ok(text)
}

/// Solid fills of the first worksheet, keyed by absolute zero-based (row, column).
fn read_fill_colors(bytes: &[u8]) -> Result<FillMap, Box<dyn Error>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let sheet_path = first_sheet_path(&mut archive).unwrap_or_else(|| "xl/worksheets/sheet1.xml".into());

    let styles_xml = read_zip_entry(&mut archive, "xl/styles.xml")?;
    let styles = roxmltree::Document::parse(&styles_xml)?;
    let fills: Vec<Option<String>> = styles
        .descendants()
        .find(|n| n.has_tag_name("fills"))
        .map(|fills| {
            fills
                .children()
                .filter(|n| n.has_tag_name("fill"))
                .map(|fill| {
                    let pattern = fill.children().find(|n| n.has_tag_name("patternFill"))?;
                    if pattern.attribute("patternType") != Some("solid") {
                        return None;
                    }
                    let fg = pattern.children().find(|n| n.has_tag_name("fgColor"))?;
                    argb_to_hex(fg.attribute("rgb")?)
                })
                .collect()
        })
        .unwrap_or_default();
    let xf_fills: Vec<Option<usize>> = styles
        .descendants()
        .find(|n| n.has_tag_name("cellXfs"))
        .map(|xfs| {
            xfs.children()
                .filter(|n| n.has_tag_name("xf"))
                .map(|xf| xf.attribute("fillId").and_then(|id| id.parse().ok()))
                .collect()
        })
        .unwrap_or_default();

    let sheet_xml = read_zip_entry(&mut archive, &sheet_path)?;
    let sheet = roxmltree::Document::parse(&sheet_xml)?;
    let mut colors = FillMap::new();
    for cell in sheet.descendants().filter(|n| n.has_tag_name("c")) {
        let (Some(reference), Some(style)) = (cell.attribute("r"), cell.attribute("s")) else {
            continue;
        };
        let color = style
            .parse::<usize>()
            .ok()
            .and_then(|s| xf_fills.get(s).copied().flatten())
            .and_then(|fill| fills.get(fill).cloned().flatten());
        if let (Some(color), Some(position)) = (color, parse_cell_ref(reference)) {
            colors.insert(position, color);
        }
    }
    Ok(colors)
}

fn first_sheet_path(archive: &mut zip::ZipArchive<Cursor<&[u8]>>) -> Option<String> {
    let workbook_xml = read_zip_entry(archive, "xl/workbook.xml").ok()?;
    let workbook = roxmltree::Document::parse(&workbook_xml).ok()?;
    let sheet = workbook.descendants().find(|n| n.has_tag_name("sheet"))?;
    let rel_id = sheet
        .attributes()
        .find(|a| a.name() == "id")
        .map(|a| a.value().to_string())?;

    let rels_xml = read_zip_entry(archive, "xl/_rels/workbook.xml.rels").ok()?;
    let rels = roxmltree::Document::parse(&rels_xml).ok()?;
    let target = rels
        .descendants()
        .filter(|n| n.has_tag_name("Relationship"))
        .find(|n| n.attribute("Id") == Some(rel_id.as_str()))?
        .attribute("Target")?;
    Some(match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    })
}

/// `FFRRGGBB` → `#RRGGBB`. Theme and indexed colors are not resolved.
fn argb_to_hex(argb: &str) -> Option<String> {
    if argb.len() != 8 || !argb.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("#{}", argb[2..].to_uppercase()))
}

/// `B3` → (2, 1)
fn parse_cell_ref(reference: &str) -> Option<(usize, usize)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() {
        return None;
    }
    let mut col = 0usize;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        col = col.checked_mul(26)?.checked_add(digit)?;
    }
    let row: usize = digits.parse().ok()?;
    Some((row.checked_sub(1)?, col - 1))
}
