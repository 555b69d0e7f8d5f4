#![cfg(not(tarpaulin_include))]

use crate::cell::{CellValue, Row};
use crate::spreadsheet::Column;
use std::error::Error;

/// Convert rows to CSV format
///
/// The header row holds the column names; each following line holds one row's values in
/// column order. Fields containing commas, quotes or newlines are quoted.
///
/// # Arguments
/// * `rows` - Rows to export, in output order
/// * `columns` - Columns to export, in output order
///
/// # Returns
/// * `String` - CSV content
///
/// # Examples
/// ```
/// use sheetdesk::cell::Row;
/// use sheetdesk::downloader::to_csv;
/// use sheetdesk::spreadsheet::Column;
///
/// let rows = vec![Row::with_id("1").with("name", "Ada, Countess")];
/// let csv = to_csv(&rows, &[Column::text("name", "Name")]);
/// assert_eq!(csv, "Name\n\"Ada, Countess\"\n");
/// ```
pub fn to_csv(rows: &[Row], columns: &[Column]) -> String {
    let mut csv_content = String::new();

    let header: Vec<String> = columns.iter().map(|c| escape_field(&c.name)).collect();
    csv_content.push_str(&header.join(","));
    csv_content.push('\n');

    for row in rows {
        let fields: Vec<String> = columns
            .iter()
            .map(|c| escape_field(&row.get(&c.id).to_text()))
            .collect();
        csv_content.push_str(&fields.join(","));
        csv_content.push('\n');
    }

    csv_content
}

fn escape_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Convert rows to XLSX format
///
/// Numbers are written as numbers, dates as ISO text, and everything else as strings. Cell
/// colors captured at import become solid fills.
///
/// # Arguments
/// * `rows` - Rows to export, in output order
/// * `columns` - Columns to export, in output order
///
/// # Returns
/// * `Result<Vec<u8>, Box<dyn Error>>` - XLSX file content as bytes or an error
#[cfg(feature = "web")]
pub fn to_xlsx(rows: &[Row], columns: &[Column]) -> Result<Vec<u8>, Box<dyn Error>> {
    use rust_xlsxwriter::{Color, Format, FormatPattern, Workbook};

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    let bold = Format::new().set_bold();

    for (c, column) in columns.iter().enumerate() {
        worksheet.write_string_with_format(0, c as u16, &column.name, &bold)?;
    }

    for (r, row) in rows.iter().enumerate() {
        let xl_row = (r + 1) as u32;
        for (c, column) in columns.iter().enumerate() {
            let xl_col = c as u16;
            let fill = row
                .cell_colors
                .get(&column.id)
                .and_then(|hex| u32::from_str_radix(hex.trim_start_matches('#'), 16).ok())
                .map(|rgb| {
                    Format::new()
                        .set_pattern(FormatPattern::Solid)
                        .set_background_color(Color::RGB(rgb))
                });
            match (row.get(&column.id), &fill) {
                (CellValue::Number(n), Some(format)) => {
                    worksheet.write_number_with_format(xl_row, xl_col, *n, format)?;
                }
                (CellValue::Number(n), None) => {
                    worksheet.write_number(xl_row, xl_col, *n)?;
                }
                (CellValue::Empty, None) => {}
                (value, Some(format)) => {
                    worksheet.write_string_with_format(xl_row, xl_col, value.to_text(), format)?;
                }
                (value, None) => {
                    worksheet.write_string(xl_row, xl_col, value.to_text())?;
                }
            }
        }
    }

    let buffer = workbook.save_to_buffer()?;
    Ok(buffer)
}

/// Same rows as a JSON array, the shape the importer reads back.
pub fn to_json(rows: &[Row]) -> Result<String, Box<dyn Error>> {
    Ok(serde_json::to_string_pretty(rows)?)
}
