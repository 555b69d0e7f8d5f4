use sheetdesk::cell::CellValue;
use sheetdesk::loader::{ImportError, ImportFormat, parse, parse_csv, parse_json};

#[test]
fn csv_header_keys_every_row() {
    let parsed = parse_csv("name,qty\r\nWidget,5\r\n\r\n\"Gadget, large\",15\r\n").unwrap();
    assert_eq!(parsed.columns, ["name", "qty"]);
    assert_eq!(parsed.rows.len(), 2);
    assert_eq!(parsed.rows[1].get("name"), &CellValue::text("Gadget, large"));
    assert_eq!(parsed.rows[1].get("qty").as_number(), Some(15.0));
}

#[test]
fn csv_strips_bom_and_names_blank_headers() {
    let parsed = parse_csv("\u{feff}sku, ,note\n1,2,3\n").unwrap();
    assert_eq!(parsed.columns, ["sku", "Column 2", "note"]);
    assert_eq!(parsed.rows[0].get("Column 2").to_text(), "2");
}

#[test]
fn csv_short_lines_leave_missing_cells_empty() {
    let parsed = parse_csv("a,b,c\n1\n").unwrap();
    let row = &parsed.rows[0];
    assert_eq!(row.get("a").to_text(), "1");
    assert!(!row.has_column("b"));
    assert!(row.get("c").is_empty());
}

#[test]
fn empty_csv_is_rejected() {
    assert!(matches!(parse_csv("\n\n"), Err(ImportError::Empty)));
}

#[test]
fn json_columns_are_the_union_in_first_seen_order() {
    let parsed = parse_json(
        r##"[
            {"zeta": 1, "alpha": "x"},
            {"alpha": "y", "mid": true, "_rowColor": "#fff", "id": 7},
            {"extra": null}
        ]"##,
    )
    .unwrap();
    assert_eq!(parsed.columns, ["zeta", "alpha", "mid", "extra"]);
    assert_eq!(parsed.rows[0].get("zeta"), &CellValue::Number(1.0));
    assert_eq!(parsed.rows[1].get("mid").to_text(), "true");
    assert!(parsed.rows[1].row_color.is_none());
    assert_eq!(parsed.rows[2].get("extra"), &CellValue::Empty);

    let mut ids: Vec<&str> = parsed.rows.iter().map(|r| r.id.as_str()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

#[test]
fn json_single_object_is_one_row() {
    let parsed = parse_json(r#"{"name": "solo"}"#).unwrap();
    assert_eq!(parsed.rows.len(), 1);
    assert_eq!(parsed.columns, ["name"]);
}

#[test]
fn json_of_the_wrong_shape_is_rejected() {
    assert!(matches!(parse_json("42"), Err(ImportError::JsonShape)));
    assert!(matches!(parse_json("[1, 2]"), Err(ImportError::JsonShape)));
    assert!(matches!(parse_json("{"), Err(ImportError::Json(_))));
}

#[test]
fn parse_dispatches_on_format() {
    let parsed = parse(b"a\n1\n", ImportFormat::Csv).unwrap();
    assert_eq!(parsed.columns, ["a"]);
    assert!(matches!(
        parse(&[0xff, 0xfe, 0x00], ImportFormat::Json),
        Err(ImportError::Encoding(_))
    ));
    assert!(matches!(
        parse(b"not a workbook", ImportFormat::Excel),
        Err(ImportError::Excel(_))
    ));
}

#[cfg(feature = "web")]
#[test]
fn exported_workbook_imports_with_fill_colors() {
    use sheetdesk::cell::Row;
    use sheetdesk::downloader::to_xlsx;
    use sheetdesk::spreadsheet::Column;

    let columns = vec![Column::text("name", "name"), Column::text("qty", "qty")];
    let mut flagged = Row::with_id("1").with("name", "Widget").with("qty", 5.0);
    flagged.cell_colors.insert("qty".into(), "#FFFF00".into());
    let rows = vec![flagged, Row::with_id("2").with("name", "Gadget").with("qty", 15.0)];

    let bytes = to_xlsx(&rows, &columns).unwrap();
    let parsed = parse(&bytes, ImportFormat::Excel).unwrap();

    assert_eq!(parsed.columns, ["name", "qty"]);
    assert_eq!(parsed.rows.len(), 2);
    assert_eq!(parsed.rows[0].get("name").to_text(), "Widget");
    assert_eq!(parsed.rows[1].get("qty").as_number(), Some(15.0));
    assert_eq!(
        parsed.rows[0].cell_colors.get("qty").map(String::as_str),
        Some("#FFFF00")
    );
    assert!(parsed.rows[1].cell_colors.is_empty());
}
