use sheetdesk::cell::Row;
use sheetdesk::pipeline::{
    self, DEFAULT_PAGE_SIZE, TRANSPARENT, UNGROUPED, ViewConfig, compute_cell_colors, paginate,
};
use sheetdesk::rules::{
    CellColorRule, ColorRule, FilterOperator, FilterRule, SortDirection, SortRule,
};
use sheetdesk::spreadsheet::Column;

fn qty_rows() -> Vec<Row> {
    vec![
        Row::with_id("1").with("qty", "5"),
        Row::with_id("2").with("qty", "15"),
        Row::with_id("3").with("qty", ""),
    ]
}

fn people() -> Vec<Row> {
    vec![
        Row::with_id("a").with("name", "Alice").with("team", "Red").with("score", 30.0),
        Row::with_id("b").with("name", "bob").with("team", "Blue").with("score", 10.0),
        Row::with_id("c").with("name", "Carol").with("team", "").with("score", 20.0),
        Row::with_id("d").with("name", "dave").with("team", "Red").with("score", 40.0),
        Row::with_id("e").with("name", "Eve").with("team", "Blue"),
    ]
}

fn ids<'a>(rows: impl IntoIterator<Item = &'a Row>) -> Vec<String> {
    rows.into_iter().map(|r| r.id.clone()).collect()
}

fn config_with_filter(rule: FilterRule) -> ViewConfig {
    ViewConfig {
        filters: vec![rule],
        ..Default::default()
    }
}

#[test]
fn greater_than_keeps_only_larger_numbers() {
    let config = config_with_filter(FilterRule::new("qty", FilterOperator::GreaterThan, "10"));
    let out = pipeline::run(&qty_rows(), &[], &config);
    assert_eq!(ids(out.visible_rows()), ["2"]);
}

#[test]
fn filter_rule_accepts_field_alias_and_numeric_value() {
    let rule: FilterRule =
        serde_json::from_str(r#"{"field":"qty","operator":"greater_than","value":10}"#).unwrap();
    let out = pipeline::run(&qty_rows(), &[], &config_with_filter(rule));
    assert_eq!(ids(out.visible_rows()), ["2"]);
}

#[test]
fn contains_is_case_insensitive_and_exclusive() {
    let rows = people();
    let config = config_with_filter(FilterRule::new("name", FilterOperator::Contains, "A"));
    let out = pipeline::run(&rows, &[], &config);
    for row in out.visible_rows() {
        assert!(row.get("name").lower_text().contains('a'));
    }
    assert_eq!(ids(out.visible_rows()), ["a", "c", "d"]);
}

#[test]
fn empty_and_not_empty_partition_rows() {
    let rows = people();
    let empty = pipeline::run(
        &rows,
        &[],
        &config_with_filter(FilterRule::new("team", FilterOperator::IsEmpty, "")),
    );
    let not_empty = pipeline::run(
        &rows,
        &[],
        &config_with_filter(FilterRule::new("team", FilterOperator::IsNotEmpty, "")),
    );
    let mut union = ids(empty.visible_rows());
    let other = ids(not_empty.visible_rows());
    assert!(union.iter().all(|id| !other.contains(id)));
    union.extend(other);
    union.sort();
    assert_eq!(union, ["a", "b", "c", "d", "e"]);
}

#[test]
fn unknown_operator_matches_nothing() {
    let rule: FilterRule =
        serde_json::from_str(r#"{"columnId":"name","operator":"sounds_like","value":"x"}"#)
            .unwrap();
    assert_eq!(rule.operator, FilterOperator::Unknown);
    let out = pipeline::run(&people(), &[], &config_with_filter(rule));
    assert_eq!(out.total_rows, 0);
}

#[test]
fn filter_on_missing_column_is_a_miss() {
    let columns = vec![Column::text("name", "Name")];
    let config = config_with_filter(FilterRule::new("ghost", FilterOperator::IsEmpty, ""));
    let out = pipeline::run(&people(), &columns, &config);
    assert_eq!(out.total_rows, 0);
}

#[test]
fn descending_sort_puts_numbers_high_to_low() {
    let config = ViewConfig {
        sorts: vec![SortRule::new("qty", SortDirection::Desc)],
        ..Default::default()
    };
    let out = pipeline::run(&qty_rows(), &[], &config);
    let numeric: Vec<String> = out
        .visible_rows()
        .filter(|r| !r.get("qty").is_empty())
        .map(|r| r.get("qty").to_text())
        .collect();
    assert_eq!(numeric, ["15", "5"]);
    // Empty values rank lowest, so they trail a descending sort.
    assert_eq!(ids(out.visible_rows()), ["2", "1", "3"]);
}

#[test]
fn reversed_ascending_equals_descending_without_ties() {
    let rows = people();
    let asc = pipeline::run(
        &rows,
        &[],
        &ViewConfig {
            sorts: vec![SortRule::new("name", SortDirection::Asc)],
            ..Default::default()
        },
    );
    let desc = pipeline::run(
        &rows,
        &[],
        &ViewConfig {
            sorts: vec![SortRule::new("name", SortDirection::Desc)],
            ..Default::default()
        },
    );
    let mut reversed = ids(asc.visible_rows());
    reversed.reverse();
    assert_eq!(reversed, ids(desc.visible_rows()));
    // Text compares byte-wise, so capitalised names sort first.
    assert_eq!(ids(asc.visible_rows()), ["a", "c", "e", "b", "d"]);
}

#[test]
fn multi_key_sort_is_stable() {
    let config = ViewConfig {
        sorts: vec![
            SortRule::new("team", SortDirection::Asc),
            SortRule::new("score", SortDirection::Desc),
        ],
        ..Default::default()
    };
    let out = pipeline::run(&people(), &[], &config);
    assert_eq!(ids(out.visible_rows()), ["c", "b", "e", "d", "a"]);
}

#[test]
fn grouping_partitions_rows() {
    let config = ViewConfig {
        group_by: Some("team".into()),
        ..Default::default()
    };
    let out = pipeline::run(&people(), &[], &config);
    assert!(out.grouped);
    let keys: Vec<&str> = out.groups.iter().map(|g| g.key.as_str()).collect();
    assert_eq!(keys, ["Red", "Blue", UNGROUPED]);

    let mut all = ids(out.visible_rows());
    all.sort();
    assert_eq!(all, ["a", "b", "c", "d", "e"]);
    assert_eq!(
        out.groups.iter().map(|g| g.total).sum::<usize>(),
        out.total_rows
    );
}

#[test]
fn pages_concatenate_to_the_full_ordering() {
    let rows: Vec<Row> = (0..23)
        .map(|i| Row::with_id(i.to_string()).with("n", i as f64))
        .collect();
    for page_size in [1, 4, 7, 23, 50] {
        let pages = rows.len().div_ceil(page_size);
        let mut joined = Vec::new();
        for page in 0..pages {
            joined.extend(paginate(&rows, page, page_size));
        }
        assert_eq!(joined, rows, "page size {}", page_size);
        assert!(paginate(&rows, pages, page_size).is_empty());
    }
}

#[test]
fn pipeline_reports_page_counts() {
    let rows: Vec<Row> = (0..7).map(|i| Row::with_id(i.to_string())).collect();
    let config = ViewConfig {
        page: 1,
        page_size: 3,
        ..Default::default()
    };
    let out = pipeline::run(&rows, &[], &config);
    assert_eq!(out.total_pages, 3);
    assert_eq!(ids(out.visible_rows()), ["3", "4", "5"]);

    let out = pipeline::run(&rows, &[], &ViewConfig::default());
    assert_eq!(out.page_size, DEFAULT_PAGE_SIZE);
}

#[test]
fn color_rule_matches_case_insensitively() {
    let rows = vec![
        Row::with_id("1").with("status", "Done"),
        Row::with_id("2").with("status", "Open"),
    ];
    let config = ViewConfig {
        color_rules: vec![ColorRule {
            column_id: "status".into(),
            value: "done".into(),
            color: "#10b981".into(),
        }],
        ..Default::default()
    };
    let out = pipeline::run(&rows, &[], &config);
    assert_eq!(out.row_colors["1"], "#10b981");
    assert_eq!(out.row_colors["2"], TRANSPARENT);
}

#[test]
fn manual_row_color_beats_rules() {
    let mut row = Row::with_id("1").with("status", "done");
    row.row_color = Some("#ff0000".into());
    let config = ViewConfig {
        color_rules: vec![ColorRule {
            column_id: "status".into(),
            value: "done".into(),
            color: "#10b981".into(),
        }],
        ..Default::default()
    };
    let out = pipeline::run(&[row], &[], &config);
    assert_eq!(out.row_colors["1"], "#ff0000");
}

fn cell_rule(id: &str, column: &str, op: FilterOperator, value: &str, color: &str) -> CellColorRule {
    CellColorRule {
        id: id.into(),
        column_id: column.into(),
        operator: op,
        value: value.into(),
        color: color.into(),
        enabled: true,
    }
}

#[test]
fn cell_color_rules_are_idempotent_and_first_match_wins() {
    let rows = people();
    let mut disabled = cell_rule("r0", "score", FilterOperator::GreaterThan, "0", "#000000");
    disabled.enabled = false;
    let rules = vec![
        disabled,
        cell_rule("r1", "score", FilterOperator::GreaterThan, "25", "#ef4444"),
        cell_rule("r2", "score", FilterOperator::GreaterThan, "15", "#f59e0b"),
    ];
    let first = compute_cell_colors(&rows, &[], &rules);
    let second = compute_cell_colors(&rows, &[], &rules);
    assert_eq!(first, second);
    assert_eq!(first.get("a", "score"), Some("#ef4444"));
    assert_eq!(first.get("c", "score"), Some("#f59e0b"));
    assert_eq!(first.get("b", "score"), None);
}

#[test]
fn cell_color_filter_reads_rule_output_and_imported_colors() {
    let mut imported = Row::with_id("x").with("name", "Xavier");
    imported
        .cell_colors
        .insert("name".into(), "#FFFF00".into());
    let mut rows = people();
    rows.push(imported);

    let config = ViewConfig {
        filters: vec![FilterRule::new(
            "__cell_color__",
            FilterOperator::Is,
            "score:#EF4444",
        )],
        cell_color_rules: vec![cell_rule(
            "r1",
            "score",
            FilterOperator::GreaterThan,
            "25",
            "#ef4444",
        )],
        ..Default::default()
    };
    let out = pipeline::run(&rows, &[], &config);
    assert_eq!(ids(out.visible_rows()), ["a", "d"]);

    let config = config_with_filter(FilterRule::new(
        "__cell_color__",
        FilterOperator::Is,
        "#ffff00",
    ));
    let out = pipeline::run(&rows, &[], &config);
    assert_eq!(ids(out.visible_rows()), ["x"]);
}

#[test]
fn search_looks_at_every_value() {
    let config = ViewConfig {
        search: "  BLUE ".into(),
        ..Default::default()
    };
    let out = pipeline::run(&people(), &[], &config);
    assert_eq!(ids(out.visible_rows()), ["b", "e"]);
}

#[test]
fn date_range_is_inclusive() {
    let rows = vec![
        Row::with_id("1").with("due", "2024-01-01"),
        Row::with_id("2").with("due", "1/15/2024"),
        Row::with_id("3").with("due", "2024-02-01T10:00:00Z"),
        Row::with_id("4").with("due", "soon"),
    ];
    let config: ViewConfig = serde_json::from_str(
        r#"{"dateRange":{"columnId":"due","start":"2024-01-01","end":"2024-01-31"}}"#,
    )
    .unwrap();
    let out = pipeline::run(&rows, &[], &config);
    assert_eq!(ids(out.visible_rows()), ["1", "2"]);
}
