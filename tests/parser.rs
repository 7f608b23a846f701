mod common;

use std::io::Cursor;

use common::{TestWorkspace, csv};
use crm_import::{
    config::ImportSettings,
    parser::{ParseError, ParseErrorKind, ParseOptions, SourceFormat, parse, parse_bytes},
    report::write_xlsx,
};

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn workbook_bytes(headers: &[&str], rows: &[&[&str]]) -> Vec<u8> {
    let rows = rows.iter().map(|r| strings(r)).collect::<Vec<_>>();
    write_xlsx(Cursor::new(Vec::new()), "Sheet1", &strings(headers), &rows)
        .expect("write workbook")
        .into_inner()
}

#[test]
fn csv_and_xlsx_uploads_produce_the_same_rows() {
    let workspace = TestWorkspace::new();
    let csv_path = workspace.write(
        "people.csv",
        &csv(&[
            "First Name,Email,City",
            "Ada,ada@example.com,London",
            "Grace,grace@example.com,",
        ]),
    );
    let xlsx_path = workspace.write_bytes(
        "people.xlsx",
        &workbook_bytes(
            &["First Name", "Email", "City"],
            &[
                &["Ada", "ada@example.com", "London"],
                &["Grace", "grace@example.com", ""],
            ],
        ),
    );

    let from_csv = parse(&csv_path, &ParseOptions::default()).expect("parse csv");
    let from_xlsx = parse(&xlsx_path, &ParseOptions::default()).expect("parse xlsx");

    assert_eq!(from_csv.format, SourceFormat::Csv);
    assert_eq!(from_xlsx.format, SourceFormat::Xlsx);
    assert_eq!(from_xlsx.file_name, "people.xlsx");
    assert_eq!(from_csv.headers, from_xlsx.headers);
    assert_eq!(from_csv.total_rows, 2);
    assert_eq!(from_xlsx.total_rows, 2);
    assert_eq!(from_xlsx.value(0, "Email"), Some("ada@example.com"));
    assert_eq!(from_xlsx.value(1, "City"), Some(""));
    assert_eq!(from_csv.rows, from_xlsx.rows);
}

#[test]
fn header_only_workbook_is_a_structure_error() {
    let bytes = workbook_bytes(&["Name", "Email"], &[]);
    let err = parse_bytes("leads.xlsx", &bytes, &ParseOptions::default()).unwrap_err();
    assert!(matches!(err, ParseError::NoDataRows));
    assert_eq!(err.kind(), ParseErrorKind::Structure);
}

#[test]
fn workbook_blank_rows_are_skipped() {
    let bytes = workbook_bytes(
        &["Name"],
        &[&["Acme"], &[""], &["Globex"]],
    );
    let parsed = parse_bytes("clients.xlsx", &bytes, &ParseOptions::default()).unwrap();
    assert_eq!(parsed.total_rows, 2);
    assert_eq!(parsed.value(1, "Name"), Some("Globex"));
}

#[test]
fn workbook_with_blank_first_row_has_no_headers() {
    let bytes = workbook_bytes(&["", ""], &[&["Name", "Email"], &["Ada", "a@b.co"]]);
    let err = parse_bytes("upload.xlsx", &bytes, &ParseOptions::default()).unwrap_err();
    assert!(matches!(err, ParseError::MissingHeaders));
    assert_eq!(err.kind(), ParseErrorKind::Structure);
}

#[test]
fn workbook_leading_blank_columns_keep_their_place() {
    let bytes = workbook_bytes(
        &["", "Name", "Email"],
        &[&["", "Ada", "ada@example.com"], &["", "Grace", "grace@example.com"]],
    );
    let parsed = parse_bytes("upload.xlsx", &bytes, &ParseOptions::default()).unwrap();
    assert_eq!(parsed.headers, vec!["", "Name", "Email"]);
    assert_eq!(parsed.total_rows, 2);
    assert_eq!(parsed.value(0, "Name"), Some("Ada"));
    assert_eq!(parsed.value(1, "Email"), Some("grace@example.com"));
}

#[test]
fn corrupt_workbook_is_a_read_error() {
    let err = parse_bytes("broken.xlsx", b"not a zip", &ParseOptions::default()).unwrap_err();
    assert!(matches!(err, ParseError::Spreadsheet(_)));
    assert_eq!(err.kind(), ParseErrorKind::Read);
}

#[test]
fn size_ceiling_comes_from_settings() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("big.csv", &csv(&["Name", "A very long company name"]));
    let settings = ImportSettings {
        max_file_bytes: 10,
        ..ImportSettings::default()
    };
    let err = parse(&path, &ParseOptions::from_settings(&settings)).unwrap_err();
    assert!(matches!(err, ParseError::TooLarge { limit: 10, .. }));
    assert_eq!(err.kind(), ParseErrorKind::Size);
}

#[test]
fn unsupported_format_is_rejected_before_size_check() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("notes.txt", "Name\nAda\n");
    let err = parse(&path, &ParseOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ParseErrorKind::Format);
}

#[test]
fn missing_file_is_a_read_error() {
    let workspace = TestWorkspace::new();
    let err = parse(&workspace.file("absent.csv"), &ParseOptions::default()).unwrap_err();
    assert!(matches!(err, ParseError::Io { .. }));
}

#[test]
fn explicit_delimiter_overrides_sniffing() {
    let options = ParseOptions {
        delimiter: Some(b'|'),
        ..ParseOptions::default()
    };
    let parsed = parse_bytes(
        "pipes.csv",
        csv(&["Name|Notes", "Acme|a, b; c"]).as_bytes(),
        &options,
    )
    .unwrap();
    assert_eq!(parsed.headers, vec!["Name", "Notes"]);
    assert_eq!(parsed.value(0, "Notes"), Some("a, b; c"));
}
