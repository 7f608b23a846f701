//! Downloadable artifacts: error reports and blank import templates.
//!
//! XLSX output is a minimal OOXML package (workbook, one worksheet, inline
//! strings) zipped by hand. It carries no styles, which every reader accepts.

use std::{
    fs::File,
    io::{BufWriter, Seek, Write},
    path::Path,
};

use anyhow::{Context, Result};
use quick_xml::escape::escape;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::{
    io_utils::{self, DEFAULT_CSV_DELIMITER},
    schema::{EntityType, labels_for},
    validate::ValidationError,
};

pub const ERROR_REPORT_HEADERS: [&str; 4] = ["Row", "Field", "Value", "Error"];
const COLUMN_WIDTH_PADDING: usize = 4;
const MIN_COLUMN_WIDTH: usize = 10;

fn write_error_rows<W: Write>(
    writer: &mut csv::Writer<W>,
    errors: &[ValidationError],
) -> Result<()> {
    writer.write_record(ERROR_REPORT_HEADERS)?;
    for error in errors {
        writer.write_record([
            error.row.to_string().as_str(),
            error.field.as_str(),
            error.value.as_str(),
            error.message.as_str(),
        ])?;
    }
    writer.flush().context("Flushing error report")?;
    Ok(())
}

/// Writes `Row,Field,Value,Error` lines with every cell quoted.
pub fn write_errors<W: Write>(writer: W, errors: &[ValidationError]) -> Result<()> {
    write_error_rows(
        &mut io_utils::csv_writer(writer, DEFAULT_CSV_DELIMITER),
        errors,
    )
}

/// Error report to `path`, or stdout when `path` is `None` or `-`.
pub fn write_error_report(path: Option<&Path>, errors: &[ValidationError]) -> Result<()> {
    let mut writer = io_utils::open_csv_writer(path, DEFAULT_CSV_DELIMITER)?;
    write_error_rows(&mut writer, errors)
}

pub fn write_csv_template<W: Write>(writer: W, entity: EntityType) -> Result<()> {
    let mut writer = io_utils::csv_writer(writer, DEFAULT_CSV_DELIMITER);
    writer.write_record(labels_for(entity))?;
    writer.flush().context("Flushing CSV template")?;
    Ok(())
}

pub fn write_xlsx_template(path: &Path, entity: EntityType) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Creating template {path:?}"))?;
    let mut writer = write_xlsx(
        BufWriter::new(file),
        &entity.display_name(),
        &labels_for(entity),
        &[],
    )
    .with_context(|| format!("Writing template {path:?}"))?;
    writer.flush().context("Flushing XLSX template")?;
    Ok(())
}

/// `0` → `A`, `25` → `Z`, `26` → `AA`.
fn column_letter(mut idx: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (idx % 26) as u8);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

fn sheet_xml(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><cols>"#,
    );
    for (idx, header) in headers.iter().enumerate() {
        let width = (header.chars().count() + COLUMN_WIDTH_PADDING).max(MIN_COLUMN_WIDTH);
        xml.push_str(&format!(
            r#"<col min="{n}" max="{n}" width="{width}" customWidth="1"/>"#,
            n = idx + 1
        ));
    }
    xml.push_str("</cols><sheetData>");
    let all_rows = std::iter::once(headers).chain(rows.iter().map(Vec::as_slice));
    for (row_idx, cells) in all_rows.enumerate() {
        let row_number = row_idx + 1;
        xml.push_str(&format!(r#"<row r="{row_number}">"#));
        for (col_idx, cell) in cells.iter().enumerate() {
            if cell.is_empty() {
                continue;
            }
            xml.push_str(&format!(
                r#"<c r="{}{row_number}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                column_letter(col_idx),
                escape(cell.as_str())
            ));
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

fn workbook_xml(sheet_name: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        escape(sheet_name)
    )
}

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

/// Writes a single-sheet workbook; the header row is always present.
pub fn write_xlsx<W: Write + Seek>(
    writer: W,
    sheet_name: &str,
    headers: &[String],
    rows: &[Vec<String>],
) -> Result<W> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(writer);
    let parts = [
        ("[Content_Types].xml", CONTENT_TYPES_XML.to_string()),
        ("_rels/.rels", ROOT_RELS_XML.to_string()),
        ("xl/workbook.xml", workbook_xml(sheet_name)),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS_XML.to_string()),
        ("xl/worksheets/sheet1.xml", sheet_xml(headers, rows)),
    ];
    for (name, contents) in parts {
        zip.start_file(name, options)
            .with_context(|| format!("Adding {name} to workbook"))?;
        zip.write_all(contents.as_bytes())?;
    }
    let writer = zip.finish().context("Finalizing workbook")?;
    Ok(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::{Data, Reader, Xlsx, open_workbook_from_rs};
    use std::io::Cursor;

    #[test]
    fn column_letters_roll_over() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(27), "AB");
        assert_eq!(column_letter(701), "ZZ");
        assert_eq!(column_letter(702), "AAA");
    }

    #[test]
    fn error_report_quotes_every_cell() {
        let errors = vec![ValidationError {
            row: 4,
            field: "email".into(),
            value: "say \"hi\"".into(),
            message: "Invalid email address".into(),
        }];
        let mut buffer = Vec::new();
        write_errors(&mut buffer, &errors).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "\"Row\",\"Field\",\"Value\",\"Error\"\n\
             \"4\",\"email\",\"say \"\"hi\"\"\",\"Invalid email address\"\n"
        );
    }

    #[test]
    fn csv_template_is_a_single_header_row() {
        let mut buffer = Vec::new();
        write_csv_template(&mut buffer, EntityType::Client).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("\"Client Name\",\"Email\""));
    }

    #[test]
    fn xlsx_template_reads_back_with_named_sheet() {
        let labels = labels_for(EntityType::Lead);
        let cursor = write_xlsx(Cursor::new(Vec::new()), "Leads", &labels, &[]).unwrap();
        let mut workbook: Xlsx<_> =
            open_workbook_from_rs(Cursor::new(cursor.into_inner())).unwrap();
        assert_eq!(workbook.sheet_names(), vec!["Leads".to_string()]);
        let range = workbook.worksheet_range("Leads").unwrap();
        assert_eq!(range.height(), 1);
        let header = range.rows().next().unwrap();
        assert_eq!(header[0], Data::String("Name".into()));
        assert_eq!(header.len(), labels.len());
    }

    #[test]
    fn xlsx_cells_are_escaped() {
        let headers = vec!["Name".to_string(), "Notes".to_string()];
        let rows = vec![vec!["A & B".to_string(), "<b>bold</b>".to_string()]];
        let cursor = write_xlsx(Cursor::new(Vec::new()), "Data", &headers, &rows).unwrap();
        let mut workbook: Xlsx<_> =
            open_workbook_from_rs(Cursor::new(cursor.into_inner())).unwrap();
        let range = workbook.worksheet_range_at(0).unwrap().unwrap();
        assert_eq!(range.get_value((1, 0)), Some(&Data::String("A & B".into())));
        assert_eq!(
            range.get_value((1, 1)),
            Some(&Data::String("<b>bold</b>".into()))
        );
    }
}
