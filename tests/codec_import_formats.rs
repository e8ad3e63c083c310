use std::io::{Cursor, Write};

use scorebookd::codec::delimited::encode_csv;
use scorebookd::codec::{self, DecodeError, ImportFormat};
use scorebookd::config::ImportConfig;
use scorebookd::db;
use scorebookd::import::{self, BatchError, ImportError};
use scorebookd::store::StudentRecord;
use zip::write::FileOptions;
use zip::ZipWriter;

const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"
  xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheets><sheet name="成绩" sheetId="1" r:id="rId1"/></sheets>
</workbook>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/scores.xml"/>
</Relationships>"#;

fn xlsx(shared: &[&str], sheet_rows: &str) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = FileOptions::default();
    let mut put = |name: &str, body: &str| {
        zip.start_file(name, opts).expect("start entry");
        zip.write_all(body.as_bytes()).expect("write entry");
    };
    put("xl/workbook.xml", WORKBOOK);
    put("xl/_rels/workbook.xml.rels", WORKBOOK_RELS);
    let sst: String = shared.iter().map(|s| format!("<si><t>{s}</t></si>")).collect();
    put(
        "xl/sharedStrings.xml",
        &format!(
            r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">{sst}</sst>"#
        ),
    );
    put(
        "xl/worksheets/scores.xml",
        &format!(
            r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{sheet_rows}</sheetData></worksheet>"#
        ),
    );
    zip.finish().expect("finish").into_inner()
}

fn header_row() -> &'static str {
    r#"<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1" t="s"><v>2</v></c><c r="D1" t="s"><v>3</v></c></row>"#
}

const HEADERS: [&str; 4] = ["学号", "姓名", "课程1成绩", "课程2成绩"];

#[test]
fn xlsx_first_sheet_is_resolved_through_relationships() {
    let mut shared = HEADERS.to_vec();
    shared.push("李雷");
    let rows = format!(
        r#"{}<row r="2"><c r="A2" t="inlineStr"><is><t>2024001</t></is></c><c r="B2" t="s"><v>4</v></c><c r="C2"><v>88</v></c><c r="D2"><v>92.5</v></c></row>"#,
        header_row()
    );
    let table = codec::decode(&xlsx(&shared, &rows), "XLSX", &ImportConfig::default())
        .expect("decode");
    assert_eq!(table.format, ImportFormat::Xlsx);
    assert_eq!(table.encoding, None);
    assert_eq!(table.rows.len(), 1);
    let row = &table.rows[0];
    assert_eq!(row.line, 2);
    assert_eq!(row.field("学号"), "2024001");
    assert_eq!(row.field("姓名"), "李雷");
    assert_eq!(row.field("课程1成绩"), "88");
    assert_eq!(row.field("课程2成绩"), "92.5");
}

#[test]
fn xlsx_with_only_a_header_is_empty() {
    let err = codec::decode(&xlsx(&HEADERS, header_row()), "xlsx", &ImportConfig::default())
        .expect_err("empty");
    assert_eq!(err, DecodeError::EmptyFile);
}

#[test]
fn xlsx_row_errors_name_the_sheet_row() {
    let rows = format!(
        "{}{}{}",
        header_row(),
        r#"<row r="2"><c r="A2" t="inlineStr"><is><t>A1</t></is></c><c r="B2" t="inlineStr"><is><t>Li</t></is></c><c r="C2"><v>80</v></c><c r="D2"><v>70</v></c></row>"#,
        r#"<row r="5"><c r="A5" t="inlineStr"><is><t>A2</t></is></c><c r="B5" t="inlineStr"><is><t>Wang</t></is></c><c r="C5"><v>105</v></c><c r="D5"><v>60</v></c></row>"#
    );
    let bytes = xlsx(&HEADERS, &rows);

    let table = codec::decode(&bytes, "xlsx", &ImportConfig::default()).expect("decode");
    let lines: Vec<usize> = table.rows.iter().map(|r| r.line).collect();
    assert_eq!(lines, vec![2, 5]);

    let conn = db::open_in_memory().expect("db");
    let err = import::import_bytes(&conn, &bytes, "xlsx", &ImportConfig::default())
        .expect_err("out of range");
    let ImportError::Batch(BatchError::Rows(failures)) = &err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].to_string(), "第5行: 成绩必须在0-100之间");
}

#[test]
fn xlsx_cell_reference_past_last_column_is_malformed() {
    let rows = format!(
        r#"{}<row r="2"><c r="ZZZZZZZZZZZZZZZZ2"><v>1</v></c></row>"#,
        header_row()
    );
    let err = codec::decode(&xlsx(&HEADERS, &rows), "xlsx", &ImportConfig::default())
        .expect_err("malformed");
    assert_eq!(err.kind(), "malformed");
}

#[test]
fn missing_column_is_named_exactly() {
    let bytes = "学号,姓名,课程1成绩\nA1,Li,90\n".as_bytes();
    let err = codec::decode(bytes, "csv", &ImportConfig::default()).expect_err("missing");
    assert_eq!(
        err,
        DecodeError::MissingColumns {
            missing: vec!["课程2成绩".to_string()],
            present: vec!["学号".to_string(), "姓名".to_string(), "课程1成绩".to_string()],
        }
    );
    let message = err.to_string();
    assert!(message.contains("文件缺少以下必需列：课程2成绩"));
    assert!(message.contains("当前文件的列名：学号, 姓名, 课程1成绩"));
}

#[test]
fn extra_columns_are_ignored_and_order_is_free() {
    let bytes = "备注,课程2成绩,姓名,学号,课程1成绩\nx,70,Li,A1,80\n".as_bytes();
    let table = codec::decode(bytes, ".csv", &ImportConfig::default()).expect("decode");
    assert_eq!(table.rows[0].field("学号"), "A1");
    assert_eq!(table.rows[0].field("课程2成绩"), "70");
    assert_eq!(table.encoding, Some("utf-8-sig"));
}

#[test]
fn header_only_csv_is_empty() {
    let bytes = "学号,姓名,课程1成绩,课程2成绩\n".as_bytes();
    let err = codec::decode(bytes, "csv", &ImportConfig::default()).expect_err("empty");
    assert_eq!(err, DecodeError::EmptyFile);
    assert_eq!(err.to_string(), "文件中没有数据");
}

#[test]
fn unsupported_extension_is_rejected() {
    let err = codec::decode(b"a,b\n1,2\n", "xls", &ImportConfig::default()).expect_err("xls");
    assert_eq!(err.kind(), "unsupported_format");
}

#[test]
fn exported_csv_decodes_back_to_the_same_rows() {
    let records = vec![
        StudentRecord::new("2024001", "李雷", 88.0, 92.5),
        StudentRecord::new("2024002", "Han, Meimei", 60.0, 100.0),
    ];
    let bytes = encode_csv(&records).expect("encode");
    assert!(bytes.starts_with(b"\xEF\xBB\xBF"));

    let table = codec::decode(&bytes, "csv", &ImportConfig::default()).expect("decode");
    assert_eq!(table.headers[..2], ["学号".to_string(), "姓名".to_string()]);
    let decoded: Vec<(String, String, f64, f64)> = table
        .rows
        .iter()
        .map(|r| {
            (
                r.field("学号").to_string(),
                r.field("姓名").to_string(),
                r.field("课程1成绩").parse().expect("score a"),
                r.field("课程2成绩").parse().expect("score b"),
            )
        })
        .collect();
    let expected: Vec<(String, String, f64, f64)> = records
        .iter()
        .map(|r| (r.student_number.clone(), r.name.clone(), r.score_a, r.score_b))
        .collect();
    assert_eq!(decoded, expected);
}
