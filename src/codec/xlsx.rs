use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::result::ZipError;
use zip::ZipArchive;

use super::{malformed, DecodeError};

const WORKBOOK_ENTRY: &str = "xl/workbook.xml";
const WORKBOOK_RELS_ENTRY: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_ENTRY: &str = "xl/sharedStrings.xml";
const DEFAULT_SHEET_ENTRY: &str = "xl/worksheets/sheet1.xml";

/// Last column Excel can address (`XFD`), zero-based.
pub const MAX_COLUMN_INDEX: usize = 16_383;
/// Uncompressed size cap of one archive entry, as a multiple of the upload limit.
pub const MAX_INFLATION: usize = 20;

/// One worksheet row with its 1-based sheet row number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRow {
    pub number: usize,
    pub cells: Vec<String>,
}

/// Reads the first worksheet of an OOXML workbook. No archive entry may
/// inflate beyond `entry_limit` bytes.
pub fn decode_xlsx(bytes: &[u8], entry_limit: usize) -> Result<Vec<SheetRow>, DecodeError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(malformed)?;

    let sheet_entry = first_sheet_entry(&mut archive, entry_limit)?;
    let shared = match read_entry(&mut archive, SHARED_STRINGS_ENTRY, entry_limit)? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };
    let sheet_xml = read_entry(&mut archive, &sheet_entry, entry_limit)?
        .ok_or_else(|| malformed(format!("workbook is missing {sheet_entry}")))?;
    parse_sheet(&sheet_xml, &shared)
}

fn read_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
    limit: usize,
) -> Result<Option<String>, DecodeError> {
    let entry = match archive.by_name(name) {
        Ok(e) => e,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(malformed(e)),
    };
    let mut text = String::new();
    entry
        .take((limit as u64).saturating_add(1))
        .read_to_string(&mut text)
        .map_err(malformed)?;
    if text.len() > limit {
        return Err(malformed(format!("{name} inflates beyond {limit} bytes")));
    }
    Ok(Some(text))
}

/// Resolves the first `<sheet>` of the workbook through its relationship id.
fn first_sheet_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    limit: usize,
) -> Result<String, DecodeError> {
    let Some(workbook) = read_entry(archive, WORKBOOK_ENTRY, limit)? else {
        return Ok(DEFAULT_SHEET_ENTRY.to_string());
    };
    let Some(rel_id) = first_sheet_rel_id(&workbook)? else {
        return Ok(DEFAULT_SHEET_ENTRY.to_string());
    };
    let Some(rels) = read_entry(archive, WORKBOOK_RELS_ENTRY, limit)? else {
        return Ok(DEFAULT_SHEET_ENTRY.to_string());
    };
    let target = relationship_target(&rels, &rel_id)?;
    Ok(match target {
        Some(t) if t.starts_with('/') => t.trim_start_matches('/').to_string(),
        Some(t) => format!("xl/{t}"),
        None => DEFAULT_SHEET_ENTRY.to_string(),
    })
}

fn attr_by_local_name(e: &BytesStart<'_>, local: &[u8]) -> Result<Option<String>, DecodeError> {
    for attr in e.attributes() {
        let attr = attr.map_err(malformed)?;
        if attr.key.local_name().as_ref() == local {
            return Ok(Some(attr.unescape_value().map_err(malformed)?.into_owned()));
        }
    }
    Ok(None)
}

fn first_sheet_rel_id(workbook_xml: &str) -> Result<Option<String>, DecodeError> {
    let mut reader = Reader::from_str(workbook_xml);
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                return attr_by_local_name(&e, b"id");
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn relationship_target(rels_xml: &str, rel_id: &str) -> Result<Option<String>, DecodeError> {
    let mut reader = Reader::from_str(rels_xml);
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if attr_by_local_name(&e, b"Id")?.as_deref() == Some(rel_id) {
                    return attr_by_local_name(&e, b"Target");
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// Each `<si>` is the concatenation of its `<t>` runs.
fn parse_shared_strings(xml: &str) -> Result<Vec<String>, DecodeError> {
    let mut reader = Reader::from_str(xml);
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_item = false;
    let mut in_text = false;
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_item = true;
                    current.clear();
                }
                b"t" if in_item => in_text = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => out.push(String::new()),
            Event::Text(t) if in_text => current.push_str(&t.unescape().map_err(malformed)?),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => {
                    in_item = false;
                    out.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

#[derive(Default)]
struct CellState {
    col: usize,
    kind: Option<String>,
    text: String,
}

/// Rows are numbered by their `r` attribute; a row without one follows the
/// previous row.
fn parse_sheet(xml: &str, shared: &[String]) -> Result<Vec<SheetRow>, DecodeError> {
    let mut reader = Reader::from_str(xml);
    let mut rows: Vec<SheetRow> = Vec::new();
    let mut row: Option<SheetRow> = None;
    let mut cell: Option<CellState> = None;
    let mut capture = false;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => row = Some(open_row(&e, &rows)?),
                b"c" => {
                    let next_col = row.as_ref().map(|r| r.cells.len()).unwrap_or(0);
                    cell = Some(open_cell(&e, next_col)?);
                }
                b"v" | b"t" if cell.is_some() => capture = true,
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"row" => rows.push(open_row(&e, &rows)?),
                b"c" => {
                    if let Some(r) = row.as_mut() {
                        let c = open_cell(&e, r.cells.len())?;
                        place(&mut r.cells, c.col, String::new());
                    }
                }
                _ => {}
            },
            Event::Text(t) if capture => {
                if let Some(c) = cell.as_mut() {
                    c.text.push_str(&t.unescape().map_err(malformed)?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"c" => {
                    if let (Some(r), Some(c)) = (row.as_mut(), cell.take()) {
                        let value = cell_value(&c, shared)?;
                        place(&mut r.cells, c.col, value);
                    }
                }
                b"row" => rows.extend(row.take()),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rows)
}

fn open_row(e: &BytesStart<'_>, previous: &[SheetRow]) -> Result<SheetRow, DecodeError> {
    let next = previous.last().map(|r| r.number + 1).unwrap_or(1);
    let number = match attr_by_local_name(e, b"r")? {
        Some(n) => n
            .trim()
            .parse::<usize>()
            .map_err(|_| malformed(format!("bad row number {n:?}")))?,
        None => next,
    };
    Ok(SheetRow {
        number,
        cells: Vec::new(),
    })
}

fn open_cell(e: &BytesStart<'_>, next_col: usize) -> Result<CellState, DecodeError> {
    let col = match attr_by_local_name(e, b"r")? {
        Some(reference) => column_index(&reference)?.unwrap_or(next_col),
        None => next_col,
    };
    if col > MAX_COLUMN_INDEX {
        return Err(malformed(format!("column {} is beyond XFD", col + 1)));
    }
    Ok(CellState {
        col,
        kind: attr_by_local_name(e, b"t")?,
        text: String::new(),
    })
}

fn place(row: &mut Vec<String>, col: usize, value: String) {
    if row.len() <= col {
        row.resize(col + 1, String::new());
    }
    row[col] = value;
}

fn cell_value(c: &CellState, shared: &[String]) -> Result<String, DecodeError> {
    match c.kind.as_deref() {
        Some("s") => {
            let idx: usize = c
                .text
                .trim()
                .parse()
                .map_err(|_| malformed(format!("bad shared string index {:?}", c.text)))?;
            shared
                .get(idx)
                .cloned()
                .ok_or_else(|| malformed(format!("shared string {idx} out of range")))
        }
        _ => Ok(c.text.clone()),
    }
}

/// `"C7"` → 2. `None` when the reference has no column letters; a column
/// past `XFD` is malformed.
fn column_index(reference: &str) -> Result<Option<usize>, DecodeError> {
    let letters = reference.bytes().take_while(u8::is_ascii_alphabetic);
    let mut n = 0usize;
    let mut seen = false;
    for b in letters {
        seen = true;
        n = n
            .checked_mul(26)
            .and_then(|n| n.checked_add((b.to_ascii_uppercase() - b'A' + 1) as usize))
            .filter(|n| *n - 1 <= MAX_COLUMN_INDEX)
            .ok_or_else(|| malformed(format!("cell reference {reference} is beyond XFD")))?;
    }
    Ok(seen.then(|| n - 1))
}
