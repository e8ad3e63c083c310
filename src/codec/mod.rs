//! Conversion between spreadsheet files and student rows.
//!
//! Import goes through [`decode`], which picks the reader by file extension and
//! yields header-keyed rows. Export lives in [`delimited::encode_csv`] and
//! [`pdf::render_pdf`].

pub mod delimited;
pub mod pdf;
pub mod xlsx;

use std::collections::HashMap;
use std::fmt::Display;

use thiserror::Error;

use crate::config::ImportConfig;

pub const COL_STUDENT_NUMBER: &str = "学号";
pub const COL_NAME: &str = "姓名";
pub const COL_SCORE_A: &str = "课程1成绩";
pub const COL_SCORE_B: &str = "课程2成绩";
pub const COL_TOTAL: &str = "总成绩";
pub const COL_CREATED_AT: &str = "录入时间";

pub const REQUIRED_COLUMNS: [&str; 4] = [COL_STUDENT_NUMBER, COL_NAME, COL_SCORE_A, COL_SCORE_B];

/// First data row is reported as line 2 (the header is line 1).
pub const FIRST_DATA_LINE: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("文件格式不正确，仅支持CSV和Excel(xlsx)格式（收到：{extension}）")]
    UnsupportedFormat { extension: String },
    #[error("文件大小超过限制：{size} 字节 > {limit} 字节")]
    TooLarge { size: usize, limit: usize },
    #[error("无法正确读取CSV文件，请检查文件格式和编码")]
    BadEncoding,
    #[error(
        "文件格式错误！文件缺少以下必需列：{}\n当前文件的列名：{}\n请确保文件第一行包含以下列名：学号、姓名、课程1成绩、课程2成绩",
        .missing.join(", "),
        .present.join(", ")
    )]
    MissingColumns {
        missing: Vec<String>,
        present: Vec<String>,
    },
    #[error("文件中没有数据")]
    EmptyFile,
    #[error("读取文件失败：{0}")]
    Malformed(String),
}

impl DecodeError {
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::UnsupportedFormat { .. } => "unsupported_format",
            DecodeError::TooLarge { .. } => "too_large",
            DecodeError::BadEncoding => "bad_encoding",
            DecodeError::MissingColumns { .. } => "missing_columns",
            DecodeError::EmptyFile => "empty_file",
            DecodeError::Malformed(_) => "malformed",
        }
    }
}

pub(crate) fn malformed(e: impl Display) -> DecodeError {
    DecodeError::Malformed(e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Csv,
    Xlsx,
}

impl ImportFormat {
    /// Accepts `csv`, `.csv`, `XLSX`, ...; anything else is unsupported.
    pub fn from_extension(extension: &str) -> Result<Self, DecodeError> {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Ok(ImportFormat::Csv),
            "xlsx" => Ok(ImportFormat::Xlsx),
            _ => Err(DecodeError::UnsupportedFormat {
                extension: extension.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImportFormat::Csv => "csv",
            ImportFormat::Xlsx => "xlsx",
        }
    }
}

/// One decoded data row: header name to raw cell text.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub line: usize,
    pub fields: HashMap<String, String>,
}

impl RawRow {
    /// Missing cells read as empty.
    pub fn field(&self, column: &str) -> &str {
        self.fields.get(column).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone)]
pub struct DecodedTable {
    pub format: ImportFormat,
    /// Label of the CSV encoding that decoded the file.
    pub encoding: Option<&'static str>,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Size and extension are checked before any parsing.
pub fn decode(
    bytes: &[u8],
    extension: &str,
    config: &ImportConfig,
) -> Result<DecodedTable, DecodeError> {
    if bytes.len() > config.max_bytes {
        return Err(DecodeError::TooLarge {
            size: bytes.len(),
            limit: config.max_bytes,
        });
    }
    let format = ImportFormat::from_extension(extension)?;

    let (encoding, grid) = match format {
        ImportFormat::Csv => {
            let (label, grid) = delimited::decode_csv(bytes, &config.csv_encodings)?;
            let grid: Grid = grid.into_iter().map(|cells| (None, cells)).collect();
            (Some(label), grid)
        }
        ImportFormat::Xlsx => {
            let entry_limit = config.max_bytes.saturating_mul(xlsx::MAX_INFLATION);
            let grid: Grid = xlsx::decode_xlsx(bytes, entry_limit)?
                .into_iter()
                .map(|r| (Some(r.number), r.cells))
                .collect();
            (None, grid)
        }
    };
    let (headers, rows) = rows_from_grid(grid)?;
    Ok(DecodedTable {
        format,
        encoding,
        headers,
        rows,
    })
}

/// Grid rows paired with their source row number, when the format records one.
type Grid = Vec<(Option<usize>, Vec<String>)>;

/// First grid row is the header. Blank rows are skipped; rows without a source
/// number are counted from [`FIRST_DATA_LINE`] over the rows kept.
fn rows_from_grid(grid: Grid) -> Result<(Vec<String>, Vec<RawRow>), DecodeError> {
    let mut iter = grid.into_iter();
    let headers: Vec<String> = iter
        .next()
        .map(|(_, cells)| cells)
        .unwrap_or_default()
        .into_iter()
        .map(|h| h.replace('\u{feff}', ""))
        .collect();

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !headers.iter().any(|h| h == *c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(DecodeError::MissingColumns {
            missing,
            present: headers,
        });
    }

    let rows: Vec<RawRow> = iter
        .filter(|(_, cells)| cells.iter().any(|c| !c.trim().is_empty()))
        .enumerate()
        .map(|(idx, (number, cells))| {
            let mut fields = HashMap::with_capacity(headers.len());
            for (h, cell) in headers.iter().zip(cells) {
                // Duplicate header names: first column wins.
                fields.entry(h.clone()).or_insert(cell);
            }
            RawRow {
                line: number.unwrap_or(idx + FIRST_DATA_LINE),
                fields,
            }
        })
        .collect();
    if rows.is_empty() {
        return Err(DecodeError::EmptyFile);
    }
    Ok((headers, rows))
}

/// Integral scores keep one decimal (`90.0`); others print their shortest form.
pub fn format_score(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}
