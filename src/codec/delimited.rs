use std::borrow::Cow;

use csv::{QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};
use encoding_rs::Encoding;

use super::{
    format_score, malformed, DecodeError, COL_CREATED_AT, COL_NAME, COL_SCORE_A, COL_SCORE_B,
    COL_STUDENT_NUMBER, COL_TOTAL,
};
use crate::store::StudentRecord;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const KNOWN_LABELS: [&str; 4] = ["gbk", "gb2312", "gb18030", "utf-8"];

pub const EXPORT_HEADERS: [&str; 6] = [
    COL_STUDENT_NUMBER,
    COL_NAME,
    COL_SCORE_A,
    COL_SCORE_B,
    COL_TOTAL,
    COL_CREATED_AT,
];

/// A candidate text encoding for CSV uploads.
///
/// `utf-8-sig` is UTF-8 with an optional leading BOM; every other label is
/// resolved through the WHATWG label table (`gb2312` resolves to GBK).
#[derive(Debug, Clone)]
pub struct CsvEncoding {
    label: &'static str,
    encoding: &'static Encoding,
}

impl CsvEncoding {
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase();
        if normalized == "utf-8-sig" || normalized == "utf8-sig" {
            return Some(Self {
                label: "utf-8-sig",
                encoding: encoding_rs::UTF_8,
            });
        }
        let encoding = Encoding::for_label(normalized.as_bytes())?;
        let label = KNOWN_LABELS
            .iter()
            .copied()
            .find(|l| *l == normalized)
            .unwrap_or(encoding.name());
        Some(Self { label, encoding })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Strict decode: any malformed sequence rejects this candidate.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
        let body = match bytes.strip_prefix(UTF8_BOM) {
            Some(rest) if self.encoding == encoding_rs::UTF_8 => rest,
            _ => bytes,
        };
        self.encoding
            .decode_without_bom_handling_and_without_replacement(body)
    }
}

/// Returns the winning encoding label and the raw cell grid (header row first).
pub fn decode_csv(
    bytes: &[u8],
    candidates: &[CsvEncoding],
) -> Result<(&'static str, Vec<Vec<String>>), DecodeError> {
    let (label, text) = candidates
        .iter()
        .find_map(|c| c.decode(bytes).map(|t| (c.label(), t)))
        .ok_or(DecodeError::BadEncoding)?;
    tracing::debug!(encoding = label, "csv upload decoded");

    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut grid = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(malformed)?;
        grid.push(record.iter().map(str::to_string).collect());
    }
    Ok((label, grid))
}

/// UTF-8 with BOM, `\n` line ends. Fields are quoted only when they contain a
/// delimiter, quote or line break, so plain rows stay byte-identical to an
/// unquoted join.
pub fn encode_csv(records: &[StudentRecord]) -> Result<Vec<u8>, csv::Error> {
    let mut wtr = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(UTF8_BOM.to_vec());
    wtr.write_record(EXPORT_HEADERS)?;
    for r in records {
        wtr.write_record([
            r.student_number.clone(),
            r.name.clone(),
            format_score(r.score_a),
            format_score(r.score_b),
            format_score(r.total()),
            r.created_at_text(),
        ])?;
    }
    wtr.into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;

    fn grid_of(bytes: &[u8]) -> Result<(&'static str, Vec<Vec<String>>), DecodeError> {
        decode_csv(bytes, &ImportConfig::default().csv_encodings)
    }

    #[test]
    fn utf8_with_bom_wins_first() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("学号,姓名\nA1,李雷\n".as_bytes());
        let (label, grid) = grid_of(&bytes).expect("decode");
        assert_eq!(label, "utf-8-sig");
        assert_eq!(grid[0], vec!["学号", "姓名"]);
        assert_eq!(grid[1], vec!["A1", "李雷"]);
    }

    #[test]
    fn gbk_bytes_fall_through_to_second_candidate() {
        let (bytes, _, had_errors) = encoding_rs::GBK.encode("学号,姓名\nA1,李雷\n");
        assert!(!had_errors);
        let (label, grid) = grid_of(&bytes).expect("decode");
        assert_eq!(label, "gbk");
        assert_eq!(grid[1][1], "李雷");
    }

    #[test]
    fn undecodable_bytes_are_bad_encoding() {
        // 0xFF is neither valid UTF-8 nor a GBK lead byte.
        let err = grid_of(b"\xFF\xFF").expect_err("bad encoding");
        assert_eq!(err, DecodeError::BadEncoding);
    }

    #[test]
    fn export_has_bom_header_and_fixed_field_order() {
        let mut rec = StudentRecord::new("S1", "Li", 90.0, 85.5);
        rec.created_at = None;
        let bytes = encode_csv(&[rec]).expect("encode");
        assert!(bytes.starts_with(UTF8_BOM));
        let text = std::str::from_utf8(&bytes[3..]).expect("utf8");
        assert_eq!(
            text,
            "学号,姓名,课程1成绩,课程2成绩,总成绩,录入时间\nS1,Li,90.0,85.5,175.5,\n"
        );
    }

    #[test]
    fn export_quotes_embedded_delimiters() {
        let rec = StudentRecord::new("S2", "Smith, J", 60.0, 60.0);
        let bytes = encode_csv(&[rec]).expect("encode");
        let text = String::from_utf8(bytes).expect("utf8");
        assert!(text.contains("S2,\"Smith, J\",60.0,60.0,120.0,"));
    }
}
