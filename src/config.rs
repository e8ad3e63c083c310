use std::path::PathBuf;

use clap::Parser;
use serde_json::json;
use thiserror::Error;

use crate::codec::delimited::CsvEncoding;

pub const DEFAULT_MAX_IMPORT_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_CSV_ENCODINGS: [&str; 3] = ["utf-8-sig", "gbk", "gb2312"];
pub const IMPORT_SETTINGS_KEY: &str = "import.config";

#[derive(Debug, Parser)]
#[command(name = "scorebookd")]
#[command(about = "Student score book sidecar speaking JSON lines over stdio", long_about = None)]
pub struct Cli {
    /// Open this workspace at startup
    #[arg(long, env = "SCOREBOOK_WORKSPACE")]
    pub workspace: Option<PathBuf>,
    /// Emit logs as JSON lines on stderr
    #[arg(long, env = "SCOREBOOK_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
    /// TrueType font used by the PDF report (builtin Helvetica otherwise)
    #[arg(long, env = "SCOREBOOK_PDF_FONT")]
    pub pdf_font: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown csv encoding label: {0}")]
    UnknownEncoding(String),
    #[error("csvEncodings must be a non-empty array of labels")]
    EmptyEncodings,
    #[error("maxBytes must be a positive integer")]
    BadMaxBytes,
}

/// Knobs of the import pipeline. Workspace settings may override the defaults.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub max_bytes: usize,
    /// Tried in order; the first one that decodes cleanly wins.
    pub csv_encodings: Vec<CsvEncoding>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_IMPORT_BYTES,
            csv_encodings: DEFAULT_CSV_ENCODINGS
                .iter()
                .filter_map(|l| CsvEncoding::from_label(l))
                .collect(),
        }
    }
}

impl ImportConfig {
    /// Applies `{ "maxBytes": n, "csvEncodings": [..] }` on top of the defaults.
    pub fn from_settings(value: &serde_json::Value) -> Result<Self, ConfigError> {
        let mut cfg = ImportConfig::default();
        if let Some(v) = value.get("maxBytes") {
            let n = v.as_u64().filter(|n| *n > 0).ok_or(ConfigError::BadMaxBytes)?;
            cfg.max_bytes = n as usize;
        }
        if let Some(v) = value.get("csvEncodings") {
            let labels = v.as_array().ok_or(ConfigError::EmptyEncodings)?;
            if labels.is_empty() {
                return Err(ConfigError::EmptyEncodings);
            }
            let mut encodings = Vec::with_capacity(labels.len());
            for label in labels {
                let label = label.as_str().ok_or(ConfigError::EmptyEncodings)?;
                let enc = CsvEncoding::from_label(label)
                    .ok_or_else(|| ConfigError::UnknownEncoding(label.to_string()))?;
                encodings.push(enc);
            }
            cfg.csv_encodings = encodings;
        }
        Ok(cfg)
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "maxBytes": self.max_bytes,
            "csvEncodings": self.csv_encodings.iter().map(|e| e.label()).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_encoding_order() {
        let cfg = ImportConfig::default();
        assert_eq!(cfg.max_bytes, 5 * 1024 * 1024);
        let labels: Vec<_> = cfg.csv_encodings.iter().map(|e| e.label()).collect();
        assert_eq!(labels, vec!["utf-8-sig", "gbk", "gb2312"]);
    }

    #[test]
    fn settings_override_and_reject_unknown_labels() {
        let cfg = ImportConfig::from_settings(&json!({ "maxBytes": 1024, "csvEncodings": ["gbk"] }))
            .expect("valid overrides");
        assert_eq!(cfg.max_bytes, 1024);
        assert_eq!(cfg.csv_encodings.len(), 1);

        let err = ImportConfig::from_settings(&json!({ "csvEncodings": ["klingon"] }))
            .expect_err("unknown label");
        assert!(matches!(err, ConfigError::UnknownEncoding(_)));
        assert!(ImportConfig::from_settings(&json!({ "csvEncodings": [] })).is_err());
    }
}
