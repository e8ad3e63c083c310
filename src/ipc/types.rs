use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::Deserialize;

use crate::auth::Session;
use crate::config::ImportConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Daemon-lifetime state owned by the stdin loop.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: Option<Session>,
    pub import_config: ImportConfig,
    pub pdf_font: Option<PathBuf>,
    /// Where snapshot and backup text files land (the process working directory).
    pub artifact_dir: PathBuf,
}

impl AppState {
    pub fn new(artifact_dir: PathBuf, pdf_font: Option<PathBuf>) -> Self {
        Self {
            workspace: None,
            db: None,
            session: None,
            import_config: ImportConfig::default(),
            pdf_font,
            artifact_dir,
        }
    }
}

/// What one authenticated request may touch. Built per request from
/// [`AppState`]; handlers never reach back into the state directly.
pub struct RequestContext<'a> {
    pub conn: &'a Connection,
    pub workspace: &'a Path,
    pub session: &'a Session,
    pub import_config: &'a ImportConfig,
    pub pdf_font: Option<&'a Path>,
    pub artifact_dir: &'a Path,
}
