//! Game catalog: lists the ROMs available to the browser client and serves
//! them by name.
//!
//! Independent of the pairing engine; it only reads the games directory.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::relay::RelayState;

/// File extension of playable ROMs.
const ROM_EXTENSION: &str = "nes";

/// Errors returned when resolving a ROM by name.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The name is not a plain `.nes` file name.
    #[error("invalid game name: {0}")]
    InvalidName(String),
    /// No such ROM in the games directory.
    #[error("game not found: {0}")]
    NotFound(String),
    /// Reading the ROM failed.
    #[error("failed to read game {name}: {source}")]
    Io {
        /// Requested name.
        name: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::InvalidName(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Directory of `.nes` ROMs.
#[derive(Debug, Clone)]
pub struct Catalog {
    games_dir: PathBuf,
}

impl Catalog {
    /// Creates a catalog over `games_dir`.
    #[must_use]
    pub fn new(games_dir: impl Into<PathBuf>) -> Self {
        Self {
            games_dir: games_dir.into(),
        }
    }

    /// File names of all ROMs in the games directory, sorted.
    ///
    /// An unreadable directory is logged and reported as empty.
    pub async fn list(&self) -> Vec<String> {
        let mut entries = match tokio::fs::read_dir(&self.games_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.games_dir.display(), error = %e, "cannot read games directory");
                return Vec::new();
            }
        };

        let mut games = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
                    let file_name = entry.file_name();
                    if let Some(name) = file_name.to_str()
                        && is_file
                        && is_rom_name(name)
                    {
                        games.push(name.to_string());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(dir = %self.games_dir.display(), error = %e, "games directory listing interrupted");
                    break;
                }
            }
        }
        games.sort();
        games
    }

    /// Resolves `name` to a path inside the games directory.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidName`] unless `name` is a bare file name
    /// with the `.nes` extension.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, CatalogError> {
        if !is_rom_name(name) {
            return Err(CatalogError::InvalidName(name.to_string()));
        }
        Ok(self.games_dir.join(name))
    }

    /// Reads the ROM called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidName`], [`CatalogError::NotFound`], or
    /// [`CatalogError::Io`].
    pub async fn read(&self, name: &str) -> Result<Vec<u8>, CatalogError> {
        let path = self.resolve(name)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CatalogError::NotFound(name.to_string())
            } else {
                CatalogError::Io {
                    name: name.to_string(),
                    source: e,
                }
            }
        })
    }
}

/// Whether `name` is a bare file name ending in `.nes`.
fn is_rom_name(name: &str) -> bool {
    let path = Path::new(name);
    !name.contains('\\')
        && path.file_name() == Some(OsStr::new(name))
        && path.extension() == Some(OsStr::new(ROM_EXTENSION))
}

/// Body of `GET /gamelist`.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct GameList {
    /// ROM file names.
    pub games: Vec<String>,
}

/// Query string of `GET /games`.
#[derive(Debug, serde::Deserialize)]
pub struct GameQuery {
    /// ROM file name.
    pub name: String,
}

/// `GET /gamelist`
pub async fn list_handler(State(state): State<Arc<RelayState>>) -> Json<GameList> {
    Json(GameList {
        games: state.catalog.list().await,
    })
}

/// `GET /games?name=<file>`
pub async fn game_handler(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<GameQuery>,
) -> Result<Response, CatalogError> {
    let rom = state.catalog.read(&query.name).await.inspect_err(|e| {
        tracing::debug!(name = %query.name, error = %e, "game request failed");
    })?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], rom).into_response())
}
