use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One line of stdin: `{id, method, params}`. `params` defaults to null so
/// parameterless methods like `health` need no params object.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Session state: the selected club workspace directory and the open
/// database inside it. Both are `None` until `workspace.select` succeeds.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
