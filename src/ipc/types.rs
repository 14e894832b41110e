use std::path::PathBuf;

use crate::collab::Collaborators;
use crate::notify::{AlertDispatcher, AlertSink, NullSink};
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub alerts: Option<AlertDispatcher>,
    pub collaborators: Collaborators,
}

impl AppState {
    pub fn sink(&self) -> &dyn AlertSink {
        match &self.alerts {
            Some(d) => d,
            None => &NullSink,
        }
    }
}
