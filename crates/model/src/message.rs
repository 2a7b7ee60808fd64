use serde::{Deserialize, Serialize};

/// A station message ("OW" record): free-text HTML scoped to a set of
/// stations. A message with an empty station list deletes the stored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationMessage {
    pub id: String,
    pub category: Option<String>,
    pub severity: Option<String>,
    pub suppress: bool,
    pub stations: Vec<String>,
    pub body: String,
}
