use serde::{Deserialize, Serialize};

/// An inter-service link between two schedules at a shared call point.
///
/// Join associations ("JJ") are stored inverted with category "JN" so that
/// every row points from a service to the *next* one; see
/// `darwin::transform::association_row`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub category: String,
    pub tiploc: String,
    pub main_rid: String,
    pub main_original_wt: String,
    pub assoc_rid: String,
    pub assoc_original_wt: String,
}
