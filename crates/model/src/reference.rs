use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A timing point location, merged from Darwin reference data and the
/// CORPUS extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRef {
    pub tiploc: String,
    pub crs_darwin: Option<String>,
    pub crs_corpus: Option<String>,
    pub operator: Option<String>,
    pub name_darwin: Option<String>,
    pub name_corpus: Option<String>,
    pub name_short: Option<String>,
    pub name_full: Option<String>,
    pub category: Option<String>,
}

/// The trimmed location form embedded in endpoint lists and reason values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationOutline {
    pub tiploc: String,
    pub crs_darwin: Option<String>,
    pub category: Option<String>,
    pub name_short: Option<String>,
    pub name_full: Option<String>,
}

impl From<&LocationRef> for LocationOutline {
    fn from(loc: &LocationRef) -> Self {
        Self {
            tiploc: loc.tiploc.clone(),
            crs_darwin: loc.crs_darwin.clone(),
            category: loc.category.clone(),
            name_short: loc.name_short.clone(),
            name_full: loc.name_full.clone(),
        }
    }
}

impl LocationOutline {
    /// Fallback for tiplocs absent from the reference data.
    pub fn bare(tiploc: &str) -> Self {
        Self {
            tiploc: tiploc.to_owned(),
            crs_darwin: None,
            category: None,
            name_short: None,
            name_full: None,
        }
    }
}

/// Which reason table a code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonKind {
    #[serde(rename = "C")]
    Cancellation,
    #[serde(rename = "D")]
    Delay,
}

impl ReasonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancellation => "C",
            Self::Delay => "D",
        }
    }
}

/// A cancel or delay reason attached to a schedule, rendered to JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisruptionReason {
    pub code: String,
    pub message: Option<String>,
    pub location: Option<LocationOutline>,
    pub near: bool,
}

/// Immutable view of the reference tables, rebuilt on each refresh and
/// shared by handle. Readers never observe a partial update.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSnapshot {
    locations: HashMap<String, LocationRef>,
    reasons: HashMap<(String, ReasonKind), String>,
}

impl ReferenceSnapshot {
    pub fn new(
        locations: HashMap<String, LocationRef>,
        reasons: HashMap<(String, ReasonKind), String>,
    ) -> Self {
        Self { locations, reasons }
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn location(&self, tiploc: &str) -> Option<&LocationRef> {
        self.locations.get(tiploc)
    }

    /// The trimmed form of a location, falling back to a bare tiploc.
    pub fn outline(&self, tiploc: &str) -> LocationOutline {
        self.location(tiploc)
            .map(LocationOutline::from)
            .unwrap_or_else(|| LocationOutline::bare(tiploc))
    }

    pub fn reason(&self, code: &str, kind: ReasonKind) -> Option<&str> {
        self.reasons
            .get(&(code.to_owned(), kind))
            .map(String::as_str)
    }

    pub fn location_count(&self) -> usize {
        self.locations.len()
    }

    pub fn reason_count(&self) -> usize {
        self.reasons.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_location() -> LocationRef {
        LocationRef {
            tiploc: "YORK".to_owned(),
            crs_darwin: Some("YRK".to_owned()),
            crs_corpus: Some("YRK".to_owned()),
            operator: Some("XC".to_owned()),
            name_darwin: Some("York".to_owned()),
            name_corpus: Some("YORK".to_owned()),
            name_short: Some("York".to_owned()),
            name_full: Some("York".to_owned()),
            category: Some("S".to_owned()),
        }
    }

    #[test]
    fn outline_trims_corpus_fields() {
        let mut locations = HashMap::new();
        locations.insert("YORK".to_owned(), sample_location());
        let snapshot = ReferenceSnapshot::new(locations, HashMap::new());

        let outline = snapshot.outline("YORK");
        assert_eq!(outline.tiploc, "YORK");
        assert_eq!(outline.crs_darwin.as_deref(), Some("YRK"));
        let json = serde_json::to_value(&outline).unwrap();
        assert!(json.get("name_corpus").is_none());
        assert!(json.get("operator").is_none());
    }

    #[test]
    fn outline_for_unknown_tiploc_is_bare() {
        let snapshot = ReferenceSnapshot::default();
        let outline = snapshot.outline("NOWHERE");
        assert_eq!(outline.tiploc, "NOWHERE");
        assert!(outline.crs_darwin.is_none());
    }
}
