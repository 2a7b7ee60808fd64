//! Reference-data upserts and the in-process snapshot.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use darwin::record::ReferenceRecord;
use model::reference::{LocationRef, ReasonKind, ReferenceSnapshot};

use crate::writer::{Statement, WriteOp};

const UPSERT_LOCATION: &str = "\
    INSERT INTO darwin_locations \
        (tiploc, crs_darwin, crs_corpus, operator, name_short, name_full, \
         dict, category, name_darwin, name_corpus) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
    ON CONFLICT (tiploc) DO UPDATE SET \
        (crs_darwin, crs_corpus, operator, name_short, name_full, \
         dict, category, name_darwin, name_corpus) = \
        (EXCLUDED.crs_darwin, EXCLUDED.crs_corpus, EXCLUDED.operator, \
         EXCLUDED.name_short, EXCLUDED.name_full, EXCLUDED.dict, \
         EXCLUDED.category, EXCLUDED.name_darwin, EXCLUDED.name_corpus);";

const UPSERT_OPERATOR: &str = "\
    INSERT INTO darwin_operators (operator, operator_name, url, category) \
    VALUES ($1, $2, $3, $4) \
    ON CONFLICT (operator) DO UPDATE SET \
        (operator_name, url, category) = \
        (EXCLUDED.operator_name, EXCLUDED.url, EXCLUDED.category);";

const UPSERT_REASON: &str = "\
    INSERT INTO darwin_reasons (id, type, message) VALUES ($1, $2, $3) \
    ON CONFLICT (id, type) DO UPDATE SET message = EXCLUDED.message;";

/// A row of the CORPUS extract used to enrich Darwin's location names.
#[derive(Debug, Clone, Default)]
pub struct CorpusEntry {
    pub crs: Option<String>,
    pub name: Option<String>,
}

pub type CorpusIndex = HashMap<String, CorpusEntry>;

/// Builds the reference upserts and the snapshot handed to the live
/// pipeline. The snapshot is complete before any operation executes, so a
/// reader never sees a half-refreshed table.
pub fn reference_ops(
    records: &[ReferenceRecord],
    corpus: &CorpusIndex,
) -> (Vec<WriteOp>, ReferenceSnapshot) {
    let mut ops = Vec::new();
    let mut locations = HashMap::new();
    let mut reasons = HashMap::new();

    for record in records {
        match record {
            ReferenceRecord::Location(record) => {
                let corpus_entry = corpus.get(&record.tiploc);
                // Darwin repeats the tiploc as the name for unnamed points.
                let name_darwin = (record.name != record.tiploc)
                    .then(|| record.name.clone());
                let name_corpus = corpus_entry.and_then(|entry| entry.name.clone());

                let mut location = LocationRef {
                    tiploc: record.tiploc.clone(),
                    crs_darwin: record.crs.clone(),
                    crs_corpus: corpus_entry.and_then(|entry| entry.crs.clone()),
                    operator: record.operator.clone(),
                    name_short: name_darwin.clone().or_else(|| name_corpus.clone()),
                    name_full: name_corpus.clone().or_else(|| name_darwin.clone()),
                    name_darwin,
                    name_corpus,
                    category: None,
                };
                location.category = category_for(&location).map(str::to_owned);

                let dict = serde_json::to_value(&location).unwrap_or(JsonValue::Null);
                ops.push(WriteOp::Execute(Statement::new(
                    UPSERT_LOCATION,
                    vec![
                        location.tiploc.as_str().into(),
                        location.crs_darwin.clone().into(),
                        location.crs_corpus.clone().into(),
                        location.operator.clone().into(),
                        location.name_short.clone().into(),
                        location.name_full.clone().into(),
                        dict.into(),
                        location.category.clone().into(),
                        location.name_darwin.clone().into(),
                        location.name_corpus.clone().into(),
                    ],
                )));
                locations.insert(location.tiploc.clone(), location);
            }
            ReferenceRecord::Operator(record) => {
                ops.push(WriteOp::Execute(Statement::new(
                    UPSERT_OPERATOR,
                    vec![
                        record.code.as_str().into(),
                        record.name.as_str().into(),
                        record.url.clone().into(),
                        toc_category_for(&record.code).into(),
                    ],
                )));
            }
            ReferenceRecord::Reasons { kind, entries } => {
                for entry in entries {
                    ops.push(WriteOp::Execute(Statement::new(
                        UPSERT_REASON,
                        vec![
                            entry.code.as_str().into(),
                            kind.as_str().into(),
                            entry.text.as_str().into(),
                        ],
                    )));
                    reasons.insert((entry.code.clone(), *kind), entry.text.clone());
                }
            }
        }
    }

    (ops, ReferenceSnapshot::new(locations, reasons))
}

/// Operator classes: charter and non-National-Rail operators get their own
/// presentation treatment downstream.
fn toc_category_for(toc: &str) -> &'static str {
    match toc {
        "NY" | "PC" | "ZM" | "WR" => "C",
        "LT" | "SJ" | "TW" => "M",
        "ZB" | "ZF" => "O",
        _ => "S",
    }
}

/// Coarse location classification from operator and naming alone.
fn category_for(location: &LocationRef) -> Option<&'static str> {
    let operator = location.operator.as_deref();
    match operator {
        Some("ZB") => return Some("B"),
        Some("ZF") => return Some("F"),
        Some("TW") | Some("SJ") | Some("NY") | Some("ZM") | Some("PC")
        | Some("y") | Some("SP") => return Some("M"),
        _ => {}
    }
    if location.tiploc.ends_with("BUS") {
        return Some("B");
    }
    if operator.is_some()
        && location.crs_darwin.is_some()
        && location.name_darwin.is_some()
    {
        return Some("S");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use darwin::parse::parse_reference;

    fn corpus() -> CorpusIndex {
        let mut corpus = CorpusIndex::new();
        corpus.insert(
            "EUSTON".to_owned(),
            CorpusEntry {
                crs: Some("EUS".to_owned()),
                name: Some("LONDON EUSTON".to_owned()),
            },
        );
        corpus
    }

    #[test]
    fn builds_location_upserts_and_snapshot() {
        let records = parse_reference(
            r#"<PportTimetableRef>
                <LocationRef tpl="EUSTON" crs="EUS" toc="VT" locname="London Euston"/>
                <LocationRef tpl="LNGSGHJ" locname="LNGSGHJ"/>
            </PportTimetableRef>"#,
        )
        .unwrap();
        let (ops, snapshot) = reference_ops(&records, &corpus());
        assert_eq!(ops.len(), 2);
        assert_eq!(snapshot.location_count(), 2);

        let euston = snapshot.location("EUSTON").unwrap();
        assert_eq!(euston.name_darwin.as_deref(), Some("London Euston"));
        assert_eq!(euston.name_corpus.as_deref(), Some("LONDON EUSTON"));
        assert_eq!(euston.name_short.as_deref(), Some("London Euston"));
        assert_eq!(euston.name_full.as_deref(), Some("LONDON EUSTON"));
        assert_eq!(euston.crs_corpus.as_deref(), Some("EUS"));
        assert_eq!(euston.category.as_deref(), Some("S"));

        // Darwin's tiploc-as-name placeholder does not become a name.
        let junction = snapshot.location("LNGSGHJ").unwrap();
        assert!(junction.name_darwin.is_none());
        assert!(junction.name_short.is_none());
        assert!(junction.category.is_none());
    }

    #[test]
    fn reasons_land_in_both_table_and_snapshot() {
        let records = parse_reference(
            r#"<PportTimetableRef>
                <CancellationReasons>
                    <Reason code="100" reasontext="a broken down train"/>
                </CancellationReasons>
                <LateRunningReasons>
                    <Reason code="100" reasontext="slow running"/>
                </LateRunningReasons>
            </PportTimetableRef>"#,
        )
        .unwrap();
        let (ops, snapshot) = reference_ops(&records, &CorpusIndex::new());
        assert_eq!(ops.len(), 2);
        assert_eq!(
            snapshot.reason("100", ReasonKind::Cancellation),
            Some("a broken down train")
        );
        assert_eq!(snapshot.reason("100", ReasonKind::Delay), Some("slow running"));
        assert_eq!(snapshot.reason("999", ReasonKind::Delay), None);
    }

    #[test]
    fn operator_categories_follow_the_toc_code() {
        assert_eq!(toc_category_for("NY"), "C");
        assert_eq!(toc_category_for("LT"), "M");
        assert_eq!(toc_category_for("ZF"), "O");
        assert_eq!(toc_category_for("VT"), "S");
    }
}
