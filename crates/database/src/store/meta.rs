//! Origin/destination propagation across associations.
//!
//! A schedule's endpoint lists start with its own OR/OPOR and DT/OPDT call
//! points. For every non-NP association the far side's endpoints are
//! appended too, tagged with the association tiploc and category so the
//! append is idempotent.

use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::PgConnection;

use model::reference::ReferenceSnapshot;
use model::schedule::{CallPointKind, ScheduleEndpoint};

use crate::error::DatabaseError;

const SELECT_ASSOCIATION_META: &str = "\
    SELECT a.category, a.tiploc, \
        s1.rid AS main_rid, s1.origins AS main_origins, \
        s1.destinations AS main_destinations, \
        s2.rid AS assoc_rid, s2.origins AS assoc_origins, \
        s2.destinations AS assoc_destinations \
    FROM darwin_associations AS a \
    INNER JOIN darwin_schedules AS s1 ON s1.rid = a.main_rid \
    INNER JOIN darwin_schedules AS s2 ON s2.rid = a.assoc_rid \
    WHERE a.category != 'NP'";

const APPEND_DESTINATIONS: &str = "\
    UPDATE darwin_schedules \
    SET destinations = darwin_schedules.destinations || $1::json[] \
    WHERE rid = $2;";

const APPEND_ORIGINS: &str = "\
    UPDATE darwin_schedules \
    SET origins = darwin_schedules.origins || $1::json[] \
    WHERE rid = $2;";

const SELECT_ENDPOINT_LOCATIONS: &str = "\
    SELECT loc.type AS kind, loc.activity, loc.cancelled, loc.rid, loc.tiploc \
    FROM darwin_schedule_locations AS loc \
    INNER JOIN darwin_schedules AS s ON s.rid = loc.rid \
    WHERE loc.type IN ('OR', 'OPOR', 'DT', 'OPDT') \
    ORDER BY loc.rid DESC, loc.index ASC;";

const REPLACE_ENDPOINTS: &str = "\
    UPDATE darwin_schedules \
    SET (origins, destinations) = ($1::json[], $2::json[]) \
    WHERE rid = $3;";

#[derive(sqlx::FromRow)]
struct AssociationMetaRow {
    category: String,
    tiploc: String,
    main_rid: String,
    main_origins: Vec<Json<JsonValue>>,
    main_destinations: Vec<Json<JsonValue>>,
    assoc_rid: String,
    assoc_origins: Vec<Json<JsonValue>>,
    assoc_destinations: Vec<Json<JsonValue>>,
}

#[derive(sqlx::FromRow)]
struct EndpointLocationRow {
    kind: String,
    activity: String,
    cancelled: bool,
    rid: String,
    tiploc: String,
}

fn annotate(endpoints: &[Json<JsonValue>], tiploc: &str, category: &str) -> Vec<JsonValue> {
    endpoints
        .iter()
        .map(|endpoint| {
            let mut value = endpoint.0.clone();
            if let Some(object) = value.as_object_mut() {
                object.insert("association_tiploc".to_owned(), tiploc.into());
                object.insert("source".to_owned(), category.into());
            }
            value
        })
        .collect()
}

fn already_tagged(endpoints: &[Json<JsonValue>], tiploc: &str, category: &str) -> bool {
    endpoints.iter().any(|endpoint| {
        endpoint.0.get("association_tiploc").and_then(JsonValue::as_str) == Some(tiploc)
            && endpoint.0.get("source").and_then(JsonValue::as_str) == Some(category)
    })
}

/// Appends far-side endpoints over every qualifying association, or over
/// one specific pair when `filter` is given.
pub async fn renew_association_meta(
    connection: &mut PgConnection,
    filter: Option<(&str, &str)>,
) -> Result<(), DatabaseError> {
    let rows: Vec<AssociationMetaRow> = match filter {
        Some((main_rid, assoc_rid)) => {
            let sql = format!(
                "{} AND a.main_rid = $1 AND a.assoc_rid = $2;",
                SELECT_ASSOCIATION_META
            );
            sqlx::query_as(&sql)
                .bind(main_rid)
                .bind(assoc_rid)
                .fetch_all(&mut *connection)
                .await?
        }
        None => {
            let sql = format!("{};", SELECT_ASSOCIATION_META);
            sqlx::query_as(&sql).fetch_all(&mut *connection).await?
        }
    };

    for row in rows {
        if !already_tagged(&row.main_destinations, &row.tiploc, &row.category) {
            let appended = annotate(&row.assoc_destinations, &row.tiploc, &row.category)
                .into_iter()
                .map(Json)
                .collect::<Vec<_>>();
            sqlx::query(APPEND_DESTINATIONS)
                .bind(appended)
                .bind(&row.main_rid)
                .execute(&mut *connection)
                .await?;
        }

        if !already_tagged(&row.assoc_origins, &row.tiploc, &row.category) {
            let appended = annotate(&row.main_origins, &row.tiploc, &row.category)
                .into_iter()
                .map(Json)
                .collect::<Vec<_>>();
            sqlx::query(APPEND_ORIGINS)
                .bind(appended)
                .bind(&row.assoc_rid)
                .execute(&mut *connection)
                .await?;
        }
    }

    Ok(())
}

/// Full rebuild: every schedule's endpoint lists are recomputed from its
/// stored call points, then the association pass replays on top.
pub async fn renew_schedule_meta(
    connection: &mut PgConnection,
    refs: &ReferenceSnapshot,
) -> Result<(), DatabaseError> {
    log::info!("recomputing schedule origin/destination lists");

    let rows: Vec<EndpointLocationRow> = sqlx::query_as(SELECT_ENDPOINT_LOCATIONS)
        .fetch_all(&mut *connection)
        .await?;

    let mut current_rid: Option<String> = None;
    let mut origins: Vec<JsonValue> = Vec::new();
    let mut destinations: Vec<JsonValue> = Vec::new();

    for row in rows {
        if current_rid.as_deref() != Some(row.rid.as_str()) {
            if let Some(rid) = current_rid.take() {
                replace_endpoints(connection, &rid, &origins, &destinations).await?;
            }
            origins.clear();
            destinations.clear();
            current_rid = Some(row.rid.clone());
        }

        let Some(kind) = CallPointKind::from_tag(&row.kind) else {
            continue;
        };
        let endpoint = ScheduleEndpoint {
            source: "SC".to_owned(),
            kind,
            activity: row.activity.clone(),
            cancelled: row.cancelled,
            location: refs.outline(&row.tiploc),
            association_tiploc: None,
        };
        let value = serde_json::to_value(&endpoint).unwrap_or(JsonValue::Null);
        if kind.is_origin() {
            origins.push(value);
        } else {
            destinations.push(value);
        }
    }
    if let Some(rid) = current_rid.take() {
        replace_endpoints(connection, &rid, &origins, &destinations).await?;
    }

    log::info!("endpoint lists rebuilt, replaying associations");
    renew_association_meta(connection, None).await?;
    log::info!("origin/destination recomputation complete");
    Ok(())
}

async fn replace_endpoints(
    connection: &mut PgConnection,
    rid: &str,
    origins: &[JsonValue],
    destinations: &[JsonValue],
) -> Result<(), DatabaseError> {
    let origins = origins.iter().cloned().map(Json).collect::<Vec<_>>();
    let destinations = destinations.iter().cloned().map(Json).collect::<Vec<_>>();
    sqlx::query(REPLACE_ENDPOINTS)
        .bind(origins)
        .bind(destinations)
        .bind(rid)
        .execute(&mut *connection)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(tiploc: &str, tagged: Option<(&str, &str)>) -> Json<JsonValue> {
        let mut value = serde_json::json!({
            "source": "SC",
            "type": "DT",
            "activity": "TF",
            "cancelled": false,
            "tiploc": tiploc,
        });
        if let Some((association_tiploc, source)) = tagged {
            value["association_tiploc"] = association_tiploc.into();
            value["source"] = source.into();
        }
        Json(value)
    }

    #[test]
    fn annotation_tags_every_endpoint() {
        let annotated = annotate(&[endpoint("BHAMNWS", None)], "YORK", "JN");
        assert_eq!(annotated[0]["association_tiploc"], "YORK");
        assert_eq!(annotated[0]["source"], "JN");
        assert_eq!(annotated[0]["tiploc"], "BHAMNWS");
    }

    #[test]
    fn tag_detection_matches_pairwise() {
        let tagged = [endpoint("BHAMNWS", Some(("YORK", "JN")))];
        assert!(already_tagged(&tagged, "YORK", "JN"));
        assert!(!already_tagged(&tagged, "YORK", "VV"));
        assert!(!already_tagged(&tagged, "CREWE", "JN"));
        assert!(!already_tagged(&[endpoint("BHAMNWS", None)], "YORK", "JN"));
    }
}
