//! Read-side queries backing the HTTP layer.
//!
//! Live timings are stored as bare times-of-day; they are anchored to the
//! projected working datetime of their call point here, using the same
//! midnight-crossing rule the ingest side uses.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::PgPool;

use darwin::time::combine_with_working;

use crate::error::DatabaseError;

const SELECT_LAST_RETRIEVED: &str =
    "SELECT time_acquired FROM last_received_sequence;";

const SELECT_SCHEDULE: &str = "\
    SELECT uid, rid, rsid, ssd, signalling_id, status, category, operator, \
        is_active, is_charter, is_deleted, is_passenger, \
        origins, destinations, cancel_reason, delay_reason \
    FROM darwin_schedules \
    WHERE rid = $1 OR (uid = $1 AND ssd = $2);";

const SELECT_SERVICE_LOCATIONS: &str = "\
    SELECT loc.type AS kind, loc.tiploc, loc.activity, loc.cancelled, \
        loc.pta, loc.wta, loc.wtp, loc.ptd, loc.wtd, \
        stat.ta, stat.tp, stat.td, \
        stat.ta_source, stat.tp_source, stat.td_source, \
        stat.ta_type, stat.tp_type, stat.td_type, \
        stat.plat, stat.plat_suppressed, stat.plat_cis_suppressed, \
        stat.plat_confirmed, stat.plat_source, stat.length, \
        ref.name_short, ref.name_full, ref.crs_darwin \
    FROM darwin_schedule_locations AS loc \
    LEFT JOIN darwin_schedule_status AS stat \
        ON stat.rid = loc.rid AND stat.original_wt = loc.original_wt \
        AND stat.tiploc = loc.tiploc \
    LEFT JOIN darwin_locations AS ref ON ref.tiploc = loc.tiploc \
    WHERE loc.rid = $1 \
    ORDER BY loc.index ASC;";

const SELECT_BOARD_LOCATIONS: &str = "\
    SELECT tiploc, crs_darwin, name_short, name_full \
    FROM darwin_locations \
    WHERE crs_darwin = $1 OR tiploc = $1;";

const SELECT_BOARD_MESSAGES: &str = "\
    SELECT category, severity, suppress, stations, message \
    FROM darwin_messages \
    WHERE stations && $1::varchar(3)[];";

const SELECT_BOARD_SERVICES: &str = "\
    SELECT sch.uid, sch.rid, sch.rsid, sch.ssd, sch.category, sch.operator, \
        sch.is_active, sch.origins, sch.destinations, \
        base.type AS kind, base.tiploc, base.activity, base.cancelled, \
        base.pta, base.wta, base.wtp, base.ptd, base.wtd, \
        stat.ta, stat.tp, stat.td, \
        stat.ta_source, stat.tp_source, stat.td_source, \
        stat.ta_type, stat.tp_type, stat.td_type, \
        stat.plat, stat.plat_suppressed, stat.plat_cis_suppressed, \
        stat.plat_confirmed, stat.plat_source, stat.length \
    FROM darwin_schedule_locations AS base \
    INNER JOIN darwin_schedules AS sch ON sch.rid = base.rid \
    LEFT JOIN darwin_schedule_status AS stat \
        ON stat.rid = base.rid AND stat.original_wt = base.original_wt \
        AND stat.tiploc = base.tiploc \
    WHERE base.wtd IS NOT NULL \
        AND base.tiploc = ANY($1) \
        AND base.type IN ('IP', 'DT', 'OR') \
        AND NOT sch.is_deleted \
        AND base.wtd >= $2 AND base.wtd <= $3 \
    ORDER BY base.wtd \
    LIMIT $4;";

/// When the last accepted sequence number was recorded, if ever.
pub async fn last_retrieved(pool: &PgPool) -> Result<Option<NaiveDateTime>, DatabaseError> {
    let row: Option<(NaiveDateTime,)> = sqlx::query_as(SELECT_LAST_RETRIEVED)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(time_acquired,)| time_acquired))
}

#[derive(Debug, sqlx::FromRow)]
struct ScheduleRow {
    uid: String,
    rid: String,
    rsid: Option<String>,
    ssd: NaiveDate,
    signalling_id: Option<String>,
    status: String,
    category: String,
    operator: String,
    is_active: bool,
    is_charter: bool,
    is_deleted: bool,
    is_passenger: bool,
    origins: Vec<Json<JsonValue>>,
    destinations: Vec<Json<JsonValue>>,
    cancel_reason: Option<Json<JsonValue>>,
    delay_reason: Option<Json<JsonValue>>,
}

/// Call point columns shared by the service and board queries.
#[derive(Debug, sqlx::FromRow)]
struct CallRow {
    kind: String,
    tiploc: String,
    activity: String,
    cancelled: bool,
    pta: Option<NaiveDateTime>,
    wta: Option<NaiveDateTime>,
    wtp: Option<NaiveDateTime>,
    ptd: Option<NaiveDateTime>,
    wtd: Option<NaiveDateTime>,
    ta: Option<NaiveTime>,
    tp: Option<NaiveTime>,
    td: Option<NaiveTime>,
    ta_source: Option<String>,
    tp_source: Option<String>,
    td_source: Option<String>,
    ta_type: Option<String>,
    tp_type: Option<String>,
    td_type: Option<String>,
    plat: Option<String>,
    plat_suppressed: Option<bool>,
    plat_cis_suppressed: Option<bool>,
    plat_confirmed: Option<bool>,
    plat_source: Option<String>,
    length: Option<i32>,
}

#[derive(Debug, sqlx::FromRow)]
struct ServiceLocationRow {
    #[sqlx(flatten)]
    call: CallRow,
    name_short: Option<String>,
    name_full: Option<String>,
    crs_darwin: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct BoardServiceRow {
    uid: String,
    rid: String,
    rsid: Option<String>,
    ssd: NaiveDate,
    category: String,
    operator: String,
    is_active: bool,
    origins: Vec<Json<JsonValue>>,
    destinations: Vec<Json<JsonValue>>,
    #[sqlx(flatten)]
    call: CallRow,
}

#[derive(Debug, sqlx::FromRow)]
struct BoardLocationRow {
    tiploc: String,
    crs_darwin: Option<String>,
    name_short: Option<String>,
    name_full: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    category: Option<String>,
    severity: Option<String>,
    suppress: bool,
    stations: Vec<String>,
    message: String,
}

#[derive(Debug, Serialize)]
pub struct TimeView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlatformView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub suppressed: bool,
    pub cis_suppressed: bool,
    pub confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CallView {
    #[serde(rename = "type")]
    pub kind: String,
    pub tiploc: String,
    pub activity: String,
    pub cancelled: bool,
    pub arrival: TimeView,
    pub pass: TimeView,
    pub departure: TimeView,
    pub platform: PlatformView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct ServiceLocationView {
    #[serde(flatten)]
    pub call: CallView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ServiceDetail {
    pub uid: String,
    pub rid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsid: Option<String>,
    pub ssd: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signalling_id: Option<String>,
    pub status: String,
    pub category: String,
    pub operator: String,
    pub is_active: bool,
    pub is_charter: bool,
    pub is_deleted: bool,
    pub is_passenger: bool,
    pub origins: Vec<JsonValue>,
    pub destinations: Vec<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_reason: Option<JsonValue>,
    pub locations: Vec<ServiceLocationView>,
}

#[derive(Debug, Serialize)]
pub struct BoardLocationView {
    pub tiploc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_short: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_full: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    pub suppress: bool,
    pub stations: Vec<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BoardServiceView {
    pub rid: String,
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsid: Option<String>,
    pub ssd: NaiveDate,
    pub category: String,
    pub operator: String,
    pub is_active: bool,
    pub here: CallView,
    pub origins: Vec<JsonValue>,
    pub destinations: Vec<JsonValue>,
}

#[derive(Debug, Serialize)]
pub struct Board {
    pub locations: Vec<BoardLocationView>,
    pub messages: Vec<MessageView>,
    pub services: Vec<BoardServiceView>,
}

fn time_view(
    working: Option<NaiveDateTime>,
    public: Option<NaiveDateTime>,
    reported: Option<NaiveTime>,
    kind: Option<&str>,
    source: Option<String>,
) -> TimeView {
    let reported_at = match (reported, working) {
        (Some(time), Some(working)) => Some(combine_with_working(working, time)),
        _ => None,
    };
    TimeView {
        working,
        public,
        estimated: (kind == Some("E")).then_some(reported_at).flatten(),
        actual: (kind == Some("A")).then_some(reported_at).flatten(),
        source,
    }
}

fn call_view(call: CallRow) -> CallView {
    CallView {
        arrival: time_view(
            call.wta,
            call.pta,
            call.ta,
            call.ta_type.as_deref(),
            call.ta_source,
        ),
        pass: time_view(call.wtp, None, call.tp, call.tp_type.as_deref(), call.tp_source),
        departure: time_view(
            call.wtd,
            call.ptd,
            call.td,
            call.td_type.as_deref(),
            call.td_source,
        ),
        platform: PlatformView {
            platform: call.plat,
            suppressed: call.plat_suppressed.unwrap_or(false),
            cis_suppressed: call.plat_cis_suppressed.unwrap_or(false),
            confirmed: call.plat_confirmed.unwrap_or(false),
            source: call.plat_source,
        },
        kind: call.kind,
        tiploc: call.tiploc,
        activity: call.activity,
        cancelled: call.cancelled,
        length: call.length,
    }
}

fn unwrap_json(values: Vec<Json<JsonValue>>) -> Vec<JsonValue> {
    values.into_iter().map(|value| value.0).collect()
}

/// Looks a service up by rid, or by uid and service start date.
pub async fn service(
    pool: &PgPool,
    id: &str,
    date: Option<NaiveDate>,
) -> Result<Option<ServiceDetail>, DatabaseError> {
    let schedule: Option<ScheduleRow> = sqlx::query_as(SELECT_SCHEDULE)
        .bind(id)
        .bind(date)
        .fetch_optional(pool)
        .await?;
    let Some(schedule) = schedule else {
        return Ok(None);
    };

    let locations: Vec<ServiceLocationRow> = sqlx::query_as(SELECT_SERVICE_LOCATIONS)
        .bind(&schedule.rid)
        .fetch_all(pool)
        .await?;

    Ok(Some(ServiceDetail {
        uid: schedule.uid,
        rid: schedule.rid,
        rsid: schedule.rsid,
        ssd: schedule.ssd,
        signalling_id: schedule.signalling_id,
        status: schedule.status,
        category: schedule.category,
        operator: schedule.operator,
        is_active: schedule.is_active,
        is_charter: schedule.is_charter,
        is_deleted: schedule.is_deleted,
        is_passenger: schedule.is_passenger,
        origins: unwrap_json(schedule.origins),
        destinations: unwrap_json(schedule.destinations),
        cancel_reason: schedule.cancel_reason.map(|reason| reason.0),
        delay_reason: schedule.delay_reason.map(|reason| reason.0),
        locations: locations
            .into_iter()
            .map(|row| ServiceLocationView {
                name: row.name_short.or(row.name_full),
                crs: row.crs_darwin,
                call: call_view(row.call),
            })
            .collect(),
    }))
}

/// Departures calling at a station (by CRS or tiploc) within a window.
pub async fn station_board(
    pool: &PgPool,
    location: &str,
    base: NaiveDateTime,
    period_minutes: i64,
    limit: i64,
) -> Result<Option<Board>, DatabaseError> {
    let location = location.to_uppercase();
    let locations: Vec<BoardLocationRow> = sqlx::query_as(SELECT_BOARD_LOCATIONS)
        .bind(&location)
        .fetch_all(pool)
        .await?;
    if locations.is_empty() {
        return Ok(None);
    }

    let tiplocs: Vec<String> = locations.iter().map(|row| row.tiploc.clone()).collect();
    let mut crs_list: Vec<String> = Vec::new();
    for row in &locations {
        if let Some(crs) = &row.crs_darwin {
            if !crs_list.contains(crs) {
                crs_list.push(crs.clone());
            }
        }
    }

    let messages: Vec<MessageRow> = sqlx::query_as(SELECT_BOARD_MESSAGES)
        .bind(&crs_list)
        .fetch_all(pool)
        .await?;

    let until = base + chrono::Duration::minutes(period_minutes);
    let services: Vec<BoardServiceRow> = sqlx::query_as(SELECT_BOARD_SERVICES)
        .bind(&tiplocs)
        .bind(base)
        .bind(until)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    Ok(Some(Board {
        locations: locations
            .into_iter()
            .map(|row| BoardLocationView {
                tiploc: row.tiploc,
                crs: row.crs_darwin,
                name_short: row.name_short,
                name_full: row.name_full,
            })
            .collect(),
        messages: messages
            .into_iter()
            .map(|row| MessageView {
                category: row.category,
                severity: row.severity,
                suppress: row.suppress,
                stations: row.stations,
                message: row.message,
            })
            .collect(),
        services: services
            .into_iter()
            .map(|row| BoardServiceView {
                rid: row.rid,
                uid: row.uid,
                rsid: row.rsid,
                ssd: row.ssd,
                category: row.category,
                operator: row.operator,
                is_active: row.is_active,
                origins: unwrap_json(row.origins),
                destinations: unwrap_json(row.destinations),
                here: call_view(row.call),
            })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(date: &str, time: &str) -> NaiveDateTime {
        format!("{}T{}", date, time).parse().unwrap()
    }

    #[test]
    fn reported_times_anchor_to_the_working_datetime() {
        let view = time_view(
            Some(naive("2021-06-01", "23:58:00")),
            None,
            Some("00:03:00".parse().unwrap()),
            Some("A"),
            Some("AUTO".to_owned()),
        );
        assert_eq!(view.actual.unwrap(), naive("2021-06-02", "00:03:00"));
        assert!(view.estimated.is_none());
        assert_eq!(view.source.as_deref(), Some("AUTO"));
    }

    #[test]
    fn estimates_and_actuals_are_distinguished() {
        let view = time_view(
            Some(naive("2021-06-01", "10:00:00")),
            None,
            Some("10:04:00".parse().unwrap()),
            Some("E"),
            None,
        );
        assert!(view.actual.is_none());
        assert_eq!(view.estimated.unwrap(), naive("2021-06-01", "10:04:00"));
    }

    #[test]
    fn reported_time_without_working_anchor_is_dropped() {
        let view = time_view(None, None, Some("10:04:00".parse().unwrap()), Some("A"), None);
        assert!(view.actual.is_none());
        assert!(view.working.is_none());
    }
}
