//! Read-only JSON API over the ingested data.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use tokio::net::TcpListener;

use database::queries::read;
use database::{DatabaseError, PgDatabase};

const DEFAULT_BOARD_PERIOD_MINUTES: i64 = 480;
const DEFAULT_BOARD_LIMIT: i64 = 15;

#[derive(Clone)]
pub struct WebState {
    pub database: PgDatabase,
}

pub async fn start_web_server(state: WebState, bind: &str) -> std::io::Result<()> {
    let routes = Router::new()
        .route("/board/:location", get(board))
        .route("/service/:id", get(service))
        .with_state(state);

    log::info!("serving on {}", bind);
    let listener = TcpListener::bind(bind).await?;
    axum::serve(listener, routes.into_make_service()).await?;

    Ok(())
}

enum RouteError {
    NotFound,
    Database(DatabaseError),
}

impl From<DatabaseError> for RouteError {
    fn from(why: DatabaseError) -> Self {
        Self::Database(why)
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": "not found"})),
            )
                .into_response(),
            Self::Database(why) => {
                log::error!("query failed: {}", why);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": "internal error"})),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct BoardQuery {
    /// Window start; defaults to now (UTC).
    time: Option<NaiveDateTime>,
    /// Window length in minutes.
    period: Option<i64>,
    limit: Option<i64>,
}

async fn board(
    Path(location): Path<String>,
    Query(query): Query<BoardQuery>,
    State(state): State<WebState>,
) -> Result<Json<read::Board>, RouteError> {
    let base = query.time.unwrap_or_else(|| Utc::now().naive_utc());
    let board = read::station_board(
        state.database.pool(),
        &location,
        base,
        query.period.unwrap_or(DEFAULT_BOARD_PERIOD_MINUTES),
        query.limit.unwrap_or(DEFAULT_BOARD_LIMIT),
    )
    .await?;
    board.map(Json).ok_or(RouteError::NotFound)
}

#[derive(Debug, Deserialize)]
struct ServiceQuery {
    /// Service start date, for lookups by uid.
    date: Option<NaiveDate>,
}

async fn service(
    Path(id): Path<String>,
    Query(query): Query<ServiceQuery>,
    State(state): State<WebState>,
) -> Result<Json<read::ServiceDetail>, RouteError> {
    let service = read::service(state.database.pool(), &id, query.date).await?;
    service.map(Json).ok_or(RouteError::NotFound)
}
