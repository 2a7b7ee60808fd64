//! Top-level ingestion lifecycle.
//!
//! Startup order: BPlan import, reference load, snapshot bootstrap when
//! live state is stale, then the live loop. The loop keeps exactly one
//! broker session alive (with spacing between attempts), refreshes
//! reference data and recomputes endpoint metadata every twelve hours,
//! and watches the writer queue depth. Nothing a single bad frame does
//! can take the loop down.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant};

use database::queries::read;
use database::store::darwin as darwin_store;
use database::writer::{MessageProcessor, WriteOp, WriterHandle};
use database::PgDatabase;
use model::reference::ReferenceSnapshot;
use utility::config::Secret;

use crate::bplan;
use crate::compress;
use crate::error::IngestError;
use crate::reference::{self, ReferenceConfig};
use crate::snapshot::{self, FtpConfig};
use crate::stomp::{Frame, FrameHandler, SessionEnd, StompConfig, Subscriber};

/// Reference data and metadata recomputation cadence.
const REFRESH_PERIOD: Duration = Duration::from_secs(12 * 3600);
/// Queue depth is inspected this often.
const DEPTH_CHECK_PERIOD: Duration = Duration::from_secs(30);
/// Depth beyond which the supervisor complains.
const DEPTH_WARN_LIMIT: usize = 500;
/// Live ingestion starts only once the backlog has drained below this.
const STARTUP_DEPTH_LIMIT: usize = 100;
/// Live state older than this triggers a snapshot bootstrap.
const STALE_AFTER_SECS: i64 = 300;
/// Minimum spacing between broker sessions.
const SESSION_SPACING: Duration = Duration::from_secs(10);

/// Sequence numbers wrap at ten million; a jump of more than five frames
/// is logged (and nothing else).
const SEQUENCE_MODULUS: i64 = 10_000_000;
const SEQUENCE_GAP_LIMIT: i64 = 5;

pub(crate) fn sequence_gap(last: i64, current: i64) -> i64 {
    (current - last).rem_euclid(SEQUENCE_MODULUS)
}

/// Runs the ingester until shutdown is requested (ctrl-c). Returns only
/// on clean shutdown or an unrecoverable startup error.
pub async fn run(secret: Secret, database: PgDatabase) -> Result<(), IngestError> {
    let processor = MessageProcessor::connect(&secret.database_string).await?;
    let writer = processor.handle();

    // Network topology; a missing extract is not fatal.
    match bplan::import_bplan(Path::new(&secret.bplan_path), &writer).await {
        Ok(count) => log::info!("bplan merge complete ({} network links)", count),
        Err(why) => log::warn!("bplan merge skipped: {}", why),
    }

    let reference_config = ReferenceConfig::from_secret(&secret)?;
    let snapshot = reference::incorporate_reference_data(&reference_config, &writer).await?;
    let (refs_tx, refs_rx) = watch::channel(snapshot);

    let last = read::last_retrieved(database.pool()).await?;
    let stale = last.map_or(true, |last| {
        (Utc::now().naive_utc() - last).num_seconds() > STALE_AFTER_SECS
    });
    if stale && !secret.no_from_ftp {
        log::info!("last retrieval too old, using FTP snapshots");
        let ftp_config = FtpConfig::from_secret(&secret)?;
        let refs = refs_rx.borrow().clone();
        snapshot::incorporate_ftp(&ftp_config, &writer, refs).await?;
    }

    while writer.depth() > STARTUP_DEPTH_LIMIT {
        log::info!(
            "waiting for database queue ({}) to empty below limit",
            writer.depth()
        );
        tokio::time::sleep(Duration::from_secs(10)).await;
    }

    live_loop(&secret, &writer, &reference_config, refs_tx, refs_rx).await;

    log::info!("draining write queue");
    drop(writer);
    processor.close().await;
    Ok(())
}

async fn live_loop(
    secret: &Secret,
    writer: &WriterHandle,
    reference_config: &ReferenceConfig,
    refs_tx: watch::Sender<Arc<ReferenceSnapshot>>,
    refs_rx: watch::Receiver<Arc<ReferenceSnapshot>>,
) {
    let stomp_config = if secret.no_listen_stomp {
        None
    } else {
        match StompConfig::from_secret(secret) {
            Ok(config) => Some(config),
            Err(why) => {
                log::error!("broker configuration incomplete, not listening: {}", why);
                None
            }
        }
    };

    let mut last_session_start = Instant::now();
    let mut session: Option<JoinHandle<SessionEnd>> = stomp_config
        .as_ref()
        .map(|config| spawn_session(config.clone(), writer.clone(), refs_rx.clone()));

    let mut reference_tick = interval_at(Instant::now() + REFRESH_PERIOD, REFRESH_PERIOD);
    let mut meta_tick = interval_at(Instant::now() + REFRESH_PERIOD, REFRESH_PERIOD);
    let mut depth_tick = interval(DEPTH_CHECK_PERIOD);

    loop {
        tokio::select! {
            end = async {
                match session.as_mut() {
                    Some(handle) => handle.await.unwrap_or(SessionEnd::Disconnected),
                    None => std::future::pending().await,
                }
            } => {
                session = None;
                match end {
                    SessionEnd::Exhausted => {
                        log::error!("broker connection attempts exhausted")
                    }
                    SessionEnd::Disconnected => log::error!("broker session ended"),
                }
                if let Some(config) = &stomp_config {
                    let since_last = last_session_start.elapsed();
                    if since_last < SESSION_SPACING {
                        log::info!("last connection attempt under 10s ago, delaying");
                        tokio::time::sleep(SESSION_SPACING - since_last).await;
                    }
                    last_session_start = Instant::now();
                    session = Some(spawn_session(
                        config.clone(),
                        writer.clone(),
                        refs_rx.clone(),
                    ));
                }
            }

            _ = reference_tick.tick() => {
                match reference::incorporate_reference_data(reference_config, writer).await {
                    Ok(snapshot) => {
                        let _ = refs_tx.send(snapshot);
                    }
                    Err(why) => log::error!("reference refresh failed: {}", why),
                }
            }

            _ = meta_tick.tick() => {
                let refs = refs_rx.borrow().clone();
                if let Err(why) = writer.submit(WriteOp::RenewScheduleMeta { refs }).await {
                    log::error!("could not schedule meta renewal: {}", why);
                }
            }

            _ = depth_tick.tick() => {
                let depth = writer.depth();
                if depth > DEPTH_WARN_LIMIT {
                    log::warn!("database queue count ({}) over limit", depth);
                }
            }

            _ = tokio::signal::ctrl_c() => {
                log::info!("shutdown requested");
                if let Some(handle) = session.take() {
                    handle.abort();
                }
                return;
            }
        }
    }
}

fn spawn_session(
    config: StompConfig,
    writer: WriterHandle,
    refs: watch::Receiver<Arc<ReferenceSnapshot>>,
) -> JoinHandle<SessionEnd> {
    tokio::spawn(async move {
        let subscriber = Subscriber::new(config);
        let mut handler = PushPortHandler::new(writer, refs);
        subscriber.run_session(&mut handler).await
    })
}

/// Per-session frame pipeline: decompress, decode, fold into the writer
/// between BEGIN and COMMIT, record the sequence number, then ACK.
///
/// The frame is acknowledged once its writes are accepted by the queue
/// (before the commit is observed): a crash in between loses at most what
/// the broker will redeliver. Undecodable frames are acknowledged too so
/// one poison message cannot wedge the subscription.
pub struct PushPortHandler {
    writer: WriterHandle,
    refs: watch::Receiver<Arc<ReferenceSnapshot>>,
    last_sequence: Option<i64>,
}

impl PushPortHandler {
    pub fn new(
        writer: WriterHandle,
        refs: watch::Receiver<Arc<ReferenceSnapshot>>,
    ) -> Self {
        Self {
            writer,
            refs,
            last_sequence: None,
        }
    }

    fn note_sequence(&mut self, sequence: Option<i64>) {
        if let (Some(last), Some(current)) = (self.last_sequence, sequence) {
            let gap = sequence_gap(last, current);
            if gap > SEQUENCE_GAP_LIMIT {
                log::warn!(
                    "sequence jumped from {} to {} ({} frames skipped)",
                    last,
                    current,
                    gap
                );
            }
        }
        if sequence.is_some() {
            self.last_sequence = sequence;
        }
    }
}

#[async_trait]
impl FrameHandler for PushPortHandler {
    async fn on_frame(&mut self, frame: &Frame) -> bool {
        let xml = match compress::decompress_to_string(&frame.body) {
            Ok(xml) => xml,
            Err(why) => {
                log::error!("could not decompress frame: {}", why);
                return true;
            }
        };

        let records = match darwin::parse_darwin(&xml) {
            Ok(records) => records,
            Err(why) => {
                let preview: String = xml.chars().take(120).collect();
                log::error!("frame decode failed: {} (payload: {:?})", why, preview);
                return true;
            }
        };

        let sequence = frame
            .header("SequenceNumber")
            .and_then(|raw| raw.trim().parse::<i64>().ok());
        self.note_sequence(sequence);

        let refs = self.refs.borrow().clone();
        let enqueued = async {
            self.writer.submit(WriteOp::Begin).await?;
            darwin_store::store(&records, &refs, &self.writer).await?;
            if let Some(sequence) = sequence {
                self.writer
                    .submit(darwin_store::sequence_op(sequence, Utc::now().naive_utc()))
                    .await?;
            }
            self.writer.submit(WriteOp::Commit).await
        }
        .await;

        match enqueued {
            Ok(()) => true,
            Err(why) => {
                log::error!("failed to enqueue frame writes: {}", why);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_gap_wraps_at_ten_million() {
        assert_eq!(sequence_gap(100, 101), 1);
        assert_eq!(sequence_gap(100, 100), 0);
        assert_eq!(sequence_gap(9_999_998, 3), 5);
        assert_eq!(sequence_gap(9_999_998, 10), 12);
        assert!(sequence_gap(50, 40) > SEQUENCE_GAP_LIMIT);
    }
}
