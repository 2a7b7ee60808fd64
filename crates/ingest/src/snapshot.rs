//! Snapshot bootstrap from the FTP mirror.
//!
//! When live state is stale the five schedule-family tables are rebuilt
//! from the daily snapshot plus incremental pushport files: everything is
//! truncated and re-ingested inside one transaction, with frame parsing
//! fanned over a fixed worker pool whose output is consumed in issue order
//! so the single writer still sees source order.

use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::sync::Arc;

use flate2::read::MultiGzDecoder;
use futures::StreamExt;
use suppaftp::FtpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use database::store::{bootstrap, darwin as darwin_store};
use database::writer::{WriteOp, WriterHandle};
use model::reference::ReferenceSnapshot;
use utility::config::{ConfigError, Secret};

use crate::error::IngestError;
use crate::stomp::client::{backoff_delay, MAX_CONNECTION_ATTEMPTS};

const FTP_PORT: u16 = 21;
const PARSE_WORKERS: usize = 8;
const LINE_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct FtpConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
    /// Stop after the first snapshot file instead of replaying everything.
    pub snapshot_only: bool,
}

impl FtpConfig {
    pub fn from_secret(secret: &Secret) -> Result<Self, ConfigError> {
        Ok(Self {
            hostname: Secret::require(&secret.ftp_hostname, "ftp-hostname")?.to_owned(),
            username: Secret::require(&secret.ftp_username, "ftp-username")?.to_owned(),
            password: Secret::require(&secret.ftp_password, "ftp-password")?.to_owned(),
            snapshot_only: secret.ftp_snapshot_base_snapshot_only,
        })
    }
}

/// Retrieves and applies the snapshot files, retrying the FTP connection
/// with the same bounded backoff as the broker. Exhaustion is logged and
/// leaves the database as it was.
pub async fn incorporate_ftp(
    config: &FtpConfig,
    writer: &WriterHandle,
    refs: Arc<ReferenceSnapshot>,
) -> Result<(), IngestError> {
    for attempt in 1..=MAX_CONNECTION_ATTEMPTS {
        log::info!("ftp connecting (attempt {})", attempt);
        let fetch_config = config.clone();
        let fetched =
            tokio::task::spawn_blocking(move || fetch_snapshot_files(&fetch_config))
                .await?;
        match fetched {
            Ok(files) => {
                apply_snapshot(files, writer, refs).await?;
                return Ok(());
            }
            Err(why) => {
                let backoff = backoff_delay(attempt);
                log::error!(
                    "ftp failed, waiting {}s: {}",
                    backoff.as_secs(),
                    why
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
    log::error!("ftp connection attempts exhausted");
    Ok(())
}

/// Lists both virtual directories and streams each file to a temporary
/// file; nothing is held in memory.
fn fetch_snapshot_files(
    config: &FtpConfig,
) -> Result<Vec<(String, std::fs::File)>, IngestError> {
    let mut ftp = FtpStream::connect((config.hostname.as_str(), FTP_PORT))?;
    ftp.login(&config.username, &config.password)?;

    let mut names = ftp.nlst(Some("snapshot"))?;
    names.extend(ftp.nlst(Some("pushport"))?);

    let mut files = Vec::new();
    for name in names {
        log::info!("ftp retrieving {}", name);
        let mut temp = tempfile::tempfile()?;
        let mut stream = ftp.retr_as_stream(&name)?;
        std::io::copy(&mut stream, &mut temp)?;
        ftp.finalize_retr_stream(stream)?;
        temp.seek(SeekFrom::Start(0))?;
        files.push((name, temp));
        if config.snapshot_only {
            break;
        }
    }
    let _ = ftp.quit();
    Ok(files)
}

/// One transaction: purge the live tables, then replay every file in
/// retrieval order.
async fn apply_snapshot(
    files: Vec<(String, std::fs::File)>,
    writer: &WriterHandle,
    refs: Arc<ReferenceSnapshot>,
) -> Result<(), IngestError> {
    log::info!("purging database");
    writer.submit(WriteOp::Begin).await?;
    for op in bootstrap::purge_ops() {
        writer.submit(op).await?;
    }

    for (name, file) in files {
        log::info!("applying retrieved file {}", name);
        apply_file(file, writer, &refs).await?;
    }

    writer.submit(WriteOp::Commit).await?;
    Ok(())
}

/// Gunzips one snapshot file line by line and fans the XML decoding over
/// [`PARSE_WORKERS`] blocking tasks. `buffered` yields results in
/// submission order, so the writer receives records in file order even
/// though parsing is concurrent. A bad line is logged with its index and
/// skipped without aborting the transaction.
async fn apply_file(
    file: std::fs::File,
    writer: &WriterHandle,
    refs: &Arc<ReferenceSnapshot>,
) -> Result<(), IngestError> {
    let (line_tx, line_rx) = mpsc::channel::<(usize, String)>(LINE_BUFFER);

    let reader = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let lines = BufReader::new(MultiGzDecoder::new(file)).lines();
        for (index, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if line_tx.blocking_send((index, line)).is_err() {
                break;
            }
        }
        Ok(())
    });

    let mut parsed = ReceiverStream::new(line_rx)
        .map(|(index, line)| {
            tokio::task::spawn_blocking(move || (index, darwin::parse_darwin(&line)))
        })
        .buffered(PARSE_WORKERS);

    while let Some(joined) = parsed.next().await {
        let (index, result) = joined?;
        match result {
            Ok(records) => darwin_store::store(&records, refs, writer).await?,
            Err(why) => {
                log::error!("snapshot frame parse failed (line {}): {}", index, why)
            }
        }
    }

    reader.await??;
    Ok(())
}
