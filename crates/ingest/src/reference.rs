//! Reference-data retrieval from the object store.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::{ObjectMeta, ObjectStore};

use database::store::reference::{reference_ops, CorpusEntry, CorpusIndex};
use database::writer::{WriteOp, WriterHandle};
use model::reference::ReferenceSnapshot;
use utility::config::{ConfigError, Secret};

use crate::compress;
use crate::error::IngestError;

#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    pub access: String,
    pub secret: String,
    pub bucket: String,
    pub region: String,
    pub corpus_path: Option<PathBuf>,
}

impl ReferenceConfig {
    pub fn from_secret(secret: &Secret) -> Result<Self, ConfigError> {
        Ok(Self {
            access: Secret::require(&secret.s3_access, "s3-access")?.to_owned(),
            secret: Secret::require(&secret.s3_secret, "s3-secret")?.to_owned(),
            bucket: secret.s3_bucket.clone(),
            region: secret.s3_region.clone(),
            corpus_path: secret.corpus_path.clone().map(PathBuf::from),
        })
    }
}

/// Fetches the newest reference timetable, upserts it through the writer
/// (in one transaction) and returns the fresh in-process snapshot.
pub async fn incorporate_reference_data(
    config: &ReferenceConfig,
    writer: &WriterHandle,
) -> Result<Arc<ReferenceSnapshot>, IngestError> {
    let corpus = load_corpus(config.corpus_path.clone()).await?;
    let xml = retrieve_reference_document(config).await?;
    let records = darwin::parse_reference(&xml)?;

    let (ops, snapshot) = reference_ops(&records, &corpus);
    log::info!(
        "storing reference data ({} locations, {} reasons)",
        snapshot.location_count(),
        snapshot.reason_count()
    );
    writer.submit(WriteOp::Begin).await?;
    for op in ops {
        writer.submit(op).await?;
    }
    writer.submit(WriteOp::Commit).await?;

    Ok(Arc::new(snapshot))
}

/// The newest object whose key mentions "ref" holds the current reference
/// timetable, gzip-compressed.
async fn retrieve_reference_document(
    config: &ReferenceConfig,
) -> Result<String, IngestError> {
    let store = AmazonS3Builder::new()
        .with_bucket_name(&config.bucket)
        .with_region(&config.region)
        .with_access_key_id(&config.access)
        .with_secret_access_key(&config.secret)
        .build()?;

    let mut objects: Vec<ObjectMeta> = store.list(None).try_collect().await?;
    objects.retain(|meta| meta.location.as_ref().contains("ref"));
    objects.sort_by(|a, b| a.location.as_ref().cmp(b.location.as_ref()));
    let latest = objects.last().ok_or(IngestError::NoReferenceObject)?;

    log::info!("fetching reference data {}", latest.location);
    let compressed = store.get(&latest.location).await?.bytes().await?;
    Ok(compress::decompress_to_string(&compressed)?)
}

/// Optional CORPUS extract: ISO-8859-1 JSON mapping tiplocs to CRS codes
/// and full names.
async fn load_corpus(path: Option<PathBuf>) -> Result<CorpusIndex, IngestError> {
    let Some(path) = path else {
        return Ok(CorpusIndex::new());
    };
    tokio::task::spawn_blocking(move || -> Result<CorpusIndex, IngestError> {
        let raw = fs::read(&path)?;
        let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&raw);
        let parsed: serde_json::Value = serde_json::from_str(&decoded)
            .map_err(|why| {
                IngestError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    why,
                ))
            })?;

        let mut corpus = CorpusIndex::new();
        let entries = parsed
            .get("TIPLOCDATA")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default();
        for entry in entries {
            let Some(tiploc) = entry.get("TIPLOC").and_then(serde_json::Value::as_str)
            else {
                continue;
            };
            corpus.insert(
                tiploc.to_owned(),
                CorpusEntry {
                    crs: non_blank(entry.get("3ALPHA")),
                    name: non_blank(entry.get("NLCDESC")),
                },
            );
        }
        Ok(corpus)
    })
    .await?
}

fn non_blank(value: Option<&serde_json::Value>) -> Option<String> {
    value
        .and_then(serde_json::Value::as_str)
        .map(str::trim_end)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}
