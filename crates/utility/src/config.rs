use std::{env, error::Error, fmt, fs, path::Path};

use serde::Deserialize;

/// Path of the secret file unless `DARWIN_SECRET` points elsewhere.
const DEFAULT_SECRET_PATH: &str = "secret.json";

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    MissingKey(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(why) => write!(f, "could not read secret file: {}", why),
            Self::Parse(why) => write!(f, "could not parse secret file: {}", why),
            Self::MissingKey(key) => write!(f, "missing configuration key '{}'", key),
        }
    }
}

impl Error for ConfigError {}

fn default_heartbeat_seconds() -> u64 {
    35
}

fn default_s3_bucket() -> String {
    "darwin.xmltimetable".to_owned()
}

fn default_s3_region() -> String {
    "eu-west-2".to_owned()
}

fn default_bplan_path() -> String {
    "datasets/bplan.txt".to_owned()
}

fn default_http_bind() -> String {
    "0.0.0.0:8080".to_owned()
}

/// Deployment configuration, conventionally kept in `secret.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct Secret {
    #[serde(rename = "database-string")]
    pub database_string: String,

    // STOMP broker
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub subscribe: Option<String>,
    pub identifier: Option<String>,
    #[serde(rename = "client-id")]
    pub client_id: Option<String>,
    #[serde(rename = "heartbeat-seconds", default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u64,

    // FTP snapshots
    #[serde(rename = "ftp-hostname")]
    pub ftp_hostname: Option<String>,
    #[serde(rename = "ftp-username")]
    pub ftp_username: Option<String>,
    #[serde(rename = "ftp-password")]
    pub ftp_password: Option<String>,

    // reference-data object store
    #[serde(rename = "s3-access")]
    pub s3_access: Option<String>,
    #[serde(rename = "s3-secret")]
    pub s3_secret: Option<String>,
    #[serde(rename = "s3-bucket", default = "default_s3_bucket")]
    pub s3_bucket: String,
    #[serde(rename = "s3-region", default = "default_s3_region")]
    pub s3_region: String,

    // local datasets
    #[serde(rename = "bplan-path", default = "default_bplan_path")]
    pub bplan_path: String,
    #[serde(rename = "corpus-path")]
    pub corpus_path: Option<String>,

    #[serde(rename = "http-bind", default = "default_http_bind")]
    pub http_bind: String,

    #[serde(default)]
    pub no_from_ftp: bool,
    #[serde(default)]
    pub no_listen_stomp: bool,
    #[serde(default)]
    pub ftp_snapshot_base_snapshot_only: bool,
}

impl Secret {
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("DARWIN_SECRET")
            .unwrap_or_else(|_| DEFAULT_SECRET_PATH.to_owned());
        Self::load_from(path)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&raw).map_err(ConfigError::Parse)
    }

    /// A required key that is optional in the file, reported by name when absent.
    pub fn require<'a>(
        value: &'a Option<String>,
        key: &'static str,
    ) -> Result<&'a str, ConfigError> {
        value.as_deref().ok_or(ConfigError::MissingKey(key))
    }
}
