use std::{error::Error, fmt};

use database::DatabaseError;
use utility::config::ConfigError;

use crate::stomp::StompError;

#[derive(Debug)]
pub enum IngestError {
    Config(ConfigError),
    Database(DatabaseError),
    Decode(darwin::DecodeError),
    Stomp(StompError),
    Ftp(suppaftp::FtpError),
    ObjectStore(object_store::Error),
    /// The reference bucket held no matching timetable object.
    NoReferenceObject,
    Io(std::io::Error),
    Task(tokio::task::JoinError),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Config(why) => write!(f, "{}", why),
            Self::Database(why) => write!(f, "database error: {}", why),
            Self::Decode(why) => write!(f, "decode error: {}", why),
            Self::Stomp(why) => write!(f, "broker error: {}", why),
            Self::Ftp(why) => write!(f, "ftp error: {}", why),
            Self::ObjectStore(why) => write!(f, "object store error: {}", why),
            Self::NoReferenceObject => {
                write!(f, "no reference timetable object in the bucket")
            }
            Self::Io(why) => write!(f, "io error: {}", why),
            Self::Task(why) => write!(f, "background task failed: {}", why),
        }
    }
}

impl Error for IngestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(why) => Some(why),
            Self::Database(why) => Some(why),
            Self::Decode(why) => Some(why),
            Self::Stomp(why) => Some(why),
            Self::Ftp(why) => Some(why),
            Self::ObjectStore(why) => Some(why),
            Self::NoReferenceObject => None,
            Self::Io(why) => Some(why),
            Self::Task(why) => Some(why),
        }
    }
}

impl From<ConfigError> for IngestError {
    fn from(why: ConfigError) -> Self {
        Self::Config(why)
    }
}

impl From<DatabaseError> for IngestError {
    fn from(why: DatabaseError) -> Self {
        Self::Database(why)
    }
}

impl From<darwin::DecodeError> for IngestError {
    fn from(why: darwin::DecodeError) -> Self {
        Self::Decode(why)
    }
}

impl From<StompError> for IngestError {
    fn from(why: StompError) -> Self {
        Self::Stomp(why)
    }
}

impl From<suppaftp::FtpError> for IngestError {
    fn from(why: suppaftp::FtpError) -> Self {
        Self::Ftp(why)
    }
}

impl From<object_store::Error> for IngestError {
    fn from(why: object_store::Error) -> Self {
        Self::ObjectStore(why)
    }
}

impl From<std::io::Error> for IngestError {
    fn from(why: std::io::Error) -> Self {
        Self::Io(why)
    }
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(why: tokio::task::JoinError) -> Self {
        Self::Task(why)
    }
}
