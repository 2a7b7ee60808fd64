use std::{error::Error, fmt};

#[derive(Debug)]
pub enum DatabaseError {
    NotFound,
    /// The writer has shut down and no longer accepts submissions.
    Closed,
    Other(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "row not found"),
            Self::Closed => write!(f, "write processor is closed"),
            Self::Other(why) => write!(f, "{}", why),
        }
    }
}

impl Error for DatabaseError {}

impl From<sqlx::Error> for DatabaseError {
    fn from(why: sqlx::Error) -> Self {
        match why {
            sqlx::Error::RowNotFound => Self::NotFound,
            _ => Self::Other(Box::new(why)),
        }
    }
}
