use std::{error::Error, fmt};

/// Failure while decoding or interpreting a Push Port document. One bad
/// frame never takes the ingester down; callers log and move on.
#[derive(Debug)]
pub enum DecodeError {
    Xml(quick_xml::Error),
    /// Element closed that was never opened, or input ended mid-element.
    UnbalancedDocument,
    /// A path marked as a typed scalar held something else.
    BadScalar {
        path: String,
        value: String,
    },
    MissingField {
        tag: String,
        field: &'static str,
    },
    BadTime(String),
    BadDate(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Xml(why) => write!(f, "malformed xml: {}", why),
            Self::UnbalancedDocument => write!(f, "unbalanced xml document"),
            Self::BadScalar { path, value } => {
                write!(f, "value at {} is not of the declared type: {:?}", path, value)
            }
            Self::MissingField { tag, field } => {
                write!(f, "<{}> record is missing required field '{}'", tag, field)
            }
            Self::BadTime(raw) => write!(f, "unparseable time {:?}", raw),
            Self::BadDate(raw) => write!(f, "unparseable date {:?}", raw),
        }
    }
}

impl Error for DecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Xml(why) => Some(why),
            _ => None,
        }
    }
}

impl From<quick_xml::Error> for DecodeError {
    fn from(why: quick_xml::Error) -> Self {
        Self::Xml(why)
    }
}
