use std::{error::Error, fmt, io};

#[derive(Debug)]
pub enum StompError {
    Io(io::Error),
    /// The peer sent bytes that do not form a STOMP frame.
    Protocol(String),
    /// The broker answered CONNECT with an ERROR frame.
    Broker(String),
    /// Nothing (not even a heartbeat) arrived within the negotiated window.
    HeartbeatTimeout,
    /// The socket closed.
    Disconnected,
}

impl fmt::Display for StompError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(why) => write!(f, "{}", why),
            Self::Protocol(what) => write!(f, "protocol violation: {}", what),
            Self::Broker(what) => write!(f, "broker refused: {}", what),
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

impl Error for StompError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(why) => Some(why),
            _ => None,
        }
    }
}

impl From<io::Error> for StompError {
    fn from(why: io::Error) -> Self {
        Self::Io(why)
    }
}
