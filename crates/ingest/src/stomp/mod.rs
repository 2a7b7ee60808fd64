pub mod client;
pub mod frame;

mod error;

pub use client::{FrameHandler, SessionEnd, StompConfig, Subscriber};
pub use error::StompError;
pub use frame::{Command, Frame, StompCodec, WireEvent};
