pub mod association;
pub mod message;
pub mod reference;
pub mod schedule;
pub mod status;
