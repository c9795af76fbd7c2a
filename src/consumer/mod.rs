//! The check-in consumer: everything between a raw message and committed
//! monitor state.

pub mod admission;
pub mod decoder;
pub mod environment_state;
pub mod processor;
pub mod reconciler;
pub mod resolver;


pub use processor::{CheckInProcessor, MessageOutcome, ProcessorSettings};
