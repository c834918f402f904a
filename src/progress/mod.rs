//! Progress events and their wire frames.

pub mod event;
pub mod frame;

pub use event::{ErrorCode, Phase, ProgressEvent};
pub use frame::StreamFrame;
