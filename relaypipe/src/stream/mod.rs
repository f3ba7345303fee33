//! Streams: ordered single-producer/single-consumer channels with
//! synchronous handoff, plus fan-in coordination for multi-worker producers.

mod channel;
mod fan_in;

pub use channel::{StreamReceiver, StreamSender, from_iter, stream};
pub use fan_in::FanInSender;
