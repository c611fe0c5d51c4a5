//! Transport: WebSocket upgrade and framed send/receive halves.

pub mod websocket;

pub use websocket::{FrameReceiver, FrameSender};
