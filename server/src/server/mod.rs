//! WebSocket relay: the collaboration "tube" between peers

pub mod websocket;

pub use websocket::{AppState, ws_handler};
