#![allow(dead_code, clippy::unwrap_used)]

pub mod mock_server;
pub mod mock_transport;
