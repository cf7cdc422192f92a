//! The Aegis dispatcher: configuration, the worker controller, daemon
//! control and status queries behind the `aegis` command.

pub mod config;
pub mod controller;
pub mod daemon;
pub mod status;

pub use controller::Aegis;
