// Library root: re-exports all modules so integration tests and the binary
// share one public API.

pub mod app;
pub mod catalog;
pub mod config;
pub mod draft;
pub mod error;
pub mod protocol;
pub mod ranking;
pub mod session;
pub mod ws_server;
