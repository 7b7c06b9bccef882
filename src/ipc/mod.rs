//! IPC module for daemon and front-end communication

mod protocol;
mod server;

pub use server::{Server, ServerContext, SystemChecks};
