//! HTTP API for the fleet daemon.

mod server;
mod v0;

pub use server::{SharedState, router, serve};
