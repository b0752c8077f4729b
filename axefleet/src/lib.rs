//! Discovery, monitoring, and control for a home fleet of BitAxe-family
//! miners.
//!
//! The [`registry`] owns the list of known devices. The [`scanner`] finds
//! new ones on a /24, the [`refresh`] loop keeps their status current, and
//! [`fleet`] condenses a snapshot into totals. The [`api`] module serves all
//! of it over HTTP for the CLI and other front ends.

pub mod alerts;
pub mod api;
pub mod api_client;
pub mod config;
pub mod control;
pub mod daemon;
pub mod error;
pub mod fleet;
pub mod pool_api;
pub mod probe;
pub mod refresh;
pub mod registry;
pub mod scanner;
pub mod tracing;
pub mod types;

#[cfg(test)]
mod test_support;
