//! proxyfleet - rotating forward-proxy fleet manager
//!
//! Keeps a pool of short-lived proxy hosts behind a load balancer by periodically
//! provisioning a replacement, retiring an old host and reconfiguring the balancer.
//!
//! ## Features
//!
//! - Retirement policies: random, least recently used, new region, and LRU across regions
//! - Plain-text inventory with crash-safe rewrites and an advisory lock
//! - HAProxy backend rendering from a template
//! - Linode and AWS backends driven through their CLIs, plus an in-memory dry run
//! - Foreground daemon stopped by heartbeat removal or signal

pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod fleet;
pub mod hooks;
pub mod lb;
pub mod models;
pub mod provider;
pub mod repository;
pub mod rotation;
pub mod services;

pub use config::Config;
pub use error::{FleetError, Result};
