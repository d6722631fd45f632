//! Load balancer backend configuration
//!
//! The active fleet is rendered into a template, written next to the live config and
//! renamed into place, then the load balancer is told to reload.

mod reload;
mod render;
mod writer;

pub use reload::{CommandReloader, LoadBalancerReloader};
pub use render::{render, render_backends, BackendSettings};
pub use writer::LbConfigWriter;
