use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::models::RegionId;

/// proxyfleet - keeps a fleet of forward proxies behind a load balancer fresh
#[derive(Parser, Debug)]
#[command(name = "proxyfleet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(
        short = 'C',
        long = "conf",
        global = true,
        default_value = "proxy.conf",
        env = "PROXYFLEET_CONFIG"
    )]
    pub conf: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// The subcommand, running the daemon when none was given
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run {
            test: false,
            rotate: false,
        })
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the rotation daemon in the foreground
    Run {
        /// Rotate synthetic proxies; no instances are created or deleted
        #[arg(short, long)]
        test: bool,

        /// Rotate once before the first sleep
        #[arg(short = 'R', long)]
        rotate: bool,
    },

    /// Create a single proxy instance outside the inventory
    Create {
        /// Region to create the instance in
        #[arg(short, long, default_value_t = 3)]
        region: RegionId,
    },

    /// Delete every proxy instance in the fleet
    Drop,

    /// Drop the fleet and provision a fresh one
    Provision {
        /// Number of proxies to create
        #[arg(short = 'N', long, default_value_t = 10)]
        num: usize,
    },

    /// Provision more proxies on top of the current fleet
    Add {
        /// Number of proxies to add
        #[arg(short = 'N', long, default_value_t = 10)]
        num: usize,
    },

    /// Run a single rotation now
    Rotate {
        /// Target region for the new proxy
        #[arg(short, long)]
        region: Option<RegionId>,
    },

    /// Run a single synthetic rotation
    Test,

    /// Rewrite the inventory from the provider's listing
    WriteInventory,

    /// Render the inventory into the load balancer config and reload it
    WriteLbConfig,

    /// Stop a running daemon
    Stop,

    /// Stop a running daemon and start a new one
    Restart,
}
