//! Command-line arguments

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "vlink", version, about = "Vehicle-cloud telemetry client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Log in interactively and store the session for a vehicle
    Login {
        /// Vehicle identification number
        #[arg(long, env = "VLINK_VIN")]
        vin: String,
    },
    /// Poll the vehicle on its configured schedule and print updates
    Run {
        /// Vehicle identification number
        #[arg(long, env = "VLINK_VIN")]
        vin: String,
        /// Developer API key for the vehicle endpoints
        #[arg(long, env = "VLINK_API_KEY")]
        api_key: String,
    },
    /// Delete the stored session for a vehicle
    Logout {
        /// Vehicle identification number
        #[arg(long, env = "VLINK_VIN")]
        vin: String,
    },
    /// Execute a remote command (lock, unlock, ...)
    Command {
        /// Vehicle identification number
        #[arg(long, env = "VLINK_VIN")]
        vin: String,
        /// Developer API key for the vehicle endpoints
        #[arg(long, env = "VLINK_API_KEY")]
        api_key: String,
        /// Command name as exposed by the API
        name: String,
    },
}
