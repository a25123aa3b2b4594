pub mod common;
pub mod config;
pub mod inbox;
pub mod listen;
pub mod send;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "inbox-pulse")]
#[command(author, version, about = "Poll a direct-message inbox and react to new messages")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "INBOX_PULSE_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the poll loop and print incoming events
    Listen(listen::ListenArgs),

    /// Show recent messages across threads
    Inbox(inbox::InboxArgs),

    /// Send a message to a thread
    Send(send::SendArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}
