use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use falimy_core::models::{ListStatus, ListType};

#[derive(Parser)]
#[command(name = "falimy")]
#[command(about = "Family lists and locations, offline first")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local replica file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Sign in, join a family or sign out
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Push pending changes and pull the family's data
    Sync,
    /// Show the family's lists
    Lists {
        /// Only lists with this status
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the items of a list
    Items {
        /// List id, server id or unique prefix
        list: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage lists
    List {
        #[command(subcommand)]
        command: ListCommands,
    },
    /// Manage list items
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },
    /// Show family members
    Members {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Follow realtime changes to the family's lists
    Watch {
        /// Stop after this many seconds (runs until Ctrl-C when omitted)
        #[arg(long, value_name = "SECONDS")]
        seconds: Option<u64>,
    },
    /// Show replica and session status
    Status,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// PocketBase server URL
        #[arg(long, value_name = "URL")]
        server: Option<String>,
        /// Seconds between background syncs
        #[arg(long, value_name = "SECONDS")]
        sync_interval: Option<u64>,
        /// Days of location history to keep
        #[arg(long, value_name = "DAYS")]
        retention_days: Option<u64>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Login with email/password and store the session in the keychain
    Login {
        #[arg(long, value_name = "EMAIL")]
        email: String,
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Create an account in an existing family with its invite code
    Join {
        /// Family id shared by the family admin
        #[arg(long, value_name = "ID")]
        family: String,
        /// Invite code
        #[arg(long, value_name = "CODE")]
        code: String,
        #[arg(long, value_name = "EMAIL")]
        email: String,
        #[arg(long, value_name = "PASSWORD")]
        password: String,
        /// Display name
        #[arg(long, value_name = "NAME")]
        name: String,
    },
    /// Show auth status for profile
    Status,
    /// Sign out and wipe the local replica
    Logout,
}

#[derive(Subcommand)]
pub enum ListCommands {
    /// Create a list
    Add {
        name: String,
        #[arg(long = "type", value_enum, default_value_t = TypeArg::Shopping)]
        list_type: TypeArg,
    },
}

#[derive(Subcommand)]
pub enum ItemCommands {
    /// Add an item to a list
    Add {
        /// List id, server id or unique prefix
        list: String,
        name: String,
        #[arg(long)]
        quantity: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    /// Toggle an item's checked state
    Check {
        /// Item id, server id or unique prefix
        item: String,
    },
    /// Delete an item
    Delete {
        /// Item id, server id or unique prefix
        item: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum TypeArg {
    Shopping,
    Todo,
    Packing,
    Custom,
}

impl From<TypeArg> for ListType {
    fn from(value: TypeArg) -> Self {
        match value {
            TypeArg::Shopping => Self::Shopping,
            TypeArg::Todo => Self::Todo,
            TypeArg::Packing => Self::Packing,
            TypeArg::Custom => Self::Custom,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusArg {
    Active,
    Completed,
    Archived,
}

impl From<StatusArg> for ListStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Active => Self::Active,
            StatusArg::Completed => Self::Completed,
            StatusArg::Archived => Self::Archived,
        }
    }
}
