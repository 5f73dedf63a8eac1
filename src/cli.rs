//! Command-line surface: one subcommand per tool in spec.md §6. Shaped
//! after the derive-based `clap` layout used across the pack (see
//! LocalToasty's `cli.rs` for the closest concrete template), adapted to
//! this system's eight tools instead of the teacher's create/rename/
//! list/extend/expire/filesystems/clean set.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Time-limited workspace directories on shared storage", long_about = None)]
pub struct Args {
    /// Alternate configuration source(s), checked in order.
    #[arg(short = 'C', long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Allocate a new workspace, or reference/extend an existing one
    Allocate {
        /// Workspace name
        name: String,
        /// Duration in days
        days: Option<i64>,
        #[arg(short = 'F', long = "filesystem")]
        filesystem: Option<String>,
        #[arg(short = 'r', long = "reminder")]
        reminder: Option<i64>,
        #[arg(short = 'm', long = "mail")]
        mailaddress: Option<String>,
        #[arg(short = 'x', long = "extend")]
        extend: bool,
        #[arg(short = 'u', long = "user")]
        user: Option<String>,
        #[arg(short = 'g', long = "group")]
        groupflag: bool,
        #[arg(short = 'G', long = "groupname")]
        groupname: Option<String>,
        #[arg(short = 'c', long = "comment")]
        comment: Option<String>,
    },

    /// Find an existing workspace's path
    Find {
        name: String,
        #[arg(short = 'F', long = "filesystem")]
        filesystem: Option<String>,
        #[arg(short = 'g', long = "group")]
        groupworkspaces: bool,
        #[arg(short = 'l', long = "longnames")]
        longnames: bool,
        #[arg(short = 'u', long = "user")]
        user: Option<String>,
    },

    /// List workspaces matching a glob pattern
    List {
        pattern: Option<String>,
        #[arg(short = 'F', long = "filesystem")]
        filesystem: Option<String>,
        #[arg(short = 'g', long = "group")]
        groupworkspaces: bool,
        #[arg(short = 'l', long = "longnames")]
        longnames: bool,
        #[arg(short = 's', long = "sort-size")]
        sort_size: bool,
        #[arg(short = 'e', long = "expired")]
        expired_only: bool,
        #[arg(short = 'N', long = "sort-name")]
        sort_name: bool,
        #[arg(short = 'r', long = "reverse")]
        reverse: bool,
        #[arg(short = 't', long = "terse")]
        terse: bool,
        #[arg(short = 'u', long = "user")]
        user: Option<String>,
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },

    /// Release (move to grace) an existing workspace
    Release {
        name: String,
        #[arg(short = 'F', long = "filesystem")]
        filesystem: Option<String>,
        #[arg(short = 'u', long = "user")]
        user: Option<String>,
        #[arg(long = "delete-data")]
        delete_data: bool,
    },

    /// Restore a released workspace into a live one
    Restore {
        grace_id: String,
        target: String,
        #[arg(short = 'F', long = "filesystem")]
        filesystem: Option<String>,
        #[arg(short = 'u', long = "user")]
        user: Option<String>,
        /// Skip the interactive confirmation challenge (scripted use)
        #[arg(long = "yes")]
        yes: bool,
    },

    /// Sweep expired and stray workspaces
    Expirer {
        #[arg(short = 'F', long = "filesystem")]
        filesystem: Option<String>,
        /// Actually mutate state instead of reporting dry-run findings
        #[arg(long = "cleaner")]
        cleaner: bool,
    },

    /// Show detailed information about matching workspaces
    Stat {
        pattern: Option<String>,
        #[arg(short = 'F', long = "filesystem")]
        filesystem: Option<String>,
        #[arg(short = 'u', long = "user")]
        user: Option<String>,
    },

    /// Directly edit database entry fields (root/admin only)
    Editdb {
        pattern: String,
        #[arg(long = "add-time")]
        add_time_days: Option<i64>,
        /// Required confirmation flag; refuses to run without it
        #[arg(long = "not-kidding")]
        not_kidding: bool,
    },
}
