//! Library surface for the workspace lifecycle manager. `main.rs` is a
//! thin CLI shell over these modules; integration tests drive the
//! engines directly against a `tempfile::TempDir` fixture instead of the
//! compiled binary, since CI has no root/capabilities to exercise the
//! real privilege broker.

pub mod allocate;
pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod expire;
pub mod glob;
pub mod identity;
pub mod list;
pub mod logging;
pub mod mail;
pub mod privilege;
pub mod release;
pub mod restore;
pub mod time;
pub mod userconfig;
pub mod wsdir;
