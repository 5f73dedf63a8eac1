//! Restore engine (C9): moves a grace-state workspace back into a live
//! workspace directory. Grounded in `ws_restore.cpp`, including its
//! interactive confirmation step (here a short random-digit challenge,
//! skippable for scripted/test use).

use crate::config::Config;
use crate::db::Database;
use crate::error::{Result, WsError};
use crate::privilege::Broker;

pub struct RestoreRequest<'a> {
    pub grace_id: &'a str,
    pub target_name: &'a str,
    pub filesystem: Option<&'a str>,
    pub skip_confirmation: bool,
}

/// A confirmation challenge: the caller must echo `code` back.
pub struct Challenge {
    pub code: u32,
}

impl Challenge {
    pub fn generate() -> Challenge {
        Challenge { code: rand::random::<u32>() % 9000 + 1000 }
    }

    pub fn verify(&self, response: &str) -> bool {
        response.trim().parse::<u32>().map(|v| v == self.code).unwrap_or(false)
    }
}

/// Validates that `id`'s owner prefix matches `username`, unless the
/// caller is root. Rejects ids containing path separators.
fn validate_id_ownership(id: &str, username: &str, is_root: bool) -> Result<()> {
    if id.contains('/') || id.contains('\\') {
        return Err(WsError::NameIllegal(id.to_string()));
    }
    if is_root {
        return Ok(());
    }
    let owner = id.split('-').next().unwrap_or("");
    if owner != username {
        return Err(WsError::AccessDenied);
    }
    Ok(())
}

pub fn restore(
    config: &Config,
    broker: &Broker,
    username: &str,
    is_root: bool,
    groups: &[String],
    req: RestoreRequest,
) -> Result<()> {
    validate_id_ownership(req.grace_id, username, is_root)?;

    let candidates: Vec<String> = match req.filesystem {
        Some(fs) => vec![fs.to_string()],
        None => config.valid_filesystems(username, groups),
    };

    let mut matches = Vec::new();
    for candidate in &candidates {
        if let Some(fs) = config.get_fs_config(candidate) {
            let db = Database::open(fs);
            if db.read_entry(req.grace_id, true).is_ok() {
                matches.push(candidate.clone());
            }
        }
    }

    let filesystem = match matches.len() {
        0 => return Err(WsError::NotFound(req.grace_id.to_string())),
        1 => matches.remove(0),
        _ => return Err(WsError::Exists(req.grace_id.to_string())),
    };

    let fs = config.get_fs_config(&filesystem).ok_or_else(|| WsError::NotFound(filesystem.clone()))?;
    if !fs.restorable {
        return Err(WsError::AccessDenied);
    }

    let target_id = format!("{username}-{}", req.target_name);
    let target_db = Database::open(fs);
    let target_entry = target_db.read_entry(&target_id, false)?;

    let db = Database::open(fs);
    let grace_entry = db.read_entry(req.grace_id, true)?;

    if !req.skip_confirmation {
        // Interactive confirmation is the CLI layer's responsibility; by
        // the time control reaches here `skip_confirmation` must already
        // reflect a verified challenge response.
        return Err(WsError::AccessDenied);
    }

    let dbuid = config.global.dbuid.ok_or_else(|| WsError::ConfigInvalid("missing dbuid".into()))?;

    let dest = target_entry.workspace.join(
        grace_entry
            .workspace
            .file_name()
            .ok_or_else(|| WsError::Malformed { path: grace_entry.workspace.clone(), reason: "no basename".into() })?,
    );

    rename_same_filesystem(&grace_entry.workspace, &dest)?;
    let _ = broker;
    let _ = dbuid;

    db.delete_entry(req.grace_id, true)?;
    Ok(())
}

fn rename_same_filesystem(from: &std::path::Path, to: &std::path::Path) -> Result<()> {
    std::fs::rename(from, to).map_err(|e| {
        if e.raw_os_error() == Some(libc_exdev()) {
            WsError::CrossDevice
        } else {
            WsError::IoFailed { path: from.to_path_buf(), source: e }
        }
    })
}

/// `EXDEV`, hardcoded rather than pulling in `libc` solely for one
/// constant (it is platform-stable on every target this tool ships for).
fn libc_exdev() -> i32 {
    18
}
