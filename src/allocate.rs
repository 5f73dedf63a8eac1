//! Allocation/extension engine (C7): probes the caller's permitted
//! filesystems for an existing entry and either extends it or creates a
//! fresh workspace. Grounded in `ws_allocate.cpp`'s
//! `validateFsAndGroup`/`validateDurationAndExtensions` helpers and its
//! probe-then-dispatch main loop.

use crate::config::{Config, Intent};
use crate::db::{Database, Entry};
use crate::error::{Result, WsError};
use crate::identity::Identity;
use crate::privilege::Broker;
use crate::wsdir;

/// Outcome of probing one candidate filesystem for an existing entry,
/// replacing the original's exception-based "not found" control flow
/// with a total result.
pub enum Probe {
    Found { entry: Entry, filesystem: String },
    NotFound,
}

fn probe(config: &Config, candidate: &str, id: &str) -> Probe {
    let Some(fs) = config.get_fs_config(candidate) else {
        return Probe::NotFound;
    };
    let db = Database::open(fs);
    match db.read_entry(id, false) {
        Ok(entry) => Probe::Found { entry, filesystem: candidate.to_string() },
        Err(_) => Probe::NotFound,
    }
}

/// Request parameters for `allocate`/`allocate -x`.
pub struct AllocateRequest<'a> {
    pub name: &'a str,
    pub duration_days: Option<i64>,
    pub filesystem: Option<&'a str>,
    pub extend: bool,
    pub reminder: Option<i64>,
    pub mailaddress: Option<&'a str>,
    pub owner_override: Option<&'a str>,
    pub group_name: Option<&'a str>,
    pub groupflag: bool,
    pub comment: Option<&'a str>,
}

/// Outcome returned to the CLI layer.
pub struct AllocateOutcome {
    pub path: std::path::PathBuf,
    pub filesystem: String,
    pub extensions_remaining: i64,
    pub expiration: i64,
}

/// Charset check for the `<owner>-<name>` id grammar: first character
/// alphanumeric, remainder alphanumeric plus `_.-`. Rejecting this up
/// front keeps a `/`-bearing name from ever reaching
/// `wsdir::create_workspace`'s path join.
fn is_valid_workspace_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

/// Resolves the uid that should own the created workspace: the target of
/// a root `-u <user>` override if it names a real account, otherwise the
/// caller's own uid. Mirrors `dbv1.cpp`'s `getpwnam(user_option)` lookup.
fn resolve_owner_uid(identity: &Identity, owner_override: Option<&str>) -> Result<u32> {
    match owner_override {
        Some(name) if identity.is_root() => users::get_user_by_name(name)
            .map(|u| u.uid())
            .ok_or_else(|| WsError::NotFound(format!("user {name}"))),
        _ => Ok(identity.uid),
    }
}

/// Resolves the gid that should own the created workspace: the named
/// `-G <groupname>` if it names a real group, otherwise the caller's own
/// primary gid. Mirrors `dbv1.cpp`'s `getgrnam(groupname)` override.
fn resolve_group_gid(_identity: &Identity, group_name: Option<&str>) -> Result<u32> {
    match group_name {
        Some(name) => users::get_group_by_name(name)
            .map(|g| g.gid())
            .ok_or_else(|| WsError::NotFound(format!("group {name}"))),
        None => Ok(users::get_current_gid()),
    }
}

pub fn allocate(
    config: &Config,
    broker: &Broker,
    identity: &Identity,
    now: i64,
    req: AllocateRequest,
) -> Result<AllocateOutcome> {
    if !is_valid_workspace_name(req.name) {
        return Err(WsError::NameIllegal(req.name.to_string()));
    }

    let candidates: Vec<String> = match req.filesystem {
        Some(fs) => {
            if !config.has_access(&identity.username, &identity.groups, fs, Intent::Use) {
                return Err(WsError::AccessDenied);
            }
            vec![fs.to_string()]
        }
        None => config.valid_filesystems(&identity.username, &identity.groups),
    };
    if candidates.is_empty() {
        return Err(WsError::AccessDenied);
    }

    let effective_owner = match req.owner_override {
        Some(target) if identity.is_root() => target,
        _ => identity.username.as_str(),
    };
    let id = format!("{effective_owner}-{}", req.name);

    let mut found: Option<(Entry, String)> = None;
    for candidate in &candidates {
        if let Probe::Found { entry, filesystem } = probe(config, candidate, &id) {
            found = Some((entry, filesystem));
            break;
        }
    }

    match found {
        Some((mut entry, filesystem)) if req.extend => {
            let fs = config.get_fs_config(&filesystem).ok_or_else(|| WsError::NotFound(id.clone()))?;
            if !fs.extendable {
                return Err(WsError::AccessDenied);
            }
            if entry.filesystem_owner() != identity.username && !identity.is_root() {
                require_rwx(&entry.workspace)?;
            }

            let requested = req.duration_days.unwrap_or(config.global.duration);
            let clamped = match fs.maxduration {
                Some(max) => requested.min(max),
                None => requested,
            };
            entry.use_extension(identity.is_root())?;
            entry.expiration = now + clamped * 86_400;

            let db = Database::open(fs);
            let (dbuid, dbgid) = dbids(config)?;
            db.write_entry(&entry, false, dbuid, dbgid)?;

            Ok(AllocateOutcome {
                path: entry.workspace,
                filesystem,
                extensions_remaining: entry.extensions,
                expiration: entry.expiration,
            })
        }
        Some((entry, filesystem)) => Ok(AllocateOutcome {
            extensions_remaining: entry.extensions,
            expiration: entry.expiration,
            path: entry.workspace,
            filesystem,
        }),
        None if req.extend => Err(WsError::NotFound(id)),
        None => create_new(config, broker, identity, now, &candidates, &id, req),
    }
}

fn create_new(
    config: &Config,
    broker: &Broker,
    identity: &Identity,
    now: i64,
    candidates: &[String],
    id: &str,
    req: AllocateRequest,
) -> Result<AllocateOutcome> {
    let target = candidates
        .iter()
        .find(|c| config.has_access(&identity.username, &identity.groups, c, Intent::Create))
        .ok_or(WsError::AccessDenied)?;
    let fs = config.get_fs_config(target).ok_or(WsError::AccessDenied)?;
    if !fs.allocatable {
        return Err(WsError::AccessDenied);
    }

    let effective_owner = match req.owner_override {
        Some(t) if identity.is_root() => t,
        _ => identity.username.as_str(),
    };
    let owner_uid = resolve_owner_uid(identity, req.owner_override)?;
    let effective_gid = resolve_group_gid(identity, req.group_name)?;

    let requested = req.duration_days.unwrap_or(config.global.duration);
    let duration = match fs.maxduration {
        Some(max) => requested.min(max),
        None => requested,
    };
    let maxextensions = fs.maxextensions.unwrap_or(config.global.maxextensions);

    let created = wsdir::create_workspace(
        broker,
        fs,
        req.name,
        effective_owner,
        owner_uid,
        req.group_name,
        effective_gid,
        req.groupflag,
    )?;

    let entry = Entry {
        id: id.to_string(),
        filesystem: target.clone(),
        workspace: created.path.clone(),
        creation: now,
        expiration: now + duration * 86_400,
        released: 0,
        reminder: req.reminder.unwrap_or(config.global.reminderdefault),
        extensions: maxextensions,
        group: req.group_name.unwrap_or_default().to_string(),
        mailaddress: req.mailaddress.unwrap_or_default().to_string(),
        comment: req.comment.unwrap_or_default().to_string(),
        dbversion: Some(1),
    };

    let db = Database::open(fs);
    let (dbuid, dbgid) = dbids(config)?;
    db.create_entry(&entry, dbuid, dbgid)?;

    Ok(AllocateOutcome {
        path: entry.workspace,
        filesystem: target.clone(),
        extensions_remaining: entry.extensions,
        expiration: entry.expiration,
    })
}

fn dbids(config: &Config) -> Result<(u32, u32)> {
    let dbuid = config
        .global
        .dbuid
        .ok_or_else(|| WsError::ConfigInvalid("missing dbuid".into()))?;
    let dbgid = config
        .global
        .dbgid
        .ok_or_else(|| WsError::ConfigInvalid("missing dbgid".into()))?;
    Ok((dbuid, dbgid))
}

fn require_rwx(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let meta = std::fs::metadata(path).map_err(|e| WsError::IoFailed { path: path.to_path_buf(), source: e })?;
    if meta.permissions().mode() & 0o700 == 0o700 {
        Ok(())
    } else {
        Err(WsError::AccessDenied)
    }
}

impl Entry {
    /// The owner portion of the entry id (`<owner>-<name>`), used to
    /// decide whether a non-root caller may extend this entry.
    fn filesystem_owner(&self) -> String {
        self.id.split('-').next().unwrap_or_default().to_string()
    }
}
