//! Expirer (C10): single-threaded, per-filesystem sweep. Phase A
//! reconciles stray directories/entries against the live state; Phase B
//! expires overdue live entries into grace and purges grace entries past
//! their keeptime. Grounded in `ws_expirer.cpp`'s
//! `clean_stray_directories` and `expire_workspaces`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::FilesystemConfig;
use crate::db::{Database, MAGIC_FILE};
use crate::error::{Result, WsError};
use crate::glob;
use crate::privilege::Broker;
use crate::wsdir;

/// Seconds since the epoch at 2001-01-01T00:00:00Z; a `released` value
/// older than this is almost certainly an uninitialized zero rather than
/// a real timestamp, mirroring `ws_expirer.cpp`'s purge-reference guard.
const YEAR_2001_EPOCH: i64 = 978_307_200;

/// Stand-in release timestamp for grace entries with an invalid/legacy
/// `released` value, mirroring `ws_expirer.cpp`'s `releasetime =
/// 3000000000` fallback: far enough in the future that the release-based
/// deadline below never fires on its own, leaving keeptime as the only
/// path to purge.
const FAR_FUTURE_RELEASE_SENTINEL: i64 = 3_000_000_000;

#[derive(Debug, Default)]
pub struct SweepReport {
    pub stray_live_dirs: Vec<PathBuf>,
    pub stray_grace_dirs: Vec<PathBuf>,
    pub expired_entries: Vec<String>,
    pub purged_entries: Vec<String>,
    pub skipped_magic_mismatch: bool,
}

pub struct SweepOptions {
    pub dry_run: bool,
    pub dbuid: u32,
    pub dbgid: u32,
    pub deldirtimeout: Duration,
}

/// Runs the full Phase A + Phase B sweep for one filesystem. Each
/// filesystem is swept independently: a `MagicMismatch` aborts only this
/// filesystem's sweep, never the whole run.
pub fn sweep(broker: &Broker, fs: &FilesystemConfig, now: i64, opts: &SweepOptions) -> SweepReport {
    let mut report = SweepReport::default();
    let db = Database::open(fs);

    if let Err(e) = db.check_magic() {
        crate::logging::error(format!("filesystem {}: {e}, refusing to sweep", fs.name));
        report.skipped_magic_mismatch = true;
        return report;
    }

    phase_a(broker, fs, &db, now, opts, &mut report);
    phase_b(broker, fs, &db, now, opts, &mut report);
    report
}

fn phase_a(
    broker: &Broker,
    fs: &FilesystemConfig,
    db: &Database,
    now: i64,
    opts: &SweepOptions,
    report: &mut SweepReport,
) {
    let live_ids = db.all_ids(false);
    let live_paths: HashSet<PathBuf> = live_ids
        .iter()
        .filter_map(|id| db.read_entry(id, false).ok())
        .map(|e| e.workspace)
        .collect();

    for space in &fs.spaces {
        for child in immediate_children(std::path::Path::new(space), "*-*") {
            if live_paths.contains(&child) {
                continue;
            }
            report.stray_live_dirs.push(child.clone());
            if opts.dry_run {
                continue;
            }
            let basename = child.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            let grace_dir = std::path::Path::new(space).join(&fs.deleted_path).join(format!("{basename}-{now}"));
            if let Err(e) = wsdir::move_to_grace(broker, &child, &grace_dir, opts.dbuid) {
                crate::logging::warning(format!("could not move stray directory {}: {e}", child.display()));
            }
        }
    }

    let grace_ids = db.all_ids(true);
    let grace_paths: HashSet<PathBuf> = grace_ids
        .iter()
        .filter_map(|id| db.read_entry(id, true).ok())
        .map(|e| e.workspace)
        .collect();

    for space in &fs.spaces {
        let grace_root = std::path::Path::new(space).join(&fs.deleted_path);
        for child in immediate_children(&grace_root, "*-*") {
            if grace_paths.contains(&child) {
                continue;
            }
            report.stray_grace_dirs.push(child.clone());
            if opts.dry_run {
                continue;
            }
            if let Err(e) = wsdir::remove_tree(broker, &child, opts.dbuid, opts.deldirtimeout) {
                crate::logging::warning(format!("could not remove stray grace directory {}: {e}", child.display()));
            }
        }
    }
}

fn phase_b(
    broker: &Broker,
    fs: &FilesystemConfig,
    db: &Database,
    now: i64,
    opts: &SweepOptions,
    report: &mut SweepReport,
) {
    for id in db.all_ids(false) {
        let Ok(entry) = db.read_entry(&id, false) else { continue };
        if entry.expiration <= 0 {
            continue;
        }
        if now > entry.expiration {
            report.expired_entries.push(id.clone());
            if opts.dry_run {
                continue;
            }
            let basename = entry.workspace.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            let grace_dir = entry
                .workspace
                .parent()
                .map(|p| p.join(&fs.deleted_path).join(format!("{basename}-{now}")));
            let Some(grace_dir) = grace_dir else { continue };

            if let Err(e) = wsdir::move_to_grace(broker, &entry.workspace, &grace_dir, opts.dbuid) {
                crate::logging::warning(format!("could not expire {id}: {e}"));
                continue;
            }
            let grace_id = format!("{id}-{now}");
            let mut grace_entry = entry.clone();
            grace_entry.id = grace_id;
            grace_entry.released = now;
            grace_entry.workspace = grace_dir;
            if let Err(e) = db.write_entry(&grace_entry, true, opts.dbuid, opts.dbgid) {
                crate::logging::warning(format!("could not write grace entry for {id}: {e}"));
                continue;
            }
            let _ = db.delete_entry(&id, false);
        }
    }

    for id in db.all_ids(true) {
        let Ok(entry) = db.read_entry(&id, true) else { continue };
        // An invalid/legacy `released` (<= year 2001) never legitimately
        // happened; rather than skip the entry forever, treat its release
        // reference as far in the future so only the keeptime-past-
        // expiration deadline below can still purge it.
        let purge_ref = if entry.released > YEAR_2001_EPOCH {
            entry.released
        } else {
            FAR_FUTURE_RELEASE_SENTINEL
        };

        let keeptime_deadline = entry.expiration + fs.keeptime * 86_400;
        let release_deadline = purge_ref + 3600;
        if now > keeptime_deadline || now > release_deadline {
            report.purged_entries.push(id.clone());
            if opts.dry_run {
                continue;
            }
            if let Err(e) = wsdir::remove_tree(broker, &entry.workspace, opts.dbuid, opts.deldirtimeout) {
                crate::logging::warning(format!("could not purge tree for {id}: {e}"));
                continue;
            }
            let _ = db.delete_entry(&id, true);
        }
    }
}

/// Lists immediate children of `dir` whose basename matches `pattern`,
/// ignoring the magic sentinel.
fn immediate_children(dir: &std::path::Path, pattern: &str) -> Vec<PathBuf> {
    let Ok(rd) = std::fs::read_dir(dir) else { return Vec::new() };
    rd.filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().into_string().ok()?;
            if name == MAGIC_FILE {
                return None;
            }
            if glob::matches(pattern, &name) {
                Some(e.path())
            } else {
                None
            }
        })
        .collect()
}

pub fn ensure_magic(fs: &FilesystemConfig) -> Result<()> {
    let path = fs.database.join(MAGIC_FILE);
    if path.exists() {
        return Ok(());
    }
    std::fs::write(&path, format!("{}\n", fs.name)).map_err(|e| WsError::IoFailed { path, source: e })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpaceSelection;
    use crate::db::Entry;
    use tempfile::TempDir;

    fn fs_config(dir: &TempDir) -> FilesystemConfig {
        let space = dir.path().join("space");
        let db = dir.path().join("db");
        std::fs::create_dir_all(&space).unwrap();
        std::fs::create_dir_all(db.join("removed")).unwrap();
        std::fs::create_dir_all(space.join("removed")).unwrap();
        FilesystemConfig {
            name: "scratch".into(),
            spaces: vec![space.to_string_lossy().to_string()],
            spaceselection: SpaceSelection::Random,
            deleted_path: "removed".into(),
            database: db,
            groupdefault: vec![],
            userdefault: vec![],
            user_acl: vec![],
            group_acl: vec![],
            keeptime: 1,
            maxduration: None,
            maxextensions: None,
            allocatable: true,
            extendable: true,
            restorable: true,
        }
    }

    fn opts(dry_run: bool) -> SweepOptions {
        SweepOptions { dry_run, dbuid: 0, dbgid: 0, deldirtimeout: Duration::from_secs(0) }
    }

    #[test]
    fn sweep_without_magic_file_reports_mismatch_and_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        let stray = std::path::PathBuf::from(&fs.spaces[0]).join("alice-orphan");
        std::fs::create_dir(&stray).unwrap();

        let broker = Broker::new();
        let report = sweep(&broker, &fs, 10_000, &opts(false));
        assert!(report.skipped_magic_mismatch);
        assert!(stray.exists());
    }

    #[test]
    fn phase_a_dry_run_reports_stray_without_mutating() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        ensure_magic(&fs).unwrap();
        let stray = std::path::PathBuf::from(&fs.spaces[0]).join("alice-orphan");
        std::fs::create_dir(&stray).unwrap();

        let broker = Broker::new();
        let report = sweep(&broker, &fs, 10_000, &opts(true));
        assert_eq!(report.stray_live_dirs.len(), 1);
        assert!(stray.exists());
    }

    #[test]
    fn phase_a_cleaner_mode_moves_stray_to_grace() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        ensure_magic(&fs).unwrap();
        let stray = std::path::PathBuf::from(&fs.spaces[0]).join("alice-orphan");
        std::fs::create_dir(&stray).unwrap();

        let broker = Broker::new();
        let report = sweep(&broker, &fs, 10_000, &opts(false));
        assert_eq!(report.stray_live_dirs.len(), 1);
        assert!(!stray.exists());
    }

    #[test]
    fn phase_b_expires_overdue_entry() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        ensure_magic(&fs).unwrap();
        let ws = std::path::PathBuf::from(&fs.spaces[0]).join("alice-proj");
        std::fs::create_dir(&ws).unwrap();

        let db = Database::open(&fs);
        let entry = Entry {
            id: "alice-proj".into(),
            filesystem: "scratch".into(),
            workspace: ws.clone(),
            creation: 1,
            expiration: 500,
            released: 0,
            reminder: 0,
            extensions: 1,
            group: String::new(),
            mailaddress: String::new(),
            comment: String::new(),
            dbversion: None,
        };
        db.create_entry(&entry, 0, 0).unwrap();

        let broker = Broker::new();
        let report = sweep(&broker, &fs, 1_000, &opts(false));
        assert_eq!(report.expired_entries, vec!["alice-proj".to_string()]);
        assert!(db.read_entry("alice-proj", false).is_err());
        assert!(!ws.exists());
    }

    #[test]
    fn phase_b_skips_corrupt_zero_expiration() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        ensure_magic(&fs).unwrap();
        let ws = std::path::PathBuf::from(&fs.spaces[0]).join("alice-proj");
        std::fs::create_dir(&ws).unwrap();

        let db = Database::open(&fs);
        let entry = Entry {
            id: "alice-proj".into(),
            filesystem: "scratch".into(),
            workspace: ws,
            creation: 1,
            expiration: 0,
            released: 0,
            reminder: 0,
            extensions: 1,
            group: String::new(),
            mailaddress: String::new(),
            comment: String::new(),
            dbversion: None,
        };
        db.create_entry(&entry, 0, 0).unwrap();

        let broker = Broker::new();
        let report = sweep(&broker, &fs, 1_000, &opts(false));
        assert!(report.expired_entries.is_empty());
    }

    #[test]
    fn phase_b_purges_grace_entry_past_keeptime() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        ensure_magic(&fs).unwrap();
        let grace_ws = std::path::PathBuf::from(&fs.spaces[0]).join("removed/alice-proj-500");
        std::fs::create_dir_all(&grace_ws).unwrap();

        let db = Database::open(&fs);
        let entry = Entry {
            id: "alice-proj-500".into(),
            filesystem: "scratch".into(),
            workspace: grace_ws.clone(),
            creation: 1,
            expiration: 400,
            released: YEAR_2001_EPOCH + 500,
            reminder: 0,
            extensions: 1,
            group: String::new(),
            mailaddress: String::new(),
            comment: String::new(),
            dbversion: None,
        };
        db.write_entry(&entry, true, 0, 0).unwrap();

        let broker = Broker::new();
        let now = YEAR_2001_EPOCH + 500 + 3601;
        let report = sweep(&broker, &fs, now, &opts(false));
        assert_eq!(report.purged_entries, vec!["alice-proj-500".to_string()]);
        assert!(!grace_ws.exists());
        assert!(db.read_entry("alice-proj-500", true).is_err());
    }

    #[test]
    fn phase_b_purges_invalid_released_via_keeptime_deadline() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        ensure_magic(&fs).unwrap();
        let grace_ws = std::path::PathBuf::from(&fs.spaces[0]).join("removed/alice-proj-500");
        std::fs::create_dir_all(&grace_ws).unwrap();

        let db = Database::open(&fs);
        let entry = Entry {
            id: "alice-proj-500".into(),
            filesystem: "scratch".into(),
            workspace: grace_ws,
            creation: 1,
            expiration: 400,
            released: 0,
            reminder: 0,
            extensions: 1,
            group: String::new(),
            mailaddress: String::new(),
            comment: String::new(),
            dbversion: None,
        };
        db.write_entry(&entry, true, 0, 0).unwrap();

        let broker = Broker::new();
        let report = sweep(&broker, &fs, 999_999_999, &opts(false));
        assert_eq!(report.purged_entries, vec!["alice-proj-500".to_string()]);
        assert!(db.read_entry("alice-proj-500", true).is_err());
    }
}
