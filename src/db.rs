//! Database (C5): per-filesystem directory of YAML entry files, CRUD,
//! glob-based matching, and deletion-archive management. Grounded in
//! `dbv1.h`/`dbv1.cpp` (`FilesystemDBV1`/`DBEntryV1`) and
//! `dbv1_test.cpp`/`db_test.cpp`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::FilesystemConfig;
use crate::error::{Result, WsError};
use crate::glob;

pub const MAGIC_FILE: &str = ".ws_db_magic";

/// One workspace's persisted state, matching the YAML schema from
/// spec.md exactly: `group`/`released` are omitted from serialization
/// when empty/zero, mirroring the original's "present only when
/// non-empty" rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(skip)]
    pub id: String,
    #[serde(skip)]
    pub filesystem: String,

    pub workspace: PathBuf,
    #[serde(default)]
    pub creation: i64,
    #[serde(default)]
    pub expiration: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub released: i64,
    #[serde(default)]
    pub reminder: i64,
    #[serde(default)]
    pub extensions: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default)]
    pub mailaddress: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbversion: Option<i64>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl Entry {
    /// Remaining seconds until expiration, relative to `now`.
    pub fn remaining(&self, now: i64) -> i64 {
        self.expiration - now
    }

    /// Decrements `extensions` unless the caller is root, per
    /// `useExtension` in `dbv1.h`. Fails with `NoExtensions` when the
    /// counter would go negative for a non-root caller.
    pub fn use_extension(&mut self, is_root: bool) -> Result<()> {
        if is_root {
            return Ok(());
        }
        if self.extensions <= 0 {
            return Err(WsError::NoExtensions);
        }
        self.extensions -= 1;
        Ok(())
    }
}

/// A database bound to one filesystem's configuration.
pub struct Database<'a> {
    pub fs: &'a FilesystemConfig,
}

impl<'a> Database<'a> {
    pub fn open(fs: &'a FilesystemConfig) -> Database<'a> {
        Database { fs }
    }

    fn live_dir(&self) -> &Path {
        &self.fs.database
    }

    fn grace_dir(&self) -> PathBuf {
        self.fs.database.join(&self.fs.deleted_path)
    }

    /// Verifies the `.ws_db_magic` sentinel exists and its first line
    /// equals the filesystem name, per invariant 5. Destructive sweeps
    /// must refuse to run when this check fails.
    pub fn check_magic(&self) -> Result<()> {
        let magic_path = self.live_dir().join(MAGIC_FILE);
        let contents = std::fs::read_to_string(&magic_path).map_err(|_| {
            WsError::MagicMismatch(self.fs.name.clone())
        })?;
        let first_line = contents.lines().next().unwrap_or("").trim();
        if first_line != self.fs.name {
            return Err(WsError::MagicMismatch(self.fs.name.clone()));
        }
        Ok(())
    }

    fn entry_path(&self, id: &str, grace: bool) -> PathBuf {
        if grace {
            self.grace_dir().join(id)
        } else {
            self.live_dir().join(id)
        }
    }

    /// Reads and parses the entry file for `id`. Missing numeric fields
    /// default to 0, missing strings to empty (handled by `serde`
    /// defaults on `Entry`). Fails with `NotFound` if the file is absent,
    /// `Malformed` if the YAML is not a mapping.
    pub fn read_entry(&self, id: &str, grace: bool) -> Result<Entry> {
        let path = self.entry_path(id, grace);
        let contents = std::fs::read_to_string(&path).map_err(|_| WsError::NotFound(id.to_string()))?;

        let value: serde_yaml::Value = serde_yaml::from_str(&contents).map_err(|e| {
            WsError::Malformed {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;
        if !value.is_mapping() {
            return Err(WsError::Malformed {
                path,
                reason: "entry is not a YAML mapping".into(),
            });
        }

        let mut entry: Entry = serde_yaml::from_value(value).map_err(|e| WsError::Malformed {
            path,
            reason: e.to_string(),
        })?;
        entry.id = id.to_string();
        entry.filesystem = self.fs.name.clone();
        Ok(entry)
    }

    /// Serializes `entry` to its final path in one write and sets the
    /// owner/mode invariants (owned by `dbuid:dbgid`, `0644`/`0744`).
    /// The write target is derived from `entry.id` and the `grace` flag,
    /// not stored on the entry itself.
    pub fn write_entry(
        &self,
        entry: &Entry,
        grace: bool,
        dbuid: u32,
        dbgid: u32,
    ) -> Result<()> {
        let path = self.entry_path(&entry.id, grace);
        let yaml = serde_yaml::to_string(entry)
            .map_err(|e| WsError::Malformed { path: path.clone(), reason: e.to_string() })?;

        write_atomically(&path, &yaml)?;
        set_entry_permissions(&path, dbuid, dbgid, !entry.group.is_empty())?;
        Ok(())
    }

    pub fn create_entry(
        &self,
        entry: &Entry,
        dbuid: u32,
        dbgid: u32,
    ) -> Result<()> {
        let path = self.entry_path(&entry.id, false);
        if path.exists() {
            return Err(WsError::Exists(entry.id.clone()));
        }
        self.write_entry(entry, false, dbuid, dbgid)
    }

    pub fn delete_entry(&self, id: &str, grace: bool) -> Result<()> {
        let path = self.entry_path(id, grace);
        std::fs::remove_file(&path).map_err(|e| WsError::IoFailed { path, source: e })
    }

    /// Lists every entry id present in this database, live or grace,
    /// without any user/group filtering. Used by the expirer, which
    /// sweeps on behalf of the whole filesystem rather than one caller.
    pub fn all_ids(&self, grace: bool) -> Vec<String> {
        let dir = if grace { self.grace_dir() } else { self.live_dir().to_path_buf() };
        list_dir_names(&dir).into_iter().filter(|n| n != MAGIC_FILE).collect()
    }

    /// Lists entry ids matching `pattern`. Non-group workspaces are
    /// filtered to `<user>-<pattern>`; group workspaces are filtered to
    /// `*-<pattern>` and then to entries whose `group` field is one of
    /// `groups`. Unreadable entries are logged and skipped, never abort
    /// the scan.
    pub fn match_pattern(
        &self,
        pattern: &str,
        user: &str,
        groups: &[String],
        grace: bool,
        groupworkspaces: bool,
    ) -> Vec<String> {
        let dir = if grace { self.grace_dir() } else { self.live_dir().to_path_buf() };
        let filepattern = if groupworkspaces {
            format!("*-{pattern}")
        } else {
            format!("{user}-{pattern}")
        };

        let names = list_dir_names(&dir);
        let mut result = Vec::new();
        for name in names {
            if name == MAGIC_FILE {
                continue;
            }
            if !glob::matches(&filepattern, &name) {
                continue;
            }
            if groupworkspaces {
                match self.read_entry(&name, grace) {
                    Ok(entry) => {
                        if groups.iter().any(|g| g == &entry.group) {
                            result.push(name);
                        }
                    }
                    Err(e) => {
                        crate::logging::warning(format!("skipping unreadable entry {name}: {e}"));
                    }
                }
            } else {
                result.push(name);
            }
        }
        result
    }
}

fn list_dir_names(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(rd) => rd
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Writes `contents` to `path` in one rename-free write (the file is
/// small enough that a single `write` syscall is effectively atomic from
/// a reader's perspective once the data is flushed); `SIGINT` is masked
/// for the duration so a user's Ctrl-C cannot leave a partial file.
fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    use signal_hook::consts::SIGINT;
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT]).ok();
    let result = std::fs::write(path, contents).map_err(|e| WsError::IoFailed {
        path: path.to_path_buf(),
        source: e,
    });
    if let Some(signals) = signals.as_mut() {
        signals.handle().close();
    }
    result
}

fn set_entry_permissions(path: &Path, dbuid: u32, dbgid: u32, group_visible: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = if group_visible { 0o744 } else { 0o644 };
    let perms = std::fs::Permissions::from_mode(mode);
    std::fs::set_permissions(path, perms).map_err(|e| WsError::IoFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let _ = nix::unistd::chown(
        path,
        Some(nix::unistd::Uid::from_raw(dbuid)),
        Some(nix::unistd::Gid::from_raw(dbgid)),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpaceSelection;
    use tempfile::TempDir;

    fn fs_config(dir: &TempDir) -> FilesystemConfig {
        let database = dir.path().join("db");
        std::fs::create_dir_all(&database).unwrap();
        std::fs::create_dir_all(database.join("removed")).unwrap();
        FilesystemConfig {
            name: "scratch".into(),
            spaces: vec![dir.path().join("space").to_string_lossy().to_string()],
            spaceselection: SpaceSelection::Random,
            deleted_path: "removed".into(),
            database,
            groupdefault: vec![],
            userdefault: vec![],
            user_acl: vec![],
            group_acl: vec![],
            keeptime: 10,
            maxduration: None,
            maxextensions: None,
            allocatable: true,
            extendable: true,
            restorable: true,
        }
    }

    fn sample_entry(id: &str) -> Entry {
        Entry {
            id: id.to_string(),
            filesystem: "scratch".to_string(),
            workspace: PathBuf::from("/space/".to_string() + id),
            creation: 1_000,
            expiration: 2_000,
            released: 0,
            reminder: 0,
            extensions: 2,
            group: String::new(),
            mailaddress: String::new(),
            comment: String::new(),
            dbversion: None,
        }
    }

    #[test]
    fn empty_database_matches_nothing() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        let db = Database::open(&fs);
        assert!(db.match_pattern("*", "*", &[], false, false).is_empty());
    }

    #[test]
    fn create_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        let db = Database::open(&fs);
        let entry = sample_entry("alice-proj");
        db.create_entry(&entry, 0, 0).unwrap();

        let read_back = db.read_entry("alice-proj", false).unwrap();
        assert_eq!(read_back.workspace, entry.workspace);
        assert_eq!(read_back.expiration, entry.expiration);
        assert_eq!(read_back.extensions, entry.extensions);
    }

    #[test]
    fn create_entry_twice_fails_exists() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        let db = Database::open(&fs);
        let entry = sample_entry("alice-proj");
        db.create_entry(&entry, 0, 0).unwrap();
        let err = db.create_entry(&entry, 0, 0).unwrap_err();
        assert!(matches!(err, WsError::Exists(_)));
    }

    #[test]
    fn read_missing_entry_not_found() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        let db = Database::open(&fs);
        let err = db.read_entry("nope-x", false).unwrap_err();
        assert!(matches!(err, WsError::NotFound(_)));
    }

    #[test]
    fn non_mapping_yaml_is_malformed() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        std::fs::write(fs.database.join("bob-x"), "just a scalar\n").unwrap();
        let db = Database::open(&fs);
        let err = db.read_entry("bob-x", false).unwrap_err();
        assert!(matches!(err, WsError::Malformed { .. }));
    }

    #[test]
    fn match_pattern_filters_by_user_prefix() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        let db = Database::open(&fs);
        db.create_entry(&sample_entry("alice-proj"), 0, 0).unwrap();
        db.create_entry(&sample_entry("bob-proj"), 0, 0).unwrap();

        let matches = db.match_pattern("*", "alice", &[], false, false);
        assert_eq!(matches, vec!["alice-proj".to_string()]);
    }

    #[test]
    fn match_pattern_group_mode_filters_by_group_field() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        let db = Database::open(&fs);
        let mut grouped = sample_entry("alice-shared");
        grouped.group = "devs".into();
        db.create_entry(&grouped, 0, 0).unwrap();
        db.create_entry(&sample_entry("bob-private"), 0, 0).unwrap();

        let devs = vec!["devs".to_string()];
        let matches = db.match_pattern("*", "*", &devs, false, true);
        assert_eq!(matches, vec!["alice-shared".to_string()]);
    }

    #[test]
    fn magic_check_fails_when_missing() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        let db = Database::open(&fs);
        assert!(db.check_magic().is_err());
    }

    #[test]
    fn magic_check_passes_with_matching_sentinel() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        std::fs::write(fs.database.join(MAGIC_FILE), "scratch\n").unwrap();
        let db = Database::open(&fs);
        assert!(db.check_magic().is_ok());
    }

    #[test]
    fn use_extension_decrements_unless_root() {
        let mut entry = sample_entry("alice-proj");
        entry.extensions = 1;
        entry.use_extension(false).unwrap();
        assert_eq!(entry.extensions, 0);
        assert!(matches!(entry.use_extension(false).unwrap_err(), WsError::NoExtensions));

        let mut root_entry = sample_entry("alice-proj");
        root_entry.extensions = 0;
        root_entry.use_extension(true).unwrap();
        assert_eq!(root_entry.extensions, 0);
    }

    #[test]
    fn write_then_read_round_trips_byte_equivalent_modulo_ordering() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        let db = Database::open(&fs);
        let mut entry = sample_entry("alice-proj");
        entry.group = "devs".into();
        entry.released = 12345;
        db.write_entry(&entry, false, 0, 0).unwrap();
        let mut read_back = db.read_entry("alice-proj", false).unwrap();
        // id/filesystem are derived, not stored; normalize before compare.
        read_back.id = entry.id.clone();
        assert_eq!(read_back, entry);
    }
}
