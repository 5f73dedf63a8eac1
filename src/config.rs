//! Configuration model (C3): parses one or more YAML sources into a
//! validated global + per-filesystem policy object, evaluates access
//! control, and orders filesystems by priority for a given caller.
//!
//! Grounded in `config.h`/`config.cpp`'s `Config` class from the
//! original implementation; `workspaces`/`filesystems` aliasing and the
//! "first source with at least one readable file wins" search are kept
//! unchanged from spec.md.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, WsError};

fn default_spaceselection() -> SpaceSelection {
    SpaceSelection::Random
}

fn default_keeptime() -> i64 {
    10
}

fn default_true() -> bool {
    true
}

/// Per-filesystem policy, one entry per `workspaces`/`filesystems` key.
#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemConfig {
    #[serde(skip)]
    pub name: String,

    pub spaces: Vec<String>,

    #[serde(default = "default_spaceselection")]
    pub spaceselection: SpaceSelection,

    #[serde(rename = "deleted")]
    pub deleted_path: String,

    pub database: PathBuf,

    #[serde(default)]
    pub groupdefault: Vec<String>,
    #[serde(default)]
    pub userdefault: Vec<String>,
    #[serde(default)]
    pub user_acl: Vec<String>,
    #[serde(default)]
    pub group_acl: Vec<String>,

    #[serde(default = "default_keeptime")]
    pub keeptime: i64,
    pub maxduration: Option<i64>,
    pub maxextensions: Option<i64>,

    #[serde(default = "default_true")]
    pub allocatable: bool,
    #[serde(default = "default_true")]
    pub extendable: bool,
    #[serde(default = "default_true")]
    pub restorable: bool,
}

/// Strategy for picking one of several candidate `spaces` roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceSelection {
    Random,
    Uid,
    Gid,
    Mostspace,
}

/// Global, cluster-wide settings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GlobalConfig {
    #[serde(default)]
    pub clustername: String,
    #[serde(default)]
    pub smtphost: String,
    #[serde(default)]
    pub mail_from: String,
    #[serde(default, rename = "default")]
    pub default_workspace: String,
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub adminmail: Vec<String>,
    #[serde(default = "default_duration")]
    pub duration: i64,
    #[serde(default)]
    pub reminderdefault: i64,
    #[serde(default = "default_maxextensions")]
    pub maxextensions: i64,
    pub dbuid: Option<u32>,
    pub dbgid: Option<u32>,
    #[serde(default)]
    pub deldirtimeout: i64,
}

fn default_duration() -> i64 {
    30
}

fn default_maxextensions() -> i64 {
    100
}

/// The intent an ACL entry may be tagged with, e.g. `+bob:create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    List,
    Use,
    Create,
    Extend,
    Release,
    Restore,
}

impl Intent {
    fn tag(self) -> &'static str {
        match self {
            Intent::List => "list",
            Intent::Use => "use",
            Intent::Create => "create",
            Intent::Extend => "extend",
            Intent::Release => "release",
            Intent::Restore => "restore",
        }
    }
}

/// One parsed ACL entry: the plain name, whether it's a grant/revoke
/// prefix, and an optional intent tag restricting it.
struct AclEntry<'a> {
    sign: AclSign,
    name: &'a str,
    intent: Option<&'a str>,
}

#[derive(PartialEq)]
enum AclSign {
    Grant,
    Revoke,
}

fn parse_acl_entry(raw: &str) -> AclEntry<'_> {
    let (body, intent) = match raw.split_once(':') {
        Some((b, i)) => (b, Some(i)),
        None => (raw, None),
    };
    if let Some(name) = body.strip_prefix('+') {
        AclEntry {
            sign: AclSign::Grant,
            name,
            intent,
        }
    } else if let Some(name) = body.strip_prefix('-') {
        AclEntry {
            sign: AclSign::Revoke,
            name,
            intent,
        }
    } else {
        AclEntry {
            sign: AclSign::Grant,
            name: body,
            intent,
        }
    }
}

/// Full configuration: global settings plus a name -> filesystem map.
pub struct Config {
    pub global: GlobalConfig,
    pub filesystems: HashMap<String, FilesystemConfig>,
}

/// Intermediate shape matching the raw YAML document(s), kept separate
/// from `GlobalConfig` so unknown top-level keys (`workspaces`,
/// `filesystems`) don't trip up `#[serde(deny_unknown_fields)]`-free but
/// still structured parsing.
#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    #[serde(flatten)]
    global: GlobalConfig,
    #[serde(default)]
    workspaces: HashMap<String, FilesystemConfig>,
    #[serde(default)]
    filesystems: HashMap<String, FilesystemConfig>,
}

impl Config {
    /// Reads configuration from an ordered list of sources. If a source
    /// is a directory, every regular file inside it is read in
    /// lexicographic order; if it is a file, only that file is read. The
    /// first source containing at least one readable file wins.
    pub fn load(sources: &[PathBuf]) -> Result<Config> {
        for source in sources {
            let files = Self::files_in_source(source);
            if files.is_empty() {
                continue;
            }
            let mut combined = String::new();
            for file in files {
                match std::fs::read_to_string(&file) {
                    Ok(contents) => {
                        combined.push_str(&contents);
                        combined.push('\n');
                    }
                    Err(e) => {
                        crate::logging::warning(format!(
                            "could not read config file {}: {e}",
                            file.display()
                        ));
                    }
                }
            }
            return Self::parse(&combined);
        }
        Err(WsError::ConfigInvalid(
            "no readable configuration source found".into(),
        ))
    }

    fn files_in_source(source: &Path) -> Vec<PathBuf> {
        if source.is_dir() {
            let mut entries: Vec<PathBuf> = match std::fs::read_dir(source) {
                Ok(rd) => rd
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_file())
                    .collect(),
                Err(_) => Vec::new(),
            };
            entries.sort();
            entries
        } else if source.is_file() {
            vec![source.to_path_buf()]
        } else {
            Vec::new()
        }
    }

    /// Parses a single concatenated YAML string into a validated config.
    pub fn parse(yaml: &str) -> Result<Config> {
        let raw: RawDocument = serde_yaml::from_str(yaml)
            .map_err(|e| WsError::ConfigInvalid(format!("YAML parse error: {e}")))?;

        let mut filesystems = raw.workspaces;
        for (name, fs) in raw.filesystems {
            filesystems.insert(name, fs);
        }
        for (name, fs) in filesystems.iter_mut() {
            fs.name = name.clone();
        }

        let config = Config {
            global: raw.global,
            filesystems,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.global.dbuid.is_none() {
            problems.push("missing dbuid".to_string());
        }
        if self.global.dbgid.is_none() {
            problems.push("missing dbgid".to_string());
        }
        if self.filesystems.is_empty() {
            problems.push("no filesystems configured".to_string());
        }
        for (name, fs) in &self.filesystems {
            if fs.spaces.is_empty() {
                problems.push(format!("filesystem {name}: no spaces configured"));
            }
            if fs.deleted_path.is_empty() {
                problems.push(format!("filesystem {name}: no deleted path configured"));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(WsError::ConfigInvalid(problems.join("; ")))
        }
    }

    pub fn is_admin(&self, user: &str) -> bool {
        self.global.admins.iter().any(|a| a == user)
    }

    pub fn get_fs_config(&self, filesystem: &str) -> Option<&FilesystemConfig> {
        self.filesystems.get(filesystem)
    }

    /// Evaluates whether `user` (with `groups`) may perform `intent` on
    /// `filesystem`. Group ACL entries apply before user ACL entries so a
    /// user can be revoked despite group-granted access; admins always
    /// win. Untagged entries apply to every intent.
    pub fn has_access(
        &self,
        user: &str,
        groups: &[String],
        filesystem: &str,
        intent: Intent,
    ) -> bool {
        let Some(fs) = self.filesystems.get(filesystem) else {
            return false;
        };

        let mut ok = true;
        if !fs.user_acl.is_empty() || !fs.group_acl.is_empty() {
            ok = false;

            for raw in &fs.group_acl {
                let entry = parse_acl_entry(raw);
                if let Some(tag) = entry.intent {
                    if tag != intent.tag() {
                        continue;
                    }
                }
                if groups.iter().any(|g| g == entry.name) {
                    ok = entry.sign == AclSign::Grant;
                }
            }

            for raw in &fs.user_acl {
                let entry = parse_acl_entry(raw);
                if let Some(tag) = entry.intent {
                    if tag != intent.tag() {
                        continue;
                    }
                }
                if entry.name == user {
                    ok = entry.sign == AclSign::Grant;
                }
            }
        }

        if self.is_admin(user) {
            ok = true;
        }

        ok
    }

    /// Returns filesystems `user` may use, deduplicated, in priority
    /// order: global default, userdefault, groupdefault, then everything
    /// else the caller has access to.
    pub fn valid_filesystems(&self, user: &str, groups: &[String]) -> Vec<String> {
        let mut result: Vec<String> = Vec::new();

        if !self.global.default_workspace.is_empty()
            && self.has_access(user, groups, &self.global.default_workspace, Intent::Use)
        {
            result.push(self.global.default_workspace.clone());
        }

        let mut names: Vec<&String> = self.filesystems.keys().collect();
        names.sort();

        for name in &names {
            let fs = &self.filesystems[*name];
            if fs.userdefault.iter().any(|u| u == user)
                && self.has_access(user, groups, name, Intent::Use)
                && !result.contains(name)
            {
                result.push((*name).clone());
            }
        }

        for name in &names {
            let fs = &self.filesystems[*name];
            if groups.iter().any(|g| fs.groupdefault.contains(g))
                && self.has_access(user, groups, name, Intent::Use)
                && !result.contains(name)
            {
                result.push((*name).clone());
            }
        }

        for name in &names {
            if self.has_access(user, groups, name, Intent::Use) && !result.contains(name) {
                result.push((*name).clone());
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config::parse(
            r#"
dbuid: 4711
dbgid: 4711
default_workspace: scratch
admins: [root, ops]
workspaces:
  scratch:
    spaces: [/mnt/a, /mnt/b]
    spaceselection: mostspace
    deleted: .removed
    database: /var/lib/ws/scratch
    keeptime: 30
    maxduration: 60
    maxextensions: 3
    user_acl: ["+alice", "-bob:create"]
  other:
    spaces: [/mnt/c]
    deleted: .removed
    database: /var/lib/ws/other
"#,
        )
        .unwrap()
    }

    #[test]
    fn parses_minimal_valid_config() {
        let config = sample();
        assert_eq!(config.global.dbuid, Some(4711));
        assert_eq!(config.filesystems.len(), 2);
        assert_eq!(config.filesystems["scratch"].keeptime, 30);
    }

    #[test]
    fn missing_required_keys_invalid() {
        let err = Config::parse("dbuid: 1\n").unwrap_err();
        assert!(matches!(err, WsError::ConfigInvalid(_)));
    }

    #[test]
    fn workspaces_and_filesystems_alias_merge_later_wins() {
        let config = Config::parse(
            r#"
dbuid: 1
dbgid: 1
workspaces:
  a:
    spaces: [/s1]
    deleted: .d
    database: /db/a
filesystems:
  a:
    spaces: [/s2]
    deleted: .d
    database: /db/a2
"#,
        )
        .unwrap();
        assert_eq!(config.filesystems["a"].spaces, vec!["/s2".to_string()]);
    }

    #[test]
    fn acl_group_grant_then_user_revoke() {
        let config = Config::parse(
            r#"
dbuid: 1
dbgid: 1
workspaces:
  fs:
    spaces: [/s]
    deleted: .d
    database: /db
    user_acl: ["-bob"]
    group_acl: ["+devs"]
"#,
        )
        .unwrap();
        let groups = vec!["devs".to_string()];
        assert!(!config.has_access("bob", &groups, "fs", Intent::Use));
        assert!(!config
            .valid_filesystems("bob", &groups)
            .contains(&"fs".to_string()));
    }

    #[test]
    fn admins_always_granted_access() {
        let config = sample();
        assert!(config.has_access("root", &[], "scratch", Intent::Use));
    }

    #[test]
    fn admin_membership_is_monotonic() {
        let config = sample();
        let before = config.has_access("newguy", &[], "scratch", Intent::Use);
        let mut with_admin = config;
        with_admin.global.admins.push("newguy".to_string());
        let after = with_admin.has_access("newguy", &[], "scratch", Intent::Use);
        assert!(!before || after);
        assert!(after);
    }

    #[test]
    fn valid_filesystems_is_subset_with_access() {
        let config = sample();
        let groups = vec![];
        let valid = config.valid_filesystems("alice", &groups);
        for fs in &valid {
            assert!(config.has_access("alice", &groups, fs, Intent::Use));
        }
    }
}
