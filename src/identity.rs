//! Identity resolution: who is the real/effective caller, and what
//! groups are they in. All queries go through `getuid()`/`getpwuid()`
//! rather than environment variables, since `HOME` is explicitly not
//! consulted anywhere in this system.

use users::{get_current_gid, get_current_uid, get_effective_uid, get_user_by_uid};

/// A resolved identity snapshot: username, primary group, and the full
/// supplementary group list. Values are resolved once at construction;
/// callers that cross a privilege transition should construct a fresh
/// `Identity` afterwards rather than assume staleness is safe.
#[derive(Debug, Clone)]
pub struct Identity {
    pub username: String,
    pub uid: u32,
    pub primary_group: String,
    pub groups: Vec<String>,
}

impl Identity {
    /// Resolves the identity of the real (not effective) user, mirroring
    /// `user::getUsername()`/`user::getGrouplist()` which explicitly use
    /// `getuid()` rather than `geteuid()`.
    pub fn current() -> Self {
        let uid = get_current_uid();
        let user = get_user_by_uid(uid);
        let username = user
            .as_ref()
            .map(|u| u.name().to_string_lossy().to_string())
            .unwrap_or_else(|| uid.to_string());

        let gid = get_current_gid();
        let primary_group = users::get_group_by_gid(gid)
            .map(|g| g.name().to_string_lossy().to_string())
            .unwrap_or_default();

        let groups = users::get_current_username()
            .and_then(|name| users::get_user_groups(&name, gid))
            .map(|gl| {
                gl.iter()
                    .map(|g| g.name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();

        Identity {
            username,
            uid,
            primary_group,
            groups,
        }
    }

    /// Returns the home directory of the real user via the OS password
    /// database, deliberately never consulting `$HOME`.
    pub fn home_dir(&self) -> Option<std::path::PathBuf> {
        get_user_by_uid(self.uid).map(|u| u.home_dir().to_path_buf())
    }

    /// `uid == 0`. Note this is the *real* uid: for a setuid-root binary
    /// invoked by a normal user, this is false even while the effective
    /// uid is briefly 0.
    pub fn is_root(&self) -> bool {
        self.uid == 0
    }

    pub fn is_member_of(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group) || self.primary_group == group
    }
}

/// `true` if the real and effective uid differ, i.e. this binary is
/// running setuid.
pub fn is_setuid() -> bool {
    get_current_uid() != get_effective_uid()
}
