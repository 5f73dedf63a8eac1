//! User preferences (C4): `~/.ws_user.conf`, either a YAML mapping
//! (`mail`, `groupname`, `duration`, `reminder`) or, for backwards
//! compatibility with the legacy tool, a bare email address on the first
//! line. Grounded in `UserConfig` in `config.h`/`config.cpp` and
//! `UserConfig_test.cpp`.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
struct RawUserConfig {
    #[serde(default)]
    mail: String,
    #[serde(default)]
    groupname: String,
    #[serde(default)]
    duration: i64,
    #[serde(default)]
    reminder: i64,
}

/// Parsed user preferences. Every field defaults to empty/zero when the
/// file is missing, unreadable, or malformed -- this component fails
/// silently by design, per spec.md.
#[derive(Debug, Clone, Default)]
pub struct UserConfig {
    pub mailaddress: String,
    pub groupname: String,
    pub duration: i64,
    pub reminder: i64,
}

impl UserConfig {
    /// Reads and parses `path`, which must not be a symlink.
    pub fn read_from_path(path: &Path) -> UserConfig {
        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                crate::logging::warning(format!(
                    "{} is a symlink, refusing to read preferences",
                    path.display()
                ));
                return UserConfig::default();
            }
            Ok(_) => {}
            Err(_) => return UserConfig::default(),
        }

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(_) => UserConfig::default(),
        }
    }

    /// Parses the raw contents of a preferences file. Contents containing
    /// a `:` are treated as a YAML mapping; otherwise the first line is
    /// taken as a bare, legacy-format email address.
    pub fn parse(contents: &str) -> UserConfig {
        let mut config = if contents.contains(':') {
            match serde_yaml::from_str::<RawUserConfig>(contents) {
                Ok(raw) => UserConfig {
                    mailaddress: raw.mail,
                    groupname: raw.groupname,
                    duration: raw.duration,
                    reminder: raw.reminder,
                },
                Err(_) => UserConfig::default(),
            }
        } else {
            let first_line = contents.lines().next().unwrap_or("").trim().to_string();
            UserConfig {
                mailaddress: first_line,
                ..UserConfig::default()
            }
        };

        if !config.mailaddress.is_empty() && !is_valid_email(&config.mailaddress) {
            crate::logging::warning(format!(
                "ignoring invalid mail address '{}' from user preferences",
                config.mailaddress
            ));
            config.mailaddress.clear();
        }

        config
    }
}

/// Bounded, hand-rolled email grammar check: avoids pulling a general
/// regex engine in for a finite, well-known shape (mirrors the glob
/// matcher's rationale in the database module).
pub fn is_valid_email(addr: &str) -> bool {
    if addr.len() > 254 || addr.is_empty() {
        return false;
    }
    if addr.contains("..") {
        return false;
    }
    let Some((local, domain)) = addr.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    if local.starts_with('.') || local.ends_with('.') {
        return false;
    }
    if !local
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c))
    {
        return false;
    }
    if !domain.contains('.') {
        return false;
    }
    for label in domain.split('.') {
        if label.is_empty() {
            return false;
        }
        if label.starts_with('-') || label.ends_with('-') {
            return false;
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return false;
        }
    }
    true
}
