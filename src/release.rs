//! Release engine (C8): moves a live workspace's entry and directory
//! into grace, optionally deleting the tree immediately. Grounded in
//! `ws_release.cpp`.

use crate::config::Config;
use crate::db::Database;
use crate::error::{Result, WsError};
use crate::privilege::Broker;
use crate::wsdir;

pub struct ReleaseRequest<'a> {
    pub id: &'a str,
    pub filesystem: &'a str,
    pub delete_data: bool,
}

pub struct ReleaseOutcome {
    pub grace_id: String,
}

pub fn release(config: &Config, broker: &Broker, now: i64, req: ReleaseRequest) -> Result<ReleaseOutcome> {
    let fs = config.get_fs_config(req.filesystem).ok_or_else(|| WsError::NotFound(req.id.to_string()))?;
    let db = Database::open(fs);
    let mut entry = db.read_entry(req.id, false)?;

    entry.released = now;
    let grace_id = format!("{}-{now}", req.id);

    let dbuid = config.global.dbuid.ok_or_else(|| WsError::ConfigInvalid("missing dbuid".into()))?;
    let dbgid = config.global.dbgid.ok_or_else(|| WsError::ConfigInvalid("missing dbgid".into()))?;

    let grace_entry_path = fs.database.join(&fs.deleted_path);
    std::fs::create_dir_all(&grace_entry_path).map_err(|e| WsError::IoFailed {
        path: grace_entry_path.clone(),
        source: e,
    })?;

    let basename = entry
        .workspace
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| req.id.to_string());
    let grace_dir_parent = entry
        .workspace
        .parent()
        .map(|p| p.join(&fs.deleted_path))
        .ok_or_else(|| WsError::Malformed { path: entry.workspace.clone(), reason: "no parent directory".into() })?;
    std::fs::create_dir_all(&grace_dir_parent).map_err(|e| WsError::IoFailed {
        path: grace_dir_parent.clone(),
        source: e,
    })?;
    let grace_dir = grace_dir_parent.join(format!("{basename}-{now}"));

    wsdir::move_to_grace(broker, &entry.workspace, &grace_dir, dbuid)?;

    let mut grace_entry = entry.clone();
    grace_entry.id = grace_id.clone();
    grace_entry.workspace = grace_dir.clone();
    db.write_entry(&grace_entry, true, dbuid, dbgid)?;
    db.delete_entry(req.id, false)?;

    if req.delete_data {
        wsdir::remove_tree(broker, &grace_dir, dbuid, std::time::Duration::from_secs(0))?;
        db.delete_entry(&grace_id, true)?;
    }

    Ok(ReleaseOutcome { grace_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpaceSelection;
    use crate::db::Entry;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("space")).unwrap();
        std::fs::create_dir_all(dir.path().join("db")).unwrap();
        let config = Config::parse(&format!(
            r#"
dbuid: 0
dbgid: 0
workspaces:
  scratch:
    spaces: ["{}"]
    deleted: .removed
    database: "{}"
"#,
            dir.path().join("space").display(),
            dir.path().join("db").display(),
        ))
        .unwrap();
        (dir, config)
    }

    #[test]
    fn release_moves_entry_and_directory_into_grace() {
        let (dir, config) = setup();
        let fs = config.get_fs_config("scratch").unwrap();
        let ws_path = dir.path().join("space/alice-proj");
        std::fs::create_dir(&ws_path).unwrap();

        let entry = Entry {
            id: "alice-proj".into(),
            filesystem: "scratch".into(),
            workspace: ws_path.clone(),
            creation: 1,
            expiration: 2,
            released: 0,
            reminder: 0,
            extensions: 1,
            group: String::new(),
            mailaddress: String::new(),
            comment: String::new(),
            dbversion: None,
        };
        let db = Database::open(fs);
        db.create_entry(&entry, 0, 0).unwrap();

        let broker = Broker::new();
        let outcome = release(
            &config,
            &broker,
            1000,
            ReleaseRequest { id: "alice-proj", filesystem: "scratch", delete_data: false },
        )
        .unwrap();

        assert_eq!(outcome.grace_id, "alice-proj-1000");
        assert!(!ws_path.exists());
        assert!(db.read_entry("alice-proj", false).is_err());
        let grace = db.read_entry("alice-proj-1000", true).unwrap();
        assert_eq!(grace.released, 1000);
        assert!(grace.workspace.is_dir());
    }

    #[test]
    fn release_with_delete_data_removes_tree_immediately() {
        let (dir, config) = setup();
        let fs = config.get_fs_config("scratch").unwrap();
        let ws_path = dir.path().join("space/alice-proj");
        std::fs::create_dir(&ws_path).unwrap();
        std::fs::write(ws_path.join("data.bin"), b"x").unwrap();

        let entry = Entry {
            id: "alice-proj".into(),
            filesystem: "scratch".into(),
            workspace: ws_path.clone(),
            creation: 1,
            expiration: 2,
            released: 0,
            reminder: 0,
            extensions: 1,
            group: String::new(),
            mailaddress: String::new(),
            comment: String::new(),
            dbversion: None,
        };
        let db = Database::open(fs);
        db.create_entry(&entry, 0, 0).unwrap();

        let broker = Broker::new();
        let outcome = release(
            &config,
            &broker,
            1000,
            ReleaseRequest { id: "alice-proj", filesystem: "scratch", delete_data: true },
        )
        .unwrap();

        assert!(db.read_entry(&outcome.grace_id, true).is_err());
        let _ = PathBuf::new();
    }
}
