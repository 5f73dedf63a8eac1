//! Workspace directory manager (C6): space selection, directory
//! creation with the owner/group/mode invariants, and the two small
//! wrappers `moveToGrace`/`removeTree` used by release and the expirer.
//! Grounded in `ws_allocate.cpp`'s directory creation sequence and
//! `ws_release.cpp`'s move-to-grace sequence.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::{FilesystemConfig, SpaceSelection};
use crate::error::{Result, WsError};
use crate::privilege::{Authority, Broker};

/// Picks one of `fs.spaces` per the configured [`SpaceSelection`]
/// strategy. `mostspace` breaks ties toward the lowest index.
pub fn select_space(fs: &FilesystemConfig, uid: u32, gid: u32) -> Result<PathBuf> {
    if fs.spaces.is_empty() {
        return Err(WsError::NoSpaceAvailable(fs.name.clone()));
    }
    let idx = match fs.spaceselection {
        SpaceSelection::Random => rand::random::<usize>() % fs.spaces.len(),
        SpaceSelection::Uid => uid as usize % fs.spaces.len(),
        SpaceSelection::Gid => gid as usize % fs.spaces.len(),
        SpaceSelection::Mostspace => most_free_index(&fs.spaces)?,
    };
    Ok(PathBuf::from(&fs.spaces[idx]))
}

fn most_free_index(spaces: &[String]) -> Result<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (i, space) in spaces.iter().enumerate() {
        let free = match nix::sys::statvfs::statvfs(Path::new(space)) {
            Ok(stat) => stat.block_size() * stat.blocks_free(),
            Err(_) => continue,
        };
        match best {
            Some((_, best_free)) if best_free >= free => {}
            _ => best = Some((i, free)),
        }
    }
    best.map(|(i, _)| i).ok_or_else(|| WsError::NoSpaceAvailable("no statvfs-accessible space".into()))
}

/// Result of a directory creation: the absolute workspace path.
pub struct CreatedDirectory {
    pub path: PathBuf,
}

/// Creates `<space>/<effective_owner>-<name>` under raised authority,
/// applying the owner/group/mode invariants from spec.md step 4-5. On
/// any failure after the directory is created, the directory is removed
/// and the original error surfaced.
#[allow(clippy::too_many_arguments)]
pub fn create_workspace(
    broker: &Broker,
    fs: &FilesystemConfig,
    name: &str,
    effective_owner: &str,
    owner_uid: u32,
    effective_group_name: Option<&str>,
    effective_gid: u32,
    groupflag: bool,
) -> Result<CreatedDirectory> {
    let space = select_space(fs, owner_uid, effective_gid)?;
    let path = space.join(format!("{effective_owner}-{name}"));

    create_dir_raised(broker, &path)?;

    if let Err(e) = chown_raised(broker, &path, owner_uid, effective_gid) {
        let _ = std::fs::remove_dir_all(&path);
        return Err(e);
    }

    let mode = 0o700
        | if groupflag { 0o050 } else { 0 }
        | if effective_group_name.is_some() { 0o020 | 0o2000 } else { 0 };
    if let Err(e) = chmod_raised(broker, &path, mode) {
        let _ = std::fs::remove_dir_all(&path);
        return Err(e);
    }

    Ok(CreatedDirectory { path })
}

fn create_dir_raised(broker: &Broker, path: &Path) -> Result<()> {
    let _guard = broker.raise(Authority::FS_OVERRIDE)?;
    let old_umask = nix::sys::stat::umask(nix::sys::stat::Mode::from_bits_truncate(0o077));
    let result = std::fs::create_dir_all(path).map_err(|e| WsError::IoFailed {
        path: path.to_path_buf(),
        source: e,
    });
    nix::sys::stat::umask(old_umask);
    result
}

fn chown_raised(broker: &Broker, path: &Path, uid: u32, gid: u32) -> Result<()> {
    let _guard = broker.raise(Authority::OWNERSHIP)?;
    nix::unistd::chown(path, Some(nix::unistd::Uid::from_raw(uid)), Some(nix::unistd::Gid::from_raw(gid)))
        .map_err(|e| WsError::IoFailed {
            path: path.to_path_buf(),
            source: std::io::Error::from_raw_os_error(e as i32),
        })
}

fn chmod_raised(broker: &Broker, path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let _guard = broker.raise(Authority::FILE_OWNER)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| WsError::IoFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Renames `path` to `grace_path`, raising filesystem-override authority
/// and, under the `setuid` backend, impersonating `dbuid` so the move
/// succeeds on root-squashed filesystems.
pub fn move_to_grace(broker: &Broker, path: &Path, grace_path: &Path, dbuid: u32) -> Result<()> {
    let _guard = broker.raise_as(Authority::FS_OVERRIDE, nix::unistd::Uid::from_raw(dbuid))?;
    if let Some(parent) = grace_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| WsError::IoFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::rename(path, grace_path).map_err(|e| WsError::IoFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Recursively removes `path`, aborting (and returning successfully,
/// leaving the remainder for a future sweep) if `timeout` elapses first,
/// per `deldirtimeout`.
pub fn remove_tree(broker: &Broker, path: &Path, dbuid: u32, timeout: Duration) -> Result<()> {
    let _guard = broker.raise_as(Authority::FS_OVERRIDE, nix::unistd::Uid::from_raw(dbuid))?;
    let start = Instant::now();
    remove_tree_inner(path, start, timeout)
}

fn remove_tree_inner(path: &Path, start: Instant, timeout: Duration) -> Result<()> {
    if timeout.as_secs() > 0 && start.elapsed() > timeout {
        crate::logging::warning(format!("tree deletion of {} exceeded deldirtimeout, deferring", path.display()));
        return Ok(());
    }
    let meta = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(_) => return Ok(()),
    };
    if meta.is_dir() {
        let entries = std::fs::read_dir(path).map_err(|e| WsError::IoFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        for entry in entries.filter_map(|e| e.ok()) {
            remove_tree_inner(&entry.path(), start, timeout)?;
        }
        std::fs::remove_dir(path).map_err(|e| WsError::IoFailed {
            path: path.to_path_buf(),
            source: e,
        })
    } else {
        std::fs::remove_file(path).map_err(|e| WsError::IoFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilesystemConfig, SpaceSelection};
    use tempfile::TempDir;

    fn fs_config(spaces: Vec<String>, selection: SpaceSelection) -> FilesystemConfig {
        FilesystemConfig {
            name: "scratch".into(),
            spaces,
            spaceselection: selection,
            deleted_path: ".removed".into(),
            database: PathBuf::from("/tmp/db"),
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

    #[test]
    fn uid_selection_is_deterministic() {
        let fs = fs_config(vec!["/a".into(), "/b".into(), "/c".into()], SpaceSelection::Uid);
        let path = select_space(&fs, 7, 0).unwrap();
        assert_eq!(path, PathBuf::from("/b"));
    }

    #[test]
    fn gid_selection_is_deterministic() {
        let fs = fs_config(vec!["/a".into(), "/b".into()], SpaceSelection::Gid);
        let path = select_space(&fs, 0, 4).unwrap();
        assert_eq!(path, PathBuf::from("/a"));
    }

    #[test]
    fn empty_spaces_is_no_space_available() {
        let fs = fs_config(vec![], SpaceSelection::Random);
        assert!(matches!(select_space(&fs, 0, 0), Err(WsError::NoSpaceAvailable(_))));
    }

    #[test]
    fn move_to_grace_renames_within_same_filesystem() {
        let dir = TempDir::new().unwrap();
        let broker = Broker::new();
        let src = dir.path().join("alice-proj");
        std::fs::create_dir(&src).unwrap();
        let dst = dir.path().join("removed/alice-proj-1000");
        move_to_grace(&broker, &src, &dst, nix::unistd::getuid().as_raw()).unwrap();
        assert!(!src.exists());
        assert!(dst.is_dir());
    }

    #[test]
    fn remove_tree_deletes_nested_contents() {
        let dir = TempDir::new().unwrap();
        let broker = Broker::new();
        let root = dir.path().join("tree");
        std::fs::create_dir_all(root.join("nested")).unwrap();
        std::fs::write(root.join("nested/file.txt"), b"data").unwrap();
        remove_tree(&broker, &root, nix::unistd::getuid().as_raw(), Duration::from_secs(0)).unwrap();
        assert!(!root.exists());
    }
}
