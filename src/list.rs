//! Listing, finding, and detailed stat output for workspaces.
//! Grounded in the teacher's `list.rs` for the `prettytable-rs` table
//! layout (bold title row, tight padding, colored expiry column); the
//! data source is this system's flat-file database instead of the
//! teacher's sqlite connection.

use prettytable::{color, format::FormatBuilder, Attr, Cell, Row, Table};
use rayon::prelude::*;

use crate::config::Config;
use crate::db::{Database, Entry};

/// One row of listing output, already resolved across filesystems.
pub struct ListedEntry {
    pub filesystem: String,
    pub entry: Entry,
}

/// Lists every entry matching `pattern` across `filesystems`, scoped by
/// `user`/`groups` the same way the allocation engine scopes visibility.
///
/// Per filesystem, the id-matching pass is sequential (one `readdir`),
/// but parsing the matched entry files fans out across `rayon`'s pool;
/// results are collected into one `Vec` per filesystem before being
/// appended in filesystem order, so output never interleaves mid-entry.
pub fn collect(
    config: &Config,
    filesystems: &[String],
    pattern: &str,
    user: &str,
    groups: &[String],
    groupworkspaces: bool,
    grace: bool,
) -> Vec<ListedEntry> {
    let mut result = Vec::new();
    for fs_name in filesystems {
        let Some(fs) = config.get_fs_config(fs_name) else { continue };
        let db = Database::open(fs);
        let ids = db.match_pattern(pattern, user, groups, grace, groupworkspaces);

        let parsed: Vec<Option<Entry>> = ids
            .par_iter()
            .map(|id| match db.read_entry(id, grace) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    crate::logging::warning(format!("skipping unreadable entry {id}: {e}"));
                    None
                }
            })
            .collect();

        result.extend(parsed.into_iter().flatten().map(|entry| ListedEntry { filesystem: fs_name.clone(), entry }));
    }
    result
}

/// Renders `entries` as a table, matching the teacher's tight-padding,
/// bold-header, color-coded-expiry layout.
pub fn print_table(entries: &[ListedEntry], now: i64) {
    let mut table = Table::new();
    table.set_format(FormatBuilder::new().padding(0, 2).build());
    table.set_titles(Row::new(vec![
        Cell::new("ID").with_style(Attr::Bold),
        Cell::new("FILESYSTEM").with_style(Attr::Bold),
        Cell::new("REMAINING").with_style(Attr::Bold),
        Cell::new("EXTENSIONS").with_style(Attr::Bold),
        Cell::new("PATH").with_style(Attr::Bold),
    ]));

    for listed in entries {
        let remaining = listed.entry.remaining(now);
        let expiry_cell = if remaining < 0 {
            Cell::new("expired").with_style(Attr::Bold).with_style(Attr::ForegroundColor(color::RED))
        } else if remaining < 7 * 86_400 {
            Cell::new(&format!("{}d", remaining / 86_400)).with_style(Attr::ForegroundColor(color::YELLOW))
        } else {
            Cell::new(&format!("{}d", remaining / 86_400))
        };

        table.add_row(Row::new(vec![
            Cell::new(&listed.entry.id),
            Cell::new(&listed.filesystem),
            expiry_cell,
            Cell::new(&listed.entry.extensions.to_string()),
            Cell::new(&listed.entry.workspace.to_string_lossy()),
        ]));
    }

    table.printstd();
}

/// Terse, one-path-per-line output for `find` and `list -t`.
pub fn print_terse(entries: &[ListedEntry]) {
    for listed in entries {
        println!("{}", listed.entry.workspace.display());
    }
}

/// Detailed per-entry block output for `stat`.
pub fn print_stat(entries: &[ListedEntry], now: i64) {
    for listed in entries {
        let e = &listed.entry;
        println!("id:          {}", e.id);
        println!("filesystem:  {}", listed.filesystem);
        println!("workspace:   {}", e.workspace.display());
        println!("created:     {}", e.creation);
        println!("expiration:  {}", e.expiration);
        println!("remaining:   {}s", e.remaining(now));
        println!("extensions:  {}", e.extensions);
        if !e.group.is_empty() {
            println!("group:       {}", e.group);
        }
        if !e.mailaddress.is_empty() {
            println!("mail:        {}", e.mailaddress);
        }
        if !e.comment.is_empty() {
            println!("comment:     {}", e.comment);
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpaceSelection;
    use crate::config::FilesystemConfig;
    use tempfile::TempDir;

    fn fs_config(dir: &TempDir) -> FilesystemConfig {
        let database = dir.path().join("db");
        std::fs::create_dir_all(&database).unwrap();
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

    #[test]
    fn collect_filters_by_pattern_and_user() {
        let dir = TempDir::new().unwrap();
        let fs = fs_config(&dir);
        let db = Database::open(&fs);
        let entry = Entry {
            id: "alice-proj".into(),
            filesystem: "scratch".into(),
            workspace: dir.path().join("space/alice-proj"),
            creation: 0,
            expiration: 100,
            released: 0,
            reminder: 0,
            extensions: 1,
            group: String::new(),
            mailaddress: String::new(),
            comment: String::new(),
            dbversion: None,
        };
        db.create_entry(&entry, 0, 0).unwrap();

        let mut config = crate::config::Config::parse(&format!(
            "dbuid: 0\ndbgid: 0\nworkspaces:\n  scratch:\n    spaces: [\"{}\"]\n    deleted: removed\n    database: \"{}\"\n",
            dir.path().join("space").display(),
            dir.path().join("db").display(),
        ))
        .unwrap();
        config.filesystems.insert("scratch".to_string(), fs);

        let listed = collect(&config, &["scratch".to_string()], "*", "alice", &[], false, false);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].entry.id, "alice-proj");
    }
}
