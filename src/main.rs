use clap::Parser;
use std::path::PathBuf;

use workspaces::config::Config;
use workspaces::context::RunContext;
use workspaces::error::{self, WsError};
use workspaces::identity::Identity;
use workspaces::privilege::Broker;
use workspaces::{allocate, cli, db, expire, glob, list, logging, release, restore, userconfig};

const DEFAULT_CONFIG_SOURCES: &[&str] = &["/etc/ws.d", "/etc/ws.conf"];

fn main() {
    logging::init();

    let args = cli::Args::parse();

    let sources: Vec<PathBuf> = match &args.config {
        Some(path) => vec![path.clone()],
        None => DEFAULT_CONFIG_SOURCES.iter().map(PathBuf::from).collect(),
    };

    let config = match Config::load(&sources) {
        Ok(c) => c,
        Err(e) => std::process::exit(logging::report(&e)),
    };

    let broker = Broker::new();
    let identity = Identity::current();
    let user_preferences = identity
        .home_dir()
        .map(|h| h.join(".ws_user.conf"))
        .map(|p| userconfig::UserConfig::read_from_path(&p))
        .unwrap_or_default();

    let ctx = RunContext::new(broker, identity, config);
    let now = ctx.now();

    let result = dispatch(&ctx, now, &user_preferences, args.command);
    match result {
        Ok(()) => {}
        Err(e) => std::process::exit(logging::report(&e)),
    }
}

fn dispatch(
    ctx: &RunContext,
    now: i64,
    prefs: &userconfig::UserConfig,
    command: cli::Command,
) -> error::Result<()> {
    match command {
        cli::Command::Allocate {
            name,
            days,
            filesystem,
            reminder,
            mailaddress,
            extend,
            user,
            groupflag,
            groupname,
            comment,
        } => cmd_allocate(
            ctx,
            now,
            prefs,
            name,
            days,
            filesystem,
            reminder,
            mailaddress,
            extend,
            user,
            groupflag,
            groupname,
            comment,
        ),
        cli::Command::Find { name, filesystem, groupworkspaces, longnames: _, user } => {
            cmd_find(ctx, now, name, filesystem, groupworkspaces, user)
        }
        cli::Command::List {
            pattern,
            filesystem,
            groupworkspaces,
            longnames: _,
            sort_size: _,
            expired_only,
            sort_name: _,
            reverse: _,
            terse,
            user,
            verbose: _,
        } => cmd_list(ctx, now, pattern, filesystem, groupworkspaces, expired_only, terse, user),
        cli::Command::Release { name, filesystem, user, delete_data } => {
            cmd_release(ctx, now, name, filesystem, user, delete_data)
        }
        cli::Command::Restore { grace_id, target, filesystem, user: _, yes } => {
            cmd_restore(ctx, grace_id, target, filesystem, yes)
        }
        cli::Command::Expirer { filesystem, cleaner } => cmd_expirer(ctx, now, filesystem, cleaner),
        cli::Command::Stat { pattern, filesystem, user } => cmd_stat(ctx, now, pattern, filesystem, user),
        cli::Command::Editdb { pattern, add_time_days, not_kidding } => {
            cmd_editdb(ctx, pattern, add_time_days, not_kidding)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_allocate(
    ctx: &RunContext,
    now: i64,
    prefs: &userconfig::UserConfig,
    name: String,
    days: Option<i64>,
    filesystem: Option<String>,
    reminder: Option<i64>,
    mailaddress: Option<String>,
    extend: bool,
    user: Option<String>,
    groupflag: bool,
    groupname: Option<String>,
    comment: Option<String>,
) -> error::Result<()> {
    let req = allocate::AllocateRequest {
        name: &name,
        duration_days: days.or(if prefs.duration > 0 { Some(prefs.duration) } else { None }),
        filesystem: filesystem.as_deref(),
        extend,
        reminder: reminder.or(if prefs.reminder > 0 { Some(prefs.reminder) } else { None }),
        mailaddress: mailaddress.as_deref().or(if prefs.mailaddress.is_empty() { None } else { Some(prefs.mailaddress.as_str()) }),
        owner_override: user.as_deref(),
        group_name: groupname.as_deref(),
        groupflag,
        comment: comment.as_deref(),
    };
    let outcome = allocate::allocate(&ctx.config, &ctx.broker, &ctx.identity, now, req)?;
    println!("{}", outcome.path.display());
    logging::info(format!(
        "filesystem {}, {} extension(s) remaining, expires at {}",
        outcome.filesystem, outcome.extensions_remaining, outcome.expiration
    ));
    Ok(())
}

fn cmd_find(
    ctx: &RunContext,
    now: i64,
    name: String,
    filesystem: Option<String>,
    groupworkspaces: bool,
    user: Option<String>,
) -> error::Result<()> {
    let filesystems = resolve_filesystems(ctx, filesystem.as_deref());
    let target_user = user.unwrap_or_else(|| ctx.identity.username.clone());
    let entries = list::collect(&ctx.config, &filesystems, &name, &target_user, &ctx.identity.groups, groupworkspaces, false);
    list::print_terse(&entries);
    let _ = now;
    Ok(())
}

fn cmd_list(
    ctx: &RunContext,
    now: i64,
    pattern: Option<String>,
    filesystem: Option<String>,
    groupworkspaces: bool,
    expired_only: bool,
    terse: bool,
    user: Option<String>,
) -> error::Result<()> {
    let filesystems = resolve_filesystems(ctx, filesystem.as_deref());
    let target_user = user.unwrap_or_else(|| ctx.identity.username.clone());
    let pattern = pattern.unwrap_or_else(|| "*".to_string());
    let mut entries = list::collect(&ctx.config, &filesystems, &pattern, &target_user, &ctx.identity.groups, groupworkspaces, false);
    if expired_only {
        entries.retain(|e| e.entry.remaining(now) < 0);
    }
    if terse {
        list::print_terse(&entries);
    } else {
        list::print_table(&entries, now);
    }
    Ok(())
}

fn cmd_release(
    ctx: &RunContext,
    now: i64,
    name: String,
    filesystem: Option<String>,
    user: Option<String>,
    delete_data: bool,
) -> error::Result<()> {
    let owner = user.unwrap_or_else(|| ctx.identity.username.clone());
    let filesystem = filesystem
        .or_else(|| ctx.config.valid_filesystems(&owner, &ctx.identity.groups).into_iter().next())
        .ok_or(WsError::AccessDenied)?;
    let id = format!("{owner}-{name}");
    let outcome = release::release(
        &ctx.config,
        &ctx.broker,
        now,
        release::ReleaseRequest { id: &id, filesystem: &filesystem, delete_data },
    )?;
    logging::info(format!("released as {}", outcome.grace_id));
    Ok(())
}

fn cmd_restore(
    ctx: &RunContext,
    grace_id: String,
    target: String,
    filesystem: Option<String>,
    yes: bool,
) -> error::Result<()> {
    if !yes {
        let challenge = restore::Challenge::generate();
        println!("type {} to confirm restore of {grace_id}:", challenge.code);
        let mut response = String::new();
        std::io::stdin().read_line(&mut response).map_err(|e| WsError::IoFailed {
            path: PathBuf::from("<stdin>"),
            source: e,
        })?;
        if !challenge.verify(&response) {
            return Err(WsError::AccessDenied);
        }
    }

    restore::restore(
        &ctx.config,
        &ctx.broker,
        &ctx.identity.username,
        ctx.identity.is_root(),
        &ctx.identity.groups,
        restore::RestoreRequest {
            grace_id: &grace_id,
            target_name: &target,
            filesystem: filesystem.as_deref(),
            skip_confirmation: true,
        },
    )
}

fn cmd_expirer(ctx: &RunContext, now: i64, filesystem: Option<String>, cleaner: bool) -> error::Result<()> {
    if !ctx.identity.is_root() && !ctx.config.is_admin(&ctx.identity.username) {
        return Err(WsError::AccessDenied);
    }
    let dbuid = ctx.config.global.dbuid.ok_or_else(|| WsError::ConfigInvalid("missing dbuid".into()))?;
    let dbgid = ctx.config.global.dbgid.ok_or_else(|| WsError::ConfigInvalid("missing dbgid".into()))?;
    let opts = expire::SweepOptions {
        dry_run: !cleaner,
        dbuid,
        dbgid,
        deldirtimeout: std::time::Duration::from_secs(ctx.config.global.deldirtimeout.max(0) as u64),
    };

    let targets: Vec<String> = match filesystem {
        Some(f) => vec![f],
        None => {
            let mut names: Vec<String> = ctx.config.filesystems.keys().cloned().collect();
            names.sort();
            names
        }
    };

    for name in targets {
        let Some(fs) = ctx.config.get_fs_config(&name) else { continue };
        let report = expire::sweep(&ctx.broker, fs, now, &opts);
        logging::info(format!(
            "{}: {} stray live, {} stray grace, {} expired, {} purged{}",
            name,
            report.stray_live_dirs.len(),
            report.stray_grace_dirs.len(),
            report.expired_entries.len(),
            report.purged_entries.len(),
            if report.skipped_magic_mismatch { " (magic mismatch, skipped)" } else { "" },
        ));
    }
    Ok(())
}

fn cmd_stat(
    ctx: &RunContext,
    now: i64,
    pattern: Option<String>,
    filesystem: Option<String>,
    user: Option<String>,
) -> error::Result<()> {
    let filesystems = resolve_filesystems(ctx, filesystem.as_deref());
    let target_user = user.unwrap_or_else(|| ctx.identity.username.clone());
    let pattern = pattern.unwrap_or_else(|| "*".to_string());
    let entries = list::collect(&ctx.config, &filesystems, &pattern, &target_user, &ctx.identity.groups, false, false);
    list::print_stat(&entries, now);
    Ok(())
}

fn cmd_editdb(ctx: &RunContext, pattern: String, add_time_days: Option<i64>, not_kidding: bool) -> error::Result<()> {
    if !ctx.identity.is_root() && !ctx.config.is_admin(&ctx.identity.username) {
        return Err(WsError::AccessDenied);
    }
    if !not_kidding {
        logging::warning("editdb requires --not-kidding to actually mutate entries; doing nothing".to_string());
        return Ok(());
    }
    let Some(days) = add_time_days else {
        logging::warning("editdb: no mutation requested (use --add-time)".to_string());
        return Ok(());
    };

    let mut names: Vec<String> = ctx.config.filesystems.keys().cloned().collect();
    names.sort();
    for name in names {
        let Some(fs) = ctx.config.get_fs_config(&name) else { continue };
        let dbase = db::Database::open(fs);
        for id in dbase.all_ids(false) {
            if !glob::matches(&pattern, &id) {
                continue;
            }
            if let Ok(mut entry) = dbase.read_entry(&id, false) {
                entry.expiration += days * 86_400;
                let dbuid = ctx.config.global.dbuid.unwrap_or(0);
                let dbgid = ctx.config.global.dbgid.unwrap_or(0);
                if let Err(e) = dbase.write_entry(&entry, false, dbuid, dbgid) {
                    logging::warning(format!("could not update {id}: {e}"));
                }
            }
        }
    }
    Ok(())
}

fn resolve_filesystems(ctx: &RunContext, filesystem: Option<&str>) -> Vec<String> {
    match filesystem {
        Some(f) => vec![f.to_string()],
        None => ctx.config.valid_filesystems(&ctx.identity.username, &ctx.identity.groups),
    }
}
