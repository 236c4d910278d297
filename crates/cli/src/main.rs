//! indexsync CLI: the command-line trigger source.
//!
//! `index` and `resume` run the worker in this process and wait for it;
//! `pause` and `cancel` only change the stored run lock, so they reach a run
//! started by any process sharing the same `data_dir`.

mod commands;
mod format;
mod parse;
mod tracing_setup;

use std::path::Path;
use std::process;
use std::time::Duration;

use indexsync::{IndexSync, ProgressSnapshot, RunExit, SyncHandle, TenantId, TriggerSource};

use commands::build_cli;
use format::{
    format_error, format_exit, format_features, format_health, format_names, format_snapshot, OutputMode,
};
use parse::{matches_to_action, CliAction, Invocation};
use tracing_setup::{init_subscriber, Verbosity};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn main() {
    let matches = build_cli().get_matches();
    init_subscriber(Verbosity::from_flags(
        matches.get_flag("verbose"),
        matches.get_flag("quiet"),
    ));

    let mode = if matches.get_flag("json") {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let invocation = match matches_to_action(&matches) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("(error) {}", e);
            process::exit(2);
        }
    };

    let sync = match open_engine(&invocation) {
        Ok(sync) => sync,
        Err(e) => {
            eprintln!("{}", format_error(&e, mode));
            process::exit(1);
        }
    };

    match run(&sync, &invocation, mode) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{}", format_error(&e, mode));
            process::exit(1);
        }
    }
}

fn open_engine(invocation: &Invocation) -> indexsync::Result<IndexSync> {
    let path = Path::new(&invocation.config);
    if invocation.config_explicit || path.exists() {
        IndexSync::open(path)
    } else {
        tracing::debug!(config = %path.display(), "No config file, using defaults");
        IndexSync::builder().open()
    }
}

fn run(sync: &IndexSync, invocation: &Invocation, mode: OutputMode) -> indexsync::Result<i32> {
    let tenant = &invocation.tenant;
    match &invocation.action {
        CliAction::Index(options) => {
            let handle = sync.start(tenant, TriggerSource::Cli, options)?;
            follow(sync, handle, mode)
        }
        CliAction::Resume => {
            let handle = sync.resume(tenant, TriggerSource::Cli)?;
            follow(sync, handle, mode)
        }
        CliAction::Pause => print_snapshot(&sync.pause(tenant)?, mode),
        CliAction::Cancel => print_snapshot(&sync.cancel(tenant)?, mode),
        CliAction::Status => print_snapshot(&sync.status(tenant)?, mode),
        CliAction::DeleteIndex { network_wide } => {
            let deleted = sync.delete_index(tenant, *network_wide)?;
            println!("{}", format_names(&deleted, mode));
            Ok(0)
        }
        CliAction::Health => {
            println!("{}", format_health(&sync.health(tenant)?, mode));
            Ok(0)
        }
        CliAction::Feature { name, enabled } => {
            println!("{}", format_features(&sync.set_feature(tenant, name, *enabled)?, mode));
            Ok(0)
        }
        CliAction::Features => {
            println!("{}", format_features(&sync.features(tenant)?, mode));
            Ok(0)
        }
    }
}

fn print_snapshot(snapshot: &ProgressSnapshot, mode: OutputMode) -> indexsync::Result<i32> {
    println!("{}", format_snapshot(snapshot, mode));
    Ok(0)
}

/// Wait for a worker, reporting progress on stderr.
fn follow(sync: &IndexSync, handle: SyncHandle, mode: OutputMode) -> indexsync::Result<i32> {
    let scope: TenantId = handle.tenant().clone();
    let mut last = String::new();
    while !handle.is_finished() {
        if mode == OutputMode::Human {
            if let Ok(snapshot) = sync.status(&scope) {
                let line = snapshot.message();
                if line != last {
                    eprintln!("{}", line);
                    last = line;
                }
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    let exit = handle.wait()?;
    let snapshot = sync.status(&scope)?;
    println!("{}", format_exit(&exit, &snapshot, mode));
    Ok(match exit {
        RunExit::Failed(_) | RunExit::LockLost => 1,
        RunExit::Completed { .. } | RunExit::Paused | RunExit::Cancelled | RunExit::Superseded => 0,
    })
}
