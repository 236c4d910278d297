//! ArgMatches → CliAction conversion.

use clap::ArgMatches;
use indexsync::{IndexSelection, SyncOptions, TenantId};

/// A parsed command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Config file path
    pub config: String,
    /// Whether `--config` was given explicitly
    pub config_explicit: bool,
    /// Site addressed
    pub tenant: TenantId,
    /// What to do
    pub action: CliAction,
}

/// The command to run.
#[derive(Debug, Clone, PartialEq)]
pub enum CliAction {
    /// Start a run and wait for it
    Index(SyncOptions),
    /// Pause the running sync
    Pause,
    /// Resume the paused sync and wait for it
    Resume,
    /// Cancel the running or paused sync
    Cancel,
    /// Show progress
    Status,
    /// Delete indices
    DeleteIndex {
        /// Every site of the network
        network_wide: bool,
    },
    /// Show document counts
    Health,
    /// Toggle an index
    Feature {
        /// Index name
        name: String,
        /// New state
        enabled: bool,
    },
    /// List enabled indices
    Features,
}

/// Convert clap ArgMatches into an Invocation.
pub fn matches_to_action(matches: &ArgMatches) -> Result<Invocation, String> {
    let config = matches
        .get_one::<String>("config")
        .cloned()
        .unwrap_or_else(|| "indexsync.toml".to_string());
    let config_explicit = matches.value_source("config") == Some(clap::parser::ValueSource::CommandLine);

    let tenant = matches
        .get_one::<String>("tenant")
        .map(|s| TenantId::new(s.trim()))
        .unwrap_or_else(|| TenantId::new("1"));
    if !tenant.is_valid() {
        return Err(format!("Invalid tenant: {}", tenant));
    }

    let (sub_name, sub_matches) = matches
        .subcommand()
        .ok_or_else(|| "No command provided".to_string())?;

    let action = match sub_name {
        "index" => parse_index(sub_matches)?,
        "pause" => CliAction::Pause,
        "resume" => CliAction::Resume,
        "cancel" => CliAction::Cancel,
        "status" => CliAction::Status,
        "delete-index" => CliAction::DeleteIndex {
            network_wide: sub_matches.get_flag("network-wide"),
        },
        "health" => CliAction::Health,
        "feature" => parse_feature(sub_matches)?,
        other => return Err(format!("Unknown command: {}", other)),
    };

    Ok(Invocation {
        config,
        config_explicit,
        tenant,
        action,
    })
}

fn parse_index(matches: &ArgMatches) -> Result<CliAction, String> {
    let selection = match matches.get_one::<String>("indexables") {
        Some(raw) => {
            let names: Vec<String> = raw
                .split(',')
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect();
            if names.is_empty() {
                return Err("--indexables needs at least one index name".to_string());
            }
            IndexSelection::only(names)
        }
        None => IndexSelection::All,
    };

    Ok(CliAction::Index(
        SyncOptions::new()
            .setup(matches.get_flag("setup"))
            .network_wide(matches.get_flag("network-wide"))
            .resume(matches.get_flag("resume"))
            .indices(selection),
    ))
}

fn parse_feature(matches: &ArgMatches) -> Result<CliAction, String> {
    let (sub, m) = matches.subcommand().ok_or("No feature subcommand")?;
    let name = || {
        m.get_one::<String>("name")
            .cloned()
            .ok_or_else(|| "Missing index name".to_string())
    };
    match sub {
        "enable" => Ok(CliAction::Feature {
            name: name()?,
            enabled: true,
        }),
        "disable" => Ok(CliAction::Feature {
            name: name()?,
            enabled: false,
        }),
        "list" => Ok(CliAction::Features),
        other => Err(format!("Unknown feature subcommand: {}", other)),
    }
}
