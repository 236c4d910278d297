//! Clap command tree.

use clap::{Arg, ArgAction, Command};

/// Build the `indexsync` command.
pub fn build_cli() -> Command {
    Command::new("indexsync")
        .about("Resumable bulk sync of site content into a search index")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_name("PATH")
                .help("Config file (defaults apply when the default file is missing)")
                .default_value("indexsync.toml"),
        )
        .arg(
            Arg::new("tenant")
                .long("tenant")
                .short('t')
                .global(true)
                .value_name("ID")
                .help("Site to operate on")
                .default_value("1"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Print results as JSON"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Debug logging"),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Only log errors"),
        )
        .subcommand(index_cmd())
        .subcommand(Command::new("pause").about("Pause the running sync at its next batch"))
        .subcommand(Command::new("resume").about("Resume a paused sync and wait for it"))
        .subcommand(Command::new("cancel").about("Cancel a running or paused sync"))
        .subcommand(Command::new("status").about("Show sync progress"))
        .subcommand(
            Command::new("delete-index")
                .about("Delete the site's indices and any stored checkpoint")
                .arg(network_wide_arg()),
        )
        .subcommand(Command::new("health").about("Show document counts per index"))
        .subcommand(feature_cmd())
}

fn index_cmd() -> Command {
    Command::new("index")
        .about("Index all content and wait for the run to finish")
        .arg(
            Arg::new("setup")
                .long("setup")
                .action(ArgAction::SetTrue)
                .help("Delete and recreate the indices first"),
        )
        .arg(network_wide_arg())
        .arg(
            Arg::new("indexables")
                .long("indexables")
                .value_name("NAMES")
                .help("Comma-separated indices to sync (default: all enabled)"),
        )
        .arg(
            Arg::new("resume")
                .long("resume")
                .action(ArgAction::SetTrue)
                .help("Continue a paused, crashed or failed run instead of starting over"),
        )
}

fn feature_cmd() -> Command {
    let name = || Arg::new("name").required(true).help("Index name");
    Command::new("feature")
        .about("Enable or disable an index for the site")
        .subcommand_required(true)
        .subcommand(Command::new("enable").arg(name()))
        .subcommand(Command::new("disable").arg(name()))
        .subcommand(Command::new("list").about("List enabled indices"))
}

fn network_wide_arg() -> Arg {
    Arg::new("network-wide")
        .long("network-wide")
        .action(ArgAction::SetTrue)
        .help("Operate on every site of the network")
}
