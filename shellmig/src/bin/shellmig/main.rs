mod commands;
mod examples;
mod output;

use anyhow::Result;
use clap::{
    Command, CommandFactory, FromArgMatches, Parser, Subcommand,
    builder::{Styles, styling::AnsiColor},
};

use commands::{
    drop::{DropArgs, handle_drop},
    force::{ForceArgs, handle_force},
    run::{RunArgs, handle_run},
    version::{VersionArgs, handle_version},
};
use output::{GlobalOptions, OutputFormat, OutputManager};

const AFTER_LONG_HELP: &str = "Environment Variables:
  SHELLMIG_URL  Driver connection string (shell://, shell-redis://, shell-memory://)
  RUST_LOG      Log filter for driver diagnostics, e.g. shellmig=debug

Tip: Use 'shellmig <command> --help' to view examples for each command.
";

#[derive(Parser)]
#[command(name = "shellmig")]
#[command(version)]
#[command(
    about = "Run executable migrations with a versioned, locked target",
    long_about = r#"Run executable migrations against a target whose applied version is
recorded in PostgreSQL or Redis.

Every write happens under a lock shared by all shellmig processes pointed at
the same target. A migration that fails leaves the target dirty until an
operator repairs it and runs `force`.

Commands:
  version   Show the recorded version
  force     Record a version without running anything
  run       Run one executable migration
  drop      Destroy every table in the target
"#
)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Driver connection string
    #[arg(long, env = "SHELLMIG_URL", hide_env_values = true)]
    url: String,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Suppress output (only errors will be shown)
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn command_with_help() -> Command {
        examples::attach(Cli::command().after_long_help(AFTER_LONG_HELP).styles(help_styles()))
    }

    fn parse_with_help() -> Self {
        let matches = Self::command_with_help().get_matches();
        Cli::from_arg_matches(&matches).unwrap_or_else(|err| err.exit())
    }
}

fn help_styles() -> Styles {
    Styles::styled()
        .usage(AnsiColor::BrightBlue.on_default().bold())
        .header(AnsiColor::Cyan.on_default().bold())
        .literal(AnsiColor::Magenta.on_default())
        .placeholder(AnsiColor::BrightBlack.on_default())
        .valid(AnsiColor::Green.on_default())
        .invalid(AnsiColor::Yellow.on_default())
        .error(AnsiColor::Red.on_default().bold())
}

#[derive(Subcommand)]
enum Commands {
    /// Show the recorded version and dirty flag
    Version(VersionArgs),

    /// Record a version as clean without running a migration
    Force(ForceArgs),

    /// Run one executable migration and record its version
    Run(RunArgs),

    /// Destroy every table (or key) in the target
    Drop(DropArgs),
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse_with_help();
    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(err) = execute(cli).await {
        OutputManager::new(GlobalOptions::default()).error(&format!("{err:#}"));
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let global_options = GlobalOptions {
        output_format: cli.output,
        quiet: cli.quiet,
        no_color: cli.no_color,
    };

    let output = OutputManager::new(global_options);

    match cli.command {
        Commands::Version(args) => handle_version(&cli.url, args, &output).await?,
        Commands::Force(args) => handle_force(&cli.url, args, &output).await?,
        Commands::Run(args) => handle_run(&cli.url, args, &output).await?,
        Commands::Drop(args) => handle_drop(&cli.url, args, &output).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn force_accepts_nil_version() {
        let cli = Cli::try_parse_from(["shellmig", "--url", "shell-memory:///x", "force", "-1"]).unwrap();
        assert!(matches!(cli.command, Commands::Force(ForceArgs { version: -1 })));
    }

    #[test]
    fn long_help_carries_examples_and_environment() {
        let mut command = Cli::command_with_help();
        let top = command.render_long_help().to_string();
        assert!(top.contains("SHELLMIG_URL"));

        let run = command.find_subcommand_mut("run").unwrap();
        let help = run.render_long_help().to_string();
        assert!(help.contains("Examples:"));
        assert!(help.contains("shellmig"));
    }

    #[test]
    fn run_requires_version() {
        let result = Cli::try_parse_from(["shellmig", "--url", "shell-memory:///x", "run", "m1.sh"]);
        assert!(result.is_err());
    }
}
