use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::SyncConfig;
use crate::sync::{
    BugzillaRawSyncState, BugzillaSyncStateHelper, GmailRawSyncState, GmailSyncStateHelper, IcalRawSyncState,
    IcalSyncStateHelper, Pop3RawSyncState, Pop3SyncStateHelper, SyncMode, SyncStateHelper, VanillaRawSyncState,
    VanillaSyncStateHelper,
};

/// comunicado-sync - offline mail sync state reconciliation
#[derive(Parser)]
#[command(name = "comunicado-sync")]
#[command(about = "Replay sync passes against persisted sync states")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one sync pass over recorded observations and print the outcome
    Replay(ReplayArgs),

    /// Show or initialize the sync configuration
    Config(ConfigArgs),
}

/// Sync state flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Protocol {
    Gmail,
    Vanilla,
    Pop3,
    Ical,
    Bugzilla,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReplayMode {
    Refresh,
    Grow,
    Conv,
}

impl From<ReplayMode> for SyncMode {
    fn from(mode: ReplayMode) -> Self {
        match mode {
            ReplayMode::Refresh => SyncMode::Refresh,
            ReplayMode::Grow => SyncMode::Grow,
            ReplayMode::Conv => SyncMode::Conv,
        }
    }
}

#[derive(Args)]
pub struct ReplayArgs {
    /// Which helper to run
    #[arg(value_enum)]
    pub protocol: Protocol,

    /// Raw sync state (JSON); omit for a first sync
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Observations to ingest (JSON array)
    #[arg(long)]
    pub observations: PathBuf,

    /// Account id the state belongs to
    #[arg(long, default_value = "0")]
    pub account: String,

    /// Folder id, for per-folder states
    #[arg(long, default_value = "0.0")]
    pub folder: String,

    /// Pass mode for helpers that distinguish them
    #[arg(long, value_enum, default_value = "refresh")]
    pub mode: ReplayMode,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write the default configuration if none exists
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Command-line interface handler
pub struct CliHandler {
    config: SyncConfig,
    config_path: PathBuf,
}

impl CliHandler {
    /// Create a new CLI handler, loading the configuration
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => SyncConfig::default_path().ok_or_else(|| anyhow!("Cannot find config directory"))?,
        };
        let config = SyncConfig::load_or_default(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        Ok(Self { config, config_path })
    }

    /// Handle CLI commands
    pub async fn handle_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Replay(args) => self.handle_replay(args),
            Commands::Config(args) => self.handle_config(args),
        }
    }

    fn handle_replay(&self, args: ReplayArgs) -> Result<()> {
        let output = match args.protocol {
            Protocol::Gmail => {
                let raw: Option<GmailRawSyncState> = read_optional_json(args.state.as_deref())?;
                let helper = GmailSyncStateHelper::new(&args.account, raw, args.mode.into());
                replay(helper, read_json(&args.observations)?)?
            }
            Protocol::Vanilla => {
                let raw: Option<VanillaRawSyncState> = read_optional_json(args.state.as_deref())?;
                let helper = VanillaSyncStateHelper::new(&args.account, &args.folder, raw, args.mode.into());
                replay(helper, read_json(&args.observations)?)?
            }
            Protocol::Pop3 => {
                let raw: Option<Pop3RawSyncState> = read_optional_json(args.state.as_deref())?;
                let helper = Pop3SyncStateHelper::new(
                    &args.account,
                    raw,
                    args.mode.into(),
                    self.config.pop3_max_messages_per_sync,
                );
                // The whole file is one maildrop listing.
                replay(helper, vec![read_json(&args.observations)?])?
            }
            Protocol::Ical => {
                let raw: Option<IcalRawSyncState> = read_optional_json(args.state.as_deref())?;
                let helper = IcalSyncStateHelper::new(&args.account, raw, &self.config);
                replay(helper, read_json(&args.observations)?)?
            }
            Protocol::Bugzilla => {
                let raw: Option<BugzillaRawSyncState> = read_optional_json(args.state.as_deref())?;
                let helper = BugzillaSyncStateHelper::new(&args.account, raw, &self.config);
                replay(helper, read_json(&args.observations)?)?
            }
        };
        println!("{}", output);
        Ok(())
    }

    fn handle_config(&self, args: ConfigArgs) -> Result<()> {
        match args.command {
            ConfigCommands::Show => {
                println!("# {}", self.config_path.display());
                println!("{}", toml::to_string_pretty(&self.config)?);
            }
            ConfigCommands::Init { force } => {
                if self.config_path.exists() && !force {
                    println!("❌ {} already exists (use --force to overwrite)", self.config_path.display());
                    return Ok(());
                }
                SyncConfig::default().save(&self.config_path)?;
                println!("✅ Wrote default configuration to {}", self.config_path.display());
            }
        }
        Ok(())
    }
}

/// Ingest everything, finalize, and render the outcome as JSON
fn replay<H: SyncStateHelper>(mut helper: H, observations: Vec<H::Observation>) -> Result<String> {
    for observation in observations {
        helper.ingest(observation);
    }
    helper.finalize();
    Ok(serde_json::to_string_pretty(&helper.into_outcome())?)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn read_optional_json<T: DeserializeOwned>(path: Option<&Path>) -> Result<Option<T>> {
    path.map(read_json).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_replay() {
        let cli = Cli::parse_from([
            "comunicado-sync",
            "--debug",
            "replay",
            "gmail",
            "--observations",
            "obs.json",
            "--mode",
            "grow",
        ]);
        assert!(cli.debug);
        match cli.command {
            Commands::Replay(args) => {
                assert_eq!(args.protocol, Protocol::Gmail);
                assert_eq!(args.mode, ReplayMode::Grow);
                assert!(args.state.is_none());
                assert_eq!(args.account, "0");
            }
            Commands::Config(_) => panic!("expected replay"),
        }
    }

    #[test]
    fn test_replay_bugzilla() {
        let dir = tempfile::tempdir().unwrap();
        let obs = dir.path().join("bugs.json");
        fs::write(&obs, r#"[{"bug_id": 7, "last_change_ts": 5000}]"#).unwrap();

        let config = SyncConfig::default();
        let helper = BugzillaSyncStateHelper::new("3", None, &config);
        let output = replay(helper, read_json(&obs).unwrap()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["raw_state"]["last_change_datestamp"], 5000);
        assert_eq!(value["tasks"][0]["type"], "sync_bug");
        assert_eq!(value["tasks"][0]["conv_id"], "3.7");
    }
}
