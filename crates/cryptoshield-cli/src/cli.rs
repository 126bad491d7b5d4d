use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "cryptoshield",
    about = "Credential store that only unlocks while its USB drive is plugged in",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true, env = "CRYPTOSHIELD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Optional subcommand; defaults to opening the interactive view.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open a session and browse credentials (Esc to exit).
    Open,
    /// Show detected removable drives and which detectors answered.
    Drives,
    /// Authorize a drive by writing the token file.
    Setup {
        /// Drive root; defaults to the first detected drive.
        path: Option<PathBuf>,
    },
    /// Print every stored credential.
    List {
        #[arg(long)]
        show_secrets: bool,
    },
    /// Find credentials by website or username (case-insensitive).
    Search {
        query: String,
        #[arg(long)]
        show_secrets: bool,
    },
    /// Add or replace a credential.
    Add {
        website: String,
        username: String,
        /// Read from stdin when omitted.
        secret: Option<String>,
    },
    /// Remove a credential by website and username.
    Delete { website: String, username: String },
    /// Re-encrypt entries written in the old base64 format.
    MigrateLegacy,
    /// Keep a session open with monitor and heartbeat until the drive is
    /// removed or Ctrl+C.
    Watch,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_open_when_missing_subcommand() {
        let cli = Cli::try_parse_from(["cryptoshield"]).expect("parse should succeed");
        assert_eq!(cli.command, None);
    }

    #[test]
    fn parses_setup_with_and_without_path() {
        let cli = Cli::try_parse_from(["cryptoshield", "setup"]).expect("parse should succeed");
        assert_eq!(cli.command, Some(Command::Setup { path: None }));

        let cli = Cli::try_parse_from(["cryptoshield", "setup", "/media/usb"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Some(Command::Setup {
                path: Some(PathBuf::from("/media/usb"))
            })
        );
    }

    #[test]
    fn parses_add_with_optional_secret() {
        let cli = Cli::try_parse_from(["cryptoshield", "add", "github.com", "alice"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Some(Command::Add {
                website: "github.com".into(),
                username: "alice".into(),
                secret: None,
            })
        );
    }

    #[test]
    fn parses_search_flag() {
        let cli = Cli::try_parse_from(["cryptoshield", "search", "git", "--show-secrets"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Some(Command::Search {
                query: "git".into(),
                show_secrets: true,
            })
        );
    }

    #[test]
    fn parses_migrate_and_config_init() {
        let cli = Cli::try_parse_from(["cryptoshield", "migrate-legacy"]).expect("parse");
        assert_eq!(cli.command, Some(Command::MigrateLegacy));
        let cli = Cli::try_parse_from(["cryptoshield", "config", "init"]).expect("parse");
        assert_eq!(cli.command, Some(Command::Config(ConfigCommand::Init)));
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["cryptoshield", "drives", "--config", "/tmp/c.toml"])
            .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert_eq!(cli.command, Some(Command::Drives));
    }

    #[test]
    fn delete_requires_both_keys() {
        assert!(Cli::try_parse_from(["cryptoshield", "delete", "github.com"]).is_err());
    }
}
