use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ilib_core::credentials::DEFAULT_DRIVER;

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "ilib",
    about = "Browse and save IBM i libraries from your workstation",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Optional subcommand; defaults to `status` when absent.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show whether a host is configured and what is cached locally.
    Status,
    /// Print version and exit.
    Version,
    /// Check local storage and, when configured, host connectivity.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage the stored connection settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Run the background sync loop (Ctrl-C to stop).
    Sync {
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
    },
    /// List libraries from the local cache.
    Libraries {
        /// Only names containing this text (case-insensitive).
        #[arg(long)]
        filter: Option<String>,
    },
    /// List user profiles from the local cache.
    Users {
        /// Only names containing this text (case-insensitive).
        #[arg(long)]
        filter: Option<String>,
    },
    /// Show one library, fetched from the host.
    Library { name: String },
    /// Show one user profile, fetched from the host.
    User { name: String },
    /// Save a library into a save file and download it.
    Savefile(SaveFileArgs),
    /// Send a break message to a user profile.
    Message {
        /// Target user profile.
        user: String,
        /// Message text.
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Show or set the preferred theme mode.
    Theme {
        mode: Option<ThemeMode>,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SettingsCommand {
    /// Verify and store connection settings (encrypted at rest).
    Set {
        #[arg(long)]
        host: String,
        #[arg(long)]
        port: u16,
        #[arg(long = "user")]
        username: String,
        /// Read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,
        #[arg(long, default_value = DEFAULT_DRIVER)]
        driver: String,
    },
    /// Print the stored settings (password redacted).
    Show,
    /// Remove the stored settings and the key that sealed them.
    Clear,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct SaveFileArgs {
    /// Library to save.
    pub library: String,
    /// Save file name; defaults to the library name.
    #[arg(long = "name")]
    pub save_file: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    /// Target release, e.g. `*CURRENT` or `V7R4M0`.
    #[arg(long = "release")]
    pub target_release: Option<String>,
    /// Public authority of the created save file.
    #[arg(long)]
    pub authority: Option<String>,
    /// Download directory; remembered for next time.
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeMode {
    System,
    Light,
    Dark,
}

impl ThemeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ThemeMode::System => "system",
            ThemeMode::Light => "light",
            ThemeMode::Dark => "dark",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_status_when_missing_subcommand() {
        let cli = Cli::try_parse_from(["ilib"]).expect("parse should succeed");
        assert_eq!(cli.command, None);
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli = Cli::try_parse_from(["ilib", "config", "init"]).expect("parse should succeed");
        assert_eq!(cli.command, Some(Command::Config(ConfigCommand::Init)));
    }

    #[test]
    fn parses_settings_set_with_default_driver() {
        let cli = Cli::try_parse_from([
            "ilib", "settings", "set", "--host", "pub400.com", "--port", "8471", "--user", "ME",
        ])
        .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Some(Command::Settings(SettingsCommand::Set {
                host: "pub400.com".into(),
                port: 8471,
                username: "ME".into(),
                password: None,
                driver: DEFAULT_DRIVER.into(),
            }))
        );
    }

    #[test]
    fn rejects_out_of_range_port() {
        let err = Cli::try_parse_from([
            "ilib", "settings", "set", "--host", "h", "--port", "70000", "--user", "U",
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn parses_sync_once() {
        let cli = Cli::try_parse_from(["ilib", "sync", "--once"]).expect("parse should succeed");
        assert_eq!(cli.command, Some(Command::Sync { once: true }));
    }

    #[test]
    fn parses_savefile_options() {
        let cli = Cli::try_parse_from([
            "ilib", "savefile", "MYLIB", "--name", "MYSAVF", "--release", "V7R4M0", "--dir", "/tmp",
        ])
        .expect("parse should succeed");
        let Some(Command::Savefile(args)) = cli.command else {
            panic!("expected savefile");
        };
        assert_eq!(args.library, "MYLIB");
        assert_eq!(args.save_file.as_deref(), Some("MYSAVF"));
        assert_eq!(args.target_release.as_deref(), Some("V7R4M0"));
        assert_eq!(args.dir, Some(PathBuf::from("/tmp")));
        assert_eq!(args.authority, None);
    }

    #[test]
    fn message_joins_words_and_requires_text() {
        let cli = Cli::try_parse_from(["ilib", "message", "BOB", "lunch", "time"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Some(Command::Message {
                user: "BOB".into(),
                text: vec!["lunch".into(), "time".into()],
            })
        );
        assert!(Cli::try_parse_from(["ilib", "message", "BOB"]).is_err());
    }

    #[test]
    fn listings_take_an_optional_filter() {
        let cli = Cli::try_parse_from(["ilib", "libraries"]).expect("parse should succeed");
        assert_eq!(cli.command, Some(Command::Libraries { filter: None }));

        let cli = Cli::try_parse_from(["ilib", "users", "--filter", "sec"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Some(Command::Users {
                filter: Some("sec".into())
            })
        );
    }

    #[test]
    fn detail_commands_require_a_name() {
        let cli = Cli::try_parse_from(["ilib", "library", "QGPL"]).expect("parse should succeed");
        assert_eq!(cli.command, Some(Command::Library { name: "QGPL".into() }));
        let cli = Cli::try_parse_from(["ilib", "user", "BOB"]).expect("parse should succeed");
        assert_eq!(cli.command, Some(Command::User { name: "BOB".into() }));
        assert!(Cli::try_parse_from(["ilib", "user"]).is_err());
    }

    #[test]
    fn theme_accepts_known_modes_only() {
        let cli = Cli::try_parse_from(["ilib", "theme", "dark"]).expect("parse should succeed");
        assert_eq!(
            cli.command,
            Some(Command::Theme {
                mode: Some(ThemeMode::Dark)
            })
        );
        assert!(Cli::try_parse_from(["ilib", "theme", "neon"]).is_err());
    }
}
