//! CLI argument parsing using clap v4

use clap::{Args, Parser, Subcommand};

/// Tellar - story characters that meet on the local network
///
/// Runs a character node: it answers conversations on a WebSocket channel,
/// advertises itself to other nodes over UDP broadcast and can start a
/// conversation with the first character it discovers.
#[derive(Parser, Debug)]
#[command(name = "tellar")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by the running modes
#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// Path to configuration file
    #[arg(short, long, env = "TELLAR_CONFIG")]
    pub config: Option<String>,

    /// Character name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Language the character speaks
    #[arg(short, long)]
    pub language: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the character: HTTP/WebSocket gateway plus LAN advertisement
    Serve {
        #[command(flatten)]
        node: NodeArgs,

        /// Also start a conversation with the first discovered character
        #[arg(long)]
        converse: bool,
    },

    /// Look for another character on the network and talk to it
    Auto {
        #[command(flatten)]
        node: NodeArgs,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_command() {
        let cli = Cli::parse_from(["tellar", "serve", "--name", "Sherlock Holmes"]);
        match cli.command {
            Commands::Serve { node, converse } => {
                assert_eq!(node.name.as_deref(), Some("Sherlock Holmes"));
                assert!(node.language.is_none());
                assert!(!converse);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_serve_converse() {
        let cli = Cli::parse_from(["tellar", "serve", "-n", "Watson", "-l", "french", "--converse"]);
        match cli.command {
            Commands::Serve { node, converse } => {
                assert_eq!(node.language.as_deref(), Some("french"));
                assert!(converse);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_auto_with_config() {
        let cli = Cli::parse_from(["tellar", "auto", "--config", "/tmp/tellar.toml"]);
        match cli.command {
            Commands::Auto { node } => {
                assert_eq!(node.config.as_deref(), Some("/tmp/tellar.toml"));
            }
            _ => panic!("Expected Auto command"),
        }
    }

    #[test]
    fn test_verbose_flags() {
        let cli = Cli::parse_from(["tellar", "-vv", "auto"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::parse_from(["tellar", "config", "init", "--path", "./tellar.toml", "--force"]);
        match cli.command {
            Commands::Config {
                subcommand: ConfigSubcommand::Init { path, force },
            } => {
                assert_eq!(path.as_deref(), Some("./tellar.toml"));
                assert!(force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }

    #[test]
    fn test_config_validate() {
        let cli = Cli::parse_from(["tellar", "config", "validate"]);
        assert!(matches!(
            cli.command,
            Commands::Config {
                subcommand: ConfigSubcommand::Validate { config: None }
            }
        ));
    }
}
