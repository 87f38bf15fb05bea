//! CLI argument parsing using clap v4

use clap::{Parser, Subcommand};

/// fieldmesh - peer coordination and data distribution for field meshes
///
/// Runs the coordination server that registers peers, brokers direct
/// connections, relays streams and hands out tasks, or a reference peer
/// that talks to it.
#[derive(Parser, Debug)]
#[command(name = "fieldmesh")]
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

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the coordination server
    Serve {
        /// Path to configuration file
        #[arg(short, long, env = "FIELDMESH_CONFIG")]
        config: Option<String>,

        /// Override the listen address (e.g. 0.0.0.0:8080)
        #[arg(short, long)]
        listen: Option<String>,

        /// Override the task pool file
        #[arg(long)]
        tasks: Option<String>,
    },

    /// Run a reference field peer
    Peer {
        /// Path to configuration file
        #[arg(short, long, env = "FIELDMESH_CONFIG")]
        config: Option<String>,

        /// Override the server URL (ws:// or wss://)
        #[arg(short, long)]
        server: Option<String>,

        /// Peer name (defaults to the hostname)
        #[arg(short, long)]
        name: Option<String>,

        /// Request a file stream from the server once registered
        #[arg(long, value_name = "PATH")]
        stream: Option<String>,

        /// Ask for a task once registered, and answer it
        #[arg(long)]
        task: bool,

        /// Start smart data sharing from this server directory
        #[arg(long, value_name = "SOURCE")]
        smart_data: Option<String>,

        /// Resolution for smart data sharing
        #[arg(long, default_value = "default", requires = "smart_data")]
        resolution: String,

        /// Seconds between smart data items
        #[arg(long, default_value_t = 5, requires = "smart_data")]
        period: u64,

        /// Send a local file to this peer over a direct channel
        #[arg(long, value_name = "PEER", requires = "file")]
        send_to: Option<String>,

        /// File to send with --send-to
        #[arg(long, value_name = "PATH", requires = "send_to")]
        file: Option<String>,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
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
        let cli = Cli::parse_from(["fieldmesh", "serve"]);
        match cli.command {
            Commands::Serve { config, listen, tasks } => {
                assert!(config.is_none());
                assert!(listen.is_none());
                assert!(tasks.is_none());
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_serve_with_overrides() {
        let cli = Cli::parse_from([
            "fieldmesh",
            "serve",
            "--listen",
            "127.0.0.1:9000",
            "--tasks",
            "tasks.json",
        ]);
        match cli.command {
            Commands::Serve { listen, tasks, .. } => {
                assert_eq!(listen.as_deref(), Some("127.0.0.1:9000"));
                assert_eq!(tasks.as_deref(), Some("tasks.json"));
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_peer_command() {
        let cli = Cli::parse_from([
            "fieldmesh",
            "peer",
            "--server",
            "ws://localhost:8080",
            "--name",
            "field-01",
            "--stream",
            "video/clip.bin",
        ]);
        match cli.command {
            Commands::Peer { server, name, stream, task, .. } => {
                assert_eq!(server.as_deref(), Some("ws://localhost:8080"));
                assert_eq!(name.as_deref(), Some("field-01"));
                assert_eq!(stream.as_deref(), Some("video/clip.bin"));
                assert!(!task);
            }
            _ => panic!("Expected Peer command"),
        }
    }

    #[test]
    fn test_peer_send_requires_file() {
        assert!(Cli::try_parse_from(["fieldmesh", "peer", "--send-to", "b"]).is_err());

        let cli = Cli::parse_from(["fieldmesh", "peer", "--send-to", "b", "--file", "scan.tif"]);
        match cli.command {
            Commands::Peer { send_to, file, .. } => {
                assert_eq!(send_to.as_deref(), Some("b"));
                assert_eq!(file.as_deref(), Some("scan.tif"));
            }
            _ => panic!("Expected Peer command"),
        }
    }

    #[test]
    fn test_peer_smart_data() {
        let cli = Cli::parse_from(["fieldmesh", "peer", "--smart-data", "imagery", "--resolution", "r2"]);
        match cli.command {
            Commands::Peer { smart_data, resolution, period, .. } => {
                assert_eq!(smart_data.as_deref(), Some("imagery"));
                assert_eq!(resolution, "r2");
                assert_eq!(period, 5);
            }
            _ => panic!("Expected Peer command"),
        }
    }

    #[test]
    fn test_verbose_flags() {
        let cli = Cli::parse_from(["fieldmesh", "-vv", "version"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_quiet_flag() {
        let cli = Cli::parse_from(["fieldmesh", "--quiet", "version"]);
        assert!(cli.quiet);
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::parse_from(["fieldmesh", "config", "init", "--force"]);
        match cli.command {
            Commands::Config { subcommand: ConfigSubcommand::Init { path, force } } => {
                assert!(path.is_none());
                assert!(force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }

    #[test]
    fn test_config_validate_path() {
        let cli = Cli::parse_from(["fieldmesh", "config", "validate", "-c", "/etc/f.toml"]);
        match cli.command {
            Commands::Config { subcommand: ConfigSubcommand::Validate { config } } => {
                assert_eq!(config.as_deref(), Some("/etc/f.toml"));
            }
            _ => panic!("Expected Config Validate command"),
        }
    }
}
