//! CLI argument definitions using clap derive

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// depcache - lockfile-keyed dependency cache
///
/// Restores installed dependency trees from an object store keyed by the
/// lockfile hash, and installs plus uploads them on a miss.
#[derive(Parser, Debug)]
#[command(name = "depcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "DEPCACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local .depcache.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Restore or install dependencies for every detected ecosystem
    Install(InstallArgs),

    /// Inspect and manage cached archives
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the install command
#[derive(Parser, Debug)]
pub struct InstallArgs {
    /// Project directory (defaults to current directory)
    #[arg(short, long)]
    pub project: Option<PathBuf>,

    /// Only handle these ecosystems (repeatable)
    #[arg(long, value_name = "NAME")]
    pub only: Vec<String>,

    /// Skip the object store entirely for this run
    #[arg(long)]
    pub no_cache: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration (secrets masked)
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for status
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Lockfile hash source for `cache key`
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct HashSource {
    /// Lockfile hash (16 hex characters)
    #[arg(long)]
    pub hash: Option<String>,

    /// Lockfile to hash
    #[arg(long)]
    pub lockfile: Option<PathBuf>,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Print the cache hash of a lockfile
    Hash {
        /// Lockfile path
        lockfile: PathBuf,

        /// Print the full 64-character digest
        #[arg(long)]
        full: bool,
    },

    /// Print the object key for a cache type and lockfile hash
    Key {
        /// Cache type (bundle, npm, pip, ...)
        #[arg(long = "type", value_name = "TYPE")]
        cache_type: String,

        #[command(flatten)]
        source: HashSource,
    },

    /// Show cache state for the current project
    Status {
        /// Project directory (defaults to current directory)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Restore a dependency directory from the cache
    Restore {
        /// Cache type (bundle, npm, pip, ...)
        #[arg(long = "type", value_name = "TYPE")]
        cache_type: String,

        /// Lockfile the archive is keyed on
        #[arg(long)]
        lockfile: PathBuf,

        /// Directory to restore into
        #[arg(long)]
        target: PathBuf,
    },

    /// Archive and upload a dependency directory
    Save {
        /// Cache type (bundle, npm, pip, ...)
        #[arg(long = "type", value_name = "TYPE")]
        cache_type: String,

        /// Lockfile the archive is keyed on
        #[arg(long)]
        lockfile: PathBuf,

        /// Directory to archive
        #[arg(long)]
        source: PathBuf,
    },

    /// Delete archives older than N days
    Prune {
        /// Cache type (bundle, npm, pip, ...)
        #[arg(long = "type", value_name = "TYPE")]
        cache_type: String,

        /// Keep archives modified within this many days (default: from config)
        #[arg(long)]
        days: Option<u32>,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_install() {
        let cli = Cli::parse_from(["depcache", "install", "--only", "npm", "--only", "bundle"]);
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.only, vec!["npm", "bundle"]);
                assert!(!args.no_cache);
                assert!(args.project.is_none());
            }
            _ => panic!("expected Install command"),
        }
    }

    #[test]
    fn cli_parses_install_no_cache() {
        let cli = Cli::parse_from(["depcache", "install", "--no-cache", "-p", "/work/app"]);
        match cli.command {
            Commands::Install(args) => {
                assert!(args.no_cache);
                assert_eq!(args.project, Some(PathBuf::from("/work/app")));
            }
            _ => panic!("expected Install command"),
        }
    }

    #[test]
    fn cli_parses_cache_key_with_hash() {
        let cli = Cli::parse_from([
            "depcache",
            "cache",
            "key",
            "--type",
            "bundle",
            "--hash",
            "0123456789abcdef",
        ]);
        match cli.command {
            Commands::Cache(CacheArgs {
                action: CacheAction::Key { cache_type, source },
            }) => {
                assert_eq!(cache_type, "bundle");
                assert_eq!(source.hash.as_deref(), Some("0123456789abcdef"));
                assert!(source.lockfile.is_none());
            }
            _ => panic!("expected cache key command"),
        }
    }

    #[test]
    fn cli_cache_key_requires_one_source() {
        assert!(Cli::try_parse_from(["depcache", "cache", "key", "--type", "npm"]).is_err());
        assert!(Cli::try_parse_from([
            "depcache",
            "cache",
            "key",
            "--type",
            "npm",
            "--hash",
            "0123456789abcdef",
            "--lockfile",
            "package-lock.json",
        ])
        .is_err());
    }

    #[test]
    fn cli_parses_cache_prune() {
        let cli = Cli::parse_from(["depcache", "cache", "prune", "--type", "npm", "--days", "7", "-y"]);
        match cli.command {
            Commands::Cache(CacheArgs {
                action:
                    CacheAction::Prune {
                        cache_type,
                        days,
                        yes,
                    },
            }) => {
                assert_eq!(cache_type, "npm");
                assert_eq!(days, Some(7));
                assert!(yes);
            }
            _ => panic!("expected cache prune command"),
        }
    }

    #[test]
    fn cli_parses_config_init_force() {
        let cli = Cli::parse_from(["depcache", "config", "init", "--force"]);
        match cli.command {
            Commands::Config(ConfigArgs {
                action: Some(ConfigAction::Init { force }),
            }) => assert!(force),
            _ => panic!("expected config init command"),
        }
    }

    #[test]
    fn cli_no_local_flag() {
        let cli = Cli::parse_from(["depcache", "--no-local", "config", "path"]);
        assert!(cli.no_local);
    }

    #[test]
    fn cli_verbose_levels() {
        let cli = Cli::parse_from(["depcache", "install"]);
        assert_eq!(cli.verbose, 0);

        let cli = Cli::parse_from(["depcache", "-v", "install"]);
        assert_eq!(cli.verbose, 1);

        let cli = Cli::parse_from(["depcache", "-vv", "install"]);
        assert_eq!(cli.verbose, 2);
    }
}
