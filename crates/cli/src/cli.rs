use std::path::PathBuf;

use trove_store::{Compression, Severity};

#[derive(clap::Parser, Debug)]
#[clap(name = "trove", version, about = "Browse, install and publish collections")]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[clap(short, long, global = true)]
    pub verbose: bool,
    /// Path to an alternate config.json
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Search the configured sources for collections
    Browse {
        /// Free-text query matched against name, description and keywords
        query: Option<String>,
        #[clap(long)]
        category: Option<String>,
        #[clap(long)]
        author: Option<String>,
        /// Required tags, comma-separated
        #[clap(long, value_delimiter = ',')]
        tags: Vec<String>,
        /// Only query the named source (local, github, http)
        #[clap(long)]
        source: Option<String>,
        #[clap(long)]
        limit: Option<usize>,
        #[clap(long, default_value_t = 0)]
        offset: usize,
    },
    /// Rank collections from every source by relevance to a query
    Search {
        /// Words matched against name, description and tags
        query: String,
        #[clap(long)]
        category: Option<String>,
        #[clap(long)]
        author: Option<String>,
        /// Required tags, comma-separated
        #[clap(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[clap(long)]
        limit: Option<usize>,
        #[clap(long, default_value_t = 0)]
        offset: usize,
    },
    /// Show the manifest of a collection without installing it
    Info { uri: String },
    /// Install a collection and its dependencies
    Install {
        /// Collection URI, e.g. github://owner/repo or file:///path
        uri: String,
        /// Reinstall even when the collection is already installed
        #[clap(long)]
        force: bool,
        #[clap(long)]
        skip_dependencies: bool,
        #[clap(long)]
        skip_validation: bool,
        #[clap(long)]
        skip_hooks: bool,
    },
    /// Remove an installed collection
    Uninstall {
        /// Installed collection ID (author/name)
        id: String,
        /// Remove even when other collections depend on it
        #[clap(long)]
        force: bool,
        #[clap(long)]
        skip_hooks: bool,
    },
    /// List installed collections
    List {
        /// Include location, checksum and dependencies
        #[clap(long)]
        detailed: bool,
    },
    /// Update one installed collection, or all of them
    Update {
        id: Option<String>,
        #[clap(long, conflicts_with = "id")]
        all: bool,
        #[clap(long)]
        skip_dependencies: bool,
        #[clap(long)]
        skip_validation: bool,
        #[clap(long)]
        skip_hooks: bool,
    },
    /// Show installed collections with newer versions available
    Outdated,
    /// Pack an installed collection into a tar.gz archive
    Export {
        id: String,
        /// Output archive path or directory
        #[clap(short, long, default_value = ".")]
        output: PathBuf,
        #[clap(long)]
        include_backups: bool,
        /// none, fast or best
        #[clap(long, default_value = "best")]
        compression: Compression,
        /// Glob of files to leave out, repeatable
        #[clap(long)]
        exclude: Vec<String>,
    },
    /// Recompute an installed collection's checksum against its record
    Verify { id: String },
    /// Run the manifest validation rules over a collection directory
    Validate {
        #[clap(default_value = ".")]
        path: PathBuf,
    },
    /// Scan a directory for dangerous content
    Scan {
        #[clap(default_value = ".")]
        path: PathBuf,
        /// Lowest severity that counts as blocking
        #[clap(long)]
        threshold: Option<Severity>,
    },
    /// Contribute a collection to the shared registry through a pull request
    Publish {
        /// Collection directory or installed collection ID
        #[clap(default_value = ".")]
        target: String,
        /// Registry repository as owner/name
        #[clap(long)]
        repo: Option<String>,
        #[clap(long)]
        base_branch: Option<String>,
        #[clap(long)]
        branch: Option<String>,
        #[clap(short, long)]
        message: Option<String>,
        /// Create a release on the fork with the tarball attached
        #[clap(long)]
        release: bool,
        #[clap(long, requires = "release")]
        tag: Option<String>,
        #[clap(long, requires = "release")]
        notes: Option<String>,
        /// Force-push the branch
        #[clap(long)]
        force: bool,
        #[clap(long)]
        skip_security_scan: bool,
        /// Package only, without contacting GitHub
        #[clap(long)]
        dry_run: bool,
        /// Where the tarball and checksums are written
        #[clap(long)]
        output_dir: Option<PathBuf>,
    },
    /// Show or change configuration
    Config {
        #[clap(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print every setting
    Show,
    /// Print one setting
    Get { key: String },
    /// Change one setting
    Set { key: String, value: String },
    /// Restore the defaults
    Reset {
        /// Skip the confirmation prompt
        #[clap(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_install_flags() {
        let cli = Cli::parse_from([
            "trove",
            "install",
            "github://alice/devops",
            "--force",
            "--skip-hooks",
        ]);
        match cli.command {
            Commands::Install {
                uri,
                force,
                skip_dependencies,
                skip_hooks,
                ..
            } => {
                assert_eq!(uri, "github://alice/devops");
                assert!(force);
                assert!(skip_hooks);
                assert!(!skip_dependencies);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_browse_tags_and_global_verbose() {
        let cli = Cli::parse_from(["trove", "browse", "deploy", "--tags", "ci,k8s", "--limit", "5", "-v"]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Browse {
                query, tags, limit, offset, ..
            } => {
                assert_eq!(query.as_deref(), Some("deploy"));
                assert_eq!(tags, vec!["ci", "k8s"]);
                assert_eq!(limit, Some(5));
                assert_eq!(offset, 0);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_search_query_and_filters() {
        let cli = Cli::parse_from(["trove", "search", "incident kubernetes", "--tags", "sre", "--author", "alice"]);
        match cli.command {
            Commands::Search {
                query, tags, author, ..
            } => {
                assert_eq!(query, "incident kubernetes");
                assert_eq!(tags, vec!["sre"]);
                assert_eq!(author.as_deref(), Some("alice"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["trove", "search"]).is_err());
    }

    #[test]
    fn test_parse_export_compression_and_excludes() {
        let cli = Cli::parse_from([
            "trove",
            "export",
            "alice/devops",
            "--compression",
            "fast",
            "--exclude",
            "*.log",
            "--exclude",
            "tmp/**",
        ]);
        match cli.command {
            Commands::Export {
                compression,
                exclude,
                output,
                ..
            } => {
                assert_eq!(compression, Compression::Fast);
                assert_eq!(exclude.len(), 2);
                assert_eq!(output, PathBuf::from("."));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_scan_threshold() {
        let cli = Cli::parse_from(["trove", "scan", "./skills", "--threshold", "high"]);
        match cli.command {
            Commands::Scan { path, threshold } => {
                assert_eq!(path, PathBuf::from("./skills"));
                assert_eq!(threshold, Some(Severity::High));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["trove", "scan", "--threshold", "extreme"]).is_err());
    }

    #[test]
    fn test_publish_tag_requires_release() {
        assert!(Cli::try_parse_from(["trove", "publish", "--tag", "v1"]).is_err());
        let cli = Cli::parse_from(["trove", "publish", "./devops", "--release", "--tag", "v1", "--dry-run"]);
        match cli.command {
            Commands::Publish {
                target,
                release,
                tag,
                dry_run,
                ..
            } => {
                assert_eq!(target, "./devops");
                assert!(release);
                assert_eq!(tag.as_deref(), Some("v1"));
                assert!(dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_update_id_conflicts_with_all() {
        assert!(Cli::try_parse_from(["trove", "update", "alice/devops", "--all"]).is_err());
        let cli = Cli::parse_from(["trove", "update", "--all"]);
        assert!(matches!(cli.command, Commands::Update { id: None, all: true, .. }));
    }

    #[test]
    fn test_parse_config_set() {
        let cli = Cli::parse_from(["trove", "--config", "/tmp/c.json", "config", "set", "github.enabled", "false"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
        match cli.command {
            Commands::Config {
                command: ConfigCommands::Set { key, value },
            } => {
                assert_eq!(key, "github.enabled");
                assert_eq!(value, "false");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
