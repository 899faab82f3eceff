use clap::{Parser, Subcommand};
use std::path::PathBuf;

use skillsync::client::Backend;

#[derive(Parser, Debug)]
#[command(name = "skillsync", version, about = "Scrape agent skills from source repositories into a local index")]
pub struct Cli {
    /// Configuration file (defaults to <config dir>/skillsync/config.toml)
    #[arg(long, global = true, env = "SKILLSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scrape every configured source into the database
    Sync {
        /// Re-scan sources whose commit did not change
        #[arg(long)]
        force: bool,

        /// Sources scraped in parallel
        #[arg(long)]
        concurrency: Option<usize>,

        #[arg(long, value_enum)]
        backend: Option<Backend>,
    },

    /// Remove local clones not updated recently
    Cleanup {
        #[arg(long, default_value_t = 168)]
        max_age_hours: u64,
    },

    /// Remove the local clone of one repository
    Remove {
        /// Repository as owner/name
        repo: String,
    },

    /// Show database statistics
    Stats,

    /// Search for skill repositories
    Search {
        query: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, value_enum)]
        backend: Option<Backend>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_flags() {
        let cli = Cli::parse_from(["skillsync", "sync", "--force", "--concurrency", "3", "--backend", "api"]);
        match cli.command {
            Command::Sync {
                force,
                concurrency,
                backend,
            } => {
                assert!(force);
                assert_eq!(concurrency, Some(3));
                assert_eq!(backend, Some(Backend::Api));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cleanup_default_age() {
        let cli = Cli::parse_from(["skillsync", "-v", "cleanup"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Cleanup { max_age_hours: 168 }));
    }
}
