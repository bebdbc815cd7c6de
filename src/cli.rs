//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use linkharvest::Config;
use linkharvest::config::{DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_RETRIES};

/// Resolve article listings into deduplicated download-link records.
///
/// Linkharvest drives a headless page-automation session through each
/// article's download flow, gathers the resulting addresses (decoding QR
/// images where needed), and appends them to per-domain JSON stores with a
/// flat plaintext export.
#[derive(Parser, Debug)]
#[command(name = "linkharvest")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Run the automation environment with a visible window
    #[arg(long)]
    pub headed: bool,

    /// Maximum concurrently-active resolution sessions (1-20)
    #[arg(short = 'c', long, default_value_t = DEFAULT_MAX_CONCURRENT as u8, value_parser = clap::value_parser!(u8).range(1..=20))]
    pub max_concurrent: u8,

    /// Maximum attempts for a whole-article restart on popup failure (1-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: u8,

    /// Article batch file (JSON array of {name, url})
    #[arg(long, default_value = "articles.json")]
    pub articles: PathBuf,

    /// Primary-storage partition store file
    #[arg(long, default_value = "data/primary_links.json")]
    pub primary_store: PathBuf,

    /// Other-domain partition store file
    #[arg(long, default_value = "data/other_links.json")]
    pub other_store: PathBuf,

    /// Flat export of primary-partition download addresses
    #[arg(long, default_value = "data/primary_urls.txt")]
    pub export_urls: PathBuf,

    /// Flat export of deduplicated extraction passwords
    #[arg(long, default_value = "data/extract_pwds.txt")]
    pub export_pwds: PathBuf,

    /// Authenticated session-state blob produced by the login bootstrap
    #[arg(long, default_value = "data/storage_state.json")]
    pub storage_state: PathBuf,

    /// Domain marker for the primary-storage partition
    #[arg(long, default_value = linkharvest::config::DEFAULT_PRIMARY_DOMAIN)]
    pub primary_domain: String,
}

impl Args {
    /// Builds the run configuration from the parsed arguments.
    #[must_use]
    pub fn into_config(self) -> Config {
        Config {
            headless: !self.headed,
            max_concurrent: usize::from(self.max_concurrent),
            max_retries: u32::from(self.max_retries),
            articles_path: self.articles,
            primary_store_path: self.primary_store,
            other_store_path: self.other_store,
            export_urls_path: self.export_urls,
            export_pwds_path: self.export_pwds,
            storage_state_path: self.storage_state,
            primary_domain: self.primary_domain,
            ..Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["linkharvest"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.headed);
        assert_eq!(args.max_concurrent, 3);
        assert_eq!(args.max_retries, 3);
        assert_eq!(args.primary_domain, "pan.baidu.com");
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["linkharvest", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_max_concurrent_bounds() {
        let args = Args::try_parse_from(["linkharvest", "-c", "20"]).unwrap();
        assert_eq!(args.max_concurrent, 20);

        let result = Args::try_parse_from(["linkharvest", "-c", "0"]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );

        let result = Args::try_parse_from(["linkharvest", "-c", "21"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_max_retries_bounds() {
        let args = Args::try_parse_from(["linkharvest", "-r", "10"]).unwrap();
        assert_eq!(args.max_retries, 10);

        let result = Args::try_parse_from(["linkharvest", "-r", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_headed_disables_headless() {
        let config = Args::try_parse_from(["linkharvest", "--headed"])
            .unwrap()
            .into_config();
        assert!(!config.headless);

        let config = Args::try_parse_from(["linkharvest"]).unwrap().into_config();
        assert!(config.headless);
    }

    #[test]
    fn test_cli_paths_flow_into_config() {
        let config = Args::try_parse_from([
            "linkharvest",
            "--articles",
            "in/batch.json",
            "--primary-store",
            "out/p.json",
            "--other-store",
            "out/o.json",
            "--storage-state",
            "auth/state.json",
            "--primary-domain",
            "drive.example.com",
        ])
        .unwrap()
        .into_config();

        assert_eq!(config.articles_path, PathBuf::from("in/batch.json"));
        assert_eq!(config.primary_store_path, PathBuf::from("out/p.json"));
        assert_eq!(config.other_store_path, PathBuf::from("out/o.json"));
        assert_eq!(config.storage_state_path, PathBuf::from("auth/state.json"));
        assert_eq!(config.primary_domain, "drive.example.com");
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let result = Args::try_parse_from(["linkharvest", "--help"]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::DisplayHelp
        );
    }
}
