//! Command-line interface definitions for InsightBee News.
//!
//! Secrets and the database location can be provided via command-line flags
//! or environment variables; everything else lives in the settings file.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for one ingestion run.
///
/// # Examples
///
/// ```sh
/// # Create the schema
/// insightbee_news --init-db
///
/// # Full run with credentials from the environment
/// NAVER_CLIENT_ID=... NAVER_CLIENT_SECRET=... insightbee_news -c ./insightbee.yaml
///
/// # Cluster the stored backlog only, keeping a JSON report
/// insightbee_news --dedup-only --report-dir ./reports
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML settings file
    #[arg(short, long, default_value = "insightbee.yaml")]
    pub config: PathBuf,

    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:insightbee.db")]
    pub database_url: String,

    /// Naver search API client id
    #[arg(long, env = "NAVER_CLIENT_ID", hide_env_values = true)]
    pub naver_client_id: Option<String>,

    /// Naver search API client secret
    #[arg(long, env = "NAVER_CLIENT_SECRET", hide_env_values = true)]
    pub naver_client_secret: Option<String>,

    /// Directory for the JSON run report (not written if omitted)
    #[arg(short, long)]
    pub report_dir: Option<PathBuf>,

    /// Create tables and indexes, then exit
    #[arg(long, conflicts_with = "dedup_only")]
    pub init_db: bool,

    /// Skip discovery and extraction; only cluster stored articles
    #[arg(long)]
    pub dedup_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["insightbee_news"]);
        assert_eq!(cli.config, PathBuf::from("insightbee.yaml"));
        assert!(!cli.init_db);
        assert!(!cli.dedup_only);
        assert!(cli.report_dir.is_none());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "insightbee_news",
            "-c",
            "/etc/insightbee.yaml",
            "--database-url",
            "sqlite::memory:",
            "--naver-client-id",
            "id",
            "--naver-client-secret",
            "secret",
            "-r",
            "/tmp/reports",
            "--dedup-only",
        ]);

        assert_eq!(cli.config, PathBuf::from("/etc/insightbee.yaml"));
        assert_eq!(cli.database_url, "sqlite::memory:");
        assert_eq!(cli.naver_client_id.as_deref(), Some("id"));
        assert_eq!(cli.naver_client_secret.as_deref(), Some("secret"));
        assert_eq!(cli.report_dir, Some(PathBuf::from("/tmp/reports")));
        assert!(cli.dedup_only);
    }

    #[test]
    fn test_init_db_conflicts_with_dedup_only() {
        assert!(Cli::try_parse_from(["insightbee_news", "--init-db", "--dedup-only"]).is_err());
    }
}
