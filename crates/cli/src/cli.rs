use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "teamprov")]
#[command(author, version, about = "Resumable bulk provisioning of team member accounts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the TOML configuration file
    #[arg(short, long, global = true, env = "TEAMPROV_CONFIG", default_value = "config.toml")]
    pub config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Export file format.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision accounts for every configured team
    Run {
        /// Only process this team
        #[arg(long)]
        team: Option<String>,

        /// Fully provisioned accounts wanted per team
        #[arg(long)]
        accounts: Option<usize>,

        /// Write Prometheus metrics to this file after the run
        #[arg(long)]
        metrics_out: Option<PathBuf>,

        /// Also authorize and register each team's owner account
        #[arg(long)]
        owners: bool,
    },

    /// Show per-team progress from the tracker
    Status {
        /// Only show this team
        #[arg(long)]
        team: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Export tracked accounts
    Export {
        #[arg(long, value_enum, default_value = "json")]
        format: ExportFormat,

        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Only export this team
        #[arg(long)]
        team: Option<String>,
    },

    /// Wait for a verification code and print it (for driver programs)
    Code {
        /// Mailbox to poll
        #[arg(long, env = "TEAMPROV_EMAIL")]
        email: String,

        /// Seconds to wait before giving up
        #[arg(long, default_value_t = 120)]
        timeout: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "teamprov",
            "--config",
            "prov.toml",
            "run",
            "--team",
            "alpha",
            "--accounts",
            "2",
        ]);
        assert_eq!(cli.config, PathBuf::from("prov.toml"));
        match cli.command {
            Commands::Run {
                team,
                accounts,
                metrics_out,
                owners,
            } => {
                assert_eq!(team.as_deref(), Some("alpha"));
                assert_eq!(accounts, Some(2));
                assert!(metrics_out.is_none());
                assert!(!owners);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_run_with_owners() {
        let cli = Cli::parse_from(["teamprov", "run", "--owners"]);
        match cli.command {
            Commands::Run { owners, team, .. } => {
                assert!(owners);
                assert!(team.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_export_csv() {
        let cli = Cli::parse_from(["teamprov", "export", "--format", "csv", "--out", "a.csv"]);
        match cli.command {
            Commands::Export { format, out, team } => {
                assert_eq!(format, ExportFormat::Csv);
                assert_eq!(out, Some(PathBuf::from("a.csv")));
                assert!(team.is_none());
            }
            _ => panic!("expected export"),
        }
    }

    #[test]
    fn test_parse_code_defaults() {
        let cli = Cli::parse_from(["teamprov", "code", "--email", "a@x.test"]);
        match cli.command {
            Commands::Code { email, timeout } => {
                assert_eq!(email, "a@x.test");
                assert_eq!(timeout, 120);
            }
            _ => panic!("expected code"),
        }
    }
}
