#![forbid(unsafe_code)]

//! Client side of the bazaar API: HTTP client, offline reconciliation
//! counter, CSV export and the `bazaar` command line.

pub mod client;
pub mod commands;
pub mod export;
pub mod offline;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

pub const STATE_PATH_DEFAULT: &str = ".bazaar/state.json";

#[derive(Debug, Parser)]
#[command(name = "bazaar", version, about = "BazaarBrain command line client")]
pub struct Cli {
    #[arg(long, env = "BAZAAR_API_URL", default_value = client::API_URL_DEFAULT)]
    pub api_url: String,

    /// Bearer token issued by the auth provider.
    #[arg(long, env = "BAZAAR_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Where the offline reconciliation counter is kept.
    #[arg(long, env = "BAZAAR_STATE_PATH", default_value = STATE_PATH_DEFAULT)]
    pub state_path: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload a receipt or bill image.
    Upload(UploadArgs),
    /// Ask a what-if question.
    Simulate(SimulateArgs),
    /// List stored records.
    List(ListArgs),
    /// Delete one stored record.
    Delete(DeleteArgs),
    /// Server readiness, unsynced writes and per-owner counts.
    Status,
    /// Write the full history as CSV.
    Export(ExportArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecordTable {
    Transactions,
    Simulations,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    pub file: PathBuf,
    /// Label stored with the transaction, e.g. `receipt` or `bill`.
    #[arg(long)]
    pub source: Option<String>,
    /// Text read off the image, used when both sources fail.
    #[arg(long)]
    pub hint: Option<String>,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    #[arg(required = true, num_args = 1..)]
    pub query: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(value_enum)]
    pub table: RecordTable,
    #[arg(long)]
    pub limit: Option<u32>,
    #[arg(long)]
    pub offset: Option<u32>,
    /// Transaction source label, or scenario for simulations.
    #[arg(long)]
    pub source: Option<String>,
    /// Only records created at or after this unix-ms timestamp.
    #[arg(long)]
    pub after: Option<u64>,
    #[arg(long)]
    pub before: Option<u64>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    #[arg(value_enum)]
    pub table: RecordTable,
    pub id: String,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[arg(value_enum)]
    pub table: RecordTable,
    /// Output file; stdout when omitted.
    #[arg(long, short = 'o')]
    pub out: Option<PathBuf>,
}

impl Cli {
    pub fn client_config(&self) -> client::ClientConfig {
        client::ClientConfig::v1(self.api_url.clone(), self.api_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_cli_01_flags_and_subcommand_parse() {
        let cli = Cli::parse_from([
            "bazaar",
            "--api-url",
            "https://api.example.com/",
            "--api-token",
            "tok",
            "--state-path",
            "/tmp/s.json",
            "list",
            "simulations",
            "--limit",
            "5",
            "--source",
            "bulk_order",
        ]);
        let cfg = cli.client_config();
        assert_eq!(cfg.api_url, "https://api.example.com");
        assert_eq!(cfg.token.as_deref(), Some("tok"));
        assert_eq!(cli.state_path, PathBuf::from("/tmp/s.json"));
        match cli.command {
            Command::List(args) => {
                assert_eq!(args.table, RecordTable::Simulations);
                assert_eq!(args.limit, Some(5));
                assert_eq!(args.source.as_deref(), Some("bulk_order"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn at_cli_02_simulate_joins_words() {
        let cli = Cli::parse_from(["bazaar", "simulate", "what", "if", "rice", "+5%"]);
        match cli.command {
            Command::Simulate(args) => assert_eq!(args.query.join(" "), "what if rice +5%"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn at_cli_03_missing_subcommand_is_an_error() {
        assert!(Cli::try_parse_from(["bazaar"]).is_err());
    }
}
