use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use walnut_names::{NameStatus, TakenKind};

use crate::config::{Settings, StorageKind};
use crate::server::{self, Backend};

#[derive(Debug, Parser)]
#[command(name = "walnut")]
#[command(about = "walnut.world name reservation service", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./walnut.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, global = true)]
    pub bind: Option<SocketAddr>,

    /// Directory for the sled database
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Storage backend
    #[arg(long, value_enum, global = true)]
    pub storage: Option<StorageKind>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP API (default)
    Serve,

    /// Print the status of a name
    Check { name: String },

    /// Print founding and reserved names in reservation order
    List,

    /// Print how many reservations credit a name as inviter
    Invites { name: String },
}

pub async fn run(cli: Cli, settings: Settings) -> Result<()> {
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            info!("starting walnut");
            server::run(settings).await?;
        }
        Commands::Check { name } => {
            let backend = Backend::open(&settings)?;
            let outcome = server::service(&settings, &backend).check(&name).await;
            println!("{}: {}", name, describe(&outcome.status));
            if outcome.degraded {
                println!("(storage unavailable, founding names only)");
            }
        }
        Commands::List => {
            let backend = Backend::open(&settings)?;
            let listing = server::service(&settings, &backend).list().await;
            for name in &listing.names {
                println!("{}", name);
            }
            println!("total: {}", listing.count);
        }
        Commands::Invites { name } => {
            let backend = Backend::open(&settings)?;
            let summary = server::service(&settings, &backend).invite_count(&name).await;
            println!("{}: {} invite(s)", summary.name, summary.invite_count);
        }
    }
    Ok(())
}

fn describe(status: &NameStatus) -> String {
    match status {
        NameStatus::Available => "available".to_string(),
        NameStatus::Held { expires_in, .. } => format!("held, expires in {}s", expires_in),
        NameStatus::Taken(TakenKind::Claimed) => "reserved".to_string(),
        NameStatus::Taken(TakenKind::Founding) => "taken (founding)".to_string(),
        NameStatus::Taken(TakenKind::Invalid) => "taken (invalid name)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "walnut",
            "check",
            "acorn",
            "--storage",
            "memory",
            "--bind",
            "0.0.0.0:9090",
        ]);
        assert_eq!(cli.storage, Some(StorageKind::Memory));
        assert_eq!(cli.bind, Some("0.0.0.0:9090".parse().unwrap()));
        assert!(matches!(cli.command, Some(Commands::Check { ref name }) if name == "acorn"));
    }

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::parse_from(["walnut", "-c", "custom.toml"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
    }

    #[test]
    fn test_describe_statuses() {
        assert_eq!(describe(&NameStatus::Taken(TakenKind::Claimed)), "reserved");
        assert_eq!(describe(&NameStatus::Available), "available");
    }
}
