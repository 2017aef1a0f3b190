//! Command line interface.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::export::ExportFormat;

#[derive(Debug, Parser)]
#[command(
    name = "meshping",
    about = "Field range testing for mesh radio links",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the mobile side: ping a base station and map the results
    Client {
        /// Base station identity hash (hex), overrides the config file
        base_station: Option<String>,

        /// Config file path
        #[arg(long, default_value = "client_config.json")]
        config: PathBuf,

        /// Identity file path
        #[arg(long, default_value = "rt_id")]
        identity: PathBuf,

        /// Directory the map documents are written to
        #[arg(long, default_value = "export")]
        export_dir: PathBuf,

        /// Formats to export, comma separated, or "all"
        #[arg(long, value_delimiter = ',', default_value = "all")]
        export: Vec<String>,

        /// Stop after this many pings instead of running until ctrl-c
        #[arg(long)]
        count: Option<u64>,

        /// Skip GPS lookups; results are logged but not mapped
        #[arg(long)]
        no_gps: bool,

        /// UDP socket to bind
        #[arg(long, default_value = "0.0.0.0:4242")]
        listen: SocketAddr,

        /// Known peer addresses, announced to at startup
        #[arg(long)]
        peer: Vec<SocketAddr>,
    },

    /// Run the fixed side: answer pings from mobile clients
    Server {
        /// Config file path
        #[arg(long, default_value = "server_config.json")]
        config: PathBuf,

        /// Identity file path
        #[arg(long, default_value = "rt_server_id")]
        identity: PathBuf,

        /// UDP socket to bind
        #[arg(long, default_value = "0.0.0.0:4242")]
        listen: SocketAddr,

        /// Known peer addresses, announced to at startup
        #[arg(long)]
        peer: Vec<SocketAddr>,
    },

    /// Run client and server in-process over a simulated link
    Selftest {
        /// Number of pings to run
        #[arg(long, default_value_t = 10)]
        count: u64,

        /// Directory the map documents are written to
        #[arg(long, default_value = "export")]
        export_dir: PathBuf,
    },
}

/// Expand the `--export` value list into concrete formats, deduplicated,
/// preserving first-mention order. `all` selects every format.
pub fn parse_formats(values: &[String]) -> Result<Vec<ExportFormat>> {
    let mut formats: Vec<ExportFormat> = Vec::new();
    for value in values {
        if value.eq_ignore_ascii_case("all") {
            for format in ExportFormat::ALL {
                if !formats.contains(&format) {
                    formats.push(format);
                }
            }
            continue;
        }
        match value.parse::<ExportFormat>() {
            Ok(format) => {
                if !formats.contains(&format) {
                    formats.push(format);
                }
            }
            Err(e) => bail!(e),
        }
    }
    if formats.is_empty() {
        bail!("no export formats selected");
    }
    Ok(formats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_expands_to_every_format() {
        let formats = parse_formats(&["all".to_string()]).unwrap();
        assert_eq!(formats, ExportFormat::ALL.to_vec());
    }

    #[test]
    fn test_explicit_list_deduplicates() {
        let formats = parse_formats(&[
            "kml".to_string(),
            "csv".to_string(),
            "kml".to_string(),
        ])
        .unwrap();
        assert_eq!(formats, vec![ExportFormat::Kml, ExportFormat::Csv]);
    }

    #[test]
    fn test_unknown_format_is_an_error() {
        assert!(parse_formats(&["shapefile".to_string()]).is_err());
    }

    #[test]
    fn test_client_defaults() {
        let cli = Cli::parse_from(["meshping", "client", "aabbccdd"]);
        match cli.command {
            Command::Client {
                base_station,
                export_dir,
                listen,
                no_gps,
                ..
            } => {
                assert_eq!(base_station.as_deref(), Some("aabbccdd"));
                assert_eq!(export_dir, PathBuf::from("export"));
                assert_eq!(listen, "0.0.0.0:4242".parse::<SocketAddr>().unwrap());
                assert!(!no_gps);
            }
            _ => panic!("expected client subcommand"),
        }
    }

    #[test]
    fn test_export_list_splits_on_commas() {
        let cli = Cli::parse_from(["meshping", "client", "--export", "csv,kml"]);
        match cli.command {
            Command::Client { export, .. } => {
                assert_eq!(export, vec!["csv".to_string(), "kml".to_string()]);
            }
            _ => panic!("expected client subcommand"),
        }
    }
}
