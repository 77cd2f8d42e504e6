//! ATA S.M.A.R.T. metrics exporter.
//!
//! Scrapes health attributes straight off local disks through the Linux
//! SCSI Generic passthrough ioctl and serves them in Prometheus text
//! format. No smartctl subprocess, no daemon dependencies: the exporter
//! talks to `/dev/sd*` itself.

mod ata;
mod collector;
mod drivedb;
mod metrics;
mod scsi;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::Result;
use color_eyre::eyre::bail;
use tracing_subscriber::EnvFilter;

use crate::collector::DiskCollector;
use crate::drivedb::DriveDb;
use crate::metrics::MetricSink;

struct Options {
    listen_addr: String,
    drivedb_path: PathBuf,
}

impl Options {
    /// The exporter takes exactly two flags; a CLI framework would be
    /// heavier than the program.
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut options = Options {
            listen_addr: ":9541".to_owned(),
            drivedb_path: PathBuf::from("drivedb.json"),
        };

        let program = args.next().unwrap_or_default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--listen-addr" => match args.next() {
                    Some(addr) => options.listen_addr = addr,
                    None => bail!("--listen-addr requires a value"),
                },
                "--drivedb" => match args.next() {
                    Some(path) => options.drivedb_path = PathBuf::from(path),
                    None => bail!("--drivedb requires a value"),
                },
                "--help" | "-h" => {
                    eprintln!(
                        "usage: {program} [--listen-addr ADDR] [--drivedb PATH]\n\
                         \n\
                         --listen-addr  address to serve /metrics on (default :9541)\n\
                         --drivedb      drive database file (default drivedb.json)"
                    );
                    std::process::exit(0);
                }
                other => bail!("unknown flag: {other}"),
            }
        }
        Ok(options)
    }

    /// ":9541" means all interfaces, like most exporters spell it.
    fn bind_addr(&self) -> String {
        match self.listen_addr.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => self.listen_addr.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = Options::parse(std::env::args())?;

    // No drive database means no conversion rules at all; refuse to
    // start rather than silently exporting raw-less metrics forever.
    let db = DriveDb::open(&options.drivedb_path)?;

    let sink = Arc::new(MetricSink::new());
    let collector = DiskCollector::new(db, Arc::clone(&sink));

    server::run(&options.bind_addr(), collector, sink).await
}
