use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};

use hxload::link::{describe_port, list_ports};
use hxload::proto;
use hxload::upload;

#[derive(Debug, Parser)]
#[command(name = "hxload", version, about = "Upload a firmware image to the HX8K RISC-V loader")]
struct Cli {
    /// Serial port the loader is attached to (e.g. /dev/ttyUSB1)
    #[arg(short = 'p', long)]
    port: Option<String>,

    /// Link speed; the loader only talks 115200
    #[arg(short = 'b', long, default_value_t = 115_200)]
    baud: u32,

    /// Log every byte on the wire instead of drawing a progress bar
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// List available serial ports and exit
    #[arg(short = 'l', long)]
    list: bool,

    /// Firmware image to upload
    firmware: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_millis()
        .try_init();

    if cli.list {
        let ports = list_ports().context("Enumerating serial ports")?;
        if ports.is_empty() {
            println!("No serial ports found.");
        }
        for info in &ports {
            println!("{}", describe_port(info));
        }
        return Ok(());
    }

    let firmware = match cli.firmware {
        Some(path) => path,
        None => bail!("No firmware image given (or use --list to enumerate ports)"),
    };
    let port = match cli.port {
        Some(p) => p,
        None => bail!("No serial port given; see --list"),
    };

    let image = std::fs::read(&firmware)
        .with_context(|| format!("Reading {}", firmware.display()))?;
    if image.is_empty() {
        bail!("{} is empty; the loader rejects zero-length images", firmware.display());
    }
    if image.len() > proto::IMAGE_MAX {
        bail!(
            "{} is {} bytes; the loader accepts at most {} bytes",
            firmware.display(),
            image.len(),
            proto::IMAGE_MAX
        );
    }

    let crc = upload::run(&port, cli.baud, &image, cli.verbose > 0)
        .with_context(|| format!("Uploading {}", firmware.display()))?;
    println!("Uploaded {} bytes, crc {:#010x} verified; image is running.", image.len(), crc);
    Ok(())
}
