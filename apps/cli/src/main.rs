use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use diskscope_core::{signature_collisions, TopologyDocument};
use diskscope_host_windows::{
    dos_names_for_partition, enumerate, is_process_elevated, shadow_copy, update_signature, vhd,
    DiscoveryReport, SignatureStatus, SnapshotOptions, WindowsSource,
};

mod render;
mod selection;

use render::{render_disks, render_signatures, View};
use selection::{parse_u32, DiskSelection};

/// Explorer and cloner for Windows disks and partitions
#[derive(Parser, Debug)]
#[command(name = "diskscope", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    list: ListArgs,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log debug detail
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Args, Debug, Default)]
struct ListArgs {
    /// Display count of disks only
    #[arg(short = 'c', long)]
    count: bool,

    /// Display partition data
    #[arg(short = 'p', long)]
    partitions: bool,

    /// Display terse disk data
    #[arg(short = 't', long)]
    terse: bool,

    /// Display verbose partition data (implies -p)
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Display the MBR disk signature (implies -t)
    #[arg(short = 's', long)]
    signature: bool,

    /// Display DOS name mappings (implies -t)
    #[arg(short = 'd', long)]
    dos_names: bool,

    /// Disks to display: 1, 0-2, 2-, or 0,3,4
    #[arg(short = 'i', long, value_parser = DiskSelection::parse)]
    index: Option<DiskSelection>,

    /// Print the topology as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List disks and partitions (the default)
    List(ListArgs),
    /// Clone a physical disk into a VHD or VHDX file
    CloneVhd {
        #[arg(value_parser = parse_u32)]
        disk: u32,
        path: PathBuf,
    },
    /// Attach a VHD or VHDX permanently
    AttachVhd { path: PathBuf },
    /// Detach a VHD or VHDX
    DetachVhd { path: PathBuf },
    /// Rewrite the MBR disk signature; exits with the status code
    SetSignature {
        #[arg(value_parser = parse_u32)]
        disk: u32,
        #[arg(value_parser = parse_u32)]
        signature: u32,
    },
    /// Check MBR disk signatures for collisions
    CheckSignatures,
    /// Copy the snapshot artifact of a live volume through a shadow copy
    ShadowCopy { volume: String, destination: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.debug);

    #[cfg(windows)]
    if !is_process_elevated() {
        return Err(anyhow!(
            "This application requires administrative privileges. Please run as Administrator."
        ));
    }
    debug!("elevated: {}", is_process_elevated());

    match cli.command {
        None => list(&cli.list),
        Some(Command::List(args)) => list(&args),
        Some(Command::CloneVhd { disk, path }) => {
            vhd::clone_from_disk(disk, &path)
                .with_context(|| format!("cloning disk {} to {}", disk, path.display()))?;
            println!("Cloned disk {} to {}", disk, path.display());
            Ok(())
        }
        Some(Command::AttachVhd { path }) => {
            vhd::attach(&path).with_context(|| format!("attaching {}", path.display()))?;
            println!("Attached {}", path.display());
            Ok(())
        }
        Some(Command::DetachVhd { path }) => {
            vhd::detach(&path).with_context(|| format!("detaching {}", path.display()))?;
            println!("Detached {}", path.display());
            Ok(())
        }
        Some(Command::SetSignature { disk, signature }) => {
            println!("Updating signature for {} ({:#010x})", disk, signature);
            let status = update_signature(&WindowsSource::new(), disk, signature)
                .with_context(|| format!("updating signature of disk {}", disk))?;
            match status {
                SignatureStatus::Updated { previous } => {
                    println!("Signature changed from {:#010x} to {:#010x}", previous, signature)
                }
                SignatureStatus::RefusedZeroSignature => println!("Refused: zero signature"),
                SignatureStatus::RefusedBootDisk => println!("Refused: disk {} is the boot disk", disk),
                SignatureStatus::NotMbr => println!("Disk {} is not an MBR disk", disk),
            }
            io::stdout().flush()?;
            std::process::exit(status.code());
        }
        Some(Command::CheckSignatures) => {
            let report = discover()?;
            let collisions = signature_collisions(&report.disks);
            render_signatures(&mut io::stdout().lock(), &report.disks, &collisions)?;
            Ok(())
        }
        Some(Command::ShadowCopy { volume, destination }) => {
            let outcome = shadow_copy(&volume, &destination, SnapshotOptions::default())
                .with_context(|| format!("shadow copy of {}", volume))?;
            println!(
                "Copied {} bytes from {} to {}",
                outcome.bytes_copied,
                outcome.source_file.display(),
                outcome.destination_file.display()
            );
            println!("VSS copy completed");
            Ok(())
        }
    }
}

fn init_logging(quiet: bool, debug: bool) {
    let default = if debug {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn discover() -> Result<DiscoveryReport> {
    let report = enumerate(&WindowsSource::new()).context("disk discovery failed")?;
    for skipped in &report.skipped {
        warn!("skipped {}: {}", skipped.path, skipped.reason);
    }
    if report.disks.is_empty() {
        return Err(anyhow!("Unlikely! Zero (0) disks detected"));
    }
    Ok(report)
}

fn list(args: &ListArgs) -> Result<()> {
    let report = discover()?;
    let selection = args.index.clone().unwrap_or_default();

    if args.json {
        let mut disks = report.disks;
        disks.retain(|number, _| selection.contains(*number));
        let document = TopologyDocument::new(&disks);
        println!("{}", document.to_json(true)?);
        return Ok(());
    }

    let view = View::resolve(
        args.count,
        args.partitions,
        args.terse,
        args.verbose,
        args.signature,
        args.dos_names,
    );
    let source = WindowsSource::new();
    render_disks(
        &mut io::stdout().lock(),
        &report.disks,
        &selection,
        view,
        |partition| dos_names_for_partition(&source, partition),
    )?;
    Ok(())
}
