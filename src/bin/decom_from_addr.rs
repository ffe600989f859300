use anyhow::{Context, Result};
use bzunpack::{decompress_at, output_path_for, utils, ExtractionResult};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author = "llama-for3ver",
    version = "0.1",
    about = "Decompress the gzip stream at a known offset, no scanning."
)]
struct Args {
    /// Path to the image.
    input: PathBuf,

    /// Offset of the gzip header. Use hex (0x...) or decimal.
    #[arg(value_parser = utils::parse_offset)]
    offset: u64,

    /// Output file, default <input>_unpacked.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let output = args
        .output
        .unwrap_or_else(|| output_path_for(&args.input));

    let result = decompress_at(&args.input, args.offset, &output).with_context(|| {
        format!(
            "Failed to decompress {:?} at offset {:#x}",
            args.input, args.offset
        )
    })?;

    match result {
        ExtractionResult::Found { bytes_written, .. } => {
            info!("Wrote {} bytes to {:?}", bytes_written, output);
        }
        ExtractionResult::NotFound => {
            warn!("Nothing written, offset {:#x} is not a gzip stream", args.offset);
        }
    }

    Ok(())
}
