use bzunpack::{utils, ExtractionResult, UnpackError, Unpacker};
use clap::{crate_authors, Parser};
use log::{error, info};
use std::path::PathBuf;
use std::process::exit;

#[derive(Parser, Debug)]
#[command(
    author = crate_authors!(),
    version,
    about = "Unpacks bzImage file.
Finds the gzip stream buried in the image and writes it to <FILE>_unpacked.",
    help_template = "\
{name} {version} ({author})
{about}

USAGE:
    {usage}

EXAMPLES:
    ./unpack_image ./bzImage
    ./unpack_image ./bzImage -o vmlinux --search-start 0x4000

OPTIONS:
    {options}
"
)]
struct Args {
    /// Path to the bzImage to unpack.
    #[arg(value_name = "FILE")]
    image: PathBuf,

    /// Where to write the payload. Defaults to <FILE>_unpacked.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip everything before this offset. Use hex (0x...) or decimal.
    #[arg(long, default_value = "0", value_parser = utils::parse_offset)]
    search_start: u64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut unpacker = Unpacker::new(&args.image).search_start(args.search_start);
    if let Some(output) = args.output {
        unpacker = unpacker.with_output(output);
    }

    match unpacker.run() {
        Ok(ExtractionResult::Found {
            bytes_written,
            offset,
        }) => {
            info!(
                "Payload started at {:#010x} ({}), {} bytes unpacked",
                offset, offset, bytes_written
            );
            println!(
                "Success: unpacked image was saved in file {}",
                unpacker.output_path().display()
            );
        }
        Ok(ExtractionResult::NotFound) => {
            // not finding anything isn't a failure of the tool
            println!(
                "Error: packed image was not found in file {}",
                unpacker.input_path().display()
            );
        }
        Err(e) => {
            report(&e);
            exit(1);
        }
    }
}

fn report(e: &UnpackError) {
    error!("{}", e);
    if let UnpackError::Truncated { .. } = e {
        eprintln!("The image looks cut short, is it a complete file?");
    }
}
