use anyhow::{Context, Result};
use bzunpack::header::{self, GzipHeader};
use bzunpack::{find_all_signatures, utils, GZIP_SIGNATURE};
use clap::Parser;
use log::{info, warn};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author = "llama-for3ver",
    version = "0.1",
    about = "Lists every gzip signature in a file and whether its header parses.
Purely for debugging purposes.",
    help_template = "\
{name} {version} ({author})
{about}

USAGE:
    {usage}

OPTIONS:
    {options}
"
)]
struct Args {
    /// Path to the image.
    image: PathBuf,

    /// Range to search start, default 0.
    #[arg(long, default_value = "0", value_parser = utils::parse_offset)]
    search_start: u64,

    /// Print candidates as JSON instead.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct Candidate {
    offset: u64,
    header: Option<GzipHeader>,
    rejected: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let data = fs::read(&args.image)
        .with_context(|| format!("Couldn't read image {:?}", args.image))?;

    let start = usize::try_from(args.search_start)
        .ok()
        .filter(|&s| s <= data.len())
        .with_context(|| {
            format!(
                "Search start {:#x} is beyond the file ({} bytes)",
                args.search_start,
                data.len()
            )
        })?;

    info!(
        "Searching {:?} from {:#x} for {}",
        args.image,
        start,
        utils::hex::encode(GZIP_SIGNATURE)
    );

    let candidates: Vec<Candidate> = find_all_signatures(&data[start..], &GZIP_SIGNATURE)
        .into_iter()
        .map(|rel| {
            let offset = start as u64 + rel;
            match header::parse_gzip_header(&data[offset as usize..]) {
                Ok(h) => Candidate {
                    offset,
                    header: Some(h),
                    rejected: None,
                },
                Err(e) => Candidate {
                    offset,
                    header: None,
                    rejected: Some(e.to_string()),
                },
            }
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&candidates)?);
        return Ok(());
    }

    if candidates.is_empty() {
        warn!("Couldn't find any gzip magic in {:?} :(", args.image);
        return Ok(());
    }

    println!("\nSearch complete - {} candidates:", candidates.len());
    for cand in &candidates {
        match (&cand.header, &cand.rejected) {
            (Some(h), _) => println!(
                "  Offset {:#010x}  | header ok, os {}, {} header bytes{}",
                cand.offset,
                h.os_name(),
                h.header_len,
                h.file_name
                    .as_deref()
                    .map(|n| format!(", name '{}'", n))
                    .unwrap_or_default()
            ),
            (None, Some(reason)) => {
                println!("  Offset {:#010x}  | rejected: {}", cand.offset, reason)
            }
            (None, None) => {}
        }
    }

    if let Some(first) = candidates.iter().find(|c| c.header.is_some()) {
        println!(
            "\nFirst plausible stream offset: {:#x} ({})",
            first.offset, first.offset
        );
    }

    Ok(())
}
