//! PDF Image Bridge CLI
//!
//! Extracts image XObjects from a PDF as PNG/TIFF files, or pushes a PNG or
//! TIFF file through the bridge and writes it back out.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use lopdf::{Document, Object, ObjectId};
use pdf_image_bridge::{file_ops, BridgeOptions, RowFilterStrategy};

/// Convert between PDF image XObjects and PNG/TIFF files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// PNG row filter strategy
    #[arg(long, value_enum, default_value = "adaptive", global = true)]
    png_filter: PngFilter,

    /// Always decode container pixels instead of reusing their compressed data
    #[arg(long, global = true)]
    no_passthrough: bool,

    /// Keep 8 bits per component when ingesting images
    #[arg(long, global = true)]
    full_depth: bool,

    /// Deflate level (0-9)
    #[arg(short, long, default_value = "6", global = true)]
    level: u32,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write every image XObject of a PDF into a directory
    Extract {
        /// Input PDF file path
        pdf: PathBuf,
        /// Output directory
        dir: PathBuf,
    },
    /// Read a PNG or TIFF file and write it back out through the bridge
    Convert {
        /// Input PNG or TIFF file
        input: PathBuf,
        /// Output path; the extension is chosen from the image's color space
        output: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PngFilter {
    None,
    Adaptive,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let options = BridgeOptions {
        png_filter: match args.png_filter {
            PngFilter::None => RowFilterStrategy::None,
            PngFilter::Adaptive => RowFilterStrategy::Adaptive,
        },
        passthrough: !args.no_passthrough,
        reduce_depth: !args.full_depth,
        compression_level: args.level,
        verbose: args.verbose,
    };

    match args.command {
        Command::Extract { pdf, dir } => extract(&pdf, &dir, &options),
        Command::Convert { input, output } => convert(&input, &output, &options),
    }
}

/// Image XObjects that are not used as another image's soft mask.
fn image_ids(doc: &Document) -> Vec<ObjectId> {
    let mut images = Vec::new();
    let mut masks = HashSet::new();

    for (id, object) in doc.objects.iter() {
        if let Object::Stream(stream) = object {
            let is_image = matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image");
            if !is_image {
                continue;
            }
            images.push(*id);
            if let Ok(Object::Reference(mask)) = stream.dict.get(b"SMask") {
                masks.insert(*mask);
            }
        }
    }

    images.retain(|id| !masks.contains(id));
    images
}

fn extract(pdf: &Path, dir: &Path, options: &BridgeOptions) -> anyhow::Result<()> {
    let doc = Document::load(pdf).with_context(|| format!("Failed to load PDF {pdf:?}"))?;
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {dir:?}"))?;

    let ids = image_ids(&doc);
    let mut written = 0;
    let mut skipped = 0;

    for id in &ids {
        let Ok(Object::Stream(stream)) = doc.get_object(*id) else {
            continue;
        };

        let stem = dir.join(format!("image-{}-{}", id.0, id.1));
        match file_ops::write_image(&doc, stream, &stem, options) {
            Ok(path) => {
                written += 1;
                if options.verbose {
                    println!("{id:?} -> {}", path.display());
                }
            }
            Err(e) => {
                skipped += 1;
                log::warn!("skipping image {id:?}: {e}");
            }
        }
    }

    println!(
        "Done! Processed {} images: {} written, {} skipped",
        ids.len(),
        written,
        skipped
    );

    Ok(())
}

fn convert(input: &Path, output: &Path, options: &BridgeOptions) -> anyhow::Result<()> {
    let mut doc = Document::with_version("1.5");
    let stream = file_ops::read_image_file(&mut doc, input, options)
        .with_context(|| format!("Failed to read {input:?}"))?;

    let path = file_ops::write_image(&doc, &stream, output, options)
        .with_context(|| format!("Failed to write {output:?}"))?;

    println!("Output saved to: {}", path.display());
    Ok(())
}
