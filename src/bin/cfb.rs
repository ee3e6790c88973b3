//! cfb - inspect compound files
//!
//! Prints the storage tree, dumps streams and shows header fields.

use anyhow::{bail, Context};
use cfb_rs::{CompoundFile, CompoundFileBuilder, EntryType, Storage};
use clap::{Parser, Subcommand};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "cfb")]
#[command(about = "Inspect Compound File Binary containers")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every storage and stream
    Tree {
        /// Path to the compound file
        file: PathBuf,
    },
    /// Write a stream's bytes to stdout
    Cat {
        /// Path to the compound file
        file: PathBuf,
        /// Stream path inside the file, storages separated by '/'
        path: String,
    },
    /// Print header fields
    Info {
        /// Path to the compound file
        file: PathBuf,
    },
}

fn open(path: &PathBuf) -> anyhow::Result<CompoundFile> {
    CompoundFileBuilder::new()
        .read_only()
        .open_path(path)
        .with_context(|| format!("failed to open {}", path.display()))
}

fn print_tree(storage: &Storage, depth: usize, out: &mut impl Write) -> anyhow::Result<()> {
    for entry in storage.entries()? {
        let indent = "  ".repeat(depth);
        match entry.entry_type {
            EntryType::Storage => {
                writeln!(out, "{}{}/", indent, entry.name.escape_debug())?;
                print_tree(&storage.open_storage(&entry.name)?, depth + 1, out)?;
            }
            _ => writeln!(
                out,
                "{}{} ({} bytes)",
                indent,
                entry.name.escape_debug(),
                entry.length
            )?,
        }
    }
    Ok(())
}

fn cat(file: &CompoundFile, path: &str, out: &mut impl Write) -> anyhow::Result<()> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    let Some((name, storages)) = parts.split_last() else {
        bail!("empty stream path");
    };

    let mut storage = file.root();
    for part in storages {
        storage = storage
            .open_storage(part)
            .with_context(|| format!("no storage '{}'", part))?;
    }

    let mut data = Vec::new();
    storage
        .open_stream(name)
        .with_context(|| format!("no stream '{}'", name))?
        .read_to_end(&mut data)?;
    debug!("Read {} bytes from {}", data.len(), path);
    out.write_all(&data)?;
    Ok(())
}

fn info(file: &CompoundFile, out: &mut impl Write) -> anyhow::Result<()> {
    let header = file.header();
    writeln!(out, "version:                {:?}", header.version)?;
    writeln!(out, "minor version:          {:#06x}", header.minor_version)?;
    writeln!(out, "sector size:            {}", header.sector_size())?;
    writeln!(out, "clsid:                  {}", header.clsid)?;
    writeln!(out, "file length:            {}", file.len())?;
    writeln!(out, "FAT sectors:            {}", header.fat_sector_count)?;
    writeln!(out, "first directory sector: {:#x}", header.first_directory_sector)?;
    writeln!(out, "directory sectors:      {}", header.directory_sector_count)?;
    writeln!(out, "first Mini-FAT sector:  {:#x}", header.first_mini_fat_sector)?;
    writeln!(out, "Mini-FAT sectors:       {}", header.mini_fat_sector_count)?;
    writeln!(out, "first DIFAT sector:     {:#x}", header.first_difat_sector)?;
    writeln!(out, "DIFAT sectors:          {}", header.difat_sector_count)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match args.command {
        Command::Tree { file } => {
            let compound = open(&file)?;
            writeln!(out, "Root Entry/")?;
            print_tree(&compound.root(), 1, &mut out)?;
        }
        Command::Cat { file, path } => {
            let compound = open(&file)?;
            cat(&compound, &path, &mut out)?;
        }
        Command::Info { file } => {
            let compound = open(&file)?;
            info(&compound, &mut out)?;
        }
    }

    out.flush()?;
    Ok(())
}
