//! nsmb-rom - inspect New Super Mario Bros. ROMs and convert compressed assets

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use nsmb_rom::checksum::crc16;
use nsmb_rom::containers::compression::yaz0::{self, Yaz0Options};
use nsmb_rom::containers::{detect_format, CompressionFormat};
use nsmb_rom::data::region::{DataKind, RegionInfo};
use nsmb_rom::overlay::{OverlayDescriptor, OverlayTable};
use nsmb_rom::{NitroRom, Result, RomError, RomSession};

#[derive(Parser)]
#[command(name = "nsmb-rom")]
#[command(about = "New Super Mario Bros. ROM tool")]
#[command(version)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header, region and overlay 0 information
    Info {
        rom: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Dump an overlay table as JSON
    Overlays {
        rom: PathBuf,

        /// Use the ARM7 table instead of the ARM9 one
        #[arg(long)]
        arm7: bool,
    },

    /// Read one entry of an overlay 0 table
    Table {
        rom: PathBuf,

        /// Table name, e.g. tileset-object-index or sprite-class-ids
        kind: DataKind,

        index: usize,
    },

    /// Decompress an asset file
    Decompress {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Detected from the file contents when omitted
        #[arg(short, long)]
        format: Option<FormatArg>,
    },

    /// Compress an asset file
    Compress {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long)]
        format: FormatArg,

        /// Prefix LZ77 output with the "LZ77" tag
        #[arg(long)]
        tagged: bool,

        /// Yaz0 search window in bytes (1 to 4096)
        #[arg(long)]
        window: Option<usize>,
    },

    /// Print the CRC16 of a file
    Crc16 { file: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Lz77,
    Yaz0,
    Overlay,
}

impl FormatArg {
    fn format(self, tagged: bool) -> CompressionFormat {
        match self {
            FormatArg::Lz77 => CompressionFormat::Lz77 { tagged },
            FormatArg::Yaz0 => CompressionFormat::Yaz0,
            FormatArg::Overlay => CompressionFormat::Overlay,
        }
    }
}

/// Options that the chosen compression format would otherwise ignore.
fn compress_flag_conflict(
    format: FormatArg,
    tagged: bool,
    window: Option<usize>,
) -> Option<&'static str> {
    match format {
        FormatArg::Lz77 if window.is_some() => Some("--window only applies to --format yaz0"),
        FormatArg::Yaz0 if tagged => Some("--tagged only applies to --format lz77"),
        FormatArg::Overlay if tagged || window.is_some() => {
            Some("--format overlay takes neither --tagged nor --window")
        }
        _ => None,
    }
}

#[derive(Serialize)]
struct RomSummary {
    title: String,
    maker_code: String,
    #[serde(flatten)]
    region: RegionInfo,
    header_crc_ok: bool,
    arm9_ram_address: u32,
    arm9_overlays: usize,
    arm7_overlays: usize,
    overlay0_size: Option<usize>,
}

fn load_session(path: &Path) -> Result<RomSession<NitroRom>> {
    let rom = NitroRom::open(path).map_err(|e| e.in_file(path.display().to_string()))?;
    RomSession::load(rom)
}

fn info(path: &Path, json: bool) -> Result<()> {
    let session = load_session(path)?;
    let rom = session.fs();
    let summary = RomSummary {
        title: rom.header.game_title.clone(),
        maker_code: rom.header.maker_code.clone(),
        region: session.region().clone(),
        header_crc_ok: rom.header_crc_ok(),
        arm9_ram_address: session.arm9_ram_address(),
        arm9_overlays: session.arm9_overlays().len(),
        arm7_overlays: session.arm7_overlays().len(),
        overlay0_size: session.resident_image().map(<[u8]>::len),
    };

    if json {
        print_json(&summary)?;
        return Ok(());
    }

    println!("Title:        {}", summary.title);
    println!("Game code:    {}", summary.region.game_code);
    println!("Maker code:   {}", summary.maker_code);
    println!(
        "Region:       {}{}",
        summary.region.region,
        if summary.region.is_native { "" } else { " (not New Super Mario Bros.)" }
    );
    println!("Header CRC:   {}", if summary.header_crc_ok { "ok" } else { "mismatch" });
    println!("ARM9 RAM:     0x{:08X}", summary.arm9_ram_address);
    println!(
        "Overlays:     {} ARM9, {} ARM7 (expected {})",
        summary.arm9_overlays, summary.arm7_overlays, summary.region.overlay_count
    );
    if let Some(offset) = summary.region.patch_offset {
        println!("Patch offset: 0x{:X}", offset);
    }
    match summary.overlay0_size {
        Some(size) => println!("Overlay 0:    {} bytes", size),
        None => println!("Overlay 0:    not loaded"),
    }
    Ok(())
}

fn overlays(path: &Path, arm7: bool) -> Result<()> {
    let session = load_session(path)?;
    let table: &OverlayTable = if arm7 {
        session.arm7_overlays()
    } else {
        session.arm9_overlays()
    };
    let records: Vec<&OverlayDescriptor> = table.iter().collect();
    print_json(&records)
}

fn table(path: &Path, kind: DataKind, index: usize) -> Result<()> {
    let session = load_session(path)?;

    match kind {
        DataKind::FileOffset => println!("{}", session.offset(kind)?),
        DataKind::SpriteClassIds => println!("{}", session.class_id_from_table(index)?),
        DataKind::SpriteData => {
            let record = session.sprite_data(index)?;
            let hex: Vec<String> = record.iter().map(|b| format!("{:02X}", b)).collect();
            println!("{}", hex.join(" "));
        }
        kind if kind.inline_size() > 0 => {
            println!(
                "{} bytes at 0x{:X}",
                session.inline_file(kind)?.len(),
                session.offset(kind)?
            );
        }
        kind => println!("{}", session.file_id_from_table(index, kind)?),
    }
    Ok(())
}

fn decompress(input: &Path, output: &Path, format: Option<FormatArg>) -> Result<()> {
    let data = fs::read(input)?;
    let format = match (format, detect_format(&data)) {
        // the tag is part of the data, so trust detection for it
        (Some(FormatArg::Lz77), Some(CompressionFormat::Lz77 { tagged })) => {
            CompressionFormat::Lz77 { tagged }
        }
        (Some(format), _) => format.format(false),
        (None, Some(detected)) => detected,
        (None, None) => return Err(RomError::UnknownFormat(input.display().to_string())),
    };

    let out = format
        .decompress(&data)
        .map_err(|e| e.in_file(input.display().to_string()))?;
    fs::write(output, &out)?;
    info!("{:?}: {} -> {} bytes", format, data.len(), out.len());
    Ok(())
}

fn compress(
    input: &Path,
    output: &Path,
    format: FormatArg,
    tagged: bool,
    window: Option<usize>,
) -> Result<()> {
    let data = fs::read(input)?;
    let out = match (format, window) {
        (FormatArg::Yaz0, Some(window)) => {
            yaz0::compress_with(&data, &Yaz0Options::with_window(window))?
        }
        (format, _) => format.format(tagged).compress(&data)?,
    };
    fs::write(output, &out)?;
    info!("{} -> {} bytes", data.len(), out.len());
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    println!("{}", text);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Info { rom, json } => info(&rom, json),
        Commands::Overlays { rom, arm7 } => overlays(&rom, arm7),
        Commands::Table { rom, kind, index } => table(&rom, kind, index),
        Commands::Decompress {
            input,
            output,
            format,
        } => decompress(&input, &output, format),
        Commands::Compress {
            input,
            output,
            format,
            tagged,
            window,
        } => compress(&input, &output, format, tagged, window),
        Commands::Crc16 { file } => {
            println!("0x{:04X}", crc16(&fs::read(&file)?));
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Commands::Compress {
        format,
        tagged,
        window,
        ..
    } = &cli.command
    {
        if let Some(message) = compress_flag_conflict(*format, *tagged, *window) {
            Cli::command()
                .error(ErrorKind::ArgumentConflict, message)
                .exit();
        }
    }

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}
