//! Command-line interface for the gamepatch IPA patching tool.
//!
//! Provides a CLI for forcing the Game Mode capability flag in IPA app
//! bundles and for converting property lists between XML and binary form.

use clap::{Parser, Subcommand, ValueEnum};
use gamepatch::{convert_file, Format, GamePatch, GAME_MODE_KEY};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gamepatch")]
#[command(about = "IPA Game Mode patcher and plist converter")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Patch an IPA so its app bundle advertises Game Mode support
    Patch {
        /// Input IPA file
        input: PathBuf,

        /// Directory to place the patched IPA in
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Metadata key to force to true
        #[arg(short, long, default_value = GAME_MODE_KEY)]
        key: String,

        /// ZIP compression level (0-9, default: 6)
        #[arg(short = 'z', long, default_value = "6")]
        zip_level: u32,
    },

    /// Convert a property list between XML and binary form
    Convert {
        /// Input plist file
        input: PathBuf,

        /// Output plist file
        output: PathBuf,

        /// Target format
        #[arg(long, value_enum)]
        to: FormatArg,

        /// Source format (auto-detected when omitted)
        #[arg(long, value_enum)]
        from: Option<FormatArg>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    /// plist 1.0 XML
    Xml,
    /// bplist00 binary
    Binary,
}

impl From<FormatArg> for Format {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Xml => Format::Xml,
            FormatArg::Binary => Format::Binary,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Patch {
            input,
            output_dir,
            key,
            zip_level,
        } => {
            let output = GamePatch::new()
                .capability_key(key)
                .compression_level(zip_level)
                .patch(&input, &output_dir)?;
            println!("Patched: {}", output.display());
        }
        Command::Convert {
            input,
            output,
            to,
            from,
        } => {
            let output = convert_file(&input, from.map(Into::into), to.into(), &output)?;
            println!("Converted: {}", output.display());
        }
    }

    Ok(())
}
