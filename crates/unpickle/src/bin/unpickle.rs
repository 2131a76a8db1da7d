//! `unpickle` command-line tool.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use unpickle::{ConvertOptions, NonFinite};

#[derive(Parser)]
#[command(name = "unpickle", version)]
#[command(about = "Convert a Python pickle, NumPy arrays included, to indented JSON", long_about = None)]
struct Cli {
    /// Pickle file to read
    input: PathBuf,

    /// JSON file to write
    output: PathBuf,

    /// Spaces per nesting level
    #[arg(long, default_value_t = 4)]
    indent: usize,

    /// How to write NaN and infinite floats
    #[arg(long, value_enum, default_value_t = NonFiniteArg::Reject)]
    non_finite: NonFiniteArg,

    /// Write OUTPUT directly instead of through a temporary file
    #[arg(long)]
    in_place: bool,

    /// Log debug details to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum NonFiniteArg {
    /// Fail the conversion
    Reject,
    /// Write null
    Null,
}

impl From<NonFiniteArg> for NonFinite {
    fn from(arg: NonFiniteArg) -> Self {
        match arg {
            NonFiniteArg::Reject => NonFinite::Reject,
            NonFiniteArg::Null => NonFinite::Null,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let options = ConvertOptions::default()
        .with_indent(cli.indent)
        .with_non_finite(cli.non_finite.into())
        .with_atomic(!cli.in_place);

    match unpickle::convert_with(&cli.input, &cli.output, &options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("unpickle: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}
