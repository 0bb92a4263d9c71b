//! epub-splice - merge and split epub files

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use epub_splice::merge::{merge, MergeOptions};
use epub_splice::opf_view::view_opf;
use epub_splice::sink::{FileSink, LogFacade, LogSink};
use epub_splice::split::{list_split_targets_json, parse_split_points, split, SplitOptions};
use epub_splice::Error;

#[derive(Parser)]
#[command(name = "epub-splice")]
#[command(version, about = "Merge and split epub files", long_about = None)]
#[command(after_help = "EXAMPLES:
    epub-splice merge a.epub b.epub -o out         Write out/merged_a.epub
    epub-splice list-targets book.epub             Show the split points
    epub-splice split book.epub -o out -p 0,3,7    Write out/book_01..03.epub")]
struct Cli {
    /// Show debug messages
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write the log to this file
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge several epub files into one, in the given order
    Merge {
        #[arg(value_name = "INPUT", num_args = 2.., required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long, value_name = "DIR")]
        output_dir: PathBuf,
    },
    /// Split an epub file at table of contents entries
    Split {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[arg(short, long, value_name = "DIR")]
        output_dir: PathBuf,

        /// Comma separated indices from list-targets, like 0,3,7
        #[arg(short, long, value_name = "POINTS")]
        points: String,
    },
    /// Print the possible split points as JSON
    ListTargets {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
    /// Print the package document and the archive entries
    ViewOpf {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let sink: Box<dyn LogSink> = match &cli.log_file {
        Some(path) => match FileSink::create(path, LogFacade) {
            Ok(sink) => Box::new(sink),
            Err(e) => {
                eprintln!("error: can't create log file {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Box::new(LogFacade),
    };

    match run(cli.command, sink.as_ref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            sink.error(format_args!("{}", e));
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, sink: &dyn LogSink) -> epub_splice::Result<()> {
    match command {
        Command::Merge { inputs, output_dir } => {
            let merged = merge(&inputs, &MergeOptions { output_dir }, sink)?;
            println!("Merged {} files into {}", inputs.len(), merged.display());
        }
        Command::Split {
            input,
            output_dir,
            points,
        } => {
            let points = parse_split_points(&points)
                .map_err(|e| Error::Validation(format!("invalid split points '{points}': {e}")))?;
            let written = split(&input, &SplitOptions { output_dir, points }, sink)?;
            println!("Split {} into {} files:", input.display(), written.len());
            for path in written {
                println!("  {}", path.display());
            }
        }
        Command::ListTargets { input } => {
            println!("{}", list_split_targets_json(&input, sink)?);
        }
        Command::ViewOpf { input } => {
            print!("{}", view_opf(&input, sink)?);
        }
    }
    Ok(())
}
