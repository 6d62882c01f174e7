use clap::{Parser, Subcommand};

use folio_lib::cli::IngestArgs;

#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(about = "Turn uploaded documents into editor content")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract and reconstruct files into a document, uploading what cannot be parsed
    Ingest(IngestArgs),
}

fn main() {
    let args = Args::parse();

    match args.command {
        Command::Ingest(args) => folio_lib::cli::ingest(args),
    }
}
