use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "phonescout", about = "Company website crawler & phone contact extractor")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one extraction batch over an input table
    Run {
        /// Input CSV path (overrides config)
        #[arg(short, long)]
        input: Option<String>,

        /// Output base directory (overrides config)
        #[arg(short, long)]
        output_dir: Option<String>,

        /// Row range to process: N-M, N-, -M or N
        #[arg(short, long)]
        range: Option<String>,

        /// Maximum internal-link depth
        #[arg(short, long)]
        depth: Option<u32>,

        /// Parallel row workers
        #[arg(long)]
        concurrency: Option<usize>,
    },
}
