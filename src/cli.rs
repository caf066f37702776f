use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{
    io_utils::parse_delimiter,
    schema::{ImportOptions, SourceType},
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Preview tabular sources, flag sensitive columns, and run tracked imports",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Sample a source and print inferred types and sensitive-data findings
    Preview(PreviewArgs),
    /// Write an import configuration template from a source preview
    Probe(ProbeArgs),
    /// Run an import job described by a configuration file
    Import(ImportArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// Source type (csv, json)
    #[arg(long = "source", default_value = "csv")]
    pub source: SourceType,
    /// Input file to read
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Field delimiter (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Treat the first row as data and generate column names
    #[arg(long = "no-header")]
    pub no_header: bool,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Number of leading data rows to skip
    #[arg(long = "skip-rows", default_value_t = 0)]
    pub skip_rows: usize,
    /// Maximum number of data rows to read
    #[arg(long)]
    pub limit: Option<usize>,
    /// Additional chrono format recognised as a date
    #[arg(long = "date-format")]
    pub date_format: Option<String>,
    /// Number of rows to sample (capped by settings)
    #[arg(long = "sample-rows")]
    pub sample_rows: Option<usize>,
    /// Runtime settings YAML file
    #[arg(long)]
    pub settings: Option<PathBuf>,
}

impl SourceArgs {
    pub fn import_options(&self) -> ImportOptions {
        let defaults = ImportOptions::default();
        ImportOptions {
            has_header: !self.no_header,
            delimiter: self
                .delimiter
                .map(|d| (d as char).to_string())
                .unwrap_or(defaults.delimiter),
            encoding: self.input_encoding.clone(),
            skip_rows: self.skip_rows,
            limit_rows: self.limit,
            date_format: self.date_format.clone(),
            ..ImportOptions::default()
        }
    }
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Destination import configuration (YAML)
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
    /// Target dataset identifier
    #[arg(long)]
    pub dataset: String,
    /// Target table name
    #[arg(long)]
    pub table: String,
    /// Give detected columns their default transform instead of leaving them unresolved
    #[arg(long = "auto-scrub")]
    pub auto_scrub: bool,
    /// Skip the sensitive-data scanning stage when the job runs
    #[arg(long = "no-phi-scan")]
    pub no_phi_scan: bool,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Import configuration (YAML) produced by `probe` or written by hand
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
    /// Directory receiving one CSV per target table
    #[arg(long = "output-dir")]
    pub output_dir: PathBuf,
    /// Field delimiter for the written CSV files (defaults to ',')
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
    /// Owner recorded on the job
    #[arg(long, default_value = "cli")]
    pub owner: String,
    /// Tenant recorded on the job
    #[arg(long, default_value = "default")]
    pub tenant: String,
    /// Runtime settings YAML file
    #[arg(long)]
    pub settings: Option<PathBuf>,
}
