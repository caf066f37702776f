pub mod cli;
pub mod error;
pub mod executor;
pub mod ids;
pub mod infer;
pub mod io_utils;
pub mod job;
pub mod phi;
pub mod preview;
pub mod schema;
pub mod service;
pub mod settings;
pub mod source;
pub mod store;
pub mod table;
pub mod transform;
pub mod writer;

use std::{env, sync::Arc, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands},
    job::JobStatus,
    schema::{ImportConfig, TargetRef},
    service::ImportService,
    settings::Settings,
    writer::CsvFileWriter,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("data_import", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Preview(args) => preview::execute(&args),
        Commands::Probe(args) => handle_probe(&args),
        Commands::Import(args) => handle_import(&args),
    }
}

fn handle_probe(args: &cli::ProbeArgs) -> Result<()> {
    let source = &args.source;
    info!(
        "Probing '{}' as {}",
        source.input.display(),
        source.source
    );
    let settings = Settings::load_or_default(source.settings.as_deref())?;
    let result = preview::preview_from_args(source, &settings)?;

    let mut options = source.import_options();
    options.auto_scrub = args.auto_scrub;
    options.enable_phi_scan = !args.no_phi_scan;
    let mut config = ImportConfig {
        source_type: source.source,
        source_config: preview::file_source_config(&source.input),
        target: TargetRef {
            dataset_id: args.dataset.clone(),
            table: args.table.clone(),
        },
        columns: result.columns,
        options,
    };
    if args.auto_scrub {
        let scrubbed = config.auto_scrub();
        debug!("Scrubbed column(s): {scrubbed:?}");
    }
    config
        .save(&args.output)
        .with_context(|| format!("Writing import config to {:?}", args.output))?;

    info!(
        "{} sensitive column(s) found in '{}'",
        config.detected_count(),
        source.input.display()
    );
    let unresolved: Vec<&str> = config
        .unresolved_columns()
        .map(|column| column.name.as_str())
        .collect();
    if !unresolved.is_empty() {
        info!(
            "Column(s) {} need a transform before this config can be imported",
            unresolved.join(", ")
        );
    }
    info!(
        "Import config for {} column(s) written to {:?}",
        config.columns.len(),
        args.output
    );
    Ok(())
}

fn handle_import(args: &cli::ImportArgs) -> Result<()> {
    let config = ImportConfig::load(&args.config)
        .with_context(|| format!("Loading import config from {:?}", args.config))?;
    let settings = Settings::load_or_default(args.settings.as_deref())?;
    let mut writer = CsvFileWriter::new(&args.output_dir);
    if let Some(delimiter) = args.output_delimiter {
        writer = writer.with_delimiter(delimiter);
    }
    let writer = Arc::new(writer);
    let service = ImportService::new(writer)?.with_settings(settings);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Starting async runtime")?;
    let job = service.create_job(config, &args.owner, &args.tenant)?;
    info!("Executing job {} into {}", job.id, job.config.target);
    let finished = runtime.block_on(service.execute_job(job.id))?;

    let rendered = serde_json::to_string_pretty(&finished).context("Serializing job")?;
    io_utils::write_all(std::io::stdout().lock(), &format!("{rendered}\n"))?;

    if finished.status != JobStatus::Completed {
        let reason = finished
            .last_error()
            .map(|message| message.message.as_str())
            .unwrap_or("no error recorded");
        bail!("Job {} ended {}: {reason}", finished.id, finished.status);
    }
    info!(
        "Imported {} row(s) with {} warning(s)",
        finished.rows_processed, finished.warnings_count
    );
    Ok(())
}
