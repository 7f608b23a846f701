pub mod cli;
pub mod config;
pub mod data;
pub mod import;
pub mod io_utils;
pub mod mapping;
pub mod parser;
pub mod report;
pub mod schema;
pub mod store;
pub mod table;
pub mod transform;
pub mod validate;

use std::{
    env,
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
    sync::OnceLock,
};

use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};
use serde::Serialize;

use crate::{
    cli::{Cli, Commands, TemplateFormat},
    config::ImportSettings,
    import::ImportConfig,
    mapping::{ColumnMapper, MappingSet, validate_mapping},
    parser::{ParseOptions, ParsedFile},
    schema::EntityType,
    store::{JournalStore, MemoryStore, RecordStore},
};

static LOGGER: OnceLock<()> = OnceLock::new();

/// Rows of row-level errors echoed to the terminal.
const ERROR_DISPLAY_LIMIT: usize = 20;

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("crm_import", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let settings = ImportSettings::load_or_default(cli.settings.as_deref())?;
    match cli.command {
        Commands::Fields(args) => handle_fields(&args),
        Commands::Inspect(args) => handle_inspect(&args, &settings),
        Commands::Map(args) => handle_map(&args, &settings),
        Commands::Validate(args) => handle_validate(&args, &settings),
        Commands::Import(args) => handle_import(&args, &settings),
        Commands::Template(args) => handle_template(&args),
    }
}

fn handle_fields(args: &cli::FieldsArgs) -> Result<()> {
    if args.json {
        return write_json(None, schema::fields_for(args.entity));
    }
    print!("{}", table::render_fields(args.entity));
    Ok(())
}

fn load_input(args: &cli::InputArgs, settings: &ImportSettings) -> Result<ParsedFile> {
    let options = ParseOptions {
        delimiter: args.delimiter,
        encoding: io_utils::resolve_encoding(args.input_encoding.as_deref())?,
        ..ParseOptions::from_settings(settings)
    };
    if let Some(delimiter) = args.delimiter {
        debug!("Using delimiter '{}'", printable_delimiter(delimiter));
    }
    let parsed = parser::parse(&args.input, &options)
        .with_context(|| format!("Parsing {:?}", args.input))?;
    info!(
        "Parsed {} ({}): {} row(s), {} column(s)",
        parsed.file_name,
        parsed.format,
        parsed.total_rows,
        parsed.headers.len()
    );
    Ok(parsed)
}

/// Automatic suggestion, then the saved mapping, then `--set` overrides.
fn resolve_mappings(
    parsed: &ParsedFile,
    args: &cli::MappingArgs,
    settings: &ImportSettings,
) -> Result<MappingSet> {
    let mut mappings =
        ColumnMapper::from_settings(settings).auto_map(&parsed.headers, &parsed.rows, args.entity);
    if let Some(path) = &args.mapping {
        let saved = MappingSet::load(path)?;
        ensure!(
            saved.entity == args.entity,
            "Mapping {path:?} is for {}, not {}",
            saved.entity,
            args.entity
        );
        for column in saved.iter() {
            if !parsed.headers.contains(&column.csv_column) {
                warn!(
                    "Saved mapping column '{}' is not in {}",
                    column.csv_column, parsed.file_name
                );
                continue;
            }
            mappings.assign(&column.csv_column, column.db_field.as_deref())?;
        }
    }
    for raw in &args.overrides {
        let (column, field) = cli::parse_assignment(raw).map_err(anyhow::Error::msg)?;
        mappings
            .assign(column, field)
            .with_context(|| format!("Applying override '{raw}'"))?;
    }
    Ok(mappings)
}

/// Mapping must cover every required field before rows are touched.
fn ensure_complete(mappings: &MappingSet, entity: EntityType) -> Result<()> {
    let validation = validate_mapping(mappings, entity);
    if !validation.valid {
        bail!(
            "Required field(s) not mapped: {}. Use --set 'Header=field' to map them",
            validation.missing_required.join(", ")
        );
    }
    Ok(())
}

fn import_config(
    entity: EntityType,
    duplicate_key: Option<&str>,
) -> Result<ImportConfig> {
    let mut config = ImportConfig::for_entity(entity);
    if let Some(key) = duplicate_key {
        config.duplicate_key = key.trim().to_string();
    }
    config.validate(entity)?;
    Ok(config)
}

fn handle_inspect(args: &cli::InspectArgs, settings: &ImportSettings) -> Result<()> {
    let parsed = load_input(&args.input, settings)?;
    println!(
        "{} ({}): {} row(s), {} column(s)",
        parsed.file_name,
        parsed.format,
        parsed.total_rows,
        parsed.headers.len()
    );
    print!("{}", table::render_preview(&parsed, args.rows));
    Ok(())
}

#[derive(Serialize)]
struct MapOutput<'a> {
    mapping: &'a MappingSet,
    validation: mapping::MappingValidation,
}

fn handle_map(args: &cli::MapArgs, settings: &ImportSettings) -> Result<()> {
    let parsed = load_input(&args.input, settings)?;
    let mappings = resolve_mappings(&parsed, &args.mapping, settings)?;
    let validation = validate_mapping(&mappings, args.mapping.entity);
    if let Some(path) = &args.output {
        mappings
            .save(path)
            .with_context(|| format!("Writing mapping to {path:?}"))?;
        info!("Mapping written to {path:?}");
    }
    if args.json {
        return write_json(
            None,
            &MapOutput {
                mapping: &mappings,
                validation,
            },
        );
    }
    print!("{}", table::render_mapping(&mappings));
    if validation.valid {
        println!("All required fields are mapped.");
    } else {
        println!(
            "Missing required field(s): {}",
            validation.missing_required.join(", ")
        );
    }
    Ok(())
}

fn handle_validate(args: &cli::ValidateArgs, settings: &ImportSettings) -> Result<()> {
    let entity = args.mapping.entity;
    let parsed = load_input(&args.input, settings)?;
    let mappings = resolve_mappings(&parsed, &args.mapping, settings)?;
    ensure_complete(&mappings, entity)?;
    let config = import_config(entity, args.duplicate_key.as_deref())?;

    let store: Box<dyn RecordStore> = match &args.store {
        Some(path) => Box::new(
            JournalStore::open(path).with_context(|| format!("Opening record store {path:?}"))?,
        ),
        None => Box::new(MemoryStore::new()),
    };
    let sample = import::validate_sample(
        &parsed,
        &mappings,
        entity,
        &config.duplicate_key,
        store.as_ref(),
        settings,
    )?;
    if let Some(path) = &args.error_report {
        report::write_error_report(Some(path.as_path()), &sample.errors)
            .with_context(|| format!("Writing error report to {path:?}"))?;
    }
    if args.json {
        return write_json(None, &sample);
    }
    println!(
        "Checked {} of {} row(s): {} valid, {} invalid, {} duplicate(s)",
        sample.rows_checked, parsed.total_rows, sample.valid, sample.invalid, sample.duplicates
    );
    if !sample.errors.is_empty() {
        print!(
            "{}",
            table::render_errors(&sample.errors, ERROR_DISPLAY_LIMIT)
        );
    }
    Ok(())
}

fn handle_import(args: &cli::ImportArgs, settings: &ImportSettings) -> Result<()> {
    let entity = args.mapping.entity;
    let parsed = load_input(&args.input, settings)?;
    let mappings = resolve_mappings(&parsed, &args.mapping, settings)?;
    ensure_complete(&mappings, entity)?;
    let mut config = import_config(entity, args.duplicate_key.as_deref())?;
    config.duplicate_handling = args.duplicates.into();
    config.skip_invalid_rows = args.skip_invalid;

    let mut store = JournalStore::open(&args.store)
        .with_context(|| format!("Opening record store {:?}", args.store))?;
    let result = import::execute(&parsed, &mappings, entity, &config, &mut store, settings)?;
    info!(
        "{} record(s) now journaled in {:?}",
        store.memory().len(),
        store.path()
    );

    if let Some(path) = &args.error_report {
        report::write_error_report(Some(path.as_path()), &result.errors)
            .with_context(|| format!("Writing error report to {path:?}"))?;
    }
    if let Some(path) = &args.result_json {
        write_json(Some(path.as_path()), &result)?;
    }
    println!(
        "Imported {}, updated {}, skipped {}, failed {} of {} row(s)",
        result.imported, result.updated, result.skipped, result.failed, result.total
    );
    if !result.errors.is_empty() {
        print!(
            "{}",
            table::render_errors(&result.errors, ERROR_DISPLAY_LIMIT)
        );
    }
    Ok(())
}

fn handle_template(args: &cli::TemplateArgs) -> Result<()> {
    let output = args.output.as_deref().filter(|p| !io_utils::is_dash(p));
    match (args.format, output) {
        (TemplateFormat::Csv, Some(path)) => {
            let file =
                File::create(path).with_context(|| format!("Creating template {path:?}"))?;
            report::write_csv_template(BufWriter::new(file), args.entity)?;
        }
        (TemplateFormat::Csv, None) => {
            report::write_csv_template(io::stdout().lock(), args.entity)?;
        }
        (TemplateFormat::Xlsx, Some(path)) => report::write_xlsx_template(path, args.entity)?,
        (TemplateFormat::Xlsx, None) => bail!("An XLSX template needs --output <file>"),
    }
    if let Some(path) = output {
        info!("{} template written to {path:?}", args.entity.display_name());
    }
    Ok(())
}

/// Pretty JSON to `path`, or stdout when `path` is `None` or `-`.
fn write_json<T: Serialize + ?Sized>(path: Option<&Path>, value: &T) -> Result<()> {
    match path.filter(|p| !io_utils::is_dash(p)) {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Creating {path:?}"))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, value)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
