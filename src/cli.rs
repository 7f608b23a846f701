use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{import::DuplicateHandling, schema::EntityType};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Import contacts, leads and clients from CSV or Excel files",
    long_about = None
)]
pub struct Cli {
    /// Optional YAML file overriding pipeline settings
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the importable fields of an entity
    Fields(FieldsArgs),
    /// Parse an upload and preview its first rows
    Inspect(InspectArgs),
    /// Suggest a column mapping, optionally applying manual overrides
    Map(MapArgs),
    /// Validate a sample of rows and count duplicates against the store
    Validate(ValidateArgs),
    /// Validate, transform and write every row to the record store
    Import(ImportArgs),
    /// Write an empty import template for an entity
    Template(TemplateArgs),
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// Uploaded file (.csv, .xlsx or .xls)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|'); sniffed when omitted
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of a CSV upload (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct MappingArgs {
    /// Entity the rows describe (contacts, leads, clients)
    #[arg(short, long, value_parser = parse_entity)]
    pub entity: EntityType,
    /// Saved mapping file applied on top of the automatic suggestion
    #[arg(short, long)]
    pub mapping: Option<PathBuf>,
    /// Manual override `Header=field`; an empty field skips the column
    #[arg(long = "set", action = clap::ArgAction::Append)]
    pub overrides: Vec<String>,
}

#[derive(Debug, Args)]
pub struct FieldsArgs {
    #[arg(short, long, value_parser = parse_entity)]
    pub entity: EntityType,
    /// Emit the field definitions as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Number of rows to display
    #[arg(long, default_value_t = 10)]
    pub rows: usize,
}

#[derive(Debug, Args)]
pub struct MapArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub mapping: MappingArgs,
    /// Save the resulting mapping as YAML
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Emit the mapping and its completeness check as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub mapping: MappingArgs,
    /// Record journal to check duplicates against
    #[arg(short, long)]
    pub store: Option<PathBuf>,
    /// Field used to detect duplicates (defaults to email for contacts, name otherwise)
    #[arg(long = "duplicate-key")]
    pub duplicate_key: Option<String>,
    /// Write the sample errors as CSV (`-` for stdout)
    #[arg(long = "error-report")]
    pub error_report: Option<PathBuf>,
    /// Emit the sample report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
#[value(rename_all = "kebab-case")]
pub enum DuplicateMode {
    #[default]
    Skip,
    Update,
    #[value(alias = "create_new")]
    CreateNew,
}

impl From<DuplicateMode> for DuplicateHandling {
    fn from(mode: DuplicateMode) -> Self {
        match mode {
            DuplicateMode::Skip => DuplicateHandling::Skip,
            DuplicateMode::Update => DuplicateHandling::Update,
            DuplicateMode::CreateNew => DuplicateHandling::CreateNew,
        }
    }
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub mapping: MappingArgs,
    /// Record journal receiving the imported rows (created when missing)
    #[arg(short, long)]
    pub store: PathBuf,
    /// What to do when a row matches an existing record
    #[arg(long = "duplicates", value_enum, default_value = "skip")]
    pub duplicates: DuplicateMode,
    /// Field used to detect duplicates (defaults to email for contacts, name otherwise)
    #[arg(long = "duplicate-key")]
    pub duplicate_key: Option<String>,
    /// Skip invalid rows instead of counting them as failed
    #[arg(long = "skip-invalid")]
    pub skip_invalid: bool,
    /// Write every row error as CSV (`-` for stdout)
    #[arg(long = "error-report")]
    pub error_report: Option<PathBuf>,
    /// Write the full import result as JSON (`-` for stdout)
    #[arg(long = "result-json")]
    pub result_json: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum TemplateFormat {
    Csv,
    Xlsx,
}

#[derive(Debug, Args)]
pub struct TemplateArgs {
    #[arg(short, long, value_parser = parse_entity)]
    pub entity: EntityType,
    #[arg(short, long, value_enum, default_value = "csv")]
    pub format: TemplateFormat,
    /// Destination file (stdout if omitted; required for xlsx)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

pub fn parse_entity(value: &str) -> Result<EntityType, String> {
    value.parse::<EntityType>().map_err(|err| err.to_string())
}

/// Splits a `Header=field` override; the last `=` separates the two.
pub fn parse_assignment(value: &str) -> Result<(&str, Option<&str>), String> {
    let (column, field) = value
        .rsplit_once('=')
        .ok_or_else(|| format!("Override '{value}' must look like 'Header=field'"))?;
    let column = column.trim();
    if column.is_empty() {
        return Err(format!("Override '{value}' names no column"));
    }
    let field = field.trim();
    let field = (!field.is_empty() && field != "-").then_some(field);
    Ok((column, field))
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
