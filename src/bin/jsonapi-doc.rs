//! JSON:API document CLI
//!
//! Command-line interface for normalizing and validating JSON:API documents.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use jsonapi_resource::{
    load_document_auto, load_registry, validate_document_shape, Document, DocumentOptions,
    InMemoryDatasource, ResourceFactory, ValidateError,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jsonapi-doc")]
#[command(about = "Normalize and validate JSON:API documents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a document through the resource model and print its canonical form
    Normalize {
        /// Document source: file path or URL (http:// or https://)
        document: String,

        /// Registry file declaring the resource types the document may contain
        #[arg(long)]
        registry: PathBuf,

        /// Prefix for synthesized self links
        #[arg(long, default_value = "")]
        base_url: String,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,

        /// Check the raw document against the structural schema first
        #[arg(long)]
        strict: bool,
    },

    /// Check a document's structure, and optionally its resource types
    Validate {
        /// Document source: file path or URL (http:// or https://)
        document: String,

        /// Also build the document against this registry
        #[arg(long)]
        registry: Option<PathBuf>,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Normalize {
            document,
            registry,
            base_url,
            output,
            pretty,
            strict,
        } => run_normalize(NormalizeArgs {
            document,
            registry,
            base_url,
            output,
            pretty,
            strict,
        }),

        Commands::Validate {
            document,
            registry,
            json,
        } => run_validate(&document, registry.as_deref(), json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

struct NormalizeArgs {
    document: String,
    registry: PathBuf,
    base_url: String,
    output: Option<PathBuf>,
    pretty: bool,
    strict: bool,
}

fn run_normalize(args: NormalizeArgs) -> Result<(), u8> {
    let raw = load_document_auto(&args.document).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    if args.strict {
        if let Err(e) = validate_document_shape(&raw) {
            report_validate_error(false, e);
            return Err(1);
        }
    }

    let factory = build_factory(&args.registry, DocumentOptions::new(args.base_url)).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let mut document = Document::from_value(&raw, &factory).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let rendered = document.to_json_string(args.pretty).map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        e.exit_code() as u8
    })?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, &rendered).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
            debug!(path = %path.display(), "Wrote normalized document");
        }
        None => {
            println!("{}", rendered);
        }
    }

    Ok(())
}

fn run_validate(source: &str, registry: Option<&Path>, json_output: bool) -> Result<(), u8> {
    let raw = load_document_auto(source).map_err(|e| {
        report_error(json_output, &format!("loading document: {}", e));
        e.exit_code() as u8
    })?;

    if let Err(e) = validate_document_shape(&raw) {
        let code = e.exit_code() as u8;
        report_validate_error(json_output, e);
        return Err(code);
    }

    if let Some(registry) = registry {
        let factory = build_factory(registry, DocumentOptions::default()).map_err(|e| {
            report_error(json_output, &format!("loading registry: {}", e));
            e.exit_code() as u8
        })?;
        Document::from_value(&raw, &factory).map_err(|e| {
            report_error(json_output, &e.to_string());
            e.exit_code() as u8
        })?;
    }

    if json_output {
        println!(r#"{{"valid":true}}"#);
    } else {
        println!("Valid");
    }
    Ok(())
}

fn build_factory(
    registry: &Path,
    options: DocumentOptions,
) -> Result<ResourceFactory, jsonapi_resource::DocumentError> {
    let schemas = load_registry(registry)?;
    let mut factory =
        ResourceFactory::new(Arc::new(InMemoryDatasource::new())).with_options(options);
    for schema in schemas {
        debug!(resource_type = schema.resource_type(), "Registered resource type");
        factory.register(schema);
    }
    Ok(factory)
}

fn report_validate_error(json_output: bool, error: ValidateError) {
    match error {
        ValidateError::Invalid { errors } => {
            if json_output {
                let output = serde_json::json!({
                    "valid": false,
                    "errors": errors
                });
                println!("{}", output);
            } else {
                eprintln!("Validation failed:");
                for error in errors {
                    eprintln!("  {}", error);
                }
            }
        }
        ValidateError::Document(e) => report_error(json_output, &e.to_string()),
    }
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", serde_json::json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}
