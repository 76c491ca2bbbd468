use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use elastic_subgraph::Configuration;
use elastic_subgraph::build_federated_schema;
use elastic_subgraph::mapping::FieldMapping;
use elastic_subgraph::mapping::translate;
use elastic_subgraph::store::memory::InMemoryStore;
use indexmap::IndexSet;
use tracing_subscriber::EnvFilter;

/// CLI arguments. See <https://docs.rs/clap/latest/clap/_derive/index.html>
#[derive(Parser)]
struct Args {
    /// Log level (off|error|warn|info|debug|trace). `RUST_LOG` takes precedence.
    #[arg(long = "log", default_value = "info", global = true)]
    env_filter: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Prints the federated SDL generated from a configuration file
    Compose {
        /// The path to the configuration file
        config: PathBuf,
        /// Print the whole merged schema, federation definitions included
        #[arg(long)]
        full: bool,
    },
    /// Prints the typed field tree of a mapping as JSON
    Translate {
        /// The path to a JSON or YAML mapping document, or `-` for stdin
        mapping: PathBuf,
        /// Name of the entity type
        #[arg(long, default_value = "Document")]
        type_name: String,
        /// Field names or dotted paths holding arrays of values
        #[arg(long, value_delimiter = ',')]
        plural: Vec<String>,
    },
    /// Prints the JSON schema of the configuration file
    ConfigSchema,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let env_filter = std::env::var("RUST_LOG").unwrap_or(args.env_filter);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&env_filter).context("could not parse log")?)
        .with_writer(io::stderr)
        .init();

    match args.command {
        Command::Compose { config, full } => compose(&config, full),
        Command::Translate {
            mapping,
            type_name,
            plural,
        } => translate_mapping(&mapping, &type_name, plural),
        Command::ConfigSchema => {
            let schema = Configuration::json_schema();
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}

fn compose(path: &Path, full: bool) -> Result<()> {
    let configuration = Configuration::from_file(path)?;
    // Composition only prints type definitions: nothing is read from the store.
    let store = Arc::new(InMemoryStore::new());
    let schema = build_federated_schema(&configuration, store, None)?;
    if full {
        println!("{}", schema)
    } else {
        println!("{}", schema.sdl())
    }
    Ok(())
}

fn translate_mapping(path: &Path, type_name: &str, plural: Vec<String>) -> Result<()> {
    let input = if path == Path::new("-") {
        io::read_to_string(io::stdin())?
    } else {
        fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))?
    };
    // YAML is a superset of JSON
    let document: serde_json::Value =
        serde_yaml::from_str(&input).context("could not parse mapping document")?;
    let mapping = FieldMapping::from_json(&document)?;
    let plural_fields: IndexSet<String> = plural.into_iter().collect();
    let fields = translate(type_name, &mapping, &plural_fields)?;
    println!("{}", serde_json::to_string_pretty(&fields)?);
    Ok(())
}
