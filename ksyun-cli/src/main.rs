use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::debug;
use serde::Deserialize;

use ksyun_core::provider::{Provider, ResourceAdapter};
use ksyun_core::resource::{ResourceData, Value};
use ksyun_core::schema::ResourceSchema;
use ksyun_provider::{KsyunProvider, ProviderConfig, ScriptedTransport};

#[derive(Parser)]
#[command(name = "ksyun")]
#[command(about = "Inspect Kingsoft Cloud resource definitions offline", long_about = None)]
struct Cli {
    /// Provider config file (JSON); KSYUN_* variables are used otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported resource types and their attributes
    Resources,
    /// Validate a resource definition file
    Validate {
        /// Path to the resources file
        #[arg(default_value = "resources.json")]
        file: PathBuf,
    },
    /// Show the API calls that would create each resource
    Render {
        /// Path to the resources file
        #[arg(default_value = "resources.json")]
        file: PathBuf,
    },
}

/// Resources file: `{"resources": [{"type": "vpc", "name": "main", "attributes": {...}}]}`
#[derive(Debug, Deserialize)]
struct Document {
    resources: Vec<ResourceSpec>,
}

#[derive(Debug, Deserialize)]
struct ResourceSpec {
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    #[serde(default)]
    attributes: HashMap<String, Value>,
}

impl ResourceSpec {
    fn label(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }

    fn data(&self) -> ResourceData {
        ResourceData::planned(self.resource_type.clone(), self.attributes.clone())
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = load_provider(cli.config.as_deref()).and_then(|provider| match &cli.command {
        Commands::Resources => run_resources(&provider),
        Commands::Validate { file } => run_validate(&provider, file),
        Commands::Render { file } => run_render(&provider, file),
    });

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Provider over a transport that answers nothing; no call leaves the process
fn load_provider(config_path: Option<&Path>) -> Result<KsyunProvider, String> {
    let mut config = match config_path {
        Some(path) => ProviderConfig::from_file(path).map_err(|e| e.to_string())?,
        None => ProviderConfig::from_env().map_err(|e| e.to_string())?,
    };
    // Credentials are never used offline
    for field in [&mut config.access_key, &mut config.secret_key] {
        if field.is_empty() {
            *field = "offline".to_string();
        }
    }
    if config.region.is_empty() {
        config.region = "cn-beijing-6".to_string();
    }
    debug!("offline provider for region {}", config.region);

    KsyunProvider::new(config, Arc::new(ScriptedTransport::new())).map_err(|e| e.to_string())
}

fn load_document(file: &Path) -> Result<Document, String> {
    let content = fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("Parse error: {}", e))
}

fn run_resources(provider: &KsyunProvider) -> Result<(), String> {
    for schema in provider.resource_types() {
        println!("{}", schema.resource_type.cyan().bold());
        print_schema(&schema);
        println!();
    }
    Ok(())
}

fn print_schema(schema: &ResourceSchema) {
    for attr in schema.sorted() {
        let mut flags = Vec::new();
        if attr.required {
            flags.push("required");
        }
        if attr.read_only {
            flags.push("read-only");
        } else if attr.computed {
            flags.push("computed");
        }
        if attr.force_new {
            flags.push("force-new");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" ({})", flags.join(", "))
        };
        println!("  {}: {}{}", attr.name, attr.attr_type, flags.dimmed());
    }
}

/// Schema validation plus the adapter's own checks, without sending anything
fn check(adapter: &dyn ResourceAdapter, spec: &ResourceSpec) -> Result<(), String> {
    let data = spec.data();
    adapter
        .schema()
        .validate(&data.state())
        .map_err(|errors| {
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        })?;
    adapter
        .create_process(&data)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn run_validate(provider: &KsyunProvider, file: &Path) -> Result<(), String> {
    let document = load_document(file)?;

    println!("{}", "Validating...".cyan());

    let mut all_errors = Vec::new();
    for spec in &document.resources {
        let result = provider
            .adapter(&spec.resource_type)
            .map_err(|e| e.to_string())
            .and_then(|adapter| check(adapter, spec));
        if let Err(e) = result {
            all_errors.push(format!("{}: {}", spec.label(), e));
        }
    }

    if !all_errors.is_empty() {
        return Err(all_errors.join("\n"));
    }

    println!(
        "{}",
        format!(
            "✓ {} resources validated successfully.",
            document.resources.len()
        )
        .green()
        .bold()
    );
    for spec in &document.resources {
        println!("  • {}", spec.label());
    }
    Ok(())
}

fn run_render(provider: &KsyunProvider, file: &Path) -> Result<(), String> {
    let document = load_document(file)?;

    println!("{}", "Create calls:".cyan().bold());
    println!();

    for spec in &document.resources {
        let adapter = provider.adapter(&spec.resource_type).map_err(|e| e.to_string())?;
        check(adapter, spec).map_err(|e| format!("{}: {}", spec.label(), e))?;
        let process = adapter
            .create_process(&spec.data())
            .map_err(|e| format!("{}: {}", spec.label(), e))?;

        println!("{} {}", "+".green().bold(), spec.label().bold());
        for call in process.describe() {
            println!("    {}", call.action.yellow());
            for (name, value) in &call.params {
                println!("      {} = {}", name, value);
            }
        }
        println!();
    }
    Ok(())
}
