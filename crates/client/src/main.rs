//! fhir-client: command-line access to a FHIR R4 server.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fhir_client::{
    AuthSupplier, CapabilityMode, ClientConfig, ClientError, FhirClient, HistoryParameters,
    HistoryScope, RequestOptions,
};
use fhir_client::fhir_core::{ResourceKey, SearchParameters};

#[derive(Debug, Parser)]
#[command(name = "fhir-client", version, about = "Talk to a FHIR R4 server")]
struct Cli {
    /// Server base URL, e.g. https://hapi.fhir.org/baseR4
    #[arg(long, env = "FHIR_BASE_URL")]
    base_url: String,

    /// Bearer token, or a full Authorization value when it contains a space
    #[arg(long, env = "FHIR_AUTH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// fhirVersion parameter of the Accept header
    #[arg(long, env = "FHIR_VERSION")]
    fhir_version: Option<String>,

    #[arg(long, env = "FHIR_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read the current version of a resource
    Read { resource_type: String, id: String },

    /// Read a specific version of a resource
    Vread {
        resource_type: String,
        id: String,
        version_id: String,
    },

    /// Search a resource type with a raw query string
    Search {
        resource_type: String,
        #[arg(default_value = "")]
        query: String,

        /// Follow `next` links and print every match
        #[arg(long)]
        all: bool,
    },

    /// Read system, type or instance history
    History {
        resource_type: Option<String>,
        id: Option<String>,

        #[arg(long)]
        count: Option<u32>,

        #[arg(long)]
        since: Option<String>,
    },

    /// Fetch the server's CapabilityStatement
    Capabilities {
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },

    /// Delete a resource, e.g. `Patient/123`
    Delete { target: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Full,
    Normative,
    Terminology,
}

impl From<ModeArg> for CapabilityMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => CapabilityMode::Full,
            ModeArg::Normative => CapabilityMode::Normative,
            ModeArg::Terminology => CapabilityMode::Terminology,
        }
    }
}

fn build_client(cli: &Cli) -> Result<FhirClient, ClientError> {
    let mut config = ClientConfig::new(&cli.base_url)?;
    if let Some(token) = cli.token.as_deref().filter(|t| !t.trim().is_empty()) {
        config = config.with_auth(AuthSupplier::from_token(token));
    }
    if let Some(version) = &cli.fhir_version {
        config = config.with_fhir_version(version.clone());
    }
    if let Some(secs) = cli.timeout_secs {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    FhirClient::new(config)
}

fn print_json(value: &impl Serialize) -> Result<(), ClientError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<(), ClientError> {
    let client = build_client(&cli)?;

    match cli.command {
        Command::Read { resource_type, id } => {
            match client.read(resource_type.as_str(), &id, RequestOptions::new()).await? {
                Some(resource) => print_json(&resource)?,
                None => tracing::warn!(resource_type = %resource_type, id = %id, "Resource not found"),
            }
        }
        Command::Vread {
            resource_type,
            id,
            version_id,
        } => {
            let resource = client
                .vread(resource_type.as_str(), &id, &version_id, RequestOptions::new())
                .await?;
            match resource {
                Some(resource) => print_json(&resource)?,
                None => tracing::warn!(resource_type = %resource_type, id = %id, version_id = %version_id, "Version not found"),
            }
        }
        Command::Search {
            resource_type,
            query,
            all,
        } => {
            let params = SearchParameters::from(query);
            if all {
                let results = client
                    .search_all_pages(resource_type.as_str(), params, RequestOptions::new())
                    .await?;
                tracing::info!(matches = results.matches().len(), "Search complete");
                print_json(results.bundle())?;
            } else {
                let page = client
                    .search(resource_type.as_str(), params, RequestOptions::new())
                    .await?;
                print_json(page.bundle())?;
            }
        }
        Command::History {
            resource_type,
            id,
            count,
            since,
        } => {
            let scope = match (resource_type, id) {
                (Some(resource_type), Some(id)) => {
                    HistoryScope::Instance(ResourceKey::new(resource_type, id))
                }
                (Some(resource_type), None) => HistoryScope::Type(resource_type),
                (None, _) => HistoryScope::System,
            };
            let params = HistoryParameters {
                count,
                since,
                ..Default::default()
            };
            let page = client.history(scope, params, RequestOptions::new()).await?;
            print_json(page.bundle())?;
        }
        Command::Capabilities { mode } => {
            let statement = client
                .capabilities(mode.map(CapabilityMode::from), RequestOptions::new())
                .await?;
            print_json(&statement)?;
        }
        Command::Delete { target } => {
            client.delete(target.as_str(), RequestOptions::new()).await?;
            tracing::info!(resource = %target, "Deleted");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,fhir_client=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, kind = ?e.kind(), "Request failed");
            ExitCode::FAILURE
        }
    }
}
