//! fedmeta CLI - resolve and watch federation metadata.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use fedmeta_core::{
    CriteriaSet, Criterion, EntityDescriptor, MetadataError, MetadataResolver, MetadataSource,
    ResolverConfig,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// fedmeta - federation metadata resolution.
///
/// Loads federation metadata from a file or URL, optionally mirrors the URL
/// to a local backup file, and answers lookups by entity, role and protocol.
#[derive(Parser)]
#[command(name = "fedmeta")]
#[command(version = VERSION)]
#[command(about = "Resolve and watch federation metadata")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Metadata file
    #[arg(long, conflicts_with = "url", required_unless_present = "url")]
    file: Option<PathBuf>,

    /// Metadata URL
    #[arg(long)]
    url: Option<String>,

    /// Backup file for the metadata URL
    #[arg(long, requires = "url")]
    backup: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,
}

impl SourceArgs {
    fn source(&self) -> Result<MetadataSource, MetadataError> {
        match (&self.file, &self.url, &self.backup) {
            (Some(path), _, _) => Ok(MetadataSource::filesystem(path)),
            (None, Some(url), Some(backup)) => MetadataSource::file_backed_http(url, backup),
            (None, Some(url), None) => MetadataSource::http(url),
            (None, None, _) => Err(MetadataError::configuration("Either --file or --url is required")),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Load metadata once and look up entities
    Resolve {
        #[command(flatten)]
        source: SourceArgs,

        /// Entity identifier
        #[arg(long)]
        entity_id: Option<String>,

        /// Role kind (idpSso, spSso, attributeAuthority, authnAuthority, pdp)
        #[arg(long)]
        role: Option<String>,

        /// Protocol identifier
        #[arg(long)]
        protocol: Option<String>,

        /// Exclude expired entities
        #[arg(long)]
        require_valid: bool,

        /// Start with empty metadata if the source cannot be loaded
        #[arg(long)]
        no_fail_fast: bool,
    },

    /// Keep metadata refreshed in the background until interrupted
    Watch {
        #[command(flatten)]
        source: SourceArgs,

        /// Minimum refresh delay in seconds
        #[arg(long, default_value = "300")]
        min_delay: u64,

        /// Maximum refresh delay in seconds
        #[arg(long, default_value = "14400")]
        max_delay: u64,
    },
}

fn entity_json(entity: &EntityDescriptor) -> serde_json::Value {
    serde_json::json!({
        "entity_id": entity.entity_id,
        "organization": entity.organization,
        "valid_until": entity.valid_until,
        "roles": entity.roles.iter().map(|r| serde_json::json!({
            "kind": r.kind,
            "protocols": r.protocols,
            "keys": r.keys.iter().map(|k| serde_json::json!({
                "use": k.usage,
                "algorithm": k.algorithm,
                "key_name": k.key_name,
                "fingerprint": fedmeta_crypto::key_fingerprint(&k.public_key),
            })).collect::<Vec<_>>(),
            "endpoints": r.endpoints,
        })).collect::<Vec<_>>(),
    })
}

fn print_entity(entity: &EntityDescriptor) {
    println!("{}", entity.entity_id);
    if let Some(org) = &entity.organization {
        println!("  Organization: {org}");
    }
    if let Some(until) = entity.valid_until {
        println!("  Valid until:  {until}");
    }
    for role in &entity.roles {
        println!("  Role: {}", role.kind);
        for protocol in &role.protocols {
            println!("    Protocol: {protocol}");
        }
        for key in &role.keys {
            println!(
                "    Key: {} {} {}",
                key.usage,
                key.algorithm,
                fedmeta_crypto::key_fingerprint(&key.public_key)
            );
        }
        for endpoint in &role.endpoints {
            println!("    Endpoint: {} {}", endpoint.binding, endpoint.location);
        }
    }
}

fn criteria(
    entity_id: Option<String>,
    role: Option<String>,
    protocol: Option<String>,
) -> Result<Option<CriteriaSet>, MetadataError> {
    let mut set = CriteriaSet::new();
    if let Some(id) = entity_id {
        set.insert(Criterion::from_pair("entityID", &id)?);
    }
    if let Some(role) = role {
        set.insert(Criterion::from_pair("role", &role)?);
    }
    if let Some(protocol) = protocol {
        set.insert(Criterion::from_pair("protocol", &protocol)?);
    }
    // No criteria lists every entity
    Ok((!set.is_empty()).then_some(set))
}

async fn run_resolve(
    source: MetadataSource,
    criteria: Option<CriteriaSet>,
    timeout: Duration,
    require_valid: bool,
    fail_fast: bool,
    json: bool,
) -> Result<(), MetadataError> {
    let config = ResolverConfig::builder("cli", source)
        .request_timeout(timeout)
        .require_valid_metadata(require_valid)
        .fail_fast_initialization(fail_fast)
        .background_refresh(false)
        .build()?;
    let resolver = MetadataResolver::builder(config).initialize().await?;

    let entities: Vec<Arc<EntityDescriptor>> = match &criteria {
        Some(criteria) => resolver.resolve(criteria)?.collect(),
        None => resolver.snapshot().entities().cloned().collect(),
    };
    let state = resolver.state();
    let described = criteria.map_or_else(|| "{}".to_string(), |c| c.to_string());

    if json {
        let output = serde_json::json!({
            "criteria": described,
            "matches": entities.len(),
            "entities": entities.iter().map(|e| entity_json(e)).collect::<Vec<_>>(),
            "state": state,
        });
        match serde_json::to_string_pretty(&output) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("Failed to encode output: {e}"),
        }
    } else {
        if state.degraded {
            println!("WARNING: serving metadata from backup file\n");
        }
        if let Some(failure) = &state.last_failure {
            println!("WARNING: metadata could not be loaded: {}\n", failure.message);
        }
        println!("{} of {} entities match {}\n", entities.len(), state.entity_count, described);
        for entity in &entities {
            print_entity(entity);
        }
    }

    resolver.shutdown().await;
    Ok(())
}

async fn run_watch(
    source: MetadataSource,
    timeout: Duration,
    min_delay: Duration,
    max_delay: Duration,
) -> Result<(), MetadataError> {
    let config = ResolverConfig::builder("watch", source)
        .request_timeout(timeout)
        .min_refresh_delay(min_delay)
        .max_refresh_delay(max_delay)
        .fail_fast_initialization(false)
        .build()?;
    let resolver = MetadataResolver::builder(config).initialize().await?;

    let state = resolver.state();
    println!(
        "Watching {} ({} entities, next refresh {})",
        resolver.config().source,
        state.entity_count,
        state
            .next_scheduled_refresh
            .map_or_else(|| "not scheduled".to_string(), |at| at.to_rfc3339()),
    );
    println!("Press Ctrl-C to stop.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Failed to listen for Ctrl-C: {e}");
    }

    resolver.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let json_output = cli.format == "json";

    // Quiet logs in JSON mode so stdout stays parseable
    if json_output {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::ERROR)
            .with_target(false)
            .init();
    } else if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_target(false)
            .init();
    }

    let result = match cli.command {
        Commands::Resolve {
            source,
            entity_id,
            role,
            protocol,
            require_valid,
            no_fail_fast,
        } => match (source.source(), criteria(entity_id, role, protocol)) {
            (Ok(metadata_source), Ok(set)) => {
                run_resolve(
                    metadata_source,
                    set,
                    Duration::from_secs(source.timeout),
                    require_valid,
                    !no_fail_fast,
                    json_output,
                )
                .await
            },
            (Err(e), _) | (_, Err(e)) => Err(e),
        },
        Commands::Watch {
            source,
            min_delay,
            max_delay,
        } => match source.source() {
            Ok(metadata_source) => {
                run_watch(
                    metadata_source,
                    Duration::from_secs(source.timeout),
                    Duration::from_secs(min_delay),
                    Duration::from_secs(max_delay),
                )
                .await
            },
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            if e.is_caller_error() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        },
    }
}
