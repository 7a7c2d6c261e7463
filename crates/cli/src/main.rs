use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use forma_apply::Lifecycle;
use forma_core::{SynthesisError, Value};
use forma_persist::{SqliteStore, Store, StoredState};
use forma_registry::Registry;
use forma_schema::{Field, FieldType, Presence, ResourceDescriptor, ValidatorSpec};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "formactl", version, about = "Synthesize Kubernetes resource manifests from typed configs")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Extra directory of CRD or descriptor YAML files to register
    #[arg(long = "crd-dir", env = "FORMA_CRD_DIR", global = true)]
    crd_dir: Option<PathBuf>,

    /// State database (default: ~/.forma/state.db)
    #[arg(long = "db", env = "FORMA_DB_PATH", global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered resource types
    Types,
    /// Print the field tree of a resource type
    Schema {
        /// Resource type, e.g. "k8s_couchbase_com_couchbase_replication_v2"
        type_name: String,
    },
    /// Synthesize a manifest without touching the state store
    Synth {
        type_name: String,
        /// Config file ("-" for stdin)
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
    /// Show what apply would do for an address
    Plan {
        /// State address, e.g. "couchbase/repl-1"
        address: String,
        type_name: String,
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Also print the synthesized manifest
        #[arg(long = "show-manifest", action = ArgAction::SetTrue)]
        show_manifest: bool,
    },
    /// Synthesize and record the state for an address
    Apply {
        address: String,
        type_name: String,
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Write a new version even when nothing changed
        #[arg(long = "force", action = ArgAction::SetTrue)]
        force: bool,
    },
    /// Show the stored state of an address
    Show {
        address: String,
        /// List the retained history instead of the latest manifest
        #[arg(long = "history", action = ArgAction::SetTrue)]
        history: bool,
        /// Print the latest manifest decoded back into config form
        #[arg(long = "config", action = ArgAction::SetTrue, conflicts_with = "history")]
        config: bool,
    },
    /// Forget an address and its history
    Rm { address: String },
    /// List stored addresses
    Ls,
    /// State store commands
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
}

#[derive(Subcommand, Debug)]
enum StateCommands {
    /// List stored addresses
    Ls,
}

fn init_tracing() {
    let env = std::env::var("FORMA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("FORMA_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid FORMA_METRICS_ADDR; expected host:port");
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(lines) = validation_lines(&e) {
                for line in lines { eprintln!("{}", line); }
                return ExitCode::from(1);
            }
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let registry = load_registry(cli.crd_dir.as_deref())?;
    match cli.command {
        Commands::Types => {
            info!(count = registry.len(), "types invoked");
            match cli.output {
                Output::Human => {
                    println!("{:<56} {:<32} KIND", "TYPE", "API VERSION");
                    for rt in registry.iter() {
                        println!("{:<56} {:<32} {}", rt.type_name, rt.identity.api_version, rt.identity.kind);
                    }
                }
                Output::Json => {
                    #[derive(serde::Serialize)]
                    struct Row { type_name: String, api_version: String, kind: String, description: Option<String> }
                    let rows: Vec<_> = registry
                        .iter()
                        .map(|rt| Row {
                            type_name: rt.type_name.clone(),
                            api_version: rt.identity.api_version.clone(),
                            kind: rt.identity.kind.clone(),
                            description: rt.description.clone(),
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }
        }
        Commands::Schema { type_name } => {
            let rt = registry.resolve(&type_name)?;
            match cli.output {
                Output::Human => {
                    println!("{} ({} {})", rt.type_name, rt.identity.api_version, rt.identity.kind);
                    if let Some(d) = &rt.description { println!("  {}", d); }
                    for line in field_tree(rt.schema.fields()) { println!("{}", line); }
                }
                Output::Json => {
                    let mut d = ResourceDescriptor::from_schema(&rt.identity, &rt.schema);
                    d.type_name = Some(rt.type_name.clone());
                    d.description = rt.description.clone();
                    println!("{}", serde_json::to_string_pretty(&d)?);
                }
            }
        }
        Commands::Synth { type_name, file } => {
            let rt = registry.resolve(&type_name)?;
            let config = read_config(&file)?;
            let state = forma_synth::synthesize(&rt.schema, &rt.identity, &config)?;
            debug!(version = %state.version, "synth done");
            match cli.output {
                Output::Human => print!("{}", state.manifest),
                Output::Json => println!("{}", serde_json::to_string_pretty(&state)?),
            }
        }
        Commands::Plan { address, type_name, file, show_manifest } => {
            let config = read_config(&file)?;
            let store = open_store(cli.db.as_deref())?;
            let plan = Lifecycle::new(&registry, &store).plan(&address, &type_name, &config)?;
            match cli.output {
                Output::Human => {
                    println!(
                        "{} {} ({}): adds={} updates={} removes={}",
                        plan.action, plan.address, plan.type_name, plan.summary.adds, plan.summary.updates, plan.summary.removes
                    );
                    if show_manifest { print!("{}", plan.state.manifest); }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
            }
        }
        Commands::Apply { address, type_name, file, force } => {
            let config = read_config(&file)?;
            let store = open_store(cli.db.as_deref())?;
            let res = Lifecycle::new(&registry, &store).apply(&address, &type_name, &config, force)?;
            match cli.output {
                Output::Human => {
                    if res.applied {
                        println!(
                            "{} {} version={} adds={} updates={} removes={}",
                            res.action, res.address, res.version, res.summary.adds, res.summary.updates, res.summary.removes
                        );
                    } else {
                        println!("{} unchanged (version={})", res.address, res.version);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&res)?),
            }
        }
        Commands::Show { address, history, config } => {
            let store = open_store(cli.db.as_deref())?;
            if history {
                let rows = store.history(&address, None)?;
                if rows.is_empty() { return Err(anyhow!("no state stored for {}", address)); }
                match cli.output {
                    Output::Human => {
                        println!("{:<22} {:<10} AGE", "VERSION", "KIND");
                        for r in &rows {
                            println!("{:<22} {:<10} {}", r.state.version, r.state.kind, render_age(r.ts));
                        }
                    }
                    Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                }
                return Ok(());
            }
            let row = store.latest(&address)?.ok_or_else(|| anyhow!("no state stored for {}", address))?;
            if config {
                let rt = registry.resolve(&row.type_name)?;
                let (_identity, value) = forma_synth::decode_manifest(&rt.schema, &row.state.manifest)
                    .with_context(|| format!("decoding stored manifest of {}", address))?;
                match cli.output {
                    Output::Human => print!("{}", serde_yaml::to_string(&value)?),
                    Output::Json => println!("{}", serde_json::to_string_pretty(&value)?),
                }
                return Ok(());
            }
            match cli.output {
                Output::Human => print!("{}", row.state.manifest),
                Output::Json => println!("{}", serde_json::to_string_pretty(&row)?),
            }
        }
        Commands::Rm { address } => {
            let store = open_store(cli.db.as_deref())?;
            let removed = Lifecycle::new(&registry, &store).delete(&address)?;
            if !removed { return Err(anyhow!("no state stored for {}", address)); }
            if cli.output == Output::Human { println!("removed {}", address); }
            else { println!("{}", serde_json::json!({ "address": address, "removed": true })); }
        }
        Commands::Ls | Commands::State { command: StateCommands::Ls } => {
            let store = open_store(cli.db.as_deref())?;
            let mut rows: Vec<StoredState> = Vec::new();
            for addr in store.addresses()? {
                if let Some(r) = store.latest(&addr)? { rows.push(r); }
            }
            match cli.output {
                Output::Human => {
                    println!("{:<28} {:<52} {:<22} AGE", "ADDRESS", "TYPE", "VERSION");
                    for r in &rows {
                        println!("{:<28} {:<52} {:<22} {}", r.address, r.type_name, r.state.version, render_age(r.ts));
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            }
        }
    }
    Ok(())
}

fn load_registry(extra: Option<&Path>) -> Result<Registry> {
    let mut registry = Registry::builtin()?;
    if let Some(dir) = extra {
        let added = registry.load_dir(dir)?;
        info!(dir = %dir.display(), added, "loaded extra resource types");
    }
    Ok(registry)
}

fn open_store(db: Option<&str>) -> Result<SqliteStore> {
    match db {
        Some(path) => SqliteStore::open(path),
        None => SqliteStore::open_default(),
    }
}

fn read_config(file: &Path) -> Result<Value> {
    let text = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading config from stdin")?;
        buf
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?
    };
    forma_core::parse_config(&text).with_context(|| format!("loading config {}", file.display()))
}

/// One `<path>: <message>` line per invalid field, when the error is a validation failure.
fn validation_lines(err: &anyhow::Error) -> Option<Vec<String>> {
    match err.downcast_ref::<SynthesisError>()? {
        SynthesisError::Validation(errs) => Some(errs.iter().map(|e| e.to_string()).collect()),
        SynthesisError::Serialization(_) => None,
    }
}

fn children(ty: &FieldType) -> Option<&[Field]> {
    match ty {
        FieldType::Object(fields) => Some(fields),
        FieldType::List(el) | FieldType::Map(el) => children(&el.ty),
        _ => None,
    }
}

fn field_tree(fields: &[Field]) -> Vec<String> {
    fn walk(fields: &[Field], depth: usize, out: &mut Vec<String>) {
        for f in fields {
            let presence = match f.presence {
                Presence::Required => "required",
                Presence::Optional => "optional",
                Presence::Computed => "computed",
            };
            let mut line = format!("{:indent$}{}", "", f.name, indent = depth * 2);
            if f.wire_name != f.name { line.push_str(&format!(" ({})", f.wire_name)); }
            line.push_str(&format!(" {} {}", f.ty, presence));
            if !f.validators.is_empty() {
                let specs: Vec<ValidatorSpec> = f.validators.iter().map(ValidatorSpec::from).collect();
                if let Ok(s) = serde_json::to_string(&specs) { line.push_str(&format!(" {}", s)); }
            }
            out.push(line);
            if let Some(sub) = children(&f.ty) { walk(sub, depth + 1, out); }
        }
    }
    let mut out = Vec::new();
    walk(fields, 1, &mut out);
    out
}

fn render_age(ts: i64) -> String {
    if ts <= 0 { return "-".to_string(); }
    let now = chrono::Utc::now().timestamp();
    let mut secs = (now - ts).max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_state_ls_and_global_output() {
        let cli = Cli::try_parse_from(["formactl", "state", "ls", "-o", "json"]).unwrap();
        assert_eq!(cli.output, Output::Json);
        assert!(matches!(cli.command, Commands::State { command: StateCommands::Ls }));
        assert!(Cli::try_parse_from(["formactl", "show", "a", "--history", "--config"]).is_err());
    }

    #[test]
    fn render_age_buckets() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(render_age(0), "-");
        assert!(render_age(now - 5).ends_with('s'));
        assert_eq!(render_age(now - 3 * 60 - 10), "3m");
        assert_eq!(render_age(now - 2 * 86_400 - 3 * 3600 - 5), "2d3h");
    }

    #[test]
    fn validation_errors_print_one_line_per_field() {
        let registry = Registry::builtin().unwrap();
        let rt = registry.resolve("k8s_couchbase_com_couchbase_replication_v2").unwrap();
        let config = forma_core::parse_config("metadata:\n  name: Bad_Name\nspec:\n  paused: maybe\n").unwrap();
        let err: anyhow::Error = forma_synth::synthesize(&rt.schema, &rt.identity, &config).unwrap_err().into();
        let lines = validation_lines(&err).unwrap();
        assert_eq!(lines.len(), 3, "{:?}", lines);
        assert!(lines[0].starts_with("metadata.name: "));
        assert_eq!(lines[1], "spec.bucket: required field missing");
        assert!(lines[2].starts_with("spec.paused: expected bool"));
        assert!(validation_lines(&anyhow!("boom")).is_none());
    }

    #[test]
    fn schema_tree_shows_nested_fields() {
        let registry = Registry::builtin().unwrap();
        let rt = registry.resolve("k8s_couchbase_com_couchbase_replication_v2").unwrap();
        let lines = field_tree(rt.schema.fields());
        assert_eq!(lines[0], "  api_version (apiVersion) string computed");
        assert!(lines.iter().any(|l| l.starts_with("        source_keyspace (sourceKeyspace) object")));
    }
}
