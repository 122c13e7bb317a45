use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tracing::Level;

use clause_core::{CallConfig, Engine, EngineConfig, LogicUnit, SandboxMode, Target};

/// Clause — contract logic runtime CLI
///
/// Compile contract logic against its data models and run it.
#[derive(Parser)]
#[command(name = "clause", version, about, long_about = None)]
struct Cli {
    /// Log engine activity to stderr
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile logic and report its contract identity and hash
    Compile {
        #[command(flatten)]
        sources: Sources,
        /// Print the compiled output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Route a request to the clause matching its type
    Trigger {
        #[command(flatten)]
        sources: Sources,
        #[command(flatten)]
        call: CallArgs,
        /// Path to the request JSON
        #[arg(long)]
        request: PathBuf,
        /// Path to the state JSON; the contract is initialized when absent
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Call a clause by name with a record of parameters
    Invoke {
        #[command(flatten)]
        sources: Sources,
        #[command(flatten)]
        call: CallArgs,
        /// Clause to call
        #[arg(long)]
        clause: String,
        /// Path to the parameters JSON record
        #[arg(long)]
        params: Option<PathBuf>,
        /// Path to the state JSON; the contract is initialized when absent
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Initialize contract state
    Init {
        #[command(flatten)]
        sources: Sources,
        #[command(flatten)]
        call: CallArgs,
    },

    /// Evaluate a clause against the default state
    Calculate {
        #[command(flatten)]
        sources: Sources,
        #[command(flatten)]
        call: CallArgs,
        /// Clause to evaluate
        #[arg(long)]
        clause: String,
    },

    /// Show version information
    Version,
}

#[derive(Args)]
struct Sources {
    /// Model file (.cto); repeatable
    #[arg(long = "model")]
    models: Vec<PathBuf>,
    /// Logic file (.clause); repeatable
    #[arg(long = "logic", required = true)]
    logic: Vec<PathBuf>,
    /// Code-generation target: ast | canonical
    #[arg(long, default_value = "ast")]
    target: Target,
}

#[derive(Args)]
struct CallArgs {
    /// Path to the contract data JSON
    #[arg(long)]
    contract: PathBuf,
    /// RFC 3339 timestamp used as `now`
    #[arg(long)]
    now: Option<String>,
    /// Offset from UTC in minutes
    #[arg(long, allow_hyphen_values = true)]
    utc_offset: Option<i32>,
    /// Sandbox: isolated | direct
    #[arg(long, default_value = "isolated")]
    sandbox: SandboxMode,
    /// Wall-clock budget per call, in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
}

impl CallArgs {
    fn engine(&self) -> Engine {
        Engine::new(EngineConfig {
            sandbox: self.sandbox,
            timeout_ms: self.timeout_ms,
            ..EngineConfig::default()
        })
    }

    fn config(&self) -> CallConfig {
        CallConfig {
            now: self.now.clone(),
            utc_offset: self.utc_offset,
            ..CallConfig::default()
        }
    }

    /// Contract identity for the cache: the contract file's stem
    fn contract_id(&self) -> String {
        self.contract
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "contract".to_string())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match run(cli.command).await {
        Ok(()) => 0,
        Err(message) => {
            eprintln!("{} {}", "error:".red().bold(), message);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Commands) -> Result<(), String> {
    match command {
        Commands::Compile { sources, json } => {
            let mut unit = load_unit(&sources)?;
            let output = unit.compile_logic(true).await.map_err(|e| e.to_string())?;
            if json {
                print_json(&serde_json::to_value(output).map_err(|e| e.to_string())?)?;
            } else {
                println!(
                    "{} {} (target: {})",
                    "✓".green(),
                    output.contract_name.as_deref().unwrap_or("<no contract>"),
                    output.target
                );
                println!("  hash: {}", output.hash);
            }
            Ok(())
        }
        Commands::Trigger {
            sources,
            call,
            request,
            state,
        } => {
            let mut unit = load_unit(&sources)?;
            let mut engine = call.engine();
            let config = call.config();
            let id = call.contract_id();
            let contract = read_json(&call.contract)?;
            let request = read_json(&request)?;
            let state = match state {
                Some(path) => read_json(&path)?,
                None => {
                    engine
                        .compile_and_init(&mut unit, &id, &contract, &config)
                        .await
                        .map_err(|e| e.to_string())?
                        .state
                }
            };
            let result = engine
                .compile_and_trigger(&mut unit, &id, &contract, &request, &state, &config)
                .await
                .map_err(|e| e.to_string())?;
            print_json(&serde_json::to_value(&result).map_err(|e| e.to_string())?)
        }
        Commands::Invoke {
            sources,
            call,
            clause,
            params,
            state,
        } => {
            let mut unit = load_unit(&sources)?;
            let mut engine = call.engine();
            let config = call.config();
            let id = call.contract_id();
            let contract = read_json(&call.contract)?;
            let params = match params {
                Some(path) => read_json(&path)?,
                None => Value::Object(Default::default()),
            };
            let state = match state {
                Some(path) => read_json(&path)?,
                None => {
                    engine
                        .compile_and_init(&mut unit, &id, &contract, &config)
                        .await
                        .map_err(|e| e.to_string())?
                        .state
                }
            };
            let result = engine
                .compile_and_invoke(&mut unit, &id, &clause, &contract, &params, &state, &config)
                .await
                .map_err(|e| e.to_string())?;
            print_json(&serde_json::to_value(&result).map_err(|e| e.to_string())?)
        }
        Commands::Init { sources, call } => {
            let mut unit = load_unit(&sources)?;
            let contract = read_json(&call.contract)?;
            let result = call
                .engine()
                .compile_and_init(&mut unit, &call.contract_id(), &contract, &call.config())
                .await
                .map_err(|e| e.to_string())?;
            print_json(&serde_json::to_value(&result).map_err(|e| e.to_string())?)
        }
        Commands::Calculate {
            sources,
            call,
            clause,
        } => {
            let mut unit = load_unit(&sources)?;
            let contract = read_json(&call.contract)?;
            let result = call
                .engine()
                .compile_and_calculate(
                    &mut unit,
                    &call.contract_id(),
                    &clause,
                    &contract,
                    &call.config(),
                )
                .await
                .map_err(|e| e.to_string())?;
            print_json(&serde_json::to_value(&result).map_err(|e| e.to_string())?)
        }
        Commands::Version => {
            println!(
                "clause {} (clause-core {})",
                env!("CARGO_PKG_VERSION"),
                env!("CARGO_PKG_VERSION")
            );
            Ok(())
        }
    }
}

// ── Helpers ───────────────────────────────────────────────

fn load_unit(sources: &Sources) -> Result<LogicUnit, String> {
    let mut unit = LogicUnit::new();
    unit.set_target(sources.target);
    for path in &sources.models {
        let content = read_text(path)?;
        unit.add_model_file(&content, &file_name(path))
            .map_err(|e| e.to_string())?;
    }
    for path in &sources.logic {
        let content = read_text(path)?;
        unit.add_logic_file(&content, &file_name(path));
    }
    Ok(unit)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn read_text(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))
}

fn read_json(path: &Path) -> Result<Value, String> {
    let text = read_text(path)?;
    serde_json::from_str(&text).map_err(|e| format!("{} is not valid JSON: {}", path.display(), e))
}

fn print_json(value: &Value) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}
