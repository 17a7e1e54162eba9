//! FQL engine entry point.
//!
//! Loads a compiled binary query plan, generates the per-query filter
//! program and row schema, and drives delimited records from a source
//! stream through the pipeline to the sink. The FQL compiler producing
//! the binary plan is a separate tool; this binary only executes plans.

use clap::{Parser, Subcommand};
use flowstreams::flowstream::fql::codegen;
use flowstreams::flowstream::fql::execution::engine::EgressFormat;
use flowstreams::{Engine, EngineConfig, EngineError, Plan};
use log::{error, info};
use std::fs;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "flow-engine")]
#[command(about = "Flowstream FQL engine - execute compiled query plans over record streams")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a plan: read records from stdin (or a file), write rows to stdout
    Run {
        /// Path to the compiled binary plan
        #[arg(long)]
        plan: PathBuf,

        /// Read records from this file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,

        /// Field delimiter for ingress records and text egress
        #[arg(long, default_value = "|")]
        delimiter: char,

        /// Emit tagged binary rows instead of delimited text
        #[arg(long)]
        binary_egress: bool,

        /// Directory the generated row schema is written under
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Show a binary plan as JSON on stdout
    Show {
        /// Path to the compiled binary plan
        #[arg(long)]
        plan: PathBuf,
    },
    /// Generate and write the row schema file for a plan
    Schema {
        /// Path to the compiled binary plan
        #[arg(long)]
        plan: PathBuf,

        /// Directory the generated row schema is written under
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

fn load_plan(path: &PathBuf) -> Result<Plan, EngineError> {
    let bytes = fs::read(path)?;
    Plan::from_wire_bytes(&bytes)
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run {
            plan,
            input,
            delimiter,
            binary_egress,
            out_dir,
        } => run(plan, input, delimiter, binary_egress, out_dir).await,
        Commands::Show { plan } => show(plan),
        Commands::Schema { plan, out_dir } => schema(plan, out_dir),
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(
    plan_path: PathBuf,
    input: Option<PathBuf>,
    delimiter: char,
    binary_egress: bool,
    out_dir: PathBuf,
) -> Result<(), EngineError> {
    let plan = load_plan(&plan_path)?;
    let config = EngineConfig {
        delimiter,
        egress_format: if binary_egress {
            EgressFormat::Binary
        } else {
            EgressFormat::Delimited
        },
    };
    let mut engine = Engine::new(&plan, config)?;

    let schema_path = engine.schema().write_to_dir(&out_dir)?;
    info!("row schema written to {}", schema_path.display());

    let cancel = Arc::new(AtomicBool::new(false));
    let signal_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current row");
            signal_flag.store(true, Ordering::Relaxed);
        }
    });

    // The pipeline is synchronous and row-at-a-time; run it off the
    // async runtime so signal handling stays responsive.
    let outcome = tokio::task::spawn_blocking(move || {
        let stdout = io::stdout();
        let result = match input {
            Some(path) => {
                let file = fs::File::open(&path)?;
                engine.run(BufReader::new(file), stdout.lock(), &cancel)
            }
            None => {
                let stdin = io::stdin();
                engine.run(stdin.lock(), stdout.lock(), &cancel)
            }
        };
        result.map(|_| engine.metrics())
    })
    .await
    .map_err(|e| EngineError::Io {
        message: format!("engine task failed: {}", e),
    })?;

    match outcome {
        Ok(metrics) => {
            info!(
                "done: {} rows read, {} emitted, {} dropped",
                metrics.rows_read, metrics.rows_emitted, metrics.rows_dropped
            );
            Ok(())
        }
        Err(EngineError::Cancelled) => {
            info!("engine cancelled, open windows discarded");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn show(plan_path: PathBuf) -> Result<(), EngineError> {
    let plan = load_plan(&plan_path)?;
    println!("{}", plan.show_json()?);
    Ok(())
}

fn schema(plan_path: PathBuf, out_dir: PathBuf) -> Result<(), EngineError> {
    let plan = load_plan(&plan_path)?;
    plan.validate()?;
    let generated = codegen::generate(&plan)?;
    let path = generated.schema.write_to_dir(&out_dir)?;
    info!("row schema written to {}", path.display());
    Ok(())
}
