//! `coord` — control-plane CLI for the swarmd coordination runtime.
//!
//! Thin command surface over the coordinator, the optimization loop,
//! and the analyzer adapter. Exit codes are part of the contract:
//! 0 ok, 10 conflict (`already_claimed`/`contention`), 20 unknown
//! referent, 30 invariant violation, 1 anything else.

use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use swarmd_coordination::{Coordinator, WorkRequest};
use swarmd_core::types::Priority;
use swarmd_core::{CoordConfig, CoordError, CoordResult, TraceContext};
use swarmd_optimizer::{AnalyzerAdapter, OptimizationLoop, OptimizerConfig};
use swarmd_reactor::CancelToken;
use swarmd_store::ClaimStore;
use swarmd_telemetry::TelemetryPipeline;

#[derive(Parser)]
#[command(name = "coord")]
#[command(about = "swarmd agent coordination control plane", version)]
struct Cli {
    /// Coordination directory (env: COORD_DIR)
    #[arg(long, global = true, env = "COORD_DIR")]
    coord_dir: Option<PathBuf>,

    /// Emit machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Join an existing trace instead of minting a new one
    #[arg(long, global = true)]
    trace_id: Option<String>,

    /// Parent span id within --trace-id
    #[arg(long, global = true)]
    parent_span_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register an agent in a coordination team
    Register {
        #[arg(long)]
        team: String,
        #[arg(long)]
        specialization: String,
        #[arg(long, default_value_t = 5)]
        capacity: u32,
    },

    /// Atomically claim a pending work item
    Claim { work_id: String, agent_id: String },

    /// Create a work item and claim it via intelligent routing
    ClaimIntelligent {
        work_type: String,
        description: String,
        priority: Priority,
        team: String,
    },

    /// Update work item progress (0-100, non-decreasing)
    Progress {
        work_id: String,
        agent_id: String,
        pct: u8,
    },

    /// Complete a claimed work item
    Complete {
        work_id: String,
        agent_id: String,
        result: String,
        #[arg(long, default_value_t = 0)]
        velocity: u32,
    },

    /// Release a claimed work item back to pending
    Release {
        work_id: String,
        agent_id: String,
        reason: String,
    },

    /// Refresh an agent's heartbeat
    Heartbeat { agent_id: String },

    /// Retire an agent
    Deregister { agent_id: String },

    /// Print a coordination snapshot
    Status,

    /// Run the optimization loop
    Optimize {
        /// Run exactly one cycle and exit
        #[arg(long)]
        once: bool,
        /// Run cycles on the configured interval until interrupted
        #[arg(long = "loop")]
        run_loop: bool,
    },

    /// Invoke the external analyzer with a state snapshot
    Analyze {
        /// Analyzer command to run
        #[arg(long)]
        command: PathBuf,
    },
}

struct Runtime {
    config: CoordConfig,
    store: Arc<ClaimStore>,
    telemetry: Arc<TelemetryPipeline>,
    coordinator: Arc<Coordinator>,
    ctx: TraceContext,
    json: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let mut config = CoordConfig::from_env();
    if let Some(dir) = &cli.coord_dir {
        config.coord_dir = dir.clone();
    }

    let runtime = match bootstrap(&cli, config) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error[{}]: {}", e.kind(), e);
            return exit_code(&e);
        }
    };

    let outcome = execute(&cli.command, &runtime).await;
    runtime.telemetry.flush(Duration::from_secs(5));

    match outcome {
        Ok(()) => 0,
        Err(e) => {
            report_error(&runtime, &e);
            exit_code(&e)
        }
    }
}

fn bootstrap(cli: &Cli, config: CoordConfig) -> CoordResult<Runtime> {
    let store = Arc::new(ClaimStore::open(&config.coord_dir)?);
    let telemetry = TelemetryPipeline::start(&config)?;
    let coordinator = Arc::new(Coordinator::new(store.clone(), telemetry.clone(), &config));
    let ctx = match &cli.trace_id {
        Some(trace_id) => TraceContext {
            trace_id: trace_id.clone(),
            span_id: config.id_generator().span_id(),
            parent_span_id: cli.parent_span_id.clone(),
            sampled: true,
        },
        None => telemetry.root_context(),
    };
    Ok(Runtime {
        config,
        store,
        telemetry,
        coordinator,
        ctx,
        json: cli.json,
    })
}

async fn execute(command: &Commands, rt: &Runtime) -> CoordResult<()> {
    match command {
        Commands::Register {
            team,
            specialization,
            capacity,
        } => {
            let agent_id = rt.coordinator.register_agent(team, specialization, *capacity)?;
            if rt.json {
                print_json(&json!({
                    "success": true,
                    "agent_id": agent_id,
                    "team": team,
                    "specialization": specialization,
                    "capacity": capacity,
                }));
            } else {
                println!("{}", agent_id);
            }
            Ok(())
        }

        Commands::Claim { work_id, agent_id } => {
            let record = rt.coordinator.claim(work_id, agent_id, &rt.ctx)?;
            if rt.json {
                print_json(&json!({
                    "success": true,
                    "work_id": record.work_item_id,
                    "claimed_by": record.agent_id,
                    "trace_id": record.trace_id,
                }));
            } else {
                println!("claimed {} for {}", record.work_item_id, record.agent_id);
            }
            Ok(())
        }

        Commands::ClaimIntelligent {
            work_type,
            description,
            priority,
            team,
        } => {
            let request = WorkRequest {
                work_type: work_type.clone(),
                priority: *priority,
                team: team.clone(),
                description: description.clone(),
                estimated_duration: None,
                created_by: Some("coord_cli".to_string()),
            };
            let (work_id, record) = rt.coordinator.claim_intelligent(request, &rt.ctx)?;
            if rt.json {
                print_json(&json!({
                    "success": true,
                    "work_id": work_id,
                    "claimed_by": record.as_ref().map(|r| r.agent_id.clone()),
                    "pending": record.is_none(),
                    "trace_id": rt.ctx.trace_id,
                }));
            } else {
                println!("{}", work_id);
                if let Some(record) = record {
                    eprintln!("claimed by {}", record.agent_id);
                } else {
                    eprintln!("no claimable agent; left pending");
                }
            }
            Ok(())
        }

        Commands::Progress {
            work_id,
            agent_id,
            pct,
        } => {
            rt.coordinator.progress(work_id, agent_id, *pct)?;
            if rt.json {
                print_json(&json!({"success": true, "work_id": work_id, "progress": pct}));
            } else {
                println!("progress {}% on {}", pct, work_id);
            }
            Ok(())
        }

        Commands::Complete {
            work_id,
            agent_id,
            result,
            velocity,
        } => {
            rt.coordinator.complete(work_id, agent_id, result, *velocity)?;
            if rt.json {
                print_json(&json!({
                    "success": true,
                    "work_id": work_id,
                    "velocity_points": velocity,
                }));
            } else {
                println!("completed {}", work_id);
            }
            Ok(())
        }

        Commands::Release {
            work_id,
            agent_id,
            reason,
        } => {
            rt.coordinator.release(work_id, agent_id, reason)?;
            if rt.json {
                print_json(&json!({"success": true, "work_id": work_id, "reason": reason}));
            } else {
                println!("released {}", work_id);
            }
            Ok(())
        }

        Commands::Heartbeat { agent_id } => {
            rt.coordinator.heartbeat(agent_id, None)?;
            if rt.json {
                print_json(&json!({"success": true, "agent_id": agent_id}));
            } else {
                println!("heartbeat recorded for {}", agent_id);
            }
            Ok(())
        }

        Commands::Deregister { agent_id } => {
            rt.coordinator.deregister_agent(agent_id)?;
            if rt.json {
                print_json(&json!({"success": true, "agent_id": agent_id}));
            } else {
                println!("deregistered {}", agent_id);
            }
            Ok(())
        }

        Commands::Status => {
            let snapshot = rt.coordinator.status()?;
            if rt.json {
                print_json(&serde_json::to_value(&snapshot)?);
            } else {
                println!(
                    "agents: {}  pending: {}  in-flight: {}  completed: {}",
                    snapshot.agents.len(),
                    snapshot.pending,
                    snapshot.in_flight,
                    snapshot.completed
                );
                for agent in &snapshot.agents {
                    println!(
                        "  {} team={} workload={}/{} status={:?}",
                        agent.agent_id,
                        agent.team,
                        agent.current_workload,
                        agent.capacity,
                        agent.status
                    );
                }
            }
            Ok(())
        }

        Commands::Optimize { once, run_loop } => {
            let optimizer = Arc::new(OptimizationLoop::new(
                rt.store.clone(),
                rt.coordinator.clone(),
                rt.telemetry.clone(),
                OptimizerConfig::from_coord_config(&rt.config),
            ));
            if *run_loop && !*once {
                let cancel = CancelToken::new();
                let trigger = cancel.clone();
                tokio::spawn(async move {
                    let _ = tokio::signal::ctrl_c().await;
                    trigger.cancel();
                });
                optimizer.run(cancel).await;
                Ok(())
            } else {
                let report = optimizer.run_once()?;
                if rt.json {
                    print_json(&serde_json::to_value(&report)?);
                } else {
                    println!(
                        "efficiency {:.1}%  completion {:.1}%  utilization {:.1}%  errors {:.1}%",
                        report.metrics.system_efficiency,
                        report.metrics.completion_rate,
                        report.metrics.agent_utilization,
                        report.metrics.error_rate
                    );
                    for (work_type, work_id) in &report.created {
                        println!("  filed {} as {}", work_type, work_id);
                    }
                }
                Ok(())
            }
        }

        Commands::Analyze { command } => {
            let snapshot = rt.coordinator.status()?;
            let adapter = AnalyzerAdapter::new(command.clone());
            let report = adapter.analyze(&serde_json::to_value(&snapshot)?).await?;
            if rt.json {
                print_json(&serde_json::to_value(&report)?);
            } else {
                println!(
                    "analysis keys: {}  recommendations: {}",
                    report.analysis.len(),
                    report.recommendations.len()
                );
            }
            Ok(())
        }
    }
}

fn report_error(rt: &Runtime, e: &CoordError) {
    if rt.json {
        print_json(&json!({
            "success": false,
            "error": e.kind(),
            "message": e.to_string(),
            "trace_id": rt.ctx.trace_id,
        }));
    } else {
        eprintln!("error[{}]: {} (trace {})", e.kind(), e, rt.ctx.trace_id);
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(rendered) => println!("{}", rendered),
        Err(e) => eprintln!("error[io]: {}", e),
    }
}

/// Normative exit codes (§ CLI contract).
fn exit_code(e: &CoordError) -> i32 {
    match e.kind() {
        "already_claimed" | "contention" => 10,
        "unknown_agent" | "unknown_work" => 20,
        "invariant_violation" => 30,
        _ => 1,
    }
}
