use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use adminflow::app::{handle_fatal_error, init_logging, AppConfig};
use adminflow::validator::ValidationResult;
use adminflow::{
    AutoApprove, ConfirmationChannel, DeferredConfirmation, JsonFileStore, OperationCatalog,
    OrchestratorConfig, WorkflowOrchestrator, WorkflowPlan, WorkflowStatusView,
};

/// Plan and run analytics-site administration workflows
#[derive(Parser)]
#[command(name = "adminflow", version)]
#[command(about = "Plan, confirm and run site administration workflows", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, default_value = "adminflow.toml")]
    config: PathBuf,

    /// Directory holding plans and runs (default: store_dir from config, else .adminflow)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the plan and validation result for a request without running it
    Plan {
        /// Free-form request, e.g. "clean up the Finance project"
        #[arg(required = true, num_args = 1..)]
        request: Vec<String>,
    },
    /// Submit a request against simulated operations
    Run {
        #[arg(required = true, num_args = 1..)]
        request: Vec<String>,

        /// Approve the confirmation gate up front
        #[arg(short, long)]
        yes: bool,
    },
    /// Show the status of a workflow run
    Status {
        workflow_id: String,

        /// Print the full status view as JSON
        #[arg(long)]
        json: bool,
    },
    /// Approve (or decline) a run waiting for confirmation
    Confirm {
        workflow_id: String,

        #[arg(long)]
        decline: bool,
    },
    /// Cancel a run
    Cancel { workflow_id: String },
    /// List stored runs
    List,
    /// Cancel runs whose confirmation has timed out
    Expire,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let app = AppConfig::new(cli.verbose)
        .with_config_path(cli.config.clone())
        .with_store_dir(cli.store.clone());
    init_logging(&app);

    if let Err(e) = run(cli.command, &app).await {
        handle_fatal_error(e, app.verbose);
    }
}

async fn run(command: Commands, app: &AppConfig) -> anyhow::Result<()> {
    let mut config = OrchestratorConfig::load(&app.config_path)?;
    config.merge_env_vars()?;

    let auto_approve = matches!(command, Commands::Run { yes: true, .. });
    let orchestrator = build_orchestrator(config, app, auto_approve).await?;

    match command {
        Commands::Plan { request } => {
            let (plan, validation) = orchestrator.preview(&request.join(" ")).await?;
            print_plan(&plan);
            print_validation(&validation);
        }
        Commands::Run { request, .. } => {
            let workflow_id = orchestrator.submit(&request.join(" ")).await?;
            let view = orchestrator.get_status(&workflow_id).await?;
            print_status(&view);
            if view.status == adminflow::RunStatus::AwaitingConfirmation {
                println!("\nApprove with: adminflow confirm {workflow_id}");
            }
        }
        Commands::Status { workflow_id, json } => {
            let view = orchestrator.get_status(&workflow_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print_status(&view);
            }
        }
        Commands::Confirm {
            workflow_id,
            decline,
        } => {
            orchestrator.confirm(&workflow_id, !decline).await?;
            print_status(&orchestrator.get_status(&workflow_id).await?);
        }
        Commands::Cancel { workflow_id } => {
            let status = orchestrator.cancel(&workflow_id).await?;
            println!("Workflow {workflow_id}: {status}");
        }
        Commands::List => {
            let runs = orchestrator.list_runs().await?;
            if runs.is_empty() {
                println!("No workflow runs found.");
            }
            for view in runs {
                println!(
                    "{}  {:<22} {}  ({}/{})",
                    view.workflow_id,
                    view.status.to_string(),
                    view.title,
                    view.progress.completed,
                    view.progress.total
                );
            }
        }
        Commands::Expire => {
            let expired = orchestrator.expire_confirmations().await?;
            println!("Cancelled {} expired run(s)", expired.len());
            for id in expired {
                println!("  {id}");
            }
        }
    }

    Ok(())
}

async fn build_orchestrator(
    config: OrchestratorConfig,
    app: &AppConfig,
    auto_approve: bool,
) -> anyhow::Result<WorkflowOrchestrator> {
    let store_dir = app
        .store_dir
        .clone()
        .or_else(|| config.store_dir.clone())
        .unwrap_or_else(|| PathBuf::from(".adminflow"));
    let store = JsonFileStore::open(store_dir).await?;

    let confirmation: Arc<dyn ConfirmationChannel> = if auto_approve {
        Arc::new(AutoApprove)
    } else {
        Arc::new(DeferredConfirmation)
    };

    Ok(
        WorkflowOrchestrator::builder(Arc::new(OperationCatalog::simulated()))
            .config(config)
            .store(Arc::new(store))
            .confirmation(confirmation)
            .build(),
    )
}

fn print_plan(plan: &WorkflowPlan) {
    println!(
        "Plan: {} (risk: {}, {})",
        plan.title,
        plan.aggregate_risk,
        if plan.requires_confirmation {
            "confirmation required"
        } else {
            "no confirmation needed"
        }
    );
    println!("Estimated duration: {}s", plan.estimated_duration_seconds);
    for (i, step) in plan.steps.iter().enumerate() {
        println!(
            "  {}. {} [{}] {} - {}",
            i + 1,
            step.id,
            step.risk_tier,
            step.operation_name,
            step.description
        );
        if !step.depends_on.is_empty() {
            let deps: Vec<&str> = step.depends_on.iter().map(String::as_str).collect();
            println!("     after: {}", deps.join(", "));
        }
        if let Some(rollback) = &step.rollback_operation {
            println!("     undo: {}", rollback.operation_name);
        }
    }
}

fn print_validation(validation: &ValidationResult) {
    if validation.is_valid {
        println!("Validation: valid (risk score {})", validation.risks.score);
    } else {
        println!("Validation: INVALID");
    }
    for issue in &validation.blocking_issues {
        println!("  blocking: {issue}");
    }
    for warning in &validation.warnings {
        println!("  warning: {warning}");
    }
}

fn print_status(view: &WorkflowStatusView) {
    println!("Workflow {}: {}", view.workflow_id, view.status);
    println!("  {}", view.title);
    println!(
        "  Progress: {}/{} ({:.0}%)",
        view.progress.completed, view.progress.total, view.progress.percentage
    );
    for step in &view.steps {
        let retries = if step.retry_count > 0 {
            format!(" (retries: {})", step.retry_count)
        } else {
            String::new()
        };
        println!("    {:<22} {}{}", step.step_id, step.status, retries);
    }
    if let Some(failed) = &view.failed_step {
        println!(
            "  Failed step: {} ({:?}): {}",
            failed.step_id, failed.class, failed.message
        );
    }
    if let Some(validation) = &view.validation {
        if !validation.is_valid {
            print_validation(validation);
        }
    }
    if let Some(report) = &view.rollback {
        println!(
            "  Rollback: {} executed, {} skipped, {} failed",
            report.executed_count(),
            report.skipped_count(),
            report.failures().len()
        );
    }
}
