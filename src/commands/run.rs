use anyhow::Context;
use clap::ArgMatches;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use scl_runtime::config::{HitlMode, SclConfig};
use scl_runtime::hitl::{AutoApprove, ConsoleDecisionProvider, HumanDecisionProvider, PolicyEngine};
use scl_runtime::reasoning::{
    CognitionEngine, ControlValidator, HttpCognitionConfig, HttpCognitionEngine, RunReport,
    SclController, ToolExecutor,
};

use crate::scenario::{self, TravelPlanner, DEFAULT_BASE_TEMPERATURE};

pub async fn run(matches: &ArgMatches, mut config: SclConfig) -> anyhow::Result<()> {
    if let Some(mode) = matches.get_one::<String>("mode") {
        config.hitl.mode = mode.parse()?;
    }
    if let Some(max_loops) = matches.get_one::<u64>("max-loops") {
        config.loop_config.max_loops = *max_loops;
    }
    config.validate()?;

    let base_temp = matches
        .get_one::<f64>("base-temp")
        .copied()
        .unwrap_or(DEFAULT_BASE_TEMPERATURE);
    let output = matches.get_one::<String>("output");

    let tools = Arc::new(scenario::travel_tools());
    let specs = tools.descriptors().iter().map(|d| d.to_spec()).collect::<Vec<_>>();
    let validator = ControlValidator::from_config(specs, &config.control)
        .context("invalid control rules")?;

    let cognition: Arc<dyn CognitionEngine> = if matches.get_flag("llm") {
        let http = HttpCognitionConfig::from_env()
            .context("--llm needs OPENAI_API_KEY to be set")?;
        Arc::new(HttpCognitionEngine::new(http)?.with_tools(tools.descriptors()))
    } else {
        Arc::new(TravelPlanner)
    };

    let (policy, decisions): (PolicyEngine, Arc<dyn HumanDecisionProvider>) = match config.hitl.mode
    {
        HitlMode::Interactive => (
            PolicyEngine::new(config.policy.clone()),
            Arc::new(ConsoleDecisionProvider::stdio()),
        ),
        HitlMode::Auto => (PolicyEngine::new(config.policy.clone()), Arc::new(AutoApprove)),
        HitlMode::Disabled => (PolicyEngine::disabled(), Arc::new(AutoApprove)),
    };

    let controller = SclController::builder(cognition, tools, decisions)
        .retriever(Arc::new(scenario::retriever(base_temp)))
        .policy(Arc::new(policy))
        .validator(Arc::new(validator))
        .config(config.loop_config.clone())
        .build();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, aborting run");
            on_signal.cancel();
        }
    });

    println!("Structured Cognitive Loop: weather-based travel planning");
    println!("HITL mode: {}", config.hitl.mode);
    println!("Base temperature: {base_temp}°F\n");

    match controller.run_with_cancel(scenario::TASK, cancel).await {
        Ok(report) => {
            print_report(&report);
            save(&report, output)?;
            Ok(())
        }
        Err(failure) => {
            print_report(&failure.report);
            save(&failure.report, output)?;
            Err(failure.into())
        }
    }
}

fn save(report: &RunReport, output: Option<&String>) -> anyhow::Result<()> {
    if let Some(path) = output {
        report
            .save_json(Path::new(path))
            .with_context(|| format!("failed to write report to {path}"))?;
        println!("\nReport written to {path}");
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Task {}", report.task_id);
    println!("Termination: {:?}", report.termination);
    println!(
        "Loops: {}  Actions: {}",
        report.summary.total_loops, report.summary.action_count
    );

    for record in &report.memory {
        let args = serde_json::to_string(&record.arguments).unwrap_or_default();
        let outcome = serde_json::to_value(&record.outcome).unwrap_or_default();
        println!(
            "  [{}] {} {} -> {}",
            record.loop_index, record.tool_name, args, outcome
        );
    }

    let stats = &report.summary.statistics;
    println!("\nHITL statistics");
    println!("  interventions: {}", stats.total_interventions);
    println!("  notifications: {}", stats.notifications);
    println!("  approvals:     {}", stats.approvals);
    println!("  modifications: {}", stats.modifications);
    println!("  rejections:    {}", stats.rejections);
    println!("  control fails: {}", stats.control_rejections);
    println!("  audit events:  {}", stats.total_events);
}
