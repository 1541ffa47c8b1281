use clap::ArgMatches;

use scl_runtime::config::{HitlMode, SclConfig};
use scl_runtime::hitl::{PolicyEngine, PolicyInput};
use scl_runtime::reasoning::ProposedAction;

pub fn run(matches: &ArgMatches, config: &SclConfig) -> anyhow::Result<()> {
    let tool = matches
        .get_one::<String>("tool")
        .ok_or_else(|| anyhow::anyhow!("--tool is required"))?;
    let confidence = matches.get_one::<f64>("confidence").copied().unwrap_or(1.0);
    let loop_index = matches.get_one::<u64>("loop").copied().unwrap_or(0);
    let is_final = matches.get_flag("final");

    let engine = match config.hitl.mode {
        HitlMode::Disabled => PolicyEngine::disabled(),
        _ => PolicyEngine::new(config.policy.clone()),
    };
    let action = ProposedAction::new(tool.as_str());
    let verdict = engine.evaluate(&PolicyInput {
        action: &action,
        loop_index,
        confidence,
        is_final,
        evidence_refs: &[],
    });

    println!("{}: {}", verdict.level, verdict.reason);
    if verdict.level.requires_freeze() {
        println!("The loop would freeze until a human decides.");
    }
    Ok(())
}
