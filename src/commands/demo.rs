use clap::ArgMatches;

use scl_runtime::audit::AuditLog;
use scl_runtime::hitl::{FreezeThawManager, HumanDecision, InterventionLevel, NextStep, PolicyVerdict};
use scl_runtime::reasoning::{
    ActionOutcome, ActionRecord, CognitionOutput, LoopContext, Memory, ProposedAction, TaskContext,
};

use crate::scenario::ITINERARY_RECIPIENT;

pub fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    match matches.subcommand_name() {
        Some("freeze") => freeze_and_approve(),
        Some("rejection") => reject_and_retry(),
        other => anyhow::bail!("unknown demo: {}", other.unwrap_or("<none>")),
    }
}

/// A loop that already looked up the weather in Miami.
fn weather_checked(task: &str) -> (LoopContext, Memory) {
    let lookup = ProposedAction::new("get_weather").with_arg("city", "Miami");
    let result = serde_json::json!({"city": "Miami", "temperature": 78.0});

    let mut memory = Memory::new();
    memory.store_evidence(lookup.evidence_id(), result.clone());
    memory.record_action(ActionRecord {
        loop_index: 0,
        tool_name: lookup.tool_name,
        arguments: lookup.arguments,
        outcome: ActionOutcome::Executed { result },
        freeze_id: None,
        recorded_at: chrono::Utc::now(),
    });

    let mut loop_ctx = LoopContext::new(TaskContext::new(task, serde_json::json!({})));
    loop_ctx.loop_counter = 1;
    (loop_ctx, memory)
}

fn email(to: &str, reasoning: &str) -> CognitionOutput {
    CognitionOutput::new(
        reasoning,
        ProposedAction::new("send_email")
            .with_arg("to", to)
            .with_arg("subject", "Travel Plan: Miami")
            .with_arg("body", "Based on weather analysis, traveling to Miami at 78°F."),
    )
    .with_confidence(0.9)
}

fn high_risk() -> PolicyVerdict {
    PolicyVerdict::new(InterventionLevel::Approve, "High-risk tool: send_email")
}

fn print_audit(audit: &AuditLog) -> anyhow::Result<()> {
    println!("\nAudit trail:");
    for event in audit.events() {
        println!(
            "  {} {:?} loop={} {}",
            event.trace_id,
            event.event_type,
            event.loop_index,
            event.freeze_id.map(|f| f.to_string()).unwrap_or_default()
        );
    }
    println!(
        "\nStatistics: {}",
        serde_json::to_string_pretty(&audit.statistics())?
    );
    Ok(())
}

fn freeze_and_approve() -> anyhow::Result<()> {
    let (loop_ctx, memory) = weather_checked("Check weather and send travel notification email");
    let mut manager = FreezeThawManager::new();
    let mut audit = AuditLog::new();

    println!("1. Freezing before the email goes out\n");
    let state = manager.freeze(
        &loop_ctx,
        &memory,
        &email(
            ITINERARY_RECIPIENT,
            "All weather data collected. Sending email to confirm destination.",
        ),
        &high_risk(),
        &mut audit,
    )?;
    println!("{}\n", state.summary());
    println!("Snapshot digest: {}", state.snapshot_digest);

    println!("\n2. Reviewer approves");
    let outcome = manager.resolve(
        HumanDecision::approve(state.freeze_id, "Destination and recipient look right")
            .with_reviewer("demo"),
        &loop_ctx,
        &memory,
        &mut audit,
    )?;
    if let NextStep::Execute(action) = &outcome.next {
        println!(
            "   Thawed {}; executing {} {}",
            outcome.freeze_id,
            action.tool_name,
            serde_json::to_string(&action.arguments)?
        );
    }

    print_audit(&audit)
}

fn reject_and_retry() -> anyhow::Result<()> {
    let (mut loop_ctx, memory) = weather_checked("Confirm the Miami trip by email");
    let mut manager = FreezeThawManager::new();
    let mut audit = AuditLog::new();

    println!("1. Freezing an email addressed to the wrong recipient\n");
    let state = manager.freeze(
        &loop_ctx,
        &memory,
        &email("wrong@email.com", "Sending confirmation email"),
        &high_risk(),
        &mut audit,
    )?;
    println!("{}\n", state.summary());

    println!("2. Reviewer rejects");
    let outcome = manager.resolve(
        HumanDecision::reject(
            state.freeze_id,
            format!("Wrong email address! Should be {ITINERARY_RECIPIENT}"),
        ),
        &loop_ctx,
        &memory,
        &mut audit,
    )?;
    println!("   Next step: {:?}", outcome.next);

    println!("\n3. Virtual rejection cycle");
    let cycle = manager.create_virtual_rejection_cycle(
        state.freeze_id,
        Some(format!("Use {ITINERARY_RECIPIENT} instead").as_str()),
    )?;
    println!("   Reason: {}", cycle.rejection_reason);
    loop_ctx.context.apply(cycle.context_patch);
    println!(
        "   Context for the next cognition call:\n{}",
        serde_json::to_string_pretty(&loop_ctx.context)?
    );

    print_audit(&audit)
}
