//! Weather-based travel planning scenario
//!
//! Mock travel tools plus a rule-based planner that works through the
//! task one tool call at a time: look up the weather in each city, pick a
//! destination against the base temperature, act on the decision, then
//! finish with an umbrella check (or snack recommendations when the trip
//! is off).

use async_trait::async_trait;
use scl_runtime::reasoning::{
    ActionOutcome, ActionRecord, CognitionEngine, CognitionOutput, ProposedAction, StaticRetriever,
    TaskContext, ToolArguments, ToolDescriptor, ToolRegistry,
};
use scl_runtime::types::CognitionError;

pub const CITIES: [&str; 3] = ["San Francisco", "Miami", "Atlanta"];
pub const DEFAULT_BASE_TEMPERATURE: f64 = 55.0;
pub const ITINERARY_RECIPIENT: &str = "test-scl@test.com";

pub const TASK: &str = "When the base temperature is 55°F, check the weather in San Francisco, \
Miami, and Atlanta, then plan a trip according to the following conditions: \
if all three regions are above the reference temperature, travel to the coolest one and draw \
an image of that place's weather; if only two are above, choose the cooler one and send an \
email to test-scl@test.com with the selected destination; if only one is above, travel there; \
if all three are below, cancel the trip and recommend convenience store snacks to enjoy at \
home. Tell me the weather at the destination and whether to bring an umbrella.";

/// Static evidence blob handed to the loop at task start.
pub fn retriever(base_temperature: f64) -> StaticRetriever {
    StaticRetriever::new(serde_json::json!({
        "task_type": "travel_planning",
        "evidence_needed": CITIES,
        "base_temperature": base_temperature,
        "tools_required": ["get_weather", "send_email", "generate_image", "cancel_trip"],
    }))
}

fn forecast(city: &str) -> Option<(f64, &'static str, u8)> {
    match city {
        "San Francisco" => Some((62.0, "Partly cloudy", 10)),
        "Miami" => Some((78.0, "Thunderstorms", 70)),
        "Atlanta" => Some((50.0, "Light rain", 60)),
        _ => None,
    }
}

fn str_arg<'a>(args: &'a ToolArguments, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| format!("argument '{key}' must be a string"))
}

/// The mock tool set.
pub fn travel_tools() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(
        ToolDescriptor::new(
            "get_weather",
            "Get current weather for a city (temperature, condition, precipitation)",
        )
        .with_required(&["city"]),
        |args| {
            let city = str_arg(args, "city")?;
            let (temperature, condition, precipitation) =
                forecast(city).ok_or_else(|| format!("No weather data for {city}"))?;
            Ok(serde_json::json!({
                "city": city,
                "temperature": temperature,
                "condition": condition,
                "precipitation": precipitation,
            }))
        },
    );

    registry.register(
        ToolDescriptor::new(
            "send_email",
            "Send an email notification with subject and body [HIGH RISK]",
        )
        .with_required(&["to", "subject", "body"]),
        |args| {
            let to = str_arg(args, "to")?;
            if !to.contains('@') {
                return Err(format!("'{to}' is not an email address"));
            }
            tracing::info!(to, subject = str_arg(args, "subject")?, "Mock email sent");
            Ok(serde_json::json!({"status": "sent", "to": to}))
        },
    );

    registry.register(
        ToolDescriptor::new("generate_image", "Draw an image of a place's weather")
            .with_required(&["city"]),
        |args| {
            let city = str_arg(args, "city")?;
            let slug = city.to_lowercase().replace(' ', "_");
            Ok(serde_json::json!({"image_id": format!("weather_{slug}"), "city": city}))
        },
    );

    registry.register(
        ToolDescriptor::new("cancel_trip", "Cancel the planned trip [HIGH RISK]")
            .with_required(&["reason"]),
        |args| Ok(serde_json::json!({"status": "cancelled", "reason": str_arg(args, "reason")?})),
    );

    registry.register(
        ToolDescriptor::new("recommend_snacks", "Get convenience store snack recommendations"),
        |_| {
            Ok(serde_json::json!({
                "snacks": ["instant ramen", "onigiri", "potato chips", "chocolate", "ice cream"]
            }))
        },
    );

    registry.register(
        ToolDescriptor::new(
            "check_umbrella",
            "Determine if an umbrella is needed based on precipitation",
        )
        .with_required(&["city", "precipitation"]),
        |args| {
            let city = str_arg(args, "city")?;
            let precipitation = args
                .get("precipitation")
                .and_then(serde_json::Value::as_u64)
                .ok_or("argument 'precipitation' must be a number")?;
            Ok(serde_json::json!({
                "city": city,
                "precipitation": precipitation,
                "umbrella_needed": precipitation >= 50,
            }))
        },
    );

    registry
}

#[derive(Debug, Clone)]
struct Reading {
    city: String,
    temperature: f64,
    precipitation: u64,
    evidence_id: String,
}

fn weather_lookup(city: &str) -> ProposedAction {
    ProposedAction::new("get_weather").with_arg("city", city)
}

fn readings(memory: &[ActionRecord]) -> Vec<Reading> {
    memory
        .iter()
        .filter(|r| r.tool_name == "get_weather")
        .filter_map(|r| {
            let result = r.outcome.result()?;
            Some(Reading {
                city: result["city"].as_str()?.to_string(),
                temperature: result["temperature"].as_f64()?,
                precipitation: result["precipitation"].as_u64().unwrap_or(0),
                evidence_id: weather_lookup(result["city"].as_str()?).evidence_id(),
            })
        })
        .collect()
}

/// Whether the decision step for `tool` already ran, failed, or was turned down.
fn settled(memory: &[ActionRecord], tool: &str) -> bool {
    memory.iter().any(|r| {
        r.tool_name == tool
            && matches!(
                r.outcome,
                ActionOutcome::Executed { .. }
                    | ActionOutcome::Failed { .. }
                    | ActionOutcome::HumanRejected { .. }
            )
    })
}

fn address_in(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '@' && c != '.' && c != '-' && c != '_'))
        .map(|w| w.trim_end_matches('.'))
        .find(|w| w.contains('@'))
        .map(str::to_string)
}

/// Rule-based planner standing in for a language model.
#[derive(Debug, Default)]
pub struct TravelPlanner;

impl TravelPlanner {
    pub fn plan(&self, context: &TaskContext, memory: &[ActionRecord]) -> CognitionOutput {
        let base = context
            .evidence
            .get("base_temperature")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(DEFAULT_BASE_TEMPERATURE);
        let readings = readings(memory);

        if let Some(city) = CITIES
            .iter()
            .find(|c| !readings.iter().any(|r| r.city == **c))
        {
            return CognitionOutput::new(
                format!("Need the current weather in {city} before deciding"),
                weather_lookup(city),
            )
            .with_confidence(0.95)
            .with_evidence(["retrieval"]);
        }

        let cited: Vec<String> = readings.iter().map(|r| r.evidence_id.clone()).collect();
        let mut above: Vec<&Reading> = readings.iter().filter(|r| r.temperature > base).collect();
        above.sort_by(|a, b| a.temperature.total_cmp(&b.temperature));

        let Some(destination) = above.first() else {
            return self.stay_home(memory, base, cited);
        };
        let headline = format!(
            "{} of 3 cities are above {base}°F; destination is {} at {}°F",
            above.len(),
            destination.city,
            destination.temperature
        );

        if let Some(feedback) = &context.human_feedback {
            if feedback.previous_proposal.tool_name == "send_email" {
                if let Some(to) = address_in(&feedback.rejection_reason) {
                    return CognitionOutput::new(
                        format!("{headline}. Reviewer corrected the recipient to {to}"),
                        itinerary_email(&to, destination),
                    )
                    .with_confidence(0.9)
                    .with_evidence(cited);
                }
            }
        }

        match above.len() {
            3 if !settled(memory, "generate_image") => {
                return CognitionOutput::new(
                    format!("{headline}. Drawing the destination's weather"),
                    ProposedAction::new("generate_image")
                        .with_arg("city", destination.city.as_str())
                        .with_arg(
                            "description",
                            format!("{}°F in {}", destination.temperature, destination.city),
                        ),
                )
                .with_confidence(0.85)
                .with_evidence(cited);
            }
            2 if !settled(memory, "send_email") => {
                return CognitionOutput::new(
                    format!("{headline}. Emailing the selected destination"),
                    itinerary_email(ITINERARY_RECIPIENT, destination),
                )
                .with_confidence(0.9)
                .with_evidence(cited);
            }
            _ => {}
        }

        CognitionOutput::new(
            format!("{headline}. Checking whether an umbrella is needed"),
            ProposedAction::new("check_umbrella")
                .with_arg("city", destination.city.as_str())
                .with_arg("precipitation", destination.precipitation),
        )
        .with_confidence(0.9)
        .with_evidence(cited)
        .final_action()
    }

    fn stay_home(&self, memory: &[ActionRecord], base: f64, cited: Vec<String>) -> CognitionOutput {
        if !settled(memory, "cancel_trip") {
            return CognitionOutput::new(
                format!("All cities are at or below {base}°F; cancelling the trip"),
                ProposedAction::new("cancel_trip")
                    .with_arg("reason", format!("All destinations at or below {base}°F")),
            )
            .with_confidence(0.9)
            .with_evidence(cited);
        }
        CognitionOutput::new(
            "Trip is off; recommending snacks for a night in",
            ProposedAction::new("recommend_snacks"),
        )
        .with_confidence(0.95)
        .with_evidence(cited)
        .final_action()
    }
}

fn itinerary_email(to: &str, destination: &Reading) -> ProposedAction {
    ProposedAction::new("send_email")
        .with_arg("to", to)
        .with_arg("subject", format!("Travel Plan: {}", destination.city))
        .with_arg(
            "body",
            format!(
                "Based on the weather analysis, the trip goes to {} at {}°F.",
                destination.city, destination.temperature
            ),
        )
}

#[async_trait]
impl CognitionEngine for TravelPlanner {
    async fn invoke(
        &self,
        context: &TaskContext,
        memory: &[ActionRecord],
    ) -> Result<CognitionOutput, CognitionError> {
        Ok(self.plan(context, memory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scl_runtime::hitl::{AutoApprove, ScriptedDecision, ScriptedDecisionProvider};
    use scl_runtime::reasoning::{SclController, TerminationReason};
    use std::sync::Arc;

    fn tools_called(report: &scl_runtime::RunReport) -> Vec<&str> {
        report.memory.iter().map(|r| r.tool_name.as_str()).collect()
    }

    async fn run_with_base(base: f64) -> scl_runtime::RunReport {
        SclController::builder(
            Arc::new(TravelPlanner),
            Arc::new(travel_tools()),
            Arc::new(AutoApprove),
        )
        .retriever(Arc::new(retriever(base)))
        .build()
        .run(TASK)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_two_warm_cities_send_email() {
        let report = run_with_base(55.0).await;
        assert_eq!(report.termination, TerminationReason::Completed);
        assert_eq!(
            tools_called(&report),
            vec!["get_weather", "get_weather", "get_weather", "send_email", "check_umbrella"]
        );
        assert_eq!(report.memory[3].arguments["to"], ITINERARY_RECIPIENT);
        assert_eq!(report.memory[4].arguments["city"], "San Francisco");
    }

    #[tokio::test]
    async fn test_all_warm_draws_coolest_city() {
        let report = run_with_base(40.0).await;
        assert_eq!(report.memory[3].tool_name, "generate_image");
        assert_eq!(report.memory[3].arguments["city"], "Atlanta");
        let umbrella = report.memory[4].outcome.result().unwrap();
        assert_eq!(umbrella["umbrella_needed"], true);
    }

    #[tokio::test]
    async fn test_single_warm_city_goes_straight_to_umbrella() {
        let report = run_with_base(70.0).await;
        assert_eq!(report.memory.len(), 4);
        assert_eq!(report.memory[3].arguments["city"], "Miami");
    }

    #[tokio::test]
    async fn test_cold_everywhere_cancels_and_recommends_snacks() {
        let report = run_with_base(90.0).await;
        assert_eq!(
            &tools_called(&report)[3..],
            &["cancel_trip", "recommend_snacks"]
        );
        assert_eq!(report.termination, TerminationReason::Completed);
    }

    #[tokio::test]
    async fn test_rejected_email_is_resent_to_corrected_address() {
        let decisions = Arc::new(ScriptedDecisionProvider::new(vec![ScriptedDecision::Reject(
            "Wrong address, use ops@test.com instead".into(),
        )]));
        let report = SclController::builder(
            Arc::new(TravelPlanner),
            Arc::new(travel_tools()),
            decisions,
        )
        .retriever(Arc::new(retriever(55.0)))
        .build()
        .run(TASK)
        .await
        .unwrap();

        assert!(matches!(
            report.memory[3].outcome,
            ActionOutcome::HumanRejected { .. }
        ));
        assert_eq!(report.memory[4].arguments["to"], "ops@test.com");
        assert_eq!(report.termination, TerminationReason::Completed);
    }

    #[test]
    fn test_address_extraction() {
        assert_eq!(
            address_in("Wrong email! Should be test-scl@test.com.").as_deref(),
            Some("test-scl@test.com")
        );
        assert_eq!(address_in("not now"), None);
    }
}
