//! Planner step: request in, validated [`Plan`] out.

use crate::debug;
use crate::error::Result;
use crate::llm::TextGenerator;
use crate::plan::{parse_plan, Plan};
use crate::prompts::PlanPromptBuilder;

/// Turns `request` into a plan with a single generation call.
///
/// Generation failures and malformed output are returned as errors; no
/// default plan is ever fabricated.
pub async fn plan(request: &str, generator: &dyn TextGenerator) -> Result<Plan> {
    let prompt = PlanPromptBuilder::new(request).build();
    debug::debug_generation(generator.name(), "planner", &prompt);

    let output = generator.generate(&prompt).await?;
    let plan = parse_plan(&output)?;

    tracing::info!(files = plan.files.len(), steps = plan.instructions.len(), "plan created");
    Ok(plan)
}
