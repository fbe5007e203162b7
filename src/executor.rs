//! Plan execution — run planned steps one at a time.
//!
//! Steps run strictly in order because later steps may depend on the side
//! effects of earlier ones. Every step opens its own provider connection and
//! closes it before the next step starts. Failures are recorded as outcome
//! text; they never stop the plan.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::{ToolCatalog, ToolDescriptor};
use crate::coerce::ArgumentCoercer;
use crate::planner::PlanStep;
use crate::provider::ProviderSet;
use crate::Result;

/// What happened when a step ran.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub tool_id: String,
    pub description: String,
    /// Tool output on success, a readable error otherwise.
    pub result_text: String,
    pub succeeded: bool,
}

impl ExecutionOutcome {
    fn success(step: &PlanStep, text: String) -> Self {
        Self {
            tool_id: step.tool_id.clone(),
            description: step.description.clone(),
            result_text: text,
            succeeded: true,
        }
    }

    fn failure(step: &PlanStep, text: String) -> Self {
        Self {
            tool_id: step.tool_id.clone(),
            description: step.description.clone(),
            result_text: text,
            succeeded: false,
        }
    }
}

/// Runs plans against the catalog's providers.
#[derive(Debug, Clone, Default)]
pub struct PlanExecutor {
    coercer: ArgumentCoercer,
}

impl PlanExecutor {
    pub fn new(coercer: ArgumentCoercer) -> Self {
        Self { coercer }
    }

    /// Execute every step; returns one outcome per step, in step order.
    pub async fn execute(
        &self,
        plan: &[PlanStep],
        catalog: &ToolCatalog,
        providers: &ProviderSet,
    ) -> Vec<ExecutionOutcome> {
        let mut outcomes = Vec::with_capacity(plan.len());

        for (i, step) in plan.iter().enumerate() {
            info!(
                "Step {}/{}: {} - {}",
                i + 1,
                plan.len(),
                step.tool_id,
                step.description
            );
            let outcome = self.execute_step(step, catalog, providers).await;
            debug!(
                "Step {} {}: {} chars",
                i + 1,
                if outcome.succeeded { "succeeded" } else { "failed" },
                outcome.result_text.chars().count()
            );
            outcomes.push(outcome);
        }

        outcomes
    }

    async fn execute_step(
        &self,
        step: &PlanStep,
        catalog: &ToolCatalog,
        providers: &ProviderSet,
    ) -> ExecutionOutcome {
        let Some(descriptor) = catalog.lookup(&step.tool_id) else {
            warn!("Tool {} not found", step.tool_id);
            return ExecutionOutcome::failure(step, format!("Tool {} not found", step.tool_id));
        };

        match self.invoke(descriptor, step, providers).await {
            Ok(text) => ExecutionOutcome::success(step, text),
            Err(e) => {
                warn!("Error executing {}: {}", step.tool_id, e);
                ExecutionOutcome::failure(step, format!("Error executing tool: {e}"))
            }
        }
    }

    async fn invoke(
        &self,
        descriptor: &ToolDescriptor,
        step: &PlanStep,
        providers: &ProviderSet,
    ) -> Result<String> {
        let provider = providers.get(&descriptor.provider_id).ok_or_else(|| {
            crate::Error::Provider(format!("provider {} is not registered", descriptor.provider_id))
        })?;

        let arguments = self.coercer.coerce(descriptor, &step.arguments);
        let arguments = Value::Object(arguments);
        debug!("Calling {} with {}", step.tool_id, arguments);

        let mut connection = provider.open().await?;
        let result = connection.call_tool(&descriptor.tool_name, arguments).await;
        if let Err(e) = connection.close().await {
            warn!("Closing provider {} failed: {}", descriptor.provider_id, e);
        }

        Ok(result?.render())
    }
}
