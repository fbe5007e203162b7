//! Plan synthesis — turn a request into an ordered list of tool calls.
//!
//! The planning model is shown every catalog entry and asked for a JSON
//! object `{"reasoning": ..., "plan": [{"tool", "arguments", "description"}]}`.
//! Completions are not reliably well-formed, so parsing is lenient about
//! surrounding noise but strict about the plan itself: any malformed step
//! discards the whole plan.

mod scan;

pub use scan::{object_spans, strip_code_fence};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::catalog::ToolCatalog;
use crate::coerce::Arguments;
use crate::llm::{CompletionRequest, CompletionService};

/// One planned tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    /// Qualified tool id; validated at execution time.
    pub tool_id: String,
    pub arguments: Arguments,
    pub description: String,
}

impl PlanStep {
    pub fn new(tool_id: &str, arguments: Arguments, description: &str) -> Self {
        Self {
            tool_id: tool_id.to_string(),
            arguments,
            description: description.to_string(),
        }
    }
}

/// A parsed plan. An empty plan means "no actionable plan".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub reasoning: Option<String>,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

#[derive(Debug, Deserialize)]
struct RawStep {
    tool: String,
    arguments: Map<String, Value>,
    #[serde(default)]
    description: String,
}

/// Builds plans with the reasoning model.
#[derive(Debug, Clone)]
pub struct PlanSynthesizer {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl PlanSynthesizer {
    pub fn new(model: &str, temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: model.to_string(),
            temperature,
            max_tokens,
        }
    }

    /// Ask the completion service for a plan. Never fails: any problem yields
    /// an empty plan.
    pub async fn synthesize(
        &self,
        completion: &dyn CompletionService,
        request: &str,
        catalog: &ToolCatalog,
    ) -> Plan {
        let prompt = CompletionRequest::new(
            &self.model,
            build_system_prompt(catalog),
            format!("Request: {request}"),
        )
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        let text = match completion.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Planning completion failed: {}", e);
                return Plan::default();
            }
        };

        debug!("Raw plan completion: {}", text);

        let plan = parse_plan(&text);
        match &plan.reasoning {
            Some(reasoning) => info!("Plan with {} steps: {}", plan.len(), reasoning),
            None => info!("Plan with {} steps", plan.len()),
        }
        plan
    }
}

/// Render every catalog entry for the planning prompt.
pub fn describe_tools(catalog: &ToolCatalog) -> String {
    if catalog.is_empty() {
        return "No tools available.".to_string();
    }

    catalog
        .iter()
        .map(|tool| {
            let params = tool
                .properties()
                .map(|p| Value::Object(p.clone()))
                .unwrap_or_else(|| Value::Object(Map::new()));
            let params = serde_json::to_string_pretty(&params).unwrap_or_else(|_| "{}".to_string());
            format!(
                "**{}**\n- Description: {}\n- Provider: {}\n- Parameters: {}\n",
                tool.id(),
                tool.description,
                tool.provider_id,
                params
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_system_prompt(catalog: &ToolCatalog) -> String {
    format!(
        r#"You are an agent that plans how to fulfil a request using the tools below.

AVAILABLE TOOLS:
{tools}

Analyse the user's request and build an execution plan from the available tools.

Rules:
- If you do not know how to help, return an empty plan
- Only use tools that exist, referenced by their full id (provider:tool)
- Be specific with arguments and use the parameter names listed for each tool
- Order steps so that later steps can rely on earlier ones

Output format:
- Reply with a single valid JSON object and nothing else:
{{
  "reasoning": "Why these steps answer the request",
  "plan": [
    {{
      "tool": "provider:tool",
      "arguments": {{}},
      "description": "What this step does"
    }}
  ]
}}"#,
        tools = describe_tools(catalog)
    )
}

/// Parse completion text into a plan.
///
/// The first balanced object carrying a `plan` key is used. A missing or
/// malformed plan yields an empty plan.
pub fn parse_plan(text: &str) -> Plan {
    let body = strip_code_fence(text);

    for span in object_spans(body) {
        match serde_json::from_str::<Value>(span) {
            Ok(Value::Object(object)) if object.contains_key("plan") => {
                return plan_from_object(object);
            }
            Ok(_) => debug!("Skipping JSON object without a plan"),
            Err(e) => debug!("Skipping unparsable candidate: {}", e),
        }
    }

    warn!("No plan found in completion");
    Plan::default()
}

fn plan_from_object(mut object: Map<String, Value>) -> Plan {
    let reasoning = object
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::to_string);

    let raw_steps = match object.remove("plan") {
        Some(Value::Array(steps)) => steps,
        Some(Value::Null) => Vec::new(),
        Some(other) => {
            warn!("Plan is not an array: {}", other);
            return Plan::default();
        }
        None => Vec::new(),
    };

    let mut steps = Vec::with_capacity(raw_steps.len());
    for (i, raw) in raw_steps.into_iter().enumerate() {
        let step: RawStep = match serde_json::from_value(raw) {
            Ok(step) => step,
            Err(e) => {
                warn!("Discarding plan, step {} is malformed: {}", i + 1, e);
                return Plan::default();
            }
        };
        if step.tool.trim().is_empty() {
            warn!("Discarding plan, step {} names no tool", i + 1);
            return Plan::default();
        }
        steps.push(PlanStep {
            tool_id: step.tool.trim().to_string(),
            arguments: step.arguments,
            description: step.description,
        });
    }

    Plan { reasoning, steps }
}
