use crate::log_utils::{log_excerpt, sanitize_log_message};
use crate::prompts;
use crate::providers::{GenerationOptions, ProviderRequest, ProviderRuntime};
use crate::schema::{HowToItem, HowToKind, LearningSpeed, Milestone, Plan, PlanMilestone, Roadmap};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationContext {
    pub goal: String,
    pub skills: Vec<String>,
    pub interests: Vec<String>,
    pub education: String,
    pub country: String,
    pub learning_speed: LearningSpeed,
    pub custom_message: String,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{0}")]
    Validation(String),
    #[error("{message}")]
    ProviderFailure { message: String, retryable: bool },
    #[error("The model returned no roadmap text. Try again.")]
    EmptyOutput,
    #[error("The model returned a roadmap that could not be read: {0}")]
    MalformedOutput(String),
}

impl GenerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ProviderFailure { .. } => "provider_failure",
            Self::EmptyOutput => "empty_output",
            Self::MalformedOutput(_) => "malformed_output",
        }
    }
}

#[derive(Clone)]
pub struct PlanGateway {
    runtime: ProviderRuntime,
    model: String,
    options: GenerationOptions,
}

impl PlanGateway {
    pub fn new(runtime: ProviderRuntime, model: impl Into<String>, options: GenerationOptions) -> Self {
        Self {
            runtime,
            model: model.into(),
            options,
        }
    }

    pub fn generate_plan(&self, context: &GenerationContext) -> Result<Plan, GenerationError> {
        if context.goal.trim().is_empty() {
            return Err(GenerationError::Validation(
                "Describe the goal you want a roadmap for.".to_string(),
            ));
        }
        let prompt = prompts::generation_prompt(context);
        self.complete(prompt, "generate", true)
    }

    pub fn modify_plan(
        &self,
        current: &Roadmap,
        completed: &[Milestone],
        feedback: &str,
        context: &GenerationContext,
        target_index: usize,
    ) -> Result<Plan, GenerationError> {
        let target = current.milestones.get(target_index).ok_or_else(|| {
            GenerationError::Validation(format!(
                "Milestone {target_index} does not exist in this roadmap."
            ))
        })?;
        if target.is_completed || completed.contains(target) {
            return Err(GenerationError::Validation(
                "Completed milestones cannot be modified.".to_string(),
            ));
        }
        if feedback.trim().is_empty() {
            return Err(GenerationError::Validation(
                "Tell us what should change about this milestone.".to_string(),
            ));
        }

        let prompt =
            prompts::modification_prompt(current, completed, feedback, context, target_index);
        self.complete(prompt, "modify", false)
    }

    fn complete(
        &self,
        prompt: String,
        purpose: &'static str,
        require_goal: bool,
    ) -> Result<Plan, GenerationError> {
        let correlation_id = format!("gen_{:08x}", rand::thread_rng().gen::<u32>());
        let request = ProviderRequest {
            model: self.model.clone(),
            input: prompt,
            options: self.options,
            correlation_id: Some(correlation_id.clone()),
        };

        info!(
            correlation_id = %correlation_id,
            purpose,
            transport = self.runtime.transport_name(),
            model = %self.model,
            "dispatching plan request"
        );
        let response = self.runtime.dispatch(&request).map_err(|err| {
            warn!(
                correlation_id = %correlation_id,
                retryable = err.is_retryable(),
                "provider call failed: {}",
                sanitize_log_message(&err.message)
            );
            GenerationError::ProviderFailure {
                message: err.message.clone(),
                retryable: err.is_retryable(),
            }
        })?;

        let plan = parse_plan_text(response.text.as_deref(), require_goal).map_err(|err| {
            if let Some(raw) = response.text.as_deref() {
                warn!(
                    correlation_id = %correlation_id,
                    "rejected model output ({err}): {}",
                    log_excerpt(raw)
                );
            } else {
                warn!(correlation_id = %correlation_id, "provider returned no candidate text");
            }
            err
        })?;

        info!(
            correlation_id = %correlation_id,
            milestones = plan.milestones.len(),
            output_tokens = response.usage.output_tokens,
            "plan accepted"
        );
        Ok(plan)
    }
}

/// Parse-and-validate boundary for model output.
///
/// `require_goal` is false for modification output, where the stored goal wins
/// and a missing `goal` key is tolerated.
pub fn parse_plan_text(raw: Option<&str>, require_goal: bool) -> Result<Plan, GenerationError> {
    let raw = raw.filter(|text| !text.trim().is_empty());
    let Some(raw) = raw else {
        return Err(GenerationError::EmptyOutput);
    };

    let unfenced = strip_code_fences(raw);
    let object = extract_json_object(&unfenced).ok_or_else(|| {
        GenerationError::MalformedOutput("no JSON object found".to_string())
    })?;
    let value: Value = serde_json::from_str(object)
        .map_err(|e| GenerationError::MalformedOutput(format!("invalid JSON: {e}")))?;

    validate_plan(&value, require_goal).map_err(GenerationError::MalformedOutput)
}

fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```JSON", "").replace("```", "").trim().to_string()
}

/// Returns the first balanced `{...}` span, ignoring braces inside strings.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn required_text(object: &Map<String, Value>, key: &str, path: &str) -> Result<String, String> {
    match object.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(format!("{path}.{key} is empty")),
        Some(_) => Err(format!("{path}.{key} must be a string")),
        None => Err(format!("{path}.{key} is missing")),
    }
}

fn validate_plan(value: &Value, require_goal: bool) -> Result<Plan, String> {
    let root = value
        .as_object()
        .ok_or_else(|| "root must be an object".to_string())?;

    let goal = match root.get("goal") {
        None | Some(Value::Null) if !require_goal => String::new(),
        _ => required_text(root, "goal", "$")?,
    };

    let milestones = match root.get("milestones") {
        Some(Value::Array(items)) if !items.is_empty() => items,
        Some(Value::Array(_)) => return Err("$.milestones is empty".to_string()),
        Some(_) => return Err("$.milestones must be an array".to_string()),
        None => return Err("$.milestones is missing".to_string()),
    };

    let milestones = milestones
        .iter()
        .enumerate()
        .map(|(index, item)| validate_milestone(item, &format!("$.milestones[{index}]")))
        .collect::<Result<Vec<PlanMilestone>, String>>()?;

    Ok(Plan { goal, milestones })
}

fn validate_milestone(value: &Value, path: &str) -> Result<PlanMilestone, String> {
    let object = value
        .as_object()
        .ok_or_else(|| format!("{path} must be an object"))?;
    let title = required_text(object, "title", path)?;
    let outcome = required_text(object, "outcome", path)?;
    let how_to = match object.get("how_to") {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(format!("{path}.how_to must be an array")),
        None => return Err(format!("{path}.how_to is missing")),
    };

    let how_to = how_to
        .iter()
        .enumerate()
        .map(|(index, item)| validate_how_to(item, &format!("{path}.how_to[{index}]")))
        .collect::<Result<Vec<HowToItem>, String>>()?;

    Ok(PlanMilestone {
        title,
        outcome,
        how_to,
    })
}

fn validate_how_to(value: &Value, path: &str) -> Result<HowToItem, String> {
    let object = value
        .as_object()
        .ok_or_else(|| format!("{path} must be an object"))?;
    let raw_kind = required_text(object, "type", path)?;
    let kind = HowToKind::parse(&raw_kind)
        .ok_or_else(|| format!("{path}.type has unsupported value {raw_kind:?}"))?;
    let description = required_text(object, "description", path)?;
    let link = match object.get("link") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => normalize_link(s, path),
        Some(_) => return Err(format!("{path}.link must be a string")),
    };

    Ok(HowToItem {
        kind,
        description,
        link,
    })
}

pub(crate) fn normalize_link(raw: &str, path: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match url::Url::parse(trimmed) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some() => {
            Some(trimmed.to_string())
        }
        _ => {
            warn!("dropping unusable link at {path}: {}", log_excerpt(trimmed));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::{ProviderError, ProviderResponse, ProviderUsage};
    use crate::schema::{compute_progress, HowToKind};
    use crate::transport::ExecutionTransport;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    enum Reply {
        Text(Option<String>),
        Fail(bool),
    }

    struct ScriptedTransport {
        reply: Reply,
        prompts: Mutex<Vec<String>>,
    }

    impl ExecutionTransport for ScriptedTransport {
        fn dispatch(
            &self,
            request: &ProviderRequest,
            _api_key: Option<&str>,
        ) -> Result<ProviderResponse, ProviderError> {
            self.prompts
                .lock()
                .expect("prompts lock")
                .push(request.input.clone());
            match &self.reply {
                Reply::Text(text) => Ok(ProviderResponse {
                    model: request.model.clone(),
                    text: text.clone(),
                    usage: ProviderUsage::default(),
                }),
                Reply::Fail(true) => Err(ProviderError::retryable("quota exceeded")),
                Reply::Fail(false) => Err(ProviderError::non_retryable("bad request")),
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn scripted_gateway(reply: Reply) -> (PlanGateway, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport {
            reply,
            prompts: Mutex::new(Vec::new()),
        });
        let runtime = ProviderRuntime::new(transport.clone(), None);
        (
            PlanGateway::new(runtime, "test-model", GenerationOptions::default()),
            transport,
        )
    }

    fn context(goal: &str) -> GenerationContext {
        GenerationContext {
            goal: goal.to_string(),
            ..GenerationContext::default()
        }
    }

    const PLAN_JSON: &str = r#"{
        "goal": "Learn Rust",
        "milestones": [
            {"title": "Basics", "outcome": "Write a CLI", "how_to": [
                {"type": "Course", "description": "The Rust Book", "link": "https://doc.rust-lang.org/book/"},
                {"type": "TOOL", "description": "rustup", "link": ""}
            ]},
            {"title": "Async", "outcome": "Build a server", "how_to": [
                {"type": "activity", "description": "Write an echo server"}
            ]}
        ]
    }"#;

    fn sample_roadmap() -> Roadmap {
        let plan = parse_plan_text(Some(PLAN_JSON), true).expect("plan");
        let mut milestones: Vec<Milestone> = plan.milestones.into_iter().map(Milestone::from).collect();
        milestones[0].is_completed = true;
        Roadmap {
            id: "rm_1".to_string(),
            user_id: "user-1".to_string(),
            title: "Learn Rust".to_string(),
            goal: plan.goal,
            progress: compute_progress(&milestones),
            milestones,
            created_at: String::new(),
            updated_at: String::new(),
            version: 1,
        }
    }

    #[test]
    fn parses_fenced_output_with_trailing_commentary() {
        let raw = format!(
            "```json {PLAN_JSON} ``` \nThe URL for the **Rust Book** is the official one."
        );
        let plan = parse_plan_text(Some(&raw), true).expect("plan");
        assert_eq!(plan.goal, "Learn Rust");
        assert_eq!(plan.milestones.len(), 2);
        assert_eq!(plan.milestones[0].how_to[0].kind, HowToKind::Course);
        assert_eq!(plan.milestones[0].how_to[1].kind, HowToKind::Tool);
        assert_eq!(plan.milestones[0].how_to[1].link, None);
        assert_eq!(plan.milestones[1].how_to[0].link, None);
    }

    #[test]
    fn braces_inside_strings_do_not_end_the_object() {
        let raw = r#"Here you go: {"goal": "a } b", "milestones": [{"title": "t", "outcome": "o {x}", "how_to": []}]} trailing {"#;
        let plan = parse_plan_text(Some(raw), true).expect("plan");
        assert_eq!(plan.goal, "a } b");
        assert_eq!(plan.milestones[0].outcome, "o {x}");
    }

    #[test]
    fn missing_or_blank_text_is_empty_output() {
        assert!(matches!(
            parse_plan_text(None, true),
            Err(GenerationError::EmptyOutput)
        ));
        assert!(matches!(
            parse_plan_text(Some("  \n "), true),
            Err(GenerationError::EmptyOutput)
        ));
    }

    #[test]
    fn shape_mismatches_are_rejected_not_coerced() {
        let cases = [
            "no json here",
            r#"{"goal": "g", "milestones": []}"#,
            r#"{"goal": "g", "milestones": {"title": "t"}}"#,
            r#"{"goal": "g", "milestones": [{"title": "t", "how_to": []}]}"#,
            r#"{"goal": "g", "milestones": [{"title": "t", "outcome": "o", "how_to": [{"type": "certification", "description": "d"}]}]}"#,
            r#"{"goal": "g", "milestones": [{"title": "t", "outcome": "o", "how_to": [{"type": "course", "description": "d", "link": 7}]}]}"#,
            r#"{"goal": 3, "milestones": [{"title": "t", "outcome": "o", "how_to": []}]}"#,
            r#"{"goal": "g", "milestones": [{"title": "t", "outcome": "o", "how_to": [}]}"#,
        ];
        for raw in cases {
            let result = parse_plan_text(Some(raw), true);
            assert!(
                matches!(result, Err(GenerationError::MalformedOutput(_))),
                "expected malformed output for {raw}"
            );
        }
    }

    #[test]
    fn malformed_output_names_the_offending_path() {
        let raw = r#"{"goal": "g", "milestones": [{"title": "t", "outcome": "o", "how_to": [{"type": "webinar", "description": "d"}]}]}"#;
        let err = parse_plan_text(Some(raw), true).expect_err("malformed");
        assert!(err.to_string().contains("$.milestones[0].how_to[0].type"));
    }

    #[test]
    fn modification_output_may_omit_goal() {
        let raw = r#"{"milestones": [{"title": "t", "outcome": "o", "how_to": [], "isCompleted": true}]}"#;
        assert!(parse_plan_text(Some(raw), false).is_ok());
        assert!(parse_plan_text(Some(raw), true).is_err());
    }

    #[test]
    fn non_http_links_are_dropped() {
        let raw = r#"{"goal": "g", "milestones": [{"title": "t", "outcome": "o", "how_to": [
            {"type": "resource", "description": "a", "link": "javascript:alert(1)"},
            {"type": "resource", "description": "b", "link": "https://www.hackerrank.com/"}
        ]}]}"#;
        let plan = parse_plan_text(Some(raw), true).expect("plan");
        assert_eq!(plan.milestones[0].how_to[0].link, None);
        assert_eq!(
            plan.milestones[0].how_to[1].link.as_deref(),
            Some("https://www.hackerrank.com/")
        );
    }

    #[test]
    fn generate_plan_returns_canonical_types() {
        let (gateway, transport) = scripted_gateway(Reply::Text(Some(format!("```json\n{PLAN_JSON}\n```"))));
        let plan = gateway.generate_plan(&context("Learn Rust")).expect("plan");
        assert!(!plan.milestones.is_empty());
        for milestone in &plan.milestones {
            for item in &milestone.how_to {
                assert!(HowToKind::ALL.contains(&item.kind));
            }
        }
        let prompts = transport.prompts.lock().expect("prompts");
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Goal: Learn Rust"));
    }

    #[test]
    fn generate_plan_requires_a_goal_before_calling_provider() {
        let (gateway, transport) = scripted_gateway(Reply::Text(Some(PLAN_JSON.to_string())));
        let err = gateway.generate_plan(&context("   ")).expect_err("no goal");
        assert!(matches!(err, GenerationError::Validation(_)));
        assert!(transport.prompts.lock().expect("prompts").is_empty());
    }

    #[test]
    fn provider_failures_surface_with_retry_hint() {
        let (gateway, _) = scripted_gateway(Reply::Fail(true));
        match gateway.generate_plan(&context("Learn Rust")) {
            Err(GenerationError::ProviderFailure { retryable, .. }) => assert!(retryable),
            other => panic!("unexpected {other:?}"),
        }
        let (gateway, _) = scripted_gateway(Reply::Fail(false));
        match gateway.generate_plan(&context("Learn Rust")) {
            Err(GenerationError::ProviderFailure { retryable, .. }) => assert!(!retryable),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn no_candidate_is_empty_output() {
        let (gateway, _) = scripted_gateway(Reply::Text(None));
        assert!(matches!(
            gateway.generate_plan(&context("Learn Rust")),
            Err(GenerationError::EmptyOutput)
        ));
    }

    #[test]
    fn modify_plan_rejects_completed_or_missing_targets() {
        let (gateway, transport) = scripted_gateway(Reply::Text(Some(PLAN_JSON.to_string())));
        let roadmap = sample_roadmap();
        let completed = roadmap.completed_milestones();
        let ctx = context(&roadmap.goal);

        let err = gateway
            .modify_plan(&roadmap, &completed, "harder", &ctx, 0)
            .expect_err("completed target");
        assert!(matches!(err, GenerationError::Validation(_)));
        let err = gateway
            .modify_plan(&roadmap, &completed, "harder", &ctx, 9)
            .expect_err("missing target");
        assert!(matches!(err, GenerationError::Validation(_)));
        let err = gateway
            .modify_plan(&roadmap, &completed, "  ", &ctx, 1)
            .expect_err("blank feedback");
        assert!(matches!(err, GenerationError::Validation(_)));
        assert!(transport.prompts.lock().expect("prompts").is_empty());
    }

    #[test]
    fn modify_plan_embeds_roadmap_and_feedback() {
        let (gateway, transport) = scripted_gateway(Reply::Text(Some(PLAN_JSON.to_string())));
        let roadmap = sample_roadmap();
        let completed = roadmap.completed_milestones();
        let plan = gateway
            .modify_plan(&roadmap, &completed, "more async projects", &context(""), 1)
            .expect("plan");
        assert_eq!(plan.milestones.len(), 2);
        let prompts = transport.prompts.lock().expect("prompts");
        assert!(prompts[0].contains("User Feedback: more async projects"));
        assert!(prompts[0].contains("Milestone To Modify: 1"));
        assert!(prompts[0].contains("\"isCompleted\":true"));
    }
}
