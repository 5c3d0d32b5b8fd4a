use crate::prompts::{CURRENT_ROADMAP_MARKER, GOAL_MARKER};
use crate::providers::types::{ProviderError, ProviderRequest, ProviderResponse, ProviderUsage};
use crate::transport::ExecutionTransport;
use serde_json::Value;

/// Offline transport that answers like a well-behaved model: fenced JSON with a
/// trailing remark.
pub struct MockTransport;

impl MockTransport {
    pub fn new() -> Self {
        Self
    }

    fn line_after<'a>(input: &'a str, marker: &str) -> Option<&'a str> {
        input
            .lines()
            .find_map(|line| line.trim_start().strip_prefix(marker))
            .map(str::trim)
    }

    fn generated_plan(goal: &str) -> Value {
        let goal = if goal.is_empty() { "your goal" } else { goal };
        serde_json::json!({
            "goal": goal,
            "milestones": [
                {
                    "title": "Foundations",
                    "outcome": format!("Explain the core concepts behind {goal}"),
                    "how_to": [
                        {"type": "Course", "description": "Introductory course on Coursera", "link": "https://www.coursera.org/"},
                        {"type": "book", "description": "A well reviewed beginner book"}
                    ]
                },
                {
                    "title": "Guided practice",
                    "outcome": "Complete ten graded exercises",
                    "how_to": [
                        {"type": "activity", "description": "Daily exercises on freeCodeCamp", "link": "https://www.freecodecamp.org/"}
                    ]
                },
                {
                    "title": "Capstone project",
                    "outcome": "Publish one project that uses what you learned",
                    "how_to": [
                        {"type": "TOOL", "description": "Host the project on GitHub", "link": "https://github.com/"}
                    ]
                }
            ]
        })
    }

    fn revised_roadmap(mut roadmap: Value) -> Value {
        if let Some(milestones) = roadmap.get_mut("milestones").and_then(|v| v.as_array_mut()) {
            for milestone in milestones.iter_mut() {
                let done = milestone
                    .get("isCompleted")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if done {
                    continue;
                }
                if let Some(outcome) = milestone.get("outcome").and_then(|v| v.as_str()) {
                    let revised = format!("{outcome} (revised from feedback)");
                    milestone["outcome"] = Value::String(revised);
                }
            }
        }
        roadmap
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTransport for MockTransport {
    fn dispatch(
        &self,
        request: &ProviderRequest,
        _api_key: Option<&str>,
    ) -> Result<ProviderResponse, ProviderError> {
        let body = match Self::line_after(&request.input, CURRENT_ROADMAP_MARKER) {
            Some(raw) => {
                let roadmap = serde_json::from_str::<Value>(raw).map_err(|_| {
                    ProviderError::non_retryable("Mock transport could not read the roadmap.")
                })?;
                Self::revised_roadmap(roadmap)
            }
            None => {
                let goal = Self::line_after(&request.input, GOAL_MARKER).unwrap_or_default();
                Self::generated_plan(goal)
            }
        };

        let text = format!(
            "```json\n{}\n```\nThe URLs above point to the official sites.",
            serde_json::to_string_pretty(&body)
                .map_err(|_| ProviderError::non_retryable("Mock response could not be encoded."))?
        );

        Ok(ProviderResponse {
            model: request.model.clone(),
            text: Some(text),
            usage: ProviderUsage::default(),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
