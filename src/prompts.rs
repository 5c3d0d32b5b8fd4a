use crate::gateway::GenerationContext;
use crate::schema::{HowToKind, Milestone, PlanMilestone, Roadmap};
use serde::Serialize;

pub(crate) const GOAL_MARKER: &str = "Goal: ";
pub(crate) const CURRENT_ROADMAP_MARKER: &str = "Current Roadmap: ";

const OUTPUT_SCHEMA: &str = r#"{
  "goal": "string",
  "milestones": [
    {
      "title": "string",
      "outcome": "string (specific and measurable)",
      "how_to": [
        {
          "type": "resource | course | activity | tool | book",
          "description": "string naming the platform or publisher",
          "link": "direct https URL, or omit the field"
        }
      ]
    }
  ]
}"#;

const RESOURCE_RULES: &str = "\
Resource rules:
- Prefer reputable learning platforms, official documentation, and industry bodies.
- Never write generic advice such as \"search for courses\" or placeholder links.
- Give one direct link per item. Good: https://www.hackerrank.com/ Bad: https://www.hackerrank.com/%20(and%20https://www.codewars.com/)
- Prefer resources available in the learner's country and language when they exist.
- Fast learners get intensive programs; slow learners get self-paced material and books.
- Include hands-on projects or competitions where they fit the goal.";

#[derive(Serialize)]
struct RoadmapForPrompt<'a> {
    goal: &'a str,
    milestones: &'a [Milestone],
}

fn text_or_placeholder(value: &str) -> &str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        "not provided"
    } else {
        trimmed
    }
}

fn json_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn learner_block(context: &GenerationContext) -> String {
    format!(
        "Skills: {}\nInterests: {}\nEducation: {}\nCountry: {}\nLearning speed: {}\nCustom message: {}",
        json_list(&context.skills),
        json_list(&context.interests),
        text_or_placeholder(&context.education),
        text_or_placeholder(&context.country),
        context.learning_speed.as_str(),
        text_or_placeholder(&context.custom_message),
    )
}

fn allowed_types() -> String {
    HowToKind::ALL
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<&str>>()
        .join(", ")
}

pub fn generation_prompt(context: &GenerationContext) -> String {
    format!(
        "You are a personalized learning roadmap generator.\n\
Break the learner's goal into sequential, achievable milestones. Each milestone builds on the previous one, \
states a clear and measurable outcome, and lists concrete resources or activities under \"how_to\".\n\
\n\
Respond with JSON only, no commentary, matching this schema:\n{OUTPUT_SCHEMA}\n\
The \"type\" of every how_to item must be one of: {types}.\n\
\n\
{RESOURCE_RULES}\n\
\n\
Learner:\n\
{GOAL_MARKER}{goal}\n\
{learner}\n",
        types = allowed_types(),
        goal = context.goal.trim(),
        learner = learner_block(context),
    )
}

pub fn modification_prompt(
    roadmap: &Roadmap,
    completed: &[Milestone],
    feedback: &str,
    context: &GenerationContext,
    target_index: usize,
) -> String {
    let current = serde_json::to_string(&RoadmapForPrompt {
        goal: &roadmap.goal,
        milestones: &roadmap.milestones,
    })
    .unwrap_or_else(|_| "{}".to_string());
    let completed_plan: Vec<PlanMilestone> = completed.iter().map(PlanMilestone::from).collect();
    let completed_json = serde_json::to_string(&completed_plan).unwrap_or_else(|_| "[]".to_string());

    format!(
        "You are a personalized learning roadmap editor.\n\
Update the roadmap below using the learner's feedback.\n\
\n\
{CURRENT_ROADMAP_MARKER}{current}\n\
Completed Milestones: {completed_json}\n\
Milestone To Modify: {target_index}\n\
User Feedback: {feedback}\n\
{learner}\n\
\n\
Rules:\n\
1. Every milestone with \"isCompleted\": true must be returned exactly as it is, byte for byte, at the same position.\n\
2. Revise the remaining milestones in light of the feedback, starting with milestone {target_index}.\n\
3. Keep the same goal and the same number of milestones, in the same order.\n\
4. Keep the revisions consistent with the learner's skills and interests.\n\
5. Respond with JSON only, no commentary, matching this schema:\n{OUTPUT_SCHEMA}\n\
6. The \"type\" of every how_to item must be one of: {types}.\n\
\n\
{RESOURCE_RULES}\n",
        feedback = feedback.trim(),
        learner = learner_block(context),
        types = allowed_types(),
    )
}
