use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningSpeed {
    Slow,
    #[default]
    Medium,
    Fast,
}

impl LearningSpeed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slow => "slow",
            Self::Medium => "medium",
            Self::Fast => "fast",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "slow" => Some(Self::Slow),
            "medium" => Some(Self::Medium),
            "fast" => Some(Self::Fast),
            _ => None,
        }
    }
}

/// Request-side learning speed: case-insensitive, with blank or null meaning
/// "not given" so stored preferences apply.
pub fn deserialize_optional_speed<'de, D>(deserializer: D) -> Result<Option<LearningSpeed>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => LearningSpeed::parse(value).map(Some).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "unknown learning speed {value:?}, expected slow, medium, or fast"
            ))
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HowToKind {
    Resource,
    Course,
    Activity,
    Tool,
    Book,
}

impl HowToKind {
    pub const ALL: [HowToKind; 5] = [
        Self::Resource,
        Self::Course,
        Self::Activity,
        Self::Tool,
        Self::Book,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::Course => "course",
            Self::Activity => "activity",
            Self::Tool => "tool",
            Self::Book => "book",
        }
    }

    /// Case-insensitive lookup of the canonical kind.
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == lowered)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HowToItem {
    #[serde(rename = "type")]
    pub kind: HowToKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Milestone as proposed by the model, before it is part of a saved roadmap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanMilestone {
    pub title: String,
    pub outcome: String,
    pub how_to: Vec<HowToItem>,
}

/// Transient plan returned by the generation gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub milestones: Vec<PlanMilestone>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub title: String,
    pub outcome: String,
    #[serde(rename = "how_to", default)]
    pub how_to: Vec<HowToItem>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl From<PlanMilestone> for Milestone {
    fn from(planned: PlanMilestone) -> Self {
        Self {
            title: planned.title,
            outcome: planned.outcome,
            how_to: planned.how_to,
            is_completed: false,
            rating: None,
            feedback: None,
        }
    }
}

impl From<&Milestone> for PlanMilestone {
    fn from(milestone: &Milestone) -> Self {
        Self {
            title: milestone.title.clone(),
            outcome: milestone.outcome.clone(),
            how_to: milestone.how_to.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoadmapState {
    Active,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roadmap {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub goal: String,
    pub milestones: Vec<Milestone>,
    pub created_at: String,
    pub updated_at: String,
    pub progress: u8,
    pub version: i64,
}

impl Roadmap {
    pub fn completed_count(&self) -> usize {
        self.milestones.iter().filter(|m| m.is_completed).count()
    }

    pub fn recompute_progress(&mut self) {
        self.progress = compute_progress(&self.milestones);
    }

    /// A roadmap with no milestones is never considered completed.
    pub fn state(&self) -> RoadmapState {
        if !self.milestones.is_empty() && self.milestones.iter().all(|m| m.is_completed) {
            RoadmapState::Completed
        } else {
            RoadmapState::Active
        }
    }

    pub fn completed_milestones(&self) -> Vec<Milestone> {
        self.milestones
            .iter()
            .filter(|m| m.is_completed)
            .cloned()
            .collect()
    }
}

/// `round(100 * completed / total)`, 0 for an empty roadmap.
pub fn compute_progress(milestones: &[Milestone]) -> u8 {
    let total = milestones.len();
    if total == 0 {
        return 0;
    }
    let completed = milestones.iter().filter(|m| m.is_completed).count();
    ((100 * completed + total / 2) / total) as u8
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePreferences {
    pub user_id: String,
    pub custom_msg: String,
    pub learning_speed: LearningSpeed,
    pub current_education: String,
    pub country: String,
    pub updated_at: String,
}

/// Defaults handed out the first time an owner's preferences are read.
pub fn default_preferences(user_id: &str, updated_at: &str) -> ProfilePreferences {
    ProfilePreferences {
        user_id: user_id.to_string(),
        custom_msg: String::new(),
        learning_speed: LearningSpeed::Medium,
        current_education: String::new(),
        country: String::new(),
        updated_at: updated_at.to_string(),
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn milestone(done: bool) -> Milestone {
        Milestone {
            title: "Learn the basics".to_string(),
            outcome: "Write a small program".to_string(),
            how_to: vec![HowToItem {
                kind: HowToKind::Course,
                description: "Intro course".to_string(),
                link: None,
            }],
            is_completed: done,
            rating: None,
            feedback: None,
        }
    }

    #[test]
    fn progress_rounds_to_nearest_percent() {
        assert_eq!(compute_progress(&[]), 0);
        assert_eq!(compute_progress(&[milestone(true), milestone(false)]), 50);
        assert_eq!(
            compute_progress(&[milestone(true), milestone(false), milestone(false)]),
            33
        );
        assert_eq!(
            compute_progress(&[milestone(true), milestone(true), milestone(false)]),
            67
        );
        assert_eq!(compute_progress(&[milestone(true)]), 100);
    }

    #[test]
    fn how_to_kind_parse_is_case_insensitive() {
        assert_eq!(HowToKind::parse("Course"), Some(HowToKind::Course));
        assert_eq!(HowToKind::parse(" BOOK "), Some(HowToKind::Book));
        assert_eq!(HowToKind::parse("certification"), None);
    }

    #[test]
    fn milestone_serializes_with_client_field_names() {
        let json = serde_json::to_value(milestone(true)).expect("serialize");
        assert_eq!(json["isCompleted"], true);
        assert_eq!(json["how_to"][0]["type"], "course");
        assert!(json.get("rating").is_none());
    }

    #[test]
    fn default_preferences_use_medium_speed_and_empty_text() {
        let prefs = default_preferences("user-1", "2024-01-01T00:00:00.000Z");
        assert_eq!(prefs.learning_speed, LearningSpeed::Medium);
        assert_eq!(prefs.custom_msg, "");
        assert_eq!(prefs.current_education, "");
        assert_eq!(prefs.country, "");
    }

    #[test]
    fn empty_roadmap_is_never_completed() {
        let mut roadmap = Roadmap {
            id: "rm_1".to_string(),
            user_id: "user-1".to_string(),
            title: "t".to_string(),
            goal: "g".to_string(),
            milestones: Vec::new(),
            created_at: String::new(),
            updated_at: String::new(),
            progress: 0,
            version: 1,
        };
        assert_eq!(roadmap.state(), RoadmapState::Active);
        roadmap.milestones.push(milestone(true));
        assert_eq!(roadmap.state(), RoadmapState::Completed);
    }
}
