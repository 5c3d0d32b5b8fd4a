use crate::db::{self, StoreError, UpdateOutcome};
use crate::gateway::normalize_link;
use crate::schema::{now_rfc3339, Milestone, Plan, Roadmap, RoadmapState};
use rand::Rng;
use rusqlite::Connection;
use serde::Deserialize;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

const MAX_RATING: u8 = 5;

#[derive(Debug, Error)]
pub enum RoadmapError {
    #[error("Roadmap not found.")]
    NotFound,
    #[error("Milestone {index} does not exist; this roadmap has {len} milestones.")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("{0}")]
    ConsistencyViolation(String),
    #[error("This roadmap is already complete. Start a new roadmap instead of modifying it.")]
    AlreadyCompleted,
    #[error("This roadmap changed since it was loaded. Reload it and try again.")]
    Conflict { expected: i64, current: i64 },
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RoadmapError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::IndexOutOfRange { .. } => "index_out_of_range",
            Self::ConsistencyViolation(_) => "consistency_violation",
            Self::AlreadyCompleted => "already_completed",
            Self::Conflict { .. } => "conflict",
            Self::Validation(_) => "validation",
            Self::Store(_) => "store_error",
        }
    }
}

/// Manual edit of a stored roadmap. `None` leaves a field as stored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoadmapEdit {
    pub title: Option<String>,
    pub goal: Option<String>,
    pub milestones: Option<Vec<Milestone>>,
    /// Version the client last saw; checked against the stored version when present.
    pub version: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    Replace,
    Patch,
}

fn new_roadmap_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("rm_{millis}_{:08x}", rand::thread_rng().gen::<u32>())
}

fn non_empty(value: &str, message: &str) -> Result<String, RoadmapError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RoadmapError::Validation(message.to_string()));
    }
    Ok(trimmed.to_string())
}

pub fn create_from_plan(
    connection: &Connection,
    plan: Plan,
    owner_id: &str,
    title: &str,
) -> Result<Roadmap, RoadmapError> {
    let owner_id = non_empty(owner_id, "User ID is required.")?;
    let goal = non_empty(&plan.goal, "A roadmap needs a goal.")?;
    let title = match title.trim() {
        "" => goal.clone(),
        given => given.to_string(),
    };
    if plan.milestones.is_empty() {
        return Err(RoadmapError::Validation(
            "A roadmap needs at least one milestone.".to_string(),
        ));
    }

    let mut milestones: Vec<Milestone> =
        plan.milestones.into_iter().map(Milestone::from).collect();
    validate_manual_milestones(&mut milestones)?;

    let now = now_rfc3339();
    let mut roadmap = Roadmap {
        id: new_roadmap_id(),
        user_id: owner_id,
        title,
        goal,
        milestones,
        created_at: now.clone(),
        updated_at: now,
        progress: 0,
        version: 1,
    };
    roadmap.recompute_progress();
    db::insert_roadmap(connection, &roadmap)?;
    info!(
        roadmap_id = %roadmap.id,
        milestones = roadmap.milestones.len(),
        "created roadmap"
    );
    Ok(roadmap)
}

pub fn get_roadmap(connection: &Connection, roadmap_id: &str) -> Result<Roadmap, RoadmapError> {
    db::find_roadmap(connection, roadmap_id)?.ok_or(RoadmapError::NotFound)
}

pub fn list_roadmaps(connection: &Connection, owner_id: &str) -> Result<Vec<Roadmap>, RoadmapError> {
    let owner_id = non_empty(owner_id, "User ID is required.")?;
    Ok(db::list_roadmaps(connection, &owner_id)?)
}

/// Load, mutate, and write back under the stored version.
fn mutate<F>(
    connection: &Connection,
    roadmap_id: &str,
    expected_version: Option<i64>,
    apply: F,
) -> Result<Roadmap, RoadmapError>
where
    F: FnOnce(&mut Roadmap) -> Result<(), RoadmapError>,
{
    let stored = get_roadmap(connection, roadmap_id)?;
    if let Some(expected) = expected_version {
        if expected != stored.version {
            return Err(RoadmapError::Conflict {
                expected,
                current: stored.version,
            });
        }
    }

    let mut next = stored.clone();
    apply(&mut next)?;
    next.recompute_progress();
    if next == stored {
        return Ok(stored);
    }
    next.updated_at = now_rfc3339();

    match db::update_roadmap(connection, &next, stored.version)? {
        UpdateOutcome::Updated(saved) => Ok(saved),
        UpdateOutcome::VersionMismatch { current } => {
            warn!(roadmap_id, expected = stored.version, current, "concurrent roadmap write");
            Err(RoadmapError::Conflict {
                expected: stored.version,
                current,
            })
        }
        UpdateOutcome::Missing => Err(RoadmapError::NotFound),
    }
}

fn milestone_mut(roadmap: &mut Roadmap, index: usize) -> Result<&mut Milestone, RoadmapError> {
    let len = roadmap.milestones.len();
    roadmap
        .milestones
        .get_mut(index)
        .ok_or(RoadmapError::IndexOutOfRange { index, len })
}

pub fn complete_milestone(
    connection: &Connection,
    roadmap_id: &str,
    milestone_index: usize,
) -> Result<Roadmap, RoadmapError> {
    let roadmap = mutate(connection, roadmap_id, None, |roadmap| {
        milestone_mut(roadmap, milestone_index)?.is_completed = true;
        Ok(())
    })?;
    info!(
        roadmap_id,
        milestone_index,
        progress = roadmap.progress,
        "milestone completed"
    );
    if roadmap.state() == RoadmapState::Completed {
        info!(roadmap_id, "roadmap completed");
    }
    Ok(roadmap)
}

pub fn rate_milestone(
    connection: &Connection,
    roadmap_id: &str,
    milestone_index: usize,
    rating: Option<u8>,
    feedback: Option<String>,
) -> Result<Roadmap, RoadmapError> {
    if let Some(rating) = rating {
        validate_rating(rating)?;
    }
    let feedback = feedback
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    mutate(connection, roadmap_id, None, |roadmap| {
        let milestone = milestone_mut(roadmap, milestone_index)?;
        if rating.is_some() {
            milestone.rating = rating;
        }
        if feedback.is_some() {
            milestone.feedback = feedback;
        }
        Ok(())
    })
}

fn validate_rating(rating: u8) -> Result<(), RoadmapError> {
    if (1..=MAX_RATING).contains(&rating) {
        Ok(())
    } else {
        Err(RoadmapError::Validation(format!(
            "Ratings go from 1 to {MAX_RATING}."
        )))
    }
}

/// Completed positions keep the stored milestone verbatim; every other position
/// takes the plan's content and starts over as pending and unrated.
pub fn merge_modification(existing: &Roadmap, plan: &Plan) -> Result<Vec<Milestone>, RoadmapError> {
    if plan.milestones.len() != existing.milestones.len() {
        return Err(RoadmapError::ConsistencyViolation(format!(
            "The updated plan has {} milestones but the roadmap has {}.",
            plan.milestones.len(),
            existing.milestones.len()
        )));
    }

    Ok(existing
        .milestones
        .iter()
        .zip(plan.milestones.iter())
        .map(|(stored, proposed)| {
            if stored.is_completed {
                stored.clone()
            } else {
                Milestone::from(proposed.clone())
            }
        })
        .collect())
}

pub fn apply_modification(
    connection: &Connection,
    roadmap_id: &str,
    new_plan: &Plan,
) -> Result<Roadmap, RoadmapError> {
    let roadmap = mutate(connection, roadmap_id, None, |roadmap| {
        if roadmap.state() == RoadmapState::Completed {
            return Err(RoadmapError::AlreadyCompleted);
        }
        roadmap.milestones = merge_modification(roadmap, new_plan)?;
        Ok(())
    })?;
    info!(
        roadmap_id,
        protected = roadmap.completed_count(),
        "applied plan modification"
    );
    Ok(roadmap)
}

/// Client-supplied milestones get the same link hygiene as model output.
fn validate_manual_milestones(milestones: &mut [Milestone]) -> Result<(), RoadmapError> {
    for (index, milestone) in milestones.iter_mut().enumerate() {
        if milestone.title.trim().is_empty() || milestone.outcome.trim().is_empty() {
            return Err(RoadmapError::Validation(format!(
                "Milestone {index} needs a title and an outcome."
            )));
        }
        if milestone
            .how_to
            .iter()
            .any(|item| item.description.trim().is_empty())
        {
            return Err(RoadmapError::Validation(format!(
                "Every step in milestone {index} needs a description."
            )));
        }
        if let Some(rating) = milestone.rating {
            validate_rating(rating)?;
        }
        for (step, item) in milestone.how_to.iter_mut().enumerate() {
            let path = format!("milestones[{index}].how_to[{step}]");
            item.link = item
                .link
                .take()
                .and_then(|link| normalize_link(&link, &path));
        }
    }
    Ok(())
}

pub fn edit_roadmap(
    connection: &Connection,
    roadmap_id: &str,
    mut edit: RoadmapEdit,
    mode: EditMode,
) -> Result<Roadmap, RoadmapError> {
    if mode == EditMode::Replace
        && (edit.title.is_none() || edit.goal.is_none() || edit.milestones.is_none())
    {
        return Err(RoadmapError::Validation(
            "A full update needs title, goal, and milestones.".to_string(),
        ));
    }
    if let Some(milestones) = edit.milestones.as_deref_mut() {
        validate_manual_milestones(milestones)?;
    }

    mutate(connection, roadmap_id, edit.version, |roadmap| {
        if let Some(title) = edit.title.as_deref() {
            roadmap.title = non_empty(title, "A roadmap needs a title.")?;
        }
        if let Some(goal) = edit.goal.as_deref() {
            roadmap.goal = non_empty(goal, "A roadmap needs a goal.")?;
        }
        if let Some(mut milestones) = edit.milestones {
            if milestones.len() < roadmap.milestones.len() {
                return Err(RoadmapError::ConsistencyViolation(format!(
                    "Milestones cannot be removed ({} given, {} stored).",
                    milestones.len(),
                    roadmap.milestones.len()
                )));
            }
            for (edited, stored) in milestones.iter_mut().zip(roadmap.milestones.iter()) {
                edited.is_completed |= stored.is_completed;
            }
            roadmap.milestones = milestones;
        }
        Ok(())
    })
}

pub fn delete_roadmap(
    connection: &mut Connection,
    roadmap_id: &str,
    owner_id: Option<&str>,
) -> Result<Roadmap, RoadmapError> {
    let owner_id = owner_id.map(str::trim).filter(|o| !o.is_empty());
    let deleted = db::delete_roadmap(connection, roadmap_id, owner_id)?.ok_or(RoadmapError::NotFound)?;
    info!(roadmap_id, "deleted roadmap");
    Ok(deleted)
}
