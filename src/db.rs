use crate::schema::{LearningSpeed, Milestone, ProfilePreferences, Roadmap};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Stored record could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("Could not prepare the database location: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a version-checked roadmap write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated(Roadmap),
    VersionMismatch { current: i64 },
    Missing,
}

struct RoadmapRow {
    id: String,
    user_id: String,
    title: String,
    goal: String,
    milestones_json: String,
    created_at: String,
    updated_at: String,
    progress: i64,
    version: i64,
}

impl RoadmapRow {
    const COLUMNS: &'static str =
        "id, user_id, title, goal, milestones_json, created_at, updated_at, progress, version";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            goal: row.get(3)?,
            milestones_json: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            progress: row.get(7)?,
            version: row.get(8)?,
        })
    }

    fn into_roadmap(self) -> Result<Roadmap, StoreError> {
        let milestones: Vec<Milestone> = serde_json::from_str(&self.milestones_json)?;
        Ok(Roadmap {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            goal: self.goal,
            milestones,
            created_at: self.created_at,
            updated_at: self.updated_at,
            progress: self.progress.clamp(0, 100) as u8,
            version: self.version,
        })
    }
}

pub fn open_connection(db_path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut connection = Connection::open(db_path)?;
    configure_connection(&connection)?;
    bootstrap_schema(&mut connection)?;
    Ok(connection)
}

pub fn configure_connection(connection: &Connection) -> Result<(), StoreError> {
    connection.busy_timeout(Duration::from_secs(5))?;
    connection.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    Ok(())
}

pub fn bootstrap_schema(connection: &mut Connection) -> Result<(), StoreError> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profile_preferences (
          user_id TEXT PRIMARY KEY,
          custom_msg TEXT NOT NULL DEFAULT '',
          learning_speed TEXT NOT NULL DEFAULT 'medium',
          current_education TEXT NOT NULL DEFAULT '',
          country TEXT NOT NULL DEFAULT '',
          updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS roadmaps (
          id TEXT PRIMARY KEY,
          user_id TEXT NOT NULL,
          title TEXT NOT NULL,
          goal TEXT NOT NULL,
          milestones_json TEXT NOT NULL DEFAULT '[]',
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL,
          progress INTEGER NOT NULL DEFAULT 0,
          version INTEGER NOT NULL DEFAULT 1
        );

        CREATE INDEX IF NOT EXISTS idx_roadmaps_user_created
          ON roadmaps(user_id, created_at);
        ",
    )?;
    Ok(())
}

pub fn find_profile(
    connection: &Connection,
    user_id: &str,
) -> Result<Option<ProfilePreferences>, StoreError> {
    let profile = connection
        .query_row(
            "SELECT user_id, custom_msg, learning_speed, current_education, country, updated_at
             FROM profile_preferences WHERE user_id = ?1",
            params![user_id],
            |row| {
                let speed: String = row.get(2)?;
                Ok(ProfilePreferences {
                    user_id: row.get(0)?,
                    custom_msg: row.get(1)?,
                    learning_speed: LearningSpeed::parse(&speed).unwrap_or_default(),
                    current_education: row.get(3)?,
                    country: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(profile)
}

/// Inserts the record unless one already exists for the owner; returns the stored record.
pub fn insert_profile_if_absent(
    connection: &Connection,
    profile: &ProfilePreferences,
) -> Result<ProfilePreferences, StoreError> {
    connection.execute(
        "INSERT OR IGNORE INTO profile_preferences (
           user_id, custom_msg, learning_speed, current_education, country, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            profile.user_id,
            profile.custom_msg,
            profile.learning_speed.as_str(),
            profile.current_education,
            profile.country,
            profile.updated_at
        ],
    )?;
    Ok(find_profile(connection, &profile.user_id)?.unwrap_or_else(|| profile.clone()))
}

pub fn upsert_profile(
    connection: &Connection,
    profile: &ProfilePreferences,
) -> Result<(), StoreError> {
    connection.execute(
        "INSERT INTO profile_preferences (
           user_id, custom_msg, learning_speed, current_education, country, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(user_id) DO UPDATE SET
           custom_msg = excluded.custom_msg,
           learning_speed = excluded.learning_speed,
           current_education = excluded.current_education,
           country = excluded.country,
           updated_at = excluded.updated_at",
        params![
            profile.user_id,
            profile.custom_msg,
            profile.learning_speed.as_str(),
            profile.current_education,
            profile.country,
            profile.updated_at
        ],
    )?;
    Ok(())
}

pub fn insert_roadmap(connection: &Connection, roadmap: &Roadmap) -> Result<(), StoreError> {
    let milestones_json = serde_json::to_string(&roadmap.milestones)?;
    connection.execute(
        "INSERT INTO roadmaps (
           id, user_id, title, goal, milestones_json, created_at, updated_at, progress, version
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            roadmap.id,
            roadmap.user_id,
            roadmap.title,
            roadmap.goal,
            milestones_json,
            roadmap.created_at,
            roadmap.updated_at,
            roadmap.progress as i64,
            roadmap.version
        ],
    )?;
    Ok(())
}

pub fn find_roadmap(connection: &Connection, id: &str) -> Result<Option<Roadmap>, StoreError> {
    let row = connection
        .query_row(
            &format!("SELECT {} FROM roadmaps WHERE id = ?1", RoadmapRow::COLUMNS),
            params![id],
            RoadmapRow::from_row,
        )
        .optional()?;
    row.map(RoadmapRow::into_roadmap).transpose()
}

pub fn list_roadmaps(connection: &Connection, user_id: &str) -> Result<Vec<Roadmap>, StoreError> {
    let mut stmt = connection.prepare(&format!(
        "SELECT {} FROM roadmaps WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC",
        RoadmapRow::COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![user_id], RoadmapRow::from_row)?
        .collect::<Result<Vec<RoadmapRow>, rusqlite::Error>>()?;
    rows.into_iter().map(RoadmapRow::into_roadmap).collect()
}

/// Writes `roadmap` only if the stored version still equals `expected_version`.
/// The returned roadmap carries the incremented version.
pub fn update_roadmap(
    connection: &Connection,
    roadmap: &Roadmap,
    expected_version: i64,
) -> Result<UpdateOutcome, StoreError> {
    let milestones_json = serde_json::to_string(&roadmap.milestones)?;
    let next_version = expected_version + 1;
    let changed = connection.execute(
        "UPDATE roadmaps
         SET title = ?1, goal = ?2, milestones_json = ?3, updated_at = ?4, progress = ?5,
             version = ?6
         WHERE id = ?7 AND version = ?8",
        params![
            roadmap.title,
            roadmap.goal,
            milestones_json,
            roadmap.updated_at,
            roadmap.progress as i64,
            next_version,
            roadmap.id,
            expected_version
        ],
    )?;
    if changed == 1 {
        let mut stored = roadmap.clone();
        stored.version = next_version;
        return Ok(UpdateOutcome::Updated(stored));
    }

    let current: Option<i64> = connection
        .query_row(
            "SELECT version FROM roadmaps WHERE id = ?1",
            params![roadmap.id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(match current {
        Some(current) => UpdateOutcome::VersionMismatch { current },
        None => UpdateOutcome::Missing,
    })
}

/// Removes and returns the roadmap. When `owner` is given, a record owned by
/// someone else is left untouched and reported as absent.
pub fn delete_roadmap(
    connection: &mut Connection,
    id: &str,
    owner: Option<&str>,
) -> Result<Option<Roadmap>, StoreError> {
    let tx = connection.transaction()?;
    let existing = match find_roadmap(&tx, id)? {
        Some(roadmap) if owner.map_or(true, |o| o == roadmap.user_id) => roadmap,
        _ => return Ok(None),
    };
    tx.execute("DELETE FROM roadmaps WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(Some(existing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{HowToItem, HowToKind};
    use pretty_assertions::assert_eq;

    fn test_conn() -> Connection {
        let mut conn = Connection::open_in_memory().expect("open");
        bootstrap_schema(&mut conn).expect("bootstrap");
        conn
    }

    fn sample_roadmap(id: &str, user_id: &str, created_at: &str) -> Roadmap {
        Roadmap {
            id: id.to_string(),
            user_id: user_id.to_string(),
            title: "Learn SQL".to_string(),
            goal: "Query data confidently".to_string(),
            milestones: vec![Milestone {
                title: "Select".to_string(),
                outcome: "Write joins".to_string(),
                how_to: vec![HowToItem {
                    kind: HowToKind::Book,
                    description: "SQL book".to_string(),
                    link: Some("https://example.com/sql".to_string()),
                }],
                is_completed: false,
                rating: None,
                feedback: None,
            }],
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
            progress: 0,
            version: 1,
        }
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let mut conn = test_conn();
        bootstrap_schema(&mut conn).expect("second bootstrap");
    }

    #[test]
    fn roadmap_round_trips_through_store() {
        let conn = test_conn();
        let roadmap = sample_roadmap("rm_1", "user-1", "2024-01-01T00:00:00.000Z");
        insert_roadmap(&conn, &roadmap).expect("insert");
        assert_eq!(find_roadmap(&conn, "rm_1").expect("find"), Some(roadmap));
        assert_eq!(find_roadmap(&conn, "rm_missing").expect("find"), None);
    }

    #[test]
    fn list_is_scoped_to_owner_and_ordered_by_creation() {
        let conn = test_conn();
        insert_roadmap(&conn, &sample_roadmap("rm_b", "user-1", "2024-01-02T00:00:00.000Z"))
            .expect("insert");
        insert_roadmap(&conn, &sample_roadmap("rm_a", "user-1", "2024-01-01T00:00:00.000Z"))
            .expect("insert");
        insert_roadmap(&conn, &sample_roadmap("rm_c", "user-2", "2024-01-01T00:00:00.000Z"))
            .expect("insert");

        let ids: Vec<String> = list_roadmaps(&conn, "user-1")
            .expect("list")
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["rm_a".to_string(), "rm_b".to_string()]);
        assert!(list_roadmaps(&conn, "nobody").expect("list").is_empty());
    }

    #[test]
    fn update_checks_version() {
        let conn = test_conn();
        let mut roadmap = sample_roadmap("rm_1", "user-1", "2024-01-01T00:00:00.000Z");
        insert_roadmap(&conn, &roadmap).expect("insert");

        roadmap.title = "Renamed".to_string();
        let stored = match update_roadmap(&conn, &roadmap, 1).expect("update") {
            UpdateOutcome::Updated(stored) => stored,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(stored.version, 2);

        let stale = update_roadmap(&conn, &roadmap, 1).expect("stale update");
        assert_eq!(stale, UpdateOutcome::VersionMismatch { current: 2 });

        let mut ghost = roadmap.clone();
        ghost.id = "rm_ghost".to_string();
        assert_eq!(
            update_roadmap(&conn, &ghost, 1).expect("missing"),
            UpdateOutcome::Missing
        );
        assert_eq!(
            find_roadmap(&conn, "rm_1").expect("find").map(|r| r.title),
            Some("Renamed".to_string())
        );
    }

    #[test]
    fn delete_respects_owner() {
        let mut conn = test_conn();
        insert_roadmap(&conn, &sample_roadmap("rm_1", "user-1", "2024-01-01T00:00:00.000Z"))
            .expect("insert");
        assert!(delete_roadmap(&mut conn, "rm_1", Some("user-2"))
            .expect("delete")
            .is_none());
        assert!(delete_roadmap(&mut conn, "rm_1", Some("user-1"))
            .expect("delete")
            .is_some());
        assert!(delete_roadmap(&mut conn, "rm_1", None).expect("delete").is_none());
    }

    #[test]
    fn profile_insert_if_absent_keeps_existing_record() {
        let conn = test_conn();
        let mut profile = crate::schema::default_preferences("user-1", "t0");
        profile.country = "India".to_string();
        upsert_profile(&conn, &profile).expect("upsert");

        let defaults = crate::schema::default_preferences("user-1", "t1");
        let stored = insert_profile_if_absent(&conn, &defaults).expect("insert");
        assert_eq!(stored.country, "India");
        assert_eq!(stored.updated_at, "t0");
    }
}
