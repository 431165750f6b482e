#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::core::fsio;
use crate::core::source::Source;
use crate::error::McError;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GoalTimeframe {
    Short,
    #[default]
    Medium,
    Long,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    #[default]
    Active,
    Completed,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub timeframe: GoalTimeframe,
    #[serde(default)]
    pub description: String,
    /// Linked project note names.
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub status: GoalStatus,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoalsFile {
    #[serde(default)]
    pub goals: Vec<Goal>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewGoal {
    #[serde(default)]
    pub title: String,
    pub timeframe: Option<GoalTimeframe>,
    pub description: Option<String>,
    pub projects: Option<Vec<String>>,
}

/// Fields a PATCH may change. `id` and `createdAt` are not among them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoalPatch {
    pub title: Option<String>,
    pub timeframe: Option<GoalTimeframe>,
    pub description: Option<String>,
    pub projects: Option<Vec<String>>,
    pub status: Option<GoalStatus>,
}

#[derive(Debug, Clone)]
pub struct GoalStore {
    path: PathBuf,
}

impl GoalStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Source<GoalsFile> {
        Source::read_with(&self.path, |raw| {
            serde_json::from_str(raw).map_err(|e| McError::parse(&self.path, e))
        })
    }

    /// Document for mutation. A missing file is an empty document; a malformed
    /// one is an error so it never gets overwritten.
    pub fn load(&self) -> Result<GoalsFile, McError> {
        Ok(self.read().into_result()?.unwrap_or_default())
    }

    pub fn save(&self, data: &GoalsFile) -> Result<(), McError> {
        fsio::write_json_pretty(&self.path, data)
    }

    #[must_use]
    pub fn list(&self) -> GoalsFile {
        self.read().or_default_logged("goals")
    }

    pub fn create(&self, req: NewGoal) -> Result<Goal, McError> {
        let title = req.title.trim();
        if title.is_empty() {
            return Err(McError::Validation("title is required".to_owned()));
        }

        let goal = Goal {
            id: Uuid::new_v4().to_string(),
            title: title.to_owned(),
            timeframe: req.timeframe.unwrap_or_default(),
            description: req.description.as_deref().map(str::trim).unwrap_or("").to_owned(),
            projects: req.projects.unwrap_or_default(),
            status: GoalStatus::Active,
            created_at: now_rfc3339(),
        };

        let mut data = self.load()?;
        data.goals.push(goal.clone());
        self.save(&data)?;
        tracing::info!(id = %goal.id, "goal created");
        Ok(goal)
    }

    pub fn update(&self, id: &str, patch: GoalPatch) -> Result<Goal, McError> {
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(McError::Validation("title must not be empty".to_owned()));
        }

        let mut data = self.load()?;
        let goal = data
            .goals
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| McError::NotFound("not found".to_owned()))?;

        if let Some(title) = patch.title {
            goal.title = title.trim().to_owned();
        }
        if let Some(timeframe) = patch.timeframe {
            goal.timeframe = timeframe;
        }
        if let Some(description) = patch.description {
            goal.description = description;
        }
        if let Some(projects) = patch.projects {
            goal.projects = projects;
        }
        if let Some(status) = patch.status {
            goal.status = status;
        }
        let updated = goal.clone();

        self.save(&data)?;
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> Result<(), McError> {
        let mut data = self.load()?;
        let idx = data
            .goals
            .iter()
            .position(|g| g.id == id)
            .ok_or_else(|| McError::NotFound("not found".to_owned()))?;
        data.goals.remove(idx);
        self.save(&data)?;
        tracing::info!(id, "goal deleted");
        Ok(())
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, GoalStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = GoalStore::new(dir.path().join("goals.json"));
        (dir, store)
    }

    #[test]
    fn create_applies_defaults_and_persists() {
        let (_dir, store) = store();
        let goal = store
            .create(NewGoal {
                title: "  Ship v1  ".to_owned(),
                description: Some(" fast ".to_owned()),
                ..NewGoal::default()
            })
            .unwrap();
        assert_eq!(goal.title, "Ship v1");
        assert_eq!(goal.description, "fast");
        assert_eq!(goal.timeframe, GoalTimeframe::Medium);
        assert_eq!(goal.status, GoalStatus::Active);
        assert!(Uuid::parse_str(&goal.id).is_ok());

        let listed = store.list();
        assert_eq!(listed.goals, vec![goal]);
    }

    #[test]
    fn create_rejects_blank_title() {
        let (_dir, store) = store();
        let err = store
            .create(NewGoal {
                title: "   ".to_owned(),
                ..NewGoal::default()
            })
            .unwrap_err();
        assert!(matches!(err, McError::Validation(_)));
        assert!(!store.path().exists());
    }

    #[test]
    fn update_merges_fields_and_keeps_identity() {
        let (_dir, store) = store();
        let goal = store
            .create(NewGoal {
                title: "Run".to_owned(),
                projects: Some(vec!["Fitness".to_owned()]),
                ..NewGoal::default()
            })
            .unwrap();

        let updated = store
            .update(
                &goal.id,
                GoalPatch {
                    status: Some(GoalStatus::Completed),
                    ..GoalPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.status, GoalStatus::Completed);
        assert_eq!(updated.title, "Run");
        assert_eq!(updated.projects, vec!["Fitness".to_owned()]);
        assert_eq!(updated.created_at, goal.created_at);
        assert_eq!(store.list().goals[0].status, GoalStatus::Completed);
    }

    #[test]
    fn unknown_id_is_not_found_and_file_unchanged() {
        let (_dir, store) = store();
        store
            .create(NewGoal {
                title: "Keep".to_owned(),
                ..NewGoal::default()
            })
            .unwrap();
        let before = std::fs::read(store.path()).unwrap();

        let err = store
            .update(
                "missing",
                GoalPatch {
                    status: Some(GoalStatus::Completed),
                    ..GoalPatch::default()
                },
            )
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.delete("missing").unwrap_err().is_not_found());
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn malformed_file_is_never_overwritten() {
        let (_dir, store) = store();
        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(store.list().goals.is_empty());
        let err = store
            .create(NewGoal {
                title: "x".to_owned(),
                ..NewGoal::default()
            })
            .unwrap_err();
        assert!(matches!(err, McError::Parse { .. }));
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{ not json");
    }

    #[test]
    fn stale_snapshot_write_loses_a_concurrent_create() {
        // No locking: a writer holding an old snapshot overwrites newer data.
        let (_dir, store) = store();
        let snapshot = store.load().unwrap();
        store
            .create(NewGoal {
                title: "written in between".to_owned(),
                ..NewGoal::default()
            })
            .unwrap();
        store.save(&snapshot).unwrap();
        assert!(store.list().goals.is_empty());
    }

    #[test]
    fn delete_removes_by_id() {
        let (_dir, store) = store();
        let a = store
            .create(NewGoal {
                title: "a".to_owned(),
                ..NewGoal::default()
            })
            .unwrap();
        let b = store
            .create(NewGoal {
                title: "b".to_owned(),
                ..NewGoal::default()
            })
            .unwrap();
        store.delete(&a.id).unwrap();
        assert_eq!(store.list().goals, vec![b]);
    }
}
