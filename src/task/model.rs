#![forbid(unsafe_code)]

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::McError;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    /// Checkbox glyph written between `- ` and the title.
    #[must_use]
    pub fn marker(self) -> &'static str {
        match self {
            Self::Todo => "[ ]",
            Self::InProgress => "[/]",
            Self::Done => "[x]",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = McError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "todo" | "pending" => Ok(Self::Todo),
            "in_progress" | "in-progress" | "doing" => Ok(Self::InProgress),
            "done" | "completed" => Ok(Self::Done),
            other => Err(McError::Validation(format!(
                "invalid status '{other}' (expected todo, in_progress or done)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    #[default]
    Medium,
    Low,
}

impl TaskPriority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Accepts the English names and the Spanish tags used in the vault.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_lowercase().as_str() {
            "high" | "alta" => Some(Self::High),
            "medium" | "media" => Some(Self::Medium),
            "low" | "baja" => Some(Self::Low),
            _ => None,
        }
    }
}

impl FromStr for TaskPriority {
    type Err = McError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s.trim())
            .ok_or_else(|| McError::Validation(format!("invalid priority '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskAssignee {
    #[default]
    Raul,
    Serman,
}

impl TaskAssignee {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raul => "raul",
            Self::Serman => "serman",
        }
    }

    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_lowercase().as_str() {
            "raul" => Some(Self::Raul),
            "serman" => Some(Self::Serman),
            _ => None,
        }
    }
}

impl FromStr for TaskAssignee {
    type Err = McError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s.trim())
            .ok_or_else(|| McError::Validation(format!("invalid assignee '{s}'")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee: TaskAssignee,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub file_path: String,
    /// 1-based.
    pub line_number: usize,
    pub editable: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    #[serde(default)]
    pub title: String,
    pub priority: Option<TaskPriority>,
    pub assignee: Option<TaskAssignee>,
    pub project: Option<String>,
}
