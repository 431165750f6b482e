#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::config::AgentsConfig;
use crate::core::classify::{AgentStatus, age_since, schedule_label, status_from_age};
use crate::core::crons::CronJob;
use crate::core::source::Source;
use crate::error::McError;

const CRON_EMOJIS: &[(&str, &str)] = &[
    ("hourly-memory-summarizer", "🧠"),
    ("consolidacion-memoria-nocturna", "🌙"),
    ("daily-briefing-obsidian", "📰"),
    ("investigacion-nocturna", "🔭"),
    ("curacion-vault-nocturna", "📚"),
    ("preprocesado-inbox-nocturno", "📥"),
    ("proyectos-autonomos-nocturnos", "⚙️"),
    ("weekly-synthesis", "📊"),
    ("weekly-task-review", "📋"),
    ("evening-checkin", "🌆"),
    ("security-audit-weekly", "🔒"),
    ("exploracion-personal-serman", "🌍"),
    ("cumpli-bug-hunter", "🐛"),
    ("monitor-worktrees", "🌲"),
    ("architecture-audit-biweekly", "🏛️"),
    ("recordatorio-lingoda", "🗣️"),
];
const DEFAULT_CRON_EMOJI: &str = "🤖";
const CRON_KEY_PREFIX: &str = "agent:main:cron:";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Main,
    Cron,
    Subagent,
    Voice,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    pub emoji: String,
    pub status: AgentStatus,
    /// Epoch milliseconds; 0 when never seen.
    pub last_seen: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    #[serde(default)]
    pub session_id: String,
    #[serde(default, deserialize_with = "epoch_ms")]
    pub updated_at: i64,
}

/// Whole or fractional epoch milliseconds; `null` reads as never.
fn epoch_ms<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
    match Value::deserialize(de)? {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| serde::de::Error::custom("updatedAt out of range")),
        other => Err(serde::de::Error::custom(format!(
            "updatedAt must be a number, got {other}"
        ))),
    }
}

pub type SessionRegistry = BTreeMap<String, SessionEntry>;

/// Entries that do not look like a session are skipped; only a document that
/// is not a JSON object makes the registry unreadable.
pub fn read_sessions(path: &Path) -> Source<SessionRegistry> {
    Source::read_with(path, |raw| parse_sessions(path, raw))
}

fn parse_sessions(path: &Path, raw: &str) -> Result<SessionRegistry, McError> {
    let entries: Map<String, Value> =
        serde_json::from_str(raw).map_err(|e| McError::parse(path, e))?;

    let mut sessions = SessionRegistry::new();
    for (key, entry) in entries {
        match serde_json::from_value::<SessionEntry>(entry) {
            Ok(session) => {
                sessions.insert(key, session);
            }
            Err(e) => tracing::debug!(key = %key, error = %e, "skipping malformed session entry"),
        }
    }
    Ok(sessions)
}

#[derive(Debug, Clone)]
pub struct AgentDirectory {
    sessions_registry: PathBuf,
    cfg: AgentsConfig,
}

impl AgentDirectory {
    #[must_use]
    pub fn new(sessions_registry: PathBuf, cfg: AgentsConfig) -> Self {
        Self {
            sessions_registry,
            cfg,
        }
    }

    /// Reads the session registry and projects it. An unreadable registry or
    /// jobs list degrades to "nobody seen".
    #[must_use]
    pub fn snapshot(&self, jobs: Source<Vec<CronJob>>, now_ms: i64) -> Vec<AgentInfo> {
        let sessions = read_sessions(&self.sessions_registry).or_default_logged("sessions");
        let jobs = jobs.or_default_logged("crons");
        project_agents(&self.cfg, &sessions, &jobs, now_ms)
    }
}

#[must_use]
pub fn project_agents(
    cfg: &AgentsConfig,
    sessions: &SessionRegistry,
    jobs: &[CronJob],
    now_ms: i64,
) -> Vec<AgentInfo> {
    let status_at = |updated_at: i64| status_from_age(age_since(now_ms, updated_at));
    let mut agents = Vec::new();

    let main = sessions.get(&cfg.main_session_key);
    agents.push(AgentInfo {
        id: cfg.main_name.to_lowercase(),
        name: cfg.main_name.clone(),
        role: AgentRole::Main,
        emoji: cfg.main_emoji.clone(),
        status: main.map_or(AgentStatus::Offline, |s| status_at(s.updated_at)),
        last_seen: main.map_or(0, |s| s.updated_at),
        session_id: main.map(|s| s.session_id.clone()),
        description: Some(cfg.main_description.clone()),
    });

    for job in jobs {
        let prefix = format!("{CRON_KEY_PREFIX}{}", job.id);
        let latest = sessions
            .iter()
            .filter(|(key, s)| key.starts_with(&prefix) && s.updated_at > 0)
            .max_by_key(|(_, s)| s.updated_at);
        let Some((_, session)) = latest else {
            continue;
        };
        agents.push(AgentInfo {
            id: format!("cron-{}", job.id),
            name: job.name.replace('-', " "),
            role: AgentRole::Cron,
            emoji: cron_emoji(&job.name).to_owned(),
            status: status_at(session.updated_at),
            last_seen: session.updated_at,
            session_id: Some(session.session_id.clone()),
            description: Some(format!("schedule: {}", schedule_label(&job.schedule))),
        });
    }

    let window = Duration::from_secs(cfg.subagent_window_minutes * 60);
    for (key, s) in sessions {
        let recent = age_since(now_ms, s.updated_at) < window;
        let role = if key.contains(":spawn:") || (key.contains(":openai:") && recent) {
            AgentRole::Subagent
        } else if key.contains(":voice:") && recent {
            AgentRole::Voice
        } else {
            continue;
        };
        let label = key.rsplit(':').next().unwrap_or(key);
        let (id, name, emoji, description) = match role {
            AgentRole::Voice => (
                format!("voice-{}", s.session_id),
                format!("Voz {}", short(label)),
                "🎙️",
                "Voice session",
            ),
            _ => (
                format!("sub-{}", s.session_id),
                format!("Codex {}", short(label)),
                "🧩",
                "Coding subagent",
            ),
        };
        agents.push(AgentInfo {
            id,
            name,
            role,
            emoji: emoji.to_owned(),
            status: status_at(s.updated_at),
            last_seen: s.updated_at,
            session_id: Some(s.session_id.clone()),
            description: Some(description.to_owned()),
        });
    }

    agents.sort_by(|a, b| {
        a.status
            .cmp(&b.status)
            .then_with(|| b.last_seen.cmp(&a.last_seen))
    });
    agents
}

fn cron_emoji(name: &str) -> &'static str {
    CRON_EMOJIS
        .iter()
        .find(|(n, _)| *n == name)
        .map_or(DEFAULT_CRON_EMOJI, |(_, e)| *e)
}

fn short(label: &str) -> String {
    label.chars().take(6).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crons::CronSchedule;

    const NOW: i64 = 1_760_000_000_000;
    const MIN: i64 = 60_000;

    fn session(id: &str, updated_at: i64) -> SessionEntry {
        SessionEntry {
            session_id: id.to_owned(),
            updated_at,
        }
    }

    fn job(id: &str, name: &str) -> CronJob {
        CronJob {
            id: id.to_owned(),
            name: name.to_owned(),
            enabled: true,
            schedule: CronSchedule {
                kind: "cron".to_owned(),
                expr: Some("0 3 * * *".to_owned()),
                every_ms: None,
            },
            session_target: None,
            state: None,
        }
    }

    #[test]
    fn main_agent_is_always_listed() {
        let agents = project_agents(&AgentsConfig::default(), &SessionRegistry::new(), &[], NOW);
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].id, "serman");
        assert_eq!(agents[0].role, AgentRole::Main);
        assert_eq!(agents[0].status, AgentStatus::Offline);
        assert_eq!(agents[0].last_seen, 0);
    }

    #[test]
    fn projects_crons_and_subagents_in_status_order() {
        let mut sessions = SessionRegistry::new();
        sessions.insert("agent:main:main".to_owned(), session("m", NOW - 120 * MIN));
        sessions.insert("agent:main:cron:j1".to_owned(), session("c-old", NOW - 600 * MIN));
        sessions.insert("agent:main:cron:j1:run:2".to_owned(), session("c-new", NOW - 5 * MIN));
        sessions.insert("agent:main:spawn:abcdefghij".to_owned(), session("s1", NOW - 3 * MIN));
        sessions.insert("agent:main:openai:stale0001".to_owned(), session("o1", NOW - 300 * MIN));
        sessions.insert("agent:main:voice:call42".to_owned(), session("v1", NOW - MIN));

        let jobs = vec![job("j1", "weekly-synthesis"), job("j2", "never-ran")];
        let agents = project_agents(&AgentsConfig::default(), &sessions, &jobs, NOW);

        let ids: Vec<&str> = agents.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["voice-v1", "sub-s1", "cron-j1", "serman"]);

        let cron = &agents[2];
        assert_eq!(cron.name, "weekly synthesis");
        assert_eq!(cron.emoji, "📊");
        assert_eq!(cron.session_id.as_deref(), Some("c-new"));
        assert_eq!(cron.description.as_deref(), Some("schedule: 03:00 diario"));

        assert_eq!(agents[1].name, "Codex abcdef");
        assert_eq!(agents[3].status, AgentStatus::Idle);
    }

    #[test]
    fn malformed_session_entries_do_not_hide_the_rest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = dir.path().join("sessions.json");
        let doc = serde_json::json!({
            "agent:main:main": { "sessionId": "m", "updatedAt": NOW },
            "agent:main:weird": "oops",
            "agent:main:spawn:floaty": { "sessionId": "f", "updatedAt": (NOW - MIN) as f64 + 0.5 },
            "agent:main:spawn:wordy": { "sessionId": "w", "updatedAt": "yesterday" },
        });
        std::fs::write(&registry, doc.to_string()).unwrap();

        let sessions = read_sessions(&registry).into_result().unwrap().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions["agent:main:spawn:floaty"].updated_at, NOW - MIN);

        let directory = AgentDirectory::new(registry, AgentsConfig::default());
        let agents = directory.snapshot(Source::Missing, NOW);
        let main = agents.iter().find(|a| a.role == AgentRole::Main).unwrap();
        assert_eq!(main.status, AgentStatus::Active);
        assert_eq!(main.last_seen, NOW);
    }

    #[test]
    fn unreadable_sources_degrade_to_offline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = dir.path().join("sessions.json");
        std::fs::write(&registry, "garbage").unwrap();

        let directory = AgentDirectory::new(registry, AgentsConfig::default());
        let agents = directory.snapshot(Source::Missing, NOW);
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].status, AgentStatus::Offline);
    }
}
