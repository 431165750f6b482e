#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context as _;
use directories::ProjectDirs;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::McError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub tasks: TasksConfig,
    pub agents: AgentsConfig,
    pub usage: UsageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 3000,
        }
    }
}

/// Locations of every file the dashboard reads or writes. `~` and `$VAR`
/// are expanded when resolved into [`DataPaths`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub memory_dir: String,
    pub goals_file: String,
    pub projects_dir: String,
    #[serde(alias = "inbox")]
    pub task_inbox: String,
    /// Optional second editable checklist. Empty disables it.
    pub mission_control_file: String,
    pub sessions_dir: String,
    pub sessions_registry: String,
    #[serde(alias = "crons")]
    pub cron_jobs_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            memory_dir: "~/clawd/memory".to_owned(),
            goals_file: "~/clawd/goals.json".to_owned(),
            projects_dir: "~/Documents/obsidian-vault/01 Proyectos".to_owned(),
            task_inbox: "~/Documents/obsidian-vault/Task Inbox.md".to_owned(),
            mission_control_file: String::new(),
            sessions_dir: "~/.openclaw/agents/main/sessions".to_owned(),
            sessions_registry: "~/.openclaw/agents/main/sessions/sessions.json".to_owned(),
            cron_jobs_file: "~/.openclaw/cron/jobs.json".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TasksConfig {
    pub inbox_label: String,
    pub mission_control_label: String,
    pub inbox_section: String,
    pub inbox_placeholder: String,
    pub project_section: String,
    /// Text a project note must contain to be listed. Empty lists every note.
    pub project_marker: String,
    pub inactive_tags: Vec<String>,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            inbox_label: "Inbox".to_owned(),
            mission_control_label: "Mission Control".to_owned(),
            inbox_section: "## 📥 Sin clasificar".to_owned(),
            inbox_placeholder: "(vacío)".to_owned(),
            project_section: "## Tareas".to_owned(),
            project_marker: "serman".to_owned(),
            inactive_tags: vec!["#completado".to_owned(), "#pausado".to_owned()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentsConfig {
    pub main_session_key: String,
    pub main_name: String,
    pub main_emoji: String,
    pub main_description: String,
    pub subagent_window_minutes: u64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            main_session_key: "agent:main:main".to_owned(),
            main_name: "Serman".to_owned(),
            main_emoji: "👻".to_owned(),
            main_description: "Agente principal · Telegram".to_owned(),
            subagent_window_minutes: 120,
        }
    }
}

/// Prices in USD per million tokens, used when a log record carries no
/// precomputed cost.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UsageConfig {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    pub cache_read_per_mtok: f64,
    pub cache_write_per_mtok: f64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
            cache_read_per_mtok: 0.3,
            cache_write_per_mtok: 3.75,
        }
    }
}

/// Fully expanded, absolute paths handed to the stores at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub memory_dir: PathBuf,
    pub goals_file: PathBuf,
    pub projects_dir: PathBuf,
    pub task_inbox: PathBuf,
    pub mission_control_file: Option<PathBuf>,
    pub sessions_dir: PathBuf,
    pub sessions_registry: PathBuf,
    pub cron_jobs_file: PathBuf,
}

impl DataPaths {
    /// Every path rooted under `root`, using the default file names. Handy for
    /// tests and for `--data-dir` style setups.
    #[must_use]
    pub fn under(root: &Path) -> Self {
        Self {
            memory_dir: root.join("memory"),
            goals_file: root.join("goals.json"),
            projects_dir: root.join("projects"),
            task_inbox: root.join("Task Inbox.md"),
            mission_control_file: None,
            sessions_dir: root.join("sessions"),
            sessions_registry: root.join("sessions").join("sessions.json"),
            cron_jobs_file: root.join("cron").join("jobs.json"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_file: PathBuf,
}

pub fn default_paths() -> anyhow::Result<ConfigPaths> {
    let unix = home_config_path_unix();
    if !cfg!(windows) {
        return Ok(ConfigPaths { config_file: unix });
    }

    // Windows: prefer the Unix-style path if present for portability.
    if unix.exists() {
        return Ok(ConfigPaths { config_file: unix });
    }

    let proj = ProjectDirs::from("com", "mission-control", "mission-control")
        .context("failed to determine platform config directory")?;
    Ok(ConfigPaths {
        config_file: proj.config_dir().join("config.toml"),
    })
}

fn home_config_path_unix() -> PathBuf {
    let home = home_dir().unwrap_or_else(|| PathBuf::from("~"));
    home.join(".config")
        .join("mission-control")
        .join("config.toml")
}

fn home_dir() -> Option<PathBuf> {
    if let Some(v) = std::env::var_os("HOME") {
        return Some(PathBuf::from(v));
    }
    if let Some(v) = std::env::var_os("USERPROFILE") {
        return Some(PathBuf::from(v));
    }
    let drive = std::env::var_os("HOMEDRIVE");
    let path = std::env::var_os("HOMEPATH");
    match (drive, path) {
        (Some(d), Some(p)) => Some(PathBuf::from(d).join(PathBuf::from(p))),
        _ => None,
    }
}

#[must_use]
pub fn expand_tilde(input: &str) -> String {
    if let Some(rest) = input.strip_prefix("~/")
        && let Some(home) = home_dir()
    {
        return home.join(rest).to_string_lossy().to_string();
    }
    input.to_owned()
}

pub fn expand_path(input: &str) -> anyhow::Result<PathBuf> {
    let expanded = expand_env_vars(&expand_tilde(input));
    let p = PathBuf::from(expanded);
    if p.is_absolute() {
        return Ok(p);
    }
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Ok(cwd.join(p))
}

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("static regex"));

fn expand_env_vars(input: &str) -> String {
    // Expand $VAR and ${VAR}. Leave unknown vars untouched.
    ENV_VAR_RE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            std::env::var(key).unwrap_or_else(|_| caps[0].to_owned())
        })
        .to_string()
}

/// Loads the config from `explicit` or from the default location. A missing
/// file yields the defaults.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<(Config, ConfigPaths)> {
    let paths = match explicit {
        Some(p) => ConfigPaths {
            config_file: p.to_path_buf(),
        },
        None => default_paths()?,
    };
    let (_doc, cfg) = load_from_file(&paths.config_file)?;
    cfg.validate()?;
    Ok((cfg, paths))
}

pub fn list_resolved_toml(path: &Path) -> anyhow::Result<String> {
    let (_doc, cfg) = load_from_file(path)?;
    cfg.validate()?;
    Ok(toml::to_string_pretty(&cfg)?)
}

fn load_from_file(path: &Path) -> anyhow::Result<(toml_edit::DocumentMut, Config)> {
    if !path.exists() {
        return Ok((toml_edit::DocumentMut::new(), Config::default()));
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let doc = raw
        .parse::<toml_edit::DocumentMut>()
        .with_context(|| format!("failed to parse TOML in {}", path.display()))?;

    let cfg: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to deserialize TOML in {}", path.display()))?;
    Ok((doc, cfg))
}

pub fn get_value_string_at_path(path: &Path, key: &str) -> anyhow::Result<Option<String>> {
    let (_doc, cfg) = load_from_file(path)?;
    cfg.validate()?;

    let norm = normalize_key(key);
    let value = lookup_value(&cfg, &norm);
    Ok(value.map(format_value_for_stdout))
}

pub fn set_value_string_at_path(path: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    let (mut doc, cfg) = load_from_file(path)?;
    cfg.validate()?;

    let (norm_key, value_item) = normalize_key_and_parse_value(key, value)?;
    apply_set(&mut doc, &norm_key, value_item)?;

    // Validate by re-parsing the updated doc into a Config.
    let new_raw = doc.to_string();
    let new_cfg: Config = toml::from_str(&new_raw)
        .with_context(|| format!("config update produced invalid TOML for {}", path.display()))?;
    new_cfg.validate()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, new_raw.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<(), McError> {
        if self.server.host.trim().is_empty() {
            return Err(McError::Config("server.host must not be empty".to_owned()));
        }
        if self.server.port == 0 {
            return Err(McError::Config("server.port must be >= 1".to_owned()));
        }
        if self.paths.task_inbox.trim().is_empty() {
            return Err(McError::Config(
                "paths.task_inbox must not be empty".to_owned(),
            ));
        }
        if self.paths.goals_file.trim().is_empty() {
            return Err(McError::Config(
                "paths.goals_file must not be empty".to_owned(),
            ));
        }
        for (key, header) in [
            ("tasks.inbox_section", &self.tasks.inbox_section),
            ("tasks.project_section", &self.tasks.project_section),
        ] {
            if !header.trim_start().starts_with('#') {
                return Err(McError::Config(format!(
                    "{key} must be a Markdown heading (got '{header}')"
                )));
            }
        }
        for (key, price) in [
            ("usage.input_per_mtok", self.usage.input_per_mtok),
            ("usage.output_per_mtok", self.usage.output_per_mtok),
            ("usage.cache_read_per_mtok", self.usage.cache_read_per_mtok),
            ("usage.cache_write_per_mtok", self.usage.cache_write_per_mtok),
        ] {
            if !price.is_finite() || price < 0.0 {
                return Err(McError::Config(format!("{key} must be >= 0")));
            }
        }
        Ok(())
    }

    /// Expands every configured path.
    pub fn data_paths(&self) -> anyhow::Result<DataPaths> {
        let p = &self.paths;
        let mission_control_file = if p.mission_control_file.trim().is_empty() {
            None
        } else {
            Some(expand_path(&p.mission_control_file)?)
        };
        Ok(DataPaths {
            memory_dir: expand_path(&p.memory_dir)?,
            goals_file: expand_path(&p.goals_file)?,
            projects_dir: expand_path(&p.projects_dir)?,
            task_inbox: expand_path(&p.task_inbox)?,
            mission_control_file,
            sessions_dir: expand_path(&p.sessions_dir)?,
            sessions_registry: expand_path(&p.sessions_registry)?,
            cron_jobs_file: expand_path(&p.cron_jobs_file)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyType {
    Int,
    Float,
    String,
}

fn normalize_key(key: &str) -> String {
    match key {
        "paths.inbox" => "paths.task_inbox",
        "paths.crons" => "paths.cron_jobs_file",
        "port" => "server.port",
        "host" => "server.host",
        _ => key,
    }
    .to_owned()
}

fn normalize_key_and_parse_value(
    key: &str,
    value: &str,
) -> anyhow::Result<(String, toml_edit::Item)> {
    let norm = normalize_key(key);
    if norm == "tasks.inactive_tags" {
        return Err(McError::InvalidConfigValue {
            key: key.to_owned(),
            msg: "lists are edited in the config file directly (example: inactive_tags = [\"#pausado\"])".to_owned(),
        }
        .into());
    }
    let key_type = key_type(&norm).ok_or_else(|| McError::InvalidConfigKey(key.to_owned()))?;
    let item = match key_type {
        KeyType::Int => toml_edit::value(parse_int(value).map_err(|msg| {
            McError::InvalidConfigValue {
                key: key.to_owned(),
                msg,
            }
        })?),
        KeyType::Float => toml_edit::value(parse_float(value).map_err(|msg| {
            McError::InvalidConfigValue {
                key: key.to_owned(),
                msg,
            }
        })?),
        KeyType::String => toml_edit::value(value),
    };

    Ok((norm, item))
}

fn key_type(key: &str) -> Option<KeyType> {
    Some(match key {
        "server.host"
        | "paths.memory_dir"
        | "paths.goals_file"
        | "paths.projects_dir"
        | "paths.task_inbox"
        | "paths.mission_control_file"
        | "paths.sessions_dir"
        | "paths.sessions_registry"
        | "paths.cron_jobs_file"
        | "tasks.inbox_label"
        | "tasks.mission_control_label"
        | "tasks.inbox_section"
        | "tasks.inbox_placeholder"
        | "tasks.project_section"
        | "tasks.project_marker"
        | "agents.main_session_key"
        | "agents.main_name"
        | "agents.main_emoji"
        | "agents.main_description" => KeyType::String,

        "server.port" | "agents.subagent_window_minutes" => KeyType::Int,

        "usage.input_per_mtok"
        | "usage.output_per_mtok"
        | "usage.cache_read_per_mtok"
        | "usage.cache_write_per_mtok" => KeyType::Float,

        _ => return None,
    })
}

fn parse_int(s: &str) -> Result<i64, String> {
    s.trim()
        .parse::<i64>()
        .map_err(|e| format!("expected integer, got '{s}': {e}"))
}

fn parse_float(s: &str) -> Result<f64, String> {
    s.trim()
        .parse::<f64>()
        .map_err(|e| format!("expected number, got '{s}': {e}"))
}

fn apply_set(
    doc: &mut toml_edit::DocumentMut,
    key: &str,
    value: toml_edit::Item,
) -> anyhow::Result<()> {
    let parts: Vec<&str> = key.split('.').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return Err(McError::InvalidConfigKey(key.to_owned()).into());
    }

    let mut cur = doc.as_table_mut();
    for seg in &parts[..parts.len().saturating_sub(1)] {
        if !cur.contains_key(seg) {
            let mut t = toml_edit::Table::new();
            t.set_implicit(true);
            cur.insert(seg, toml_edit::Item::Table(t));
        }
        cur = cur[seg]
            .as_table_mut()
            .ok_or_else(|| McError::Config(format!("cannot set {key}: '{seg}' is not a table")))?;
    }

    let leaf = parts[parts.len() - 1];
    cur.insert(leaf, value);
    Ok(())
}

fn lookup_value(cfg: &Config, key: &str) -> Option<serde_json::Value> {
    let mut v = serde_json::to_value(cfg).ok()?;
    for seg in key.split('.').filter(|s| !s.is_empty()) {
        match v {
            serde_json::Value::Object(mut map) => {
                v = map.remove(seg)?;
            }
            _ => return None,
        }
    }
    Some(v)
}

fn format_value_for_stdout(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_owned(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s,
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    }
}
