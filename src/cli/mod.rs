#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{CommandFactory as _, Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing_subscriber::EnvFilter;

use crate::config::{self, Config, ConfigPaths, DataPaths};
use crate::core::agents::AgentDirectory;
use crate::core::classify::now_ms;
use crate::core::crons::CronStore;
use crate::core::goals::{GoalPatch, GoalStatus, GoalStore, GoalTimeframe, NewGoal};
use crate::core::memory::MemoryLog;
use crate::core::usage::{UsageAggregator, latest_session_log, local_midnight_ms};
use crate::output::table::{Format, Table, print_json, truncate};
use crate::server;
use crate::task::model::{NewTask, TaskAssignee, TaskPriority, TaskStatus};
use crate::task::storage::TaskStore;

#[derive(Debug, Parser)]
#[command(
    name = "mission-control",
    version,
    about = "Personal dashboard over tasks, goals, crons and agent sessions"
)]
pub struct Cli {
    /// Config file (default: ~/.config/mission-control/config.toml)
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP API and dashboard
    Serve(ServeArgs),
    Tasks(TasksArgs),
    Goals(GoalsArgs),
    /// List active project notes
    Projects(ListArgs),
    Crons(CronsArgs),
    Agents(ListArgs),
    /// Token usage of the latest session since local midnight
    Usage(JsonArgs),
    Memory(ListArgs),
    Config(ConfigArgs),
    Completion(CompletionArgs),
    Version,
}

#[derive(Debug, Parser)]
pub struct ServeArgs {
    #[arg(long = "host")]
    pub host: Option<String>,
    #[arg(long = "port")]
    pub port: Option<u16>,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    #[arg(long = "json")]
    pub json: bool,
    #[arg(long = "csv")]
    pub csv: bool,
}

impl ListArgs {
    fn format(&self) -> Format {
        Format::from_flags(self.json, self.csv)
    }
}

#[derive(Debug, Parser)]
pub struct JsonArgs {
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct TasksArgs {
    #[command(subcommand)]
    pub cmd: TasksCmd,
}

#[derive(Debug, Subcommand)]
pub enum TasksCmd {
    #[command(alias = "ls")]
    List(ListArgs),
    Add(TaskAddArgs),
    /// Set a task's status (todo, in_progress, done)
    Set(TaskSetArgs),
    #[command(alias = "remove")]
    Rm(IdArgs),
}

#[derive(Debug, Parser)]
pub struct TaskAddArgs {
    pub title: String,
    #[arg(short = 'p', long = "priority")]
    pub priority: Option<TaskPriority>,
    #[arg(short = 'a', long = "assignee")]
    pub assignee: Option<TaskAssignee>,
    #[arg(long = "project")]
    pub project: Option<String>,
}

#[derive(Debug, Parser)]
pub struct TaskSetArgs {
    pub id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Parser)]
pub struct IdArgs {
    pub id: String,
}

#[derive(Debug, Parser)]
pub struct GoalsArgs {
    #[command(subcommand)]
    pub cmd: GoalsCmd,
}

#[derive(Debug, Subcommand)]
pub enum GoalsCmd {
    #[command(alias = "ls")]
    List(ListArgs),
    Add(GoalAddArgs),
    /// Set a goal's status (active, completed, paused)
    SetStatus(GoalSetStatusArgs),
    #[command(alias = "remove")]
    Rm(IdArgs),
}

#[derive(Debug, Parser)]
pub struct GoalAddArgs {
    pub title: String,
    /// short, medium or long
    #[arg(short = 't', long = "timeframe")]
    pub timeframe: Option<String>,
    #[arg(short = 'd', long = "description")]
    pub description: Option<String>,
    /// Linked project (repeatable)
    #[arg(long = "project")]
    pub projects: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct GoalSetStatusArgs {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Parser)]
pub struct CronsArgs {
    #[command(subcommand)]
    pub cmd: Option<CronsCmd>,
    #[command(flatten)]
    pub list: ListArgs,
}

#[derive(Debug, Subcommand)]
pub enum CronsCmd {
    Enable(IdArgs),
    Disable(IdArgs),
}

#[derive(Debug, Parser)]
pub struct CompletionArgs {
    pub shell: clap_complete::Shell,
}

#[derive(Debug, Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCmd,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    List,
    Get(ConfigGetArgs),
    Set(ConfigSetArgs),
}

#[derive(Debug, Parser)]
pub struct ConfigGetArgs {
    pub key: String,
}

#[derive(Debug, Parser)]
pub struct ConfigSetArgs {
    pub key: String,
    pub value: String,
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(1)
        }
    }
}

/// Logs go to stderr. `MISSION_CONTROL_LOG` takes precedence over `RUST_LOG`.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("MISSION_CONTROL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let explicit = cli.config;
    match cli.cmd {
        Commands::Completion(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "mission-control", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version => Ok(cmd_version()),
        Commands::Config(args) => cmd_config(explicit, args).await,
        Commands::Serve(args) => {
            let (mut cfg, _) = load_cfg(explicit).await?;
            if let Some(host) = args.host {
                cfg.server.host = host;
            }
            if let Some(port) = args.port {
                cfg.server.port = port;
            }
            server::serve(cfg).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Tasks(args) => {
            let (cfg, paths) = load_data(explicit).await?;
            blocking(move || cmd_tasks(&cfg, &paths, args)).await
        }
        Commands::Goals(args) => {
            let (_, paths) = load_data(explicit).await?;
            blocking(move || cmd_goals(&paths, args)).await
        }
        Commands::Projects(args) => {
            let (cfg, paths) = load_data(explicit).await?;
            blocking(move || cmd_projects(&cfg, &paths, &args)).await
        }
        Commands::Crons(args) => {
            let (_, paths) = load_data(explicit).await?;
            blocking(move || cmd_crons(&paths, args)).await
        }
        Commands::Agents(args) => {
            let (cfg, paths) = load_data(explicit).await?;
            blocking(move || cmd_agents(&cfg, &paths, &args)).await
        }
        Commands::Memory(args) => {
            let (_, paths) = load_data(explicit).await?;
            blocking(move || cmd_memory(&paths, &args)).await
        }
        Commands::Usage(args) => {
            let (cfg, paths) = load_data(explicit).await?;
            cmd_usage(&cfg, &paths, &args).await
        }
    }
}

async fn load_cfg(explicit: Option<PathBuf>) -> anyhow::Result<(Config, ConfigPaths)> {
    tokio::task::spawn_blocking(move || config::load(explicit.as_deref())).await?
}

async fn load_data(explicit: Option<PathBuf>) -> anyhow::Result<(Config, DataPaths)> {
    let (cfg, _) = load_cfg(explicit).await?;
    let paths = cfg.data_paths()?;
    Ok((cfg, paths))
}

async fn blocking<F>(f: F) -> anyhow::Result<ExitCode>
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await??;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_config(explicit: Option<PathBuf>, args: ConfigArgs) -> anyhow::Result<ExitCode> {
    let paths = match explicit {
        Some(p) => ConfigPaths { config_file: p },
        None => config::default_paths()?,
    };
    let file = paths.config_file;
    tokio::task::spawn_blocking(move || match args.cmd {
        ConfigCmd::List => {
            print!("{}", config::list_resolved_toml(&file)?);
            Ok(ExitCode::SUCCESS)
        }
        ConfigCmd::Set(set) => {
            config::set_value_string_at_path(&file, &set.key, &set.value)?;
            println!("Set {} = {}", set.key, set.value);
            Ok(ExitCode::SUCCESS)
        }
        ConfigCmd::Get(get) => match config::get_value_string_at_path(&file, &get.key)? {
            Some(v) => {
                println!("{v}");
                Ok(ExitCode::SUCCESS)
            }
            None => anyhow::bail!(
                "configuration key '{}' not found - use 'mission-control config list' to see available keys",
                get.key
            ),
        },
    })
    .await?
}

fn cmd_tasks(cfg: &Config, paths: &DataPaths, args: TasksArgs) -> anyhow::Result<()> {
    let store = TaskStore::new(paths, cfg.tasks.clone());
    match args.cmd {
        TasksCmd::List(list) => {
            let tasks = store.list().context("failed to read tasks")?;
            let mut t = Table::new(["ID", "STATUS", "PRIORITY", "ASSIGNEE", "PROJECT", "TITLE"]);
            for task in &tasks {
                t.row([
                    task.id.clone(),
                    task_status_icon(task.status).to_owned(),
                    task.priority.as_str().to_owned(),
                    task.assignee.as_str().to_owned(),
                    task.project.clone().unwrap_or_default(),
                    truncate(&task.title, 60),
                ]);
            }
            if list.format() == Format::Table && t.is_empty() {
                println!("No tasks found.");
                return Ok(());
            }
            t.emit(list.format(), &tasks)?;
        }
        TasksCmd::Add(add) => {
            let task = store
                .create(NewTask {
                    title: add.title,
                    priority: add.priority,
                    assignee: add.assignee,
                    project: add.project,
                })
                .context("failed to create task")?;
            println!("Created {} ({}:{})", task.id, task.file_path, task.line_number);
        }
        TasksCmd::Set(set) => {
            let out = store
                .update_status(&set.id, set.status)
                .context("failed to update task")?;
            println!(
                "{} {} [{}]",
                task_status_icon(out.task.status),
                out.task.title,
                out.source
            );
        }
        TasksCmd::Rm(rm) => {
            store.delete(&rm.id).context("failed to delete task")?;
            println!("Deleted {}", rm.id);
        }
    }
    Ok(())
}

fn cmd_goals(paths: &DataPaths, args: GoalsArgs) -> anyhow::Result<()> {
    let store = GoalStore::new(paths.goals_file.clone());
    match args.cmd {
        GoalsCmd::List(list) => {
            let goals = store.list().goals;
            let mut t = Table::new(["ID", "STATUS", "TIMEFRAME", "TITLE", "PROJECTS"]);
            for g in &goals {
                t.row([
                    g.id.clone(),
                    enum_str(&g.status),
                    enum_str(&g.timeframe),
                    truncate(&g.title, 50),
                    g.projects.join(", "),
                ]);
            }
            if list.format() == Format::Table && t.is_empty() {
                println!("No goals found.");
                return Ok(());
            }
            t.emit(list.format(), &goals)?;
        }
        GoalsCmd::Add(add) => {
            let timeframe = add
                .timeframe
                .as_deref()
                .map(parse_enum::<GoalTimeframe>)
                .transpose()?;
            let goal = store
                .create(NewGoal {
                    title: add.title,
                    timeframe,
                    description: add.description,
                    projects: Some(add.projects),
                })
                .context("failed to create goal")?;
            println!("Created goal {}", goal.id);
        }
        GoalsCmd::SetStatus(set) => {
            let status: GoalStatus = parse_enum(&set.status)?;
            let goal = store
                .update(
                    &set.id,
                    GoalPatch {
                        status: Some(status),
                        ..GoalPatch::default()
                    },
                )
                .context("failed to update goal")?;
            println!("{} -> {}", goal.title, enum_str(&goal.status));
        }
        GoalsCmd::Rm(rm) => {
            store.delete(&rm.id).context("failed to delete goal")?;
            println!("Deleted goal {}", rm.id);
        }
    }
    Ok(())
}

fn cmd_projects(cfg: &Config, paths: &DataPaths, args: &ListArgs) -> anyhow::Result<()> {
    let projects = TaskStore::new(paths, cfg.tasks.clone())
        .projects()
        .context("failed to read projects")?;
    let mut t = Table::new(["NAME", "PATH"]);
    for p in &projects {
        t.row([p.name.clone(), p.file_path.clone()]);
    }
    t.emit(args.format(), &projects)
}

fn cmd_crons(paths: &DataPaths, args: CronsArgs) -> anyhow::Result<()> {
    let store = CronStore::new(paths.cron_jobs_file.clone());
    if let Some(cmd) = args.cmd {
        let (id, enabled) = match cmd {
            CronsCmd::Enable(a) => (a.id, true),
            CronsCmd::Disable(a) => (a.id, false),
        };
        let cron = store
            .set_enabled(&id, enabled)
            .with_context(|| format!("failed to update cron {id}"))?;
        println!(
            "{} {}",
            cron.name,
            if cron.enabled { "enabled" } else { "disabled" }
        );
        return Ok(());
    }

    let crons = store.list().context("failed to read crons")?;
    let mut t = Table::new(["ID", "NAME", "ENABLED", "SCHEDULE", "STATUS", "ERRORS"]);
    for c in &crons {
        t.row([
            c.id.clone(),
            c.name.clone(),
            if c.enabled { "yes" } else { "no" }.to_owned(),
            c.schedule_label.clone(),
            c.status.clone(),
            c.consecutive_errors.to_string(),
        ]);
    }
    t.emit(args.list.format(), &crons)
}

fn cmd_agents(cfg: &Config, paths: &DataPaths, args: &ListArgs) -> anyhow::Result<()> {
    let jobs = CronStore::new(paths.cron_jobs_file.clone()).read_jobs();
    let agents = AgentDirectory::new(paths.sessions_registry.clone(), cfg.agents.clone())
        .snapshot(jobs, now_ms());
    let mut t = Table::new(["", "NAME", "ROLE", "STATUS", "DESCRIPTION"]);
    for a in &agents {
        t.row([
            a.emoji.clone(),
            a.name.clone(),
            enum_str(&a.role),
            enum_str(&a.status),
            a.description.clone().unwrap_or_default(),
        ]);
    }
    t.emit(args.format(), &agents)
}

fn cmd_memory(paths: &DataPaths, args: &ListArgs) -> anyhow::Result<()> {
    let memories = MemoryLog::new(paths.memory_dir.clone())
        .list()
        .context("failed to read memory logs")?;
    let mut t = Table::new(["DATE", "SIZE", "EXCERPT"]);
    for m in &memories {
        let first = m.excerpt.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        t.row([m.date.clone(), m.size_bytes.to_string(), truncate(first, 60)]);
    }
    t.emit(args.format(), &memories)
}

async fn cmd_usage(cfg: &Config, paths: &DataPaths, args: &JsonArgs) -> anyhow::Result<ExitCode> {
    let dir = paths.sessions_dir.clone();
    let latest = tokio::task::spawn_blocking(move || latest_session_log(&dir)).await??;
    let Some(path) = latest else {
        anyhow::bail!("No sessions found in {}", paths.sessions_dir.display());
    };
    let summary = UsageAggregator::new(cfg.usage.clone())
        .aggregate_file(&path, local_midnight_ms())
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    if args.json {
        print_json(&summary)?;
        return Ok(ExitCode::SUCCESS);
    }
    let mut t = Table::new(["MODEL", "INPUT", "OUTPUT", "CACHE_READ", "CACHE_WRITE", "COST"]);
    for entry in summary.by_model.values().chain(std::iter::once(&summary.today)) {
        t.row([
            entry.model.clone(),
            entry.input.to_string(),
            entry.output.to_string(),
            entry.cache_read.to_string(),
            entry.cache_write.to_string(),
            format!("${:.4}", entry.cost),
        ]);
    }
    t.print()?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_version() -> ExitCode {
    println!("mission-control version {}", env!("CARGO_PKG_VERSION"));
    println!("  rust: {}", rustc_version_runtime::version());
    println!(
        "  os/arch: {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    ExitCode::SUCCESS
}

fn task_status_icon(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "[ ] todo",
        TaskStatus::InProgress => "[/] doing",
        TaskStatus::Done => "[x] done",
    }
}

/// Parses a lowercase serde enum name such as `completed`.
fn parse_enum<T: DeserializeOwned>(s: &str) -> anyhow::Result<T> {
    serde_json::from_value(serde_json::Value::String(s.trim().to_lowercase()))
        .with_context(|| format!("invalid value '{s}'"))
}

fn enum_str<T: serde::Serialize>(v: &T) -> String {
    match serde_json::to_value(v) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}
