#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{DataPaths, TasksConfig};
use crate::core::fsio;
use crate::core::source::Source;
use crate::error::McError;
use crate::task::markdown::{self, TaskSource};
use crate::task::model::{NewTask, Task, TaskStatus};
use crate::task::projects::{self, ProjectFile};

/// A Markdown file tasks are read from or written to.
#[derive(Debug, Clone)]
struct TaskFile {
    path: PathBuf,
    /// Reported back to callers as the mutation's `source`.
    source: String,
    project: String,
    editable: bool,
}

impl TaskFile {
    fn task_source(&self) -> TaskSource<'_> {
        TaskSource {
            path: &self.path,
            project: Some(&self.project),
            editable: self.editable,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusUpdate {
    pub source: String,
    pub task: Task,
}

/// Reads and rewrites checkbox tasks in place. There is no locking: every
/// mutation reads the whole file, edits it in memory and writes it back, so
/// two concurrent writers can lose an update.
#[derive(Debug, Clone)]
pub struct TaskStore {
    inbox: PathBuf,
    mission_control: Option<PathBuf>,
    projects_dir: PathBuf,
    cfg: TasksConfig,
}

impl TaskStore {
    #[must_use]
    pub fn new(paths: &DataPaths, cfg: TasksConfig) -> Self {
        Self {
            inbox: paths.task_inbox.clone(),
            mission_control: paths.mission_control_file.clone(),
            projects_dir: paths.projects_dir.clone(),
            cfg,
        }
    }

    #[must_use]
    pub fn inbox_path(&self) -> &Path {
        &self.inbox
    }

    pub fn projects(&self) -> Result<Vec<ProjectFile>, McError> {
        projects::discover(&self.projects_dir, &self.cfg)
    }

    fn editable_files(&self) -> Vec<TaskFile> {
        let mut files = vec![TaskFile {
            path: self.inbox.clone(),
            source: "inbox".to_owned(),
            project: self.cfg.inbox_label.clone(),
            editable: true,
        }];
        if let Some(path) = &self.mission_control {
            files.push(TaskFile {
                path: path.clone(),
                source: "mission-control".to_owned(),
                project: self.cfg.mission_control_label.clone(),
                editable: true,
            });
        }
        files
    }

    fn project_files(&self) -> Result<Vec<TaskFile>, McError> {
        Ok(self
            .projects()?
            .into_iter()
            .map(|p| TaskFile {
                path: PathBuf::from(&p.file_path),
                source: p.filename,
                project: p.name,
                editable: false,
            })
            .collect())
    }

    /// Tasks from the editable files first, then from every active project.
    pub fn list(&self) -> Result<Vec<Task>, McError> {
        let mut tasks = Vec::new();
        for file in self.editable_files() {
            if let Some(found) = markdown::parse_file(&file.task_source()).into_result()? {
                tasks.extend(found);
            }
        }
        for file in self.project_files()? {
            match markdown::parse_file(&file.task_source()) {
                Source::Loaded(found) => tasks.extend(found),
                Source::Missing => {}
                Source::Unreadable(e) => {
                    tracing::warn!(path = %file.path.display(), error = %e, "skipping project tasks");
                }
            }
        }
        Ok(tasks)
    }

    pub fn create(&self, req: NewTask) -> Result<Task, McError> {
        let title = markdown::validate_title(&req.title)?;
        let priority = req.priority.unwrap_or_default();
        let assignee = req.assignee.unwrap_or_default();
        let requested = req
            .project
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());

        let projects = match requested {
            Some(_) => self.projects()?,
            None => Vec::new(),
        };
        let target = requested.and_then(|name| projects::resolve(&projects, name));

        let (file, line, idx) = match target {
            Some(project) => {
                let line = markdown::render_task_line(&title, priority, assignee, Some(&project.name));
                let file = TaskFile {
                    path: project.path().to_path_buf(),
                    source: project.filename.clone(),
                    project: project.name.clone(),
                    editable: false,
                };
                let content = read_text(&file.path)?.unwrap_or_default();
                let mut lines: Vec<&str> = content.split('\n').collect();
                let idx = append_to_section(&mut lines, &self.cfg.project_section, &line);
                fsio::write_replace(&file.path, lines.join("\n").as_bytes())?;
                (file, line, idx)
            }
            None => {
                let line = markdown::render_task_line(&title, priority, assignee, requested);
                let file = self.editable_files().swap_remove(0);
                let content = match read_text(&file.path)? {
                    Some(content) => content,
                    None => {
                        if let Some(parent) = file.path.parent() {
                            std::fs::create_dir_all(parent).map_err(|e| McError::io(parent, e))?;
                        }
                        String::new()
                    }
                };
                let mut lines: Vec<&str> = content.split('\n').collect();
                let idx = insert_into_inbox(
                    &mut lines,
                    &self.cfg.inbox_section,
                    &self.cfg.inbox_placeholder,
                    &line,
                );
                fsio::write_replace(&file.path, lines.join("\n").as_bytes())?;
                (file, line, idx)
            }
        };

        tracing::info!(path = %file.path.display(), line = idx + 1, "task created");
        markdown::parse_task_line(&line, idx + 1, &file.task_source())
            .ok_or_else(|| McError::Other("created line did not parse back".to_owned()))
    }

    /// Rewrites the checkbox marker of the first line matching `id`, looking
    /// through the editable files and then the active projects. Projects are
    /// only listed when the editable files do not hold the id.
    pub fn update_status(&self, id: &str, status: TaskStatus) -> Result<StatusUpdate, McError> {
        for file in self.editable_files() {
            if let Some(out) = rewrite_status(file, id, status)? {
                return Ok(out);
            }
        }
        for file in self.project_files()? {
            if let Some(out) = rewrite_status(file, id, status)? {
                return Ok(out);
            }
        }
        Err(McError::NotFound("Task not found".to_owned()))
    }

    /// Removes the first matching line from an editable file. Project notes
    /// are never touched.
    pub fn delete(&self, id: &str) -> Result<(), McError> {
        for file in self.editable_files() {
            let Some(content) = read_text(&file.path)? else {
                continue;
            };
            let mut lines: Vec<&str> = content.split('\n').collect();
            let Some(idx) = markdown::find_task_line(&lines, id) else {
                continue;
            };
            lines.remove(idx);
            if file.path == self.inbox {
                restore_placeholder(
                    &mut lines,
                    &self.cfg.inbox_section,
                    &self.cfg.inbox_placeholder,
                    idx,
                );
            }
            fsio::write_replace(&file.path, lines.join("\n").as_bytes())?;
            tracing::info!(id, source = %file.source, "task deleted");
            return Ok(());
        }
        Err(McError::NotFound("Task not found or not editable".to_owned()))
    }
}

fn read_text(path: &Path) -> Result<Option<String>, McError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(McError::io(path, e)),
    }
}

fn is_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    let rest = trimmed.trim_start_matches('#');
    rest.len() < trimmed.len() && (rest.is_empty() || rest.starts_with(' '))
}

/// Header index and exclusive end of the section titled `header`.
fn section_bounds(lines: &[&str], header: &str) -> Option<(usize, usize)> {
    let start = lines.iter().position(|l| l.trim() == header.trim())?;
    let end = lines[start + 1..]
        .iter()
        .position(|l| is_heading(l))
        .map_or(lines.len(), |off| start + 1 + off);
    Some((start, end))
}

/// Appends `header` and `line` at the end of the document, keeping one blank
/// separator line and a trailing newline. Returns the index of `line`.
fn append_section<'a>(lines: &mut Vec<&'a str>, header: &'a str, line: &'a str) -> usize {
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    if !lines.is_empty() {
        lines.push("");
    }
    lines.push(header);
    lines.push(line);
    lines.push("");
    lines.len() - 2
}

fn append_to_section<'a>(lines: &mut Vec<&'a str>, header: &'a str, line: &'a str) -> usize {
    let Some((start, end)) = section_bounds(lines, header) else {
        return append_section(lines, header, line);
    };
    let at = (start + 1..end)
        .rev()
        .find(|&i| !lines[i].trim().is_empty())
        .map_or(start + 1, |i| i + 1);
    lines.insert(at, line);
    at
}

fn insert_into_inbox<'a>(
    lines: &mut Vec<&'a str>,
    header: &'a str,
    placeholder: &str,
    line: &'a str,
) -> usize {
    let Some((start, end)) = section_bounds(lines, header) else {
        return append_section(lines, header, line);
    };
    let mut body = (start + 1..end).filter(|&i| !lines[i].trim().is_empty());
    if let (Some(only), None) = (body.next(), body.next())
        && lines[only].trim() == placeholder
    {
        lines[only] = line;
        return only;
    }
    lines.insert(start + 1, line);
    start + 1
}

/// Puts the placeholder back when the removal at `removed` emptied the
/// unclassified section.
fn restore_placeholder<'a>(
    lines: &mut Vec<&'a str>,
    header: &str,
    placeholder: &'a str,
    removed: usize,
) {
    let Some((start, end)) = section_bounds(lines, header) else {
        return;
    };
    if removed <= start || removed > end {
        return;
    }
    if (start + 1..end).all(|i| lines[i].trim().is_empty()) {
        lines.insert(start + 1, placeholder);
    }
}

fn rewrite_status(
    file: TaskFile,
    id: &str,
    status: TaskStatus,
) -> Result<Option<StatusUpdate>, McError> {
    let Some(content) = read_text(&file.path)? else {
        return Ok(None);
    };
    let mut lines: Vec<&str> = content.split('\n').collect();
    let Some(idx) = markdown::find_task_line(&lines, id) else {
        return Ok(None);
    };
    let updated = markdown::with_status(lines[idx], status)
        .ok_or_else(|| McError::Other("matched line is not a task".to_owned()))?;
    if updated != lines[idx] {
        lines[idx] = &updated;
        fsio::write_replace(&file.path, lines.join("\n").as_bytes())?;
    }
    let task = markdown::parse_task_line(&updated, idx + 1, &file.task_source())
        .ok_or_else(|| McError::Other("updated line did not parse back".to_owned()))?;
    tracing::info!(id, status = status.as_str(), source = %file.source, "task status updated");
    Ok(Some(StatusUpdate {
        source: file.source,
        task,
    }))
}
