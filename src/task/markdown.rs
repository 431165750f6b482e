//! Checkbox task lines in Markdown notes.
//!
//! A task line looks like
//!
//! ```text
//! - [ ] Buy milk #high #serman %% priority=high assignee=serman project=Casa %%
//! ```
//!
//! The marker is `[ ]` (todo), `[/]` (in progress) or `[x]`/`[X]` (done).
//! Metadata lives either in an inline comment (`%% … %%` or `<!-- … -->`)
//! as `key=value` pairs, or in hashtags. The comment wins when both are
//! present. A task's id is the base64url encoding of its cleaned title, so
//! the line can be found again after the file is reordered.

#![forbid(unsafe_code)]

use std::path::Path;
use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use regex::Regex;

use crate::core::source::Source;
use crate::error::McError;
use crate::task::model::{Task, TaskAssignee, TaskPriority, TaskStatus};

static CHECKBOX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)- \[([ /xX])\]").expect("static regex"));
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%%(.*?)%%|<!--(.*?)-->").expect("static regex"));
static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\w[\w-]*").expect("static regex"));
static META_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)([A-Za-z][\w:]*)=").expect("static regex"));

/// Where a batch of lines came from.
#[derive(Debug, Clone, Copy)]
pub struct TaskSource<'a> {
    pub path: &'a Path,
    pub project: Option<&'a str>,
    pub editable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMeta {
    pub priority: Option<TaskPriority>,
    pub assignee: Option<TaskAssignee>,
    pub project: Option<String>,
    /// Explicit `mc:id=` tag written by older revisions of the dashboard.
    pub legacy_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Checkbox<'a> {
    status: TaskStatus,
    /// Text after the `]`.
    body: &'a str,
}

fn checkbox(line: &str) -> Option<Checkbox<'_>> {
    let caps = CHECKBOX_RE.captures(line)?;
    let status = match caps.get(2)?.as_str() {
        " " => TaskStatus::Todo,
        "/" => TaskStatus::InProgress,
        _ => TaskStatus::Done,
    };
    let end = caps.get(0)?.end();
    Some(Checkbox {
        status,
        body: &line[end..],
    })
}

#[must_use]
pub fn is_task_line(line: &str) -> bool {
    CHECKBOX_RE.is_match(line)
}

#[must_use]
pub fn line_status(line: &str) -> Option<TaskStatus> {
    checkbox(line).map(|c| c.status)
}

/// Title text with comments and hashtags removed.
#[must_use]
pub fn extract_title(body: &str) -> String {
    let without_comments = COMMENT_RE.replace_all(body, "");
    HASHTAG_RE
        .replace_all(&without_comments, "")
        .trim()
        .to_owned()
}

#[must_use]
pub fn extract_meta(body: &str) -> LineMeta {
    let mut meta = LineMeta::default();

    for caps in COMMENT_RE.captures_iter(body) {
        let Some(inner) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        for (key, value) in comment_pairs(inner.as_str()) {
            match key {
                "priority" => meta.priority = meta.priority.or(TaskPriority::from_tag(value)),
                "assignee" => meta.assignee = meta.assignee.or(TaskAssignee::from_tag(value)),
                "project" if !value.is_empty() => {
                    meta.project.get_or_insert_with(|| value.to_owned());
                }
                "mc:id" if !value.is_empty() => {
                    meta.legacy_id.get_or_insert_with(|| value.to_owned());
                }
                _ => {}
            }
        }
    }

    let without_comments = COMMENT_RE.replace_all(body, "");
    for tag in HASHTAG_RE.find_iter(&without_comments) {
        let name = &tag.as_str()[1..];
        if meta.priority.is_none() {
            meta.priority = TaskPriority::from_tag(name);
        }
        if meta.assignee.is_none() {
            meta.assignee = TaskAssignee::from_tag(name);
        }
    }
    meta
}

/// `key=value` pairs of an inline comment. Values run until the next key so
/// project names may contain spaces.
fn comment_pairs(text: &str) -> Vec<(&str, &str)> {
    let keys: Vec<_> = META_KEY_RE.captures_iter(text).collect();
    let mut out = Vec::with_capacity(keys.len());
    for (i, caps) in keys.iter().enumerate() {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value_end = keys
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());
        out.push((key.as_str(), text[whole.end()..value_end].trim()));
    }
    out
}

#[must_use]
pub fn task_id(title: &str) -> String {
    URL_SAFE_NO_PAD.encode(title.trim().as_bytes())
}

#[must_use]
pub fn decode_task_id(id: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(id.trim()).ok()?;
    String::from_utf8(bytes).ok()
}

/// Parses one line. `line_number` is 1-based.
#[must_use]
pub fn parse_task_line(line: &str, line_number: usize, source: &TaskSource<'_>) -> Option<Task> {
    let cb = checkbox(line)?;
    let title = extract_title(cb.body);
    if title.is_empty() {
        return None;
    }
    let meta = extract_meta(cb.body);
    Some(Task {
        id: task_id(&title),
        title,
        status: cb.status,
        priority: meta.priority.unwrap_or_default(),
        assignee: meta.assignee.unwrap_or_default(),
        project: meta.project.or_else(|| source.project.map(str::to_owned)),
        file_path: source.path.to_string_lossy().to_string(),
        line_number,
        editable: source.editable,
    })
}

#[must_use]
pub fn parse_tasks(content: &str, source: &TaskSource<'_>) -> Vec<Task> {
    content
        .split('\n')
        .enumerate()
        .filter_map(|(idx, line)| parse_task_line(line, idx + 1, source))
        .collect()
}

pub fn parse_file(source: &TaskSource<'_>) -> Source<Vec<Task>> {
    Source::read_with(source.path, |raw| Ok(parse_tasks(raw, source)))
}

/// Index of the first task line `id` refers to.
#[must_use]
pub fn find_task_line(lines: &[&str], id: &str) -> Option<usize> {
    let title = decode_task_id(id);
    lines.iter().position(|line| {
        let Some(cb) = checkbox(line) else {
            return false;
        };
        if title.as_deref().is_some_and(|t| extract_title(cb.body) == t) {
            return true;
        }
        extract_meta(cb.body).legacy_id.as_deref() == Some(id)
    })
}

/// `line` with its checkbox marker switched to `status`. Lines already in
/// that status come back untouched.
#[must_use]
pub fn with_status(line: &str, status: TaskStatus) -> Option<String> {
    let cb = checkbox(line)?;
    if cb.status == status {
        return Some(line.to_owned());
    }
    let caps = CHECKBOX_RE.captures(line)?;
    let indent = caps.get(1).map_or("", |m| m.as_str());
    Some(format!("{indent}- {}{}", status.marker(), cb.body))
}

#[must_use]
pub fn render_task_line(
    title: &str,
    priority: TaskPriority,
    assignee: TaskAssignee,
    project: Option<&str>,
) -> String {
    let title = clean_title_input(title);
    let project_part = project
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!(" project={p}"))
        .unwrap_or_default();
    format!(
        "- [ ] {title} #{p} #{a} %% priority={p} assignee={a}{project_part} %%",
        p = priority.as_str(),
        a = assignee.as_str(),
    )
}

/// Collapses the user's title onto one line.
#[must_use]
pub fn clean_title_input(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn validate_title(title: &str) -> Result<String, McError> {
    let cleaned = clean_title_input(title);
    if extract_title(&cleaned).is_empty() {
        return Err(McError::Validation("title is required".to_owned()));
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbox() -> TaskSource<'static> {
        TaskSource {
            path: Path::new("/vault/Task Inbox.md"),
            project: Some("Inbox"),
            editable: true,
        }
    }

    #[test]
    fn recognizes_the_three_markers() {
        let content = "# Inbox\n- [ ] one\n- [/] two\n- [x] three\n- [X] four\n* [ ] not a dash\n-[ ] no space\n";
        let tasks = parse_tasks(content, &inbox());
        let got: Vec<_> = tasks.iter().map(|t| (t.title.as_str(), t.status)).collect();
        assert_eq!(
            got,
            vec![
                ("one", TaskStatus::Todo),
                ("two", TaskStatus::InProgress),
                ("three", TaskStatus::Done),
                ("four", TaskStatus::Done),
            ]
        );
        assert_eq!(tasks[0].line_number, 2);
        assert_eq!(tasks[3].line_number, 5);
    }

    #[test]
    fn strips_comments_and_hashtags_from_titles() {
        let line = "- [ ] Call the bank #high #serman %% priority=low project=Finanzas Casa %%";
        let task = parse_task_line(line, 1, &inbox()).unwrap();
        assert_eq!(task.title, "Call the bank");
        // The comment wins over the hashtag.
        assert_eq!(task.priority, TaskPriority::Low);
        assert_eq!(task.assignee, TaskAssignee::Serman);
        assert_eq!(task.project.as_deref(), Some("Finanzas Casa"));

        let html = "- [/] Review <!-- assignee=serman --> draft";
        let task = parse_task_line(html, 1, &inbox()).unwrap();
        assert_eq!(task.title, "Review  draft");
        assert_eq!(task.assignee, TaskAssignee::Serman);
    }

    #[test]
    fn defaults_apply_without_metadata() {
        let task = parse_task_line("  - [ ] nested item", 3, &inbox()).unwrap();
        assert_eq!(task.priority, TaskPriority::Medium);
        assert_eq!(task.assignee, TaskAssignee::Raul);
        assert_eq!(task.project.as_deref(), Some("Inbox"));
        assert!(task.editable);
    }

    #[test]
    fn discards_lines_with_empty_titles() {
        assert!(parse_task_line("- [ ]", 1, &inbox()).is_none());
        assert!(parse_task_line("- [ ] #high %% priority=high %%", 1, &inbox()).is_none());
    }

    #[test]
    fn ids_round_trip_through_the_title() {
        let id = task_id("Comprar leche 🥛");
        assert!(!id.contains('='));
        assert_eq!(decode_task_id(&id).as_deref(), Some("Comprar leche 🥛"));
        assert!(decode_task_id("***").is_none());
    }

    #[test]
    fn ids_are_stable_across_reparses() {
        let content = "- [ ] a #low\n- [x] b\n";
        assert_eq!(parse_tasks(content, &inbox()), parse_tasks(content, &inbox()));
    }

    #[test]
    fn finds_lines_by_title_id_or_legacy_tag() {
        let lines = vec![
            "## 📥 Sin clasificar",
            "- [ ] Old task %% mc:id=ab12cd34 priority=high %%",
            "- [ ] Buy milk #low",
            "- [x] Buy milk",
        ];
        assert_eq!(find_task_line(&lines, &task_id("Buy milk")), Some(2));
        assert_eq!(find_task_line(&lines, "ab12cd34"), Some(1));
        assert_eq!(find_task_line(&lines, &task_id("nothing")), None);
    }

    #[test]
    fn rewriting_to_the_same_status_is_a_no_op() {
        for line in [
            "- [ ] a #high %% priority=high %%",
            "- [/] b",
            "- [X] c",
            "\t- [x] d\r",
        ] {
            let status = line_status(line).unwrap();
            assert_eq!(with_status(line, status).as_deref(), Some(line));
        }
    }

    #[test]
    fn rewriting_only_touches_the_marker() {
        let line = "  - [ ] Ship it #high %% priority=high %%";
        assert_eq!(
            with_status(line, TaskStatus::Done).as_deref(),
            Some("  - [x] Ship it #high %% priority=high %%")
        );
        assert_eq!(
            with_status(line, TaskStatus::InProgress).as_deref(),
            Some("  - [/] Ship it #high %% priority=high %%")
        );
        assert!(with_status("plain text", TaskStatus::Done).is_none());
    }

    #[test]
    fn rendered_lines_parse_back() {
        let line = render_task_line(
            "  Plan\ntrip ",
            TaskPriority::High,
            TaskAssignee::Serman,
            Some("Viaje Japón"),
        );
        assert_eq!(
            line,
            "- [ ] Plan trip #high #serman %% priority=high assignee=serman project=Viaje Japón %%"
        );
        let task = parse_task_line(&line, 1, &inbox()).unwrap();
        assert_eq!(task.title, "Plan trip");
        assert_eq!(task.priority, TaskPriority::High);
        assert_eq!(task.assignee, TaskAssignee::Serman);
        assert_eq!(task.project.as_deref(), Some("Viaje Japón"));
    }

    #[test]
    fn validates_titles() {
        assert!(validate_title("   ").is_err());
        assert!(validate_title("#only-tags").is_err());
        assert_eq!(validate_title(" a  b ").unwrap(), "a b");
    }
}
