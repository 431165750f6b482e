#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::TasksConfig;
use crate::error::McError;

const INACTIVE_STATUSES: &[&str] = &["paused", "completed", "pausado", "completado"];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    pub name: String,
    pub filename: String,
    pub file_path: String,
}

impl ProjectFile {
    #[must_use]
    pub fn path(&self) -> &Path {
        Path::new(&self.file_path)
    }
}

/// Active project notes in `dir`, sorted by name.
pub fn discover(dir: &Path, cfg: &TasksConfig) -> Result<Vec<ProjectFile>, McError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(McError::io(dir, e)),
    };

    let mut projects = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| McError::io(dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("md") || !path.is_file() {
            continue;
        }
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable project note");
                continue;
            }
        };
        if !is_active(&content, cfg) {
            continue;
        }
        projects.push(project_file(path));
    }
    projects.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(projects)
}

/// Case-insensitive exact match on the project name.
#[must_use]
pub fn resolve<'a>(projects: &'a [ProjectFile], name: &str) -> Option<&'a ProjectFile> {
    let wanted = name.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    projects.iter().find(|p| p.name.to_lowercase() == wanted)
}

fn project_file(path: PathBuf) -> ProjectFile {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let filename = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    ProjectFile {
        name,
        filename,
        file_path: path.to_string_lossy().to_string(),
    }
}

#[must_use]
pub fn is_active(content: &str, cfg: &TasksConfig) -> bool {
    if !cfg.project_marker.is_empty() && !content.contains(&cfg.project_marker) {
        return false;
    }
    if cfg
        .inactive_tags
        .iter()
        .any(|tag| !tag.is_empty() && content.contains(tag.as_str()))
    {
        return false;
    }
    front_matter(content).is_none_or(|fm| !front_matter_inactive(&fm))
}

fn front_matter(content: &str) -> Option<serde_yaml::Value> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;
    let end = rest.find("\n---")?;
    serde_yaml::from_str(&rest[..end]).ok()
}

fn front_matter_inactive(fm: &serde_yaml::Value) -> bool {
    let inactive = |v: &serde_yaml::Value| {
        v.as_str()
            .is_some_and(|s| INACTIVE_STATUSES.contains(&s.trim().to_lowercase().as_str()))
    };
    if fm.get("status").is_some_and(inactive) {
        return true;
    }
    match fm.get("tags") {
        Some(serde_yaml::Value::Sequence(tags)) => tags.iter().any(inactive),
        Some(tag) => inactive(tag),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn lists_only_active_marked_notes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = TasksConfig::default();
        write(dir.path(), "Zeta.md", "owner: serman\n## Tareas\n");
        write(dir.path(), "Alpha.md", "serman\n");
        write(dir.path(), "Unmarked.md", "nobody\n");
        write(dir.path(), "Done.md", "serman #completado\n");
        write(dir.path(), "Paused.md", "---\nstatus: Pausado\n---\nserman\n");
        write(dir.path(), "Tagged.md", "---\ntags: [work, completed]\n---\nserman\n");
        write(dir.path(), "notes.txt", "serman\n");

        let names: Vec<String> = discover(dir.path(), &cfg)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Alpha", "Zeta"]);
    }

    #[test]
    fn empty_marker_lists_every_note() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = TasksConfig {
            project_marker: String::new(),
            ..TasksConfig::default()
        };
        write(dir.path(), "Anything.md", "plain\n");
        let projects = discover(dir.path(), &cfg).unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].filename, "Anything.md");
    }

    #[test]
    fn missing_dir_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let projects = discover(&dir.path().join("absent"), &TasksConfig::default()).unwrap();
        assert!(projects.is_empty());
    }

    #[test]
    fn resolves_names_case_insensitively() {
        let projects = vec![project_file(PathBuf::from("/v/Viaje Japón.md"))];
        assert!(resolve(&projects, "viaje japón").is_some());
        assert!(resolve(&projects, " VIAJE JAPÓN ").is_some());
        assert!(resolve(&projects, "viaje").is_none());
        assert!(resolve(&projects, "").is_none());
    }
}
