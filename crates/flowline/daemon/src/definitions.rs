//! Startup loading of workflow definitions from a directory

use crate::error::{DaemonError, DaemonResult};
use flowline_engine::WorkflowEngine;
use flowline_types::WorkflowDefinition;
use std::path::{Path, PathBuf};

/// What happened to the files of one definitions directory
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    /// Definitions that passed validation and are published
    pub published: Vec<String>,
    /// Definitions stored as drafts because validation failed
    pub rejected: Vec<String>,
}

/// Read one definition document
pub fn read_definition(path: &Path) -> DaemonResult<WorkflowDefinition> {
    let raw = std::fs::read_to_string(path).map_err(|source| DaemonError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| DaemonError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn definition_files(dir: &Path) -> DaemonResult<Vec<PathBuf>> {
    let io_err = |source| DaemonError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Save every `*.json` definition in `dir` as a draft and publish it.
///
/// A definition with validation errors stays a draft; its issues are
/// logged. Unreadable files abort the load.
pub async fn load_definitions(engine: &WorkflowEngine, dir: &Path) -> DaemonResult<LoadSummary> {
    let mut summary = LoadSummary::default();

    for path in definition_files(dir)? {
        let definition = read_definition(&path)?;
        let id = definition.id.clone();
        let name = definition.name.clone();

        engine.save_draft(definition).await?;
        let validation = engine.publish(&id).await?;

        for issue in validation.issues() {
            tracing::warn!(
                definition_id = %id,
                file = %path.display(),
                rule = %issue.rule,
                path = %issue.path,
                severity = ?issue.severity,
                "{}",
                issue.message
            );
        }

        if validation.valid {
            tracing::info!(definition_id = %id, name = %name, "Definition loaded");
            summary.published.push(id.to_string());
        } else {
            tracing::warn!(
                definition_id = %id,
                errors = validation.errors.len(),
                "Definition kept as draft"
            );
            summary.rejected.push(id.to_string());
        }
    }

    Ok(summary)
}
