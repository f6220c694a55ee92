//! Workflow state storage
//!
//! Plans and runs are keyed by id. The orchestrator receives a store rather
//! than reaching for shared global state, so independent orchestrators (and
//! processes, with [`JsonFileStore`]) can pick up each other's runs.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AdminflowError, ErrorCode, Result};
use crate::planner::WorkflowPlan;
use crate::run::WorkflowRun;

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn save_plan(&self, plan: &WorkflowPlan) -> Result<()>;

    async fn load_plan(&self, plan_id: &str) -> Result<Option<WorkflowPlan>>;

    async fn save_run(&self, run: &WorkflowRun) -> Result<()>;

    async fn load_run(&self, workflow_id: &str) -> Result<Option<WorkflowRun>>;

    /// All stored runs, oldest first
    async fn list_runs(&self) -> Result<Vec<WorkflowRun>>;
}

#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    plans: RwLock<HashMap<String, WorkflowPlan>>,
    runs: RwLock<HashMap<String, WorkflowRun>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn save_plan(&self, plan: &WorkflowPlan) -> Result<()> {
        self.plans
            .write()
            .await
            .insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn load_plan(&self, plan_id: &str) -> Result<Option<WorkflowPlan>> {
        Ok(self.plans.read().await.get(plan_id).cloned())
    }

    async fn save_run(&self, run: &WorkflowRun) -> Result<()> {
        self.runs.write().await.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn load_run(&self, workflow_id: &str) -> Result<Option<WorkflowRun>> {
        Ok(self.runs.read().await.get(workflow_id).cloned())
    }

    async fn list_runs(&self) -> Result<Vec<WorkflowRun>> {
        let mut runs: Vec<_> = self.runs.read().await.values().cloned().collect();
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }
}

/// Stores each plan and run as a pretty-printed JSON file under
/// `<base>/plans/<id>.json` and `<base>/runs/<id>.json`
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    base_dir: PathBuf,
}

impl JsonFileStore {
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        for domain in ["plans", "runs"] {
            let dir = base_dir.join(domain);
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| io_error("Cannot create store directory", &dir, e))?;
        }
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn get_path(&self, domain: &str, id: &str) -> Result<PathBuf> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(AdminflowError::storage_with_code(
                ErrorCode::STORAGE_GENERIC,
                format!("invalid {domain} id '{id}'"),
                None,
            ));
        }
        Ok(self.base_dir.join(domain).join(format!("{id}.json")))
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("Cannot read", path, e)),
        };
        serde_json::from_str(&content).map(Some).map_err(|e| {
            AdminflowError::storage_with_code(
                ErrorCode::STORAGE_DESERIALIZATION_ERROR,
                "Corrupt workflow state file",
                Some(path.to_path_buf()),
            )
            .with_source(e)
        })
    }

    /// Write through a temporary file so readers never see a partial document
    async fn write_json<T: Serialize>(&self, path: &Path, data: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(data).map_err(|e| {
            AdminflowError::storage_with_code(
                ErrorCode::STORAGE_SERIALIZATION_ERROR,
                "Cannot serialize workflow state",
                Some(path.to_path_buf()),
            )
            .with_source(e)
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|e| io_error("Cannot write", &tmp, e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| io_error("Cannot replace", path, e))?;
        debug!(path = %path.display(), "Wrote workflow state");
        Ok(())
    }
}

fn io_error(message: &str, path: &Path, err: std::io::Error) -> AdminflowError {
    AdminflowError::storage_with_code(
        ErrorCode::STORAGE_IO_ERROR,
        message,
        Some(path.to_path_buf()),
    )
    .with_source(err)
}

#[async_trait]
impl WorkflowStore for JsonFileStore {
    async fn save_plan(&self, plan: &WorkflowPlan) -> Result<()> {
        let path = self.get_path("plans", &plan.id)?;
        self.write_json(&path, plan).await
    }

    async fn load_plan(&self, plan_id: &str) -> Result<Option<WorkflowPlan>> {
        let path = self.get_path("plans", plan_id)?;
        self.read_json(&path).await
    }

    async fn save_run(&self, run: &WorkflowRun) -> Result<()> {
        let path = self.get_path("runs", &run.id)?;
        self.write_json(&path, run).await
    }

    async fn load_run(&self, workflow_id: &str) -> Result<Option<WorkflowRun>> {
        let path = self.get_path("runs", workflow_id)?;
        self.read_json(&path).await
    }

    async fn list_runs(&self) -> Result<Vec<WorkflowRun>> {
        let dir = self.base_dir.join("runs");
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| io_error("Cannot list", &dir, e))?;

        let mut runs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("Cannot list", &dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(run) = self.read_json::<WorkflowRun>(&path).await? {
                runs.push(run);
            }
        }
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }
}
