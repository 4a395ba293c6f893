use async_trait::async_trait;
use chrono::{DateTime, Utc};
use maestro_core::{MaestroError, MaestroResult};
use maestro_resources::ResourceSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Lifecycle status of an agent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Not running; eligible to start.
    Stopped,
    /// Start requested, workflow dispatch in flight.
    Starting,
    /// Workflow confirmed running.
    Running,
    /// Stop requested, teardown in flight.
    Stopping,
    /// The last lifecycle operation failed.
    Error,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Stopped => write!(f, "stopped"),
            AgentStatus::Starting => write!(f, "starting"),
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Stopping => write!(f, "stopping"),
            AgentStatus::Error => write!(f, "error"),
        }
    }
}

/// An agent as tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Registry id, unique across the platform.
    pub id: String,
    /// Display name, unique per owner.
    pub name: String,
    /// The user owning this agent.
    pub owner_id: String,
    /// Template the agent was created from, if any.
    #[serde(default)]
    pub template: Option<String>,
    /// Free-form lookup tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Current lifecycle status.
    pub status: AgentStatus,
    /// Ids of agents that must be `Running` before this one starts.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Resource footprint requested on start.
    #[serde(default)]
    pub resources: ResourceSpec,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl AgentRecord {
    /// Creates a stopped agent owned by `owner_id`.
    pub fn new(name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("agent-{}", Uuid::new_v4()),
            name: name.into(),
            owner_id: owner_id.into(),
            template: None,
            tags: Vec::new(),
            status: AgentStatus::Stopped,
            dependencies: Vec::new(),
            resources: ResourceSpec::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the dependency list.
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Sets the resource footprint.
    pub fn with_resources(mut self, resources: ResourceSpec) -> Self {
        self.resources = resources;
        self
    }

    /// Sets the lookup tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the source template.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }
}

/// Registry collaborator consumed by the orchestration engine.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Agent by id, if present.
    async fn get_agent(&self, id: &str) -> MaestroResult<Option<AgentRecord>>;
    /// Inserts a new record; the id must be unused.
    async fn insert_agent(&self, record: AgentRecord) -> MaestroResult<()>;
    /// Updates the status (and `updated_at`) of an existing record.
    async fn update_agent_status(&self, id: &str, status: AgentStatus) -> MaestroResult<()>;
    /// Removes a record.
    async fn remove_agent(&self, id: &str) -> MaestroResult<()>;
    /// All records, sorted by creation time.
    async fn list_agents(&self) -> MaestroResult<Vec<AgentRecord>>;
    /// Records owned by `owner_id`.
    async fn find_by_owner(&self, owner_id: &str) -> MaestroResult<Vec<AgentRecord>>;
    /// Records carrying `tag`.
    async fn find_by_tag(&self, tag: &str) -> MaestroResult<Vec<AgentRecord>>;
    /// Records created from `template`.
    async fn find_by_template(&self, template: &str) -> MaestroResult<Vec<AgentRecord>>;
}

/// In-memory registry, the default for a single-process deployment.
#[derive(Default)]
pub struct MemoryRegistry {
    agents: RwLock<HashMap<String, AgentRecord>>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRegistry for MemoryRegistry {
    async fn get_agent(&self, id: &str) -> MaestroResult<Option<AgentRecord>> {
        Ok(self.agents.read().await.get(id).cloned())
    }

    async fn insert_agent(&self, record: AgentRecord) -> MaestroResult<()> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(&record.id) {
            return Err(MaestroError::Registry(format!(
                "agent {} already exists",
                record.id
            )));
        }
        agents.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update_agent_status(&self, id: &str, status: AgentStatus) -> MaestroResult<()> {
        let mut agents = self.agents.write().await;
        let record = agents
            .get_mut(id)
            .ok_or_else(|| MaestroError::NotFound(format!("agent {id}")))?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn remove_agent(&self, id: &str) -> MaestroResult<()> {
        self.agents
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| MaestroError::NotFound(format!("agent {id}")))
    }

    async fn list_agents(&self) -> MaestroResult<Vec<AgentRecord>> {
        let mut records: Vec<AgentRecord> = self.agents.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn find_by_owner(&self, owner_id: &str) -> MaestroResult<Vec<AgentRecord>> {
        Ok(self
            .list_agents()
            .await?
            .into_iter()
            .filter(|r| r.owner_id == owner_id)
            .collect())
    }

    async fn find_by_tag(&self, tag: &str) -> MaestroResult<Vec<AgentRecord>> {
        Ok(self
            .list_agents()
            .await?
            .into_iter()
            .filter(|r| r.tags.iter().any(|t| t == tag))
            .collect())
    }

    async fn find_by_template(&self, template: &str) -> MaestroResult<Vec<AgentRecord>> {
        Ok(self
            .list_agents()
            .await?
            .into_iter()
            .filter(|r| r.template.as_deref() == Some(template))
            .collect())
    }
}

/// File-backed registry (one JSON document per agent). Good enough for a
/// single host; anything distributed is out of scope.
pub struct FileRegistry {
    dir: PathBuf,
}

impl FileRegistry {
    /// Opens (and creates) the registry directory.
    pub async fn new(dir: PathBuf) -> MaestroResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn agent_path(&self, id: &str) -> MaestroResult<PathBuf> {
        // Ids become file names; refuse anything that could escape the
        // registry directory.
        if id.is_empty() || id.contains(['/', '\\', '.']) {
            return Err(MaestroError::Registry(format!(
                "agent id '{id}' is not a valid file name"
            )));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn read_record(&self, path: &Path) -> MaestroResult<AgentRecord> {
        let data = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&data)
            .map_err(|e| MaestroError::Registry(format!("corrupt agent record: {e}")))
    }

    async fn write_record(&self, record: &AgentRecord) -> MaestroResult<()> {
        let path = self.agent_path(&record.id)?;
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl AgentRegistry for FileRegistry {
    async fn get_agent(&self, id: &str) -> MaestroResult<Option<AgentRecord>> {
        let path = self.agent_path(id)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(self.read_record(&path).await?))
    }

    async fn insert_agent(&self, record: AgentRecord) -> MaestroResult<()> {
        let path = self.agent_path(&record.id)?;
        if path.exists() {
            return Err(MaestroError::Registry(format!(
                "agent {} already exists",
                record.id
            )));
        }
        self.write_record(&record).await
    }

    async fn update_agent_status(&self, id: &str, status: AgentStatus) -> MaestroResult<()> {
        let mut record = self
            .get_agent(id)
            .await?
            .ok_or_else(|| MaestroError::NotFound(format!("agent {id}")))?;
        record.status = status;
        record.updated_at = Utc::now();
        self.write_record(&record).await
    }

    async fn remove_agent(&self, id: &str) -> MaestroResult<()> {
        let path = self.agent_path(id)?;
        if !path.exists() {
            return Err(MaestroError::NotFound(format!("agent {id}")));
        }
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    async fn list_agents(&self) -> MaestroResult<Vec<AgentRecord>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                records.push(self.read_record(&path).await?);
            }
        }
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn find_by_owner(&self, owner_id: &str) -> MaestroResult<Vec<AgentRecord>> {
        Ok(self
            .list_agents()
            .await?
            .into_iter()
            .filter(|r| r.owner_id == owner_id)
            .collect())
    }

    async fn find_by_tag(&self, tag: &str) -> MaestroResult<Vec<AgentRecord>> {
        Ok(self
            .list_agents()
            .await?
            .into_iter()
            .filter(|r| r.tags.iter().any(|t| t == tag))
            .collect())
    }

    async fn find_by_template(&self, template: &str) -> MaestroResult<Vec<AgentRecord>> {
        Ok(self
            .list_agents()
            .await?
            .into_iter()
            .filter(|r| r.template.as_deref() == Some(template))
            .collect())
    }
}
