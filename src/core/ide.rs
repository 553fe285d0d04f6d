use serde::{Deserialize, Serialize};

// Plain request/response models for the bridge's IDE endpoints.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitCommit {
    pub hash: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitStatus {
    pub branch: String,
    #[serde(default)]
    pub remote: String,
    #[serde(default)]
    pub ahead: u32,
    #[serde(default)]
    pub behind: u32,
    #[serde(default)]
    pub staged: Vec<String>,
    #[serde(default)]
    pub changed: Vec<String>,
    #[serde(default)]
    pub untracked: Vec<String>,
    #[serde(default)]
    pub is_clean: bool,
    #[serde(default)]
    pub recent_commits: Vec<GitCommit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Directory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub size: Option<u64>,
    pub modified: Option<f64>,
    pub extension: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryListing {
    #[serde(default)]
    pub path: String,
    pub workspace: String,
    pub entries: Vec<FileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub name: String,
    pub content: String,
    pub lines: u64,
    pub size: u64,
    #[serde(default)]
    pub extension: String,
}

#[derive(Debug, Serialize)]
pub struct WriteFileRequest<'a> {
    pub path: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub is_current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceList {
    pub workspaces: Vec<Workspace>,
    pub root: String,
}

#[derive(Debug, Serialize)]
pub struct SwitchWorkspaceRequest<'a> {
    pub path: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaygroundRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl PlaygroundRequest {
    pub fn new(user_prompt: String) -> Self {
        PlaygroundRequest {
            model: "gemini-2.0-flash".to_string(),
            system_prompt: String::new(),
            user_prompt,
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaygroundReply {
    pub response: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    #[serde(default)]
    pub uptime: String,
    pub active_agents: u32,
    pub waiting_approval: u32,
    pub total_agents: u32,
    #[serde(default)]
    pub workspace: String,
}
