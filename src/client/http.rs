use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use super::remote::AgentRemote;
use crate::core::envelope::{
    AgentPayload, AgentsPayload, ApiResponse, ErrorDetail, GitRunPayload, LogsPayload,
    MessageRequest, PairRequest, RunCommandRequest, TerminalRunPayload, TokenPayload,
};
use crate::core::ide::{
    DirectoryListing, FileContent, GitStatus, PlaygroundReply, PlaygroundRequest,
    SwitchWorkspaceRequest, SystemStatus, WorkspaceList, WriteFileRequest,
};
use crate::core::{
    Action, Agent, CommandOutput, Config, Credential, LogEntry, RemoteError, SessionContext,
    ShellKind,
};

/// HTTP client for the mobile bridge API
#[derive(Debug, Clone)]
pub struct BridgeClient {
    base_url: String,
    client: Client,
    credential: Credential,
}

fn build_http_client(config: &Config) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.server.request_timeout_secs))
        .build()
        .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))
}

impl BridgeClient {
    pub fn new(context: &SessionContext, config: &Config) -> Result<Self> {
        let client = build_http_client(config)?;
        let base_url = context.api_url().as_str().trim_end_matches('/').to_string();
        Ok(Self {
            base_url,
            client,
            credential: context.credential().clone(),
        })
    }

    /// Exchange a pairing key for a bearer token
    pub async fn pair(config: &Config, pairing_key: &str) -> Result<Credential, RemoteError> {
        let client =
            build_http_client(config).map_err(|e| RemoteError::Network(e.to_string()))?;
        let url = format!("{}/auth/pair", config.server.api_url.trim_end_matches('/'));
        tracing::debug!("POST {}", url);

        let response = client
            .post(&url)
            .json(&PairRequest { pairing_key })
            .send()
            .await?;
        let payload: TokenPayload = read_envelope(response, "pairing").await?.into_data()?;
        Ok(Credential::new(payload.token))
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("GET {}", url);
        self.client.get(url).bearer_auth(self.credential.expose())
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("POST {}", url);
        self.client.post(url).bearer_auth(self.credential.expose())
    }

    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let response = self.get(path).send().await?;
        read_envelope(response, path).await?.into_data()
    }

    async fn post_data<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RemoteError> {
        let response = self.post(path).json(body).send().await?;
        read_envelope(response, path).await?.into_data()
    }

    async fn post_ack(&self, path: &str, body: Option<&serde_json::Value>) -> Result<Option<String>, RemoteError> {
        let mut request = self.post(path);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        read_envelope::<serde_json::Value>(response, path)
            .await?
            .into_ack()
    }

    /// Check if the bridge answers at all
    pub async fn is_bridge_running(&self) -> bool {
        self.client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }

    pub async fn system_status(&self) -> Result<SystemStatus, RemoteError> {
        self.get_data("/system/status").await
    }

    pub async fn list_agents(&self, all: bool) -> Result<Vec<Agent>, RemoteError> {
        let path = format!("/agents?all={}", all);
        let payload: AgentsPayload = self.get_data(&path).await?;
        Ok(payload.agents)
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Agent, RemoteError> {
        let payload: AgentPayload = self.get_data(&format!("/agents/{}", agent_id)).await?;
        Ok(payload.agent)
    }

    pub async fn get_logs(&self, agent_id: &str) -> Result<Vec<LogEntry>, RemoteError> {
        let payload: LogsPayload = self.get_data(&format!("/agents/{}/logs", agent_id)).await?;
        Ok(payload.logs)
    }

    /// POST the lifecycle or message endpoint for an action
    pub async fn perform_action(&self, agent_id: &str, action: &Action) -> Result<(), RemoteError> {
        let message = match action {
            Action::SendMessage(text) => {
                let body = serde_json::to_value(MessageRequest { message: text })
                    .map_err(|e| RemoteError::Decode(e.to_string()))?;
                self.post_ack(&format!("/agents/{}/message", agent_id), Some(&body))
                    .await?
            }
            _ => {
                self.post_ack(&format!("/agents/{}/{}", agent_id, action.kind()), None)
                    .await?
            }
        };
        tracing::debug!(
            "Action {} on agent {} accepted: {}",
            action.kind(),
            agent_id,
            message.as_deref().unwrap_or("ok")
        );
        Ok(())
    }

    pub async fn run_shell_command(
        &self,
        shell: ShellKind,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<CommandOutput, RemoteError> {
        let request = RunCommandRequest { command, cwd };
        match shell {
            ShellKind::Terminal => {
                let payload: TerminalRunPayload = self.post_data(shell.endpoint(), &request).await?;
                Ok(CommandOutput {
                    stdout: payload.stdout,
                    stderr: payload.stderr,
                    exit_code: payload.exit_code.unwrap_or(-1),
                    cwd: payload.cwd,
                })
            }
            ShellKind::Git => {
                let payload: GitRunPayload = self.post_data(shell.endpoint(), &request).await?;
                Ok(CommandOutput {
                    stdout: payload.output,
                    stderr: payload.stderr,
                    exit_code: payload.exit_code.unwrap_or(-1),
                    cwd: None,
                })
            }
        }
    }

    pub async fn git_status(&self) -> Result<GitStatus, RemoteError> {
        self.get_data("/ide/git/status").await
    }

    pub async fn list_files(&self, path: &str) -> Result<DirectoryListing, RemoteError> {
        let response = self.get("/ide/files").query(&[("path", path)]).send().await?;
        read_envelope(response, "/ide/files").await?.into_data()
    }

    pub async fn read_file(&self, path: &str) -> Result<FileContent, RemoteError> {
        let response = self
            .get("/ide/files/read")
            .query(&[("path", path)])
            .send()
            .await?;
        read_envelope(response, "/ide/files/read").await?.into_data()
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<(), RemoteError> {
        let body = serde_json::to_value(WriteFileRequest { path, content })
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        self.post_ack("/ide/files/write", Some(&body)).await?;
        Ok(())
    }

    pub async fn list_workspaces(&self) -> Result<WorkspaceList, RemoteError> {
        self.get_data("/ide/workspaces").await
    }

    pub async fn switch_workspace(&self, path: &str) -> Result<(), RemoteError> {
        let body = serde_json::to_value(SwitchWorkspaceRequest { path })
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        self.post_ack("/ide/workspaces/switch", Some(&body)).await?;
        Ok(())
    }

    pub async fn run_playground(&self, request: &PlaygroundRequest) -> Result<PlaygroundReply, RemoteError> {
        self.post_data("/playground/run", request).await
    }
}

#[async_trait]
impl AgentRemote for BridgeClient {
    async fn list_agents(&self, all: bool) -> Result<Vec<Agent>, RemoteError> {
        BridgeClient::list_agents(self, all).await
    }

    async fn fetch_agent(&self, agent_id: &str) -> Result<Agent, RemoteError> {
        self.get_agent(agent_id).await
    }

    async fn fetch_logs(&self, agent_id: &str) -> Result<Vec<LogEntry>, RemoteError> {
        self.get_logs(agent_id).await
    }

    async fn perform(&self, agent_id: &str, action: &Action) -> Result<(), RemoteError> {
        self.perform_action(agent_id, action).await
    }

    async fn run_command(
        &self,
        shell: ShellKind,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<CommandOutput, RemoteError> {
        self.run_shell_command(shell, command, cwd).await
    }
}

async fn read_envelope<T: DeserializeOwned>(
    response: Response,
    what: &str,
) -> Result<ApiResponse<T>, RemoteError> {
    let status = response.status();
    tracing::debug!("{} response status: {}", what, status);

    if status == StatusCode::UNAUTHORIZED {
        return Err(RemoteError::Unauthorized);
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorDetail>(&body)
            .ok()
            .and_then(|detail| detail.text())
            .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()));
        tracing::warn!(
            "{} failed with status {}: {}",
            what,
            status,
            detail.as_deref().unwrap_or("no detail")
        );
        return Err(RemoteError::Http {
            status: status.as_u16(),
            detail,
        });
    }

    let text = response.text().await?;
    serde_json::from_str(&text)
        .map_err(|e| RemoteError::Decode(format!("Failed to parse {} response: {}", what, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AgentStatus;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> BridgeClient {
        let mut config = Config::default();
        config.server.api_url = server.uri();
        let context = SessionContext::new(&config, Credential::new("tok")).unwrap();
        BridgeClient::new(&context, &config).unwrap()
    }

    fn agent_json(id: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": "Worker",
            "status": status,
            "last_active": "2025-03-01T10:00:00",
            "current_task": null,
            "meta": {}
        })
    }

    #[tokio::test]
    async fn test_get_agent_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/agents/a1"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"agent": agent_json("a1", "running")}
            })))
            .mount(&server)
            .await;

        let agent = client_for(&server).get_agent("a1").await.unwrap();
        assert_eq!(agent.status, AgentStatus::Running);
    }

    #[tokio::test]
    async fn test_list_agents_passes_all_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/agents"))
            .and(query_param("all", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"agents": [agent_json("a1", "stopped"), agent_json("a2", "error")]}
            })))
            .mount(&server)
            .await;

        let agents = client_for(&server).list_agents(false).await.unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[1].status, AgentStatus::Error);
    }

    #[tokio::test]
    async fn test_action_failure_carries_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agents/ghost/approve"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"detail": "Agent not found"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .perform_action("ghost", &Action::Approve)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), Some("Agent not found"));
    }

    #[tokio::test]
    async fn test_send_message_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agents/a1/message"))
            .and(body_json(serde_json::json!({"message": "status?"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "message": "Message delivered to agent"
            })))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .perform_action("a1", &Action::SendMessage("status?".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unauthorized_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/agents/a1/logs"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(serde_json::json!({"detail": "Invalid token"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).get_logs("a1").await.unwrap_err();
        assert!(matches!(err, RemoteError::Unauthorized));
    }

    #[tokio::test]
    async fn test_terminal_run_reports_cwd() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ide/terminal/run"))
            .and(body_json(serde_json::json!({"command": "cd /tmp && false"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"stdout": "", "stderr": "", "exit_code": 1, "command": "cd /tmp && false", "cwd": "/tmp"}
            })))
            .mount(&server)
            .await;

        let output = client_for(&server)
            .run_shell_command(ShellKind::Terminal, "cd /tmp && false", None)
            .await
            .unwrap();
        assert_eq!(output.exit_code, 1);
        assert_eq!(output.cwd.as_deref(), Some("/tmp"));
    }

    #[tokio::test]
    async fn test_git_run_maps_output_to_stdout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ide/git/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"output": "Already up to date.\n", "stderr": "", "exit_code": 0}
            })))
            .mount(&server)
            .await;

        let output = client_for(&server)
            .run_shell_command(ShellKind::Git, "pull", Some("/repo"))
            .await
            .unwrap();
        assert_eq!(output.stdout, "Already up to date.\n");
        assert!(output.cwd.is_none());
    }

    #[tokio::test]
    async fn test_pairing_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/pair"))
            .and(body_json(serde_json::json!({"pairing_key": "k3y"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"token": "jwt-token"}
            })))
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.server.api_url = server.uri();
        let credential = BridgeClient::pair(&config, "k3y").await.unwrap();
        assert_eq!(credential.expose(), "jwt-token");
    }
}
