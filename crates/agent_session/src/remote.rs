use std::collections::BTreeMap;

use async_trait::async_trait;
use stream_api::ApiClient;
use tool_sandbox::RemoteTools;

/// [`RemoteTools`] backed by the chat service's REST endpoints.
pub struct ApiRemoteTools<'a> {
    client: &'a ApiClient,
}

impl<'a> ApiRemoteTools<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteTools for ApiRemoteTools<'_> {
    async fn fetch_tool_names(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.client.fetch_tool_manifest().await?.names())
    }

    async fn commit_files(
        &self,
        app_id: &str,
        files: BTreeMap<String, String>,
        message: &str,
    ) -> anyhow::Result<String> {
        Ok(self.client.commit_files(app_id, &files, message).await?)
    }

    async fn trigger_deployment(&self, app_id: &str, commit_id: &str) -> anyhow::Result<String> {
        Ok(self.client.create_deployment(app_id, commit_id).await?)
    }
}
