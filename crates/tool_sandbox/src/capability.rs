use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

/// Remote calls the sandbox needs: the allow-list manifest and commit/deploy.
#[async_trait]
pub trait RemoteTools: Send + Sync {
    async fn fetch_tool_names(&self) -> anyhow::Result<Vec<String>>;

    /// Uploads a file snapshot and returns the commit id.
    async fn commit_files(
        &self,
        app_id: &str,
        files: BTreeMap<String, String>,
        message: &str,
    ) -> anyhow::Result<String>;

    /// Starts a deployment of `commit_id` and returns the deployment id.
    async fn trigger_deployment(&self, app_id: &str, commit_id: &str) -> anyhow::Result<String>;
}

/// Optional code-intelligence peer notified after successful reads and writes.
///
/// Notifications are best-effort: a returned error is logged and dropped, it
/// never changes the tool result.
#[async_trait]
pub trait CodeIntel: Send + Sync {
    async fn did_read(&self, path: &Path, content: &str) -> anyhow::Result<()>;

    async fn did_write(&self, path: &Path, content: &str) -> anyhow::Result<()>;
}
