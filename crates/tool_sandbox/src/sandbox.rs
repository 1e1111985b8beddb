use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_protocol::ToolCallItem;
use ignore::WalkBuilder;
use regex::RegexBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::capability::{CodeIntel, RemoteTools};
use crate::diff::unified_diff;
use crate::error::SandboxError;
use crate::patch::{parse_patch, run_patch};
use crate::paths::{ReadSet, ResolvedPath, Workspace};

pub const DEFAULT_READ_MAX_BYTES: u64 = 512 * 1024;
pub const GREP_MAX_MATCHES: usize = 200;
const LIST_MAX_ENTRIES: usize = 2000;
const GREP_LINE_MAX_CHARS: usize = 400;
const DEFAULT_DEPLOY_MESSAGE: &str = "Deploy from agent-tabs";

/// The local tool vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ReadFile,
    ListFiles,
    Grep,
    ApplyPatch,
    WriteFile,
    Deploy,
}

impl ToolKind {
    pub const ALL: [ToolKind; 6] = [
        ToolKind::ReadFile,
        ToolKind::ListFiles,
        ToolKind::Grep,
        ToolKind::ApplyPatch,
        ToolKind::WriteFile,
        ToolKind::Deploy,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::ListFiles => "list_files",
            Self::Grep => "grep",
            Self::ApplyPatch => "apply_patch",
            Self::WriteFile => "write_file",
            Self::Deploy => "deploy",
        }
    }

    fn mutates(&self) -> bool {
        matches!(self, Self::ApplyPatch | Self::WriteFile)
    }
}

/// Per-call collaborators owned by the session, not the sandbox.
#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
    pub remote: &'a dyn RemoteTools,
    pub app_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListArgs {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    recursive: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrepArgs {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default, alias = "case_insensitive")]
    case_insensitive: bool,
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct PatchArgs {
    #[serde(alias = "input", alias = "diff")]
    patch: String,
}

#[derive(Debug, Default, Deserialize)]
struct DeployArgs {
    #[serde(default)]
    message: Option<String>,
}

/// Executes tool calls against one workspace root.
///
/// Every call is checked against the remote allow-list (fetched once and
/// cached), confined to the root, and answered with a JSON object whose `ok`
/// field reports success. Failures never escape as errors or panics; they
/// become `{"ok":false,"error":...}`.
pub struct ToolSandbox {
    workspace: Workspace,
    read_set: ReadSet,
    allowed: OnceCell<BTreeSet<String>>,
    code_intel: Option<Arc<dyn CodeIntel>>,
    read_max_bytes: u64,
    patch_program: String,
    git_program: String,
}

impl ToolSandbox {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        Ok(Self {
            workspace: Workspace::new(root)?,
            read_set: ReadSet::default(),
            allowed: OnceCell::new(),
            code_intel: None,
            read_max_bytes: DEFAULT_READ_MAX_BYTES,
            patch_program: "patch".to_string(),
            git_program: "git".to_string(),
        })
    }

    #[must_use]
    pub fn with_code_intel(mut self, code_intel: Arc<dyn CodeIntel>) -> Self {
        self.code_intel = Some(code_intel);
        self
    }

    #[must_use]
    pub fn with_read_max_bytes(mut self, read_max_bytes: u64) -> Self {
        self.read_max_bytes = read_max_bytes;
        self
    }

    #[must_use]
    pub fn with_patch_program(mut self, program: impl Into<String>) -> Self {
        self.patch_program = program.into();
        self
    }

    #[must_use]
    pub fn with_git_program(mut self, program: impl Into<String>) -> Self {
        self.git_program = program.into();
        self
    }

    pub fn root(&self) -> &Path {
        self.workspace.root()
    }

    pub fn read_set(&self) -> &ReadSet {
        &self.read_set
    }

    /// Forgets every read; used when the conversation starts over.
    pub fn clear_read_set(&mut self) {
        self.read_set.clear();
    }

    /// The cached allow-list, once a dispatch has loaded it.
    pub fn allowed_tools(&self) -> Option<&BTreeSet<String>> {
        self.allowed.get()
    }

    pub async fn execute(&mut self, call: &ToolCallItem, ctx: ToolContext<'_>) -> Value {
        match self.dispatch(call, ctx).await {
            Ok(result) => {
                tracing::debug!(tool = %call.name, call_id = %call.call_id, "tool call succeeded");
                result
            }
            Err(error) => {
                tracing::warn!(tool = %call.name, call_id = %call.call_id, %error, "tool call failed");
                json!({ "ok": false, "error": error.to_string() })
            }
        }
    }

    async fn dispatch(
        &mut self,
        call: &ToolCallItem,
        ctx: ToolContext<'_>,
    ) -> Result<Value, SandboxError> {
        self.ensure_allowed(&call.name, ctx.remote).await?;
        let kind =
            ToolKind::parse(&call.name).ok_or_else(|| SandboxError::Unsupported(call.name.clone()))?;
        let args = parse_arguments(&call.arguments)?;

        if kind.mutates() {
            tracing::info!(tool = kind.name(), call_id = %call.call_id, "applying workspace change");
        }

        match kind {
            ToolKind::ReadFile => {
                let args: PathArgs = decode(kind, args)?;
                self.read_file(&args.path).await
            }
            ToolKind::ListFiles => {
                let args: ListArgs = decode(kind, args)?;
                self.list_files(args.path.as_deref(), args.recursive)
            }
            ToolKind::Grep => {
                let args: GrepArgs = decode(kind, args)?;
                self.grep(args).await
            }
            ToolKind::ApplyPatch => {
                let args: PatchArgs = decode(kind, args)?;
                self.apply_patch(&args.patch).await
            }
            ToolKind::WriteFile => {
                let args: WriteArgs = decode(kind, args)?;
                self.write_file(&args.path, args.content).await
            }
            ToolKind::Deploy => {
                let args: DeployArgs = decode(kind, args)?;
                self.deploy(args, ctx).await
            }
        }
    }

    async fn ensure_allowed(&self, name: &str, remote: &dyn RemoteTools) -> Result<(), SandboxError> {
        let allowed = self
            .allowed
            .get_or_try_init(|| async {
                let names = remote
                    .fetch_tool_names()
                    .await
                    .map_err(|error| SandboxError::Manifest(format!("{error:#}")))?;
                tracing::info!(count = names.len(), "tool allow-list loaded");
                Ok::<_, SandboxError>(names.into_iter().collect::<BTreeSet<_>>())
            })
            .await?;

        if allowed.contains(name) {
            Ok(())
        } else {
            Err(SandboxError::Disallowed(name.to_string()))
        }
    }

    async fn read_file(&mut self, raw: &str) -> Result<Value, SandboxError> {
        let resolved = self.workspace.resolve(raw)?;
        let content = self.read_text(&resolved).await?;
        self.read_set.mark(resolved.absolute.clone());
        self.notify_read(&resolved.absolute, &content).await;

        Ok(json!({
            "ok": true,
            "path": resolved.relative,
            "content": content,
        }))
    }

    fn list_files(&mut self, raw: Option<&str>, recursive: bool) -> Result<Value, SandboxError> {
        let resolved = self.workspace.resolve(raw.unwrap_or("."))?;
        if !resolved.absolute.is_dir() {
            return Err(SandboxError::NotDirectory(resolved.relative));
        }

        let mut walker = WalkBuilder::new(&resolved.absolute);
        walker
            .require_git(false)
            .max_depth(if recursive { None } else { Some(1) })
            .sort_by_file_name(|left, right| left.cmp(right));

        let mut entries = Vec::new();
        let mut truncated = false;
        for entry in walker.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::debug!(%error, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            if entries.len() >= LIST_MAX_ENTRIES {
                truncated = true;
                break;
            }
            let kind = match entry.file_type() {
                Some(file_type) if file_type.is_dir() => "dir",
                Some(file_type) if file_type.is_symlink() => "symlink",
                _ => "file",
            };
            entries.push(json!({
                "path": self.workspace.relative_display(entry.path()),
                "kind": kind,
            }));
        }

        self.read_set.mark(resolved.absolute.clone());

        Ok(json!({
            "ok": true,
            "path": resolved.relative,
            "entries": entries,
            "truncated": truncated,
        }))
    }

    async fn grep(&self, args: GrepArgs) -> Result<Value, SandboxError> {
        let regex = RegexBuilder::new(&args.pattern)
            .case_insensitive(args.case_insensitive)
            .build()?;
        let resolved = self.workspace.resolve(args.path.as_deref().unwrap_or("."))?;

        let files: Vec<PathBuf> = if resolved.absolute.is_file() {
            vec![resolved.absolute.clone()]
        } else if resolved.absolute.is_dir() {
            let mut walker = WalkBuilder::new(&resolved.absolute);
            walker
                .require_git(false)
                .sort_by_file_name(|left, right| left.cmp(right));
            walker
                .build()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_some_and(|file_type| file_type.is_file()))
                .map(|entry| entry.into_path())
                .collect()
        } else {
            return Err(SandboxError::io(
                "search",
                resolved.relative,
                std::io::Error::from(ErrorKind::NotFound),
            ));
        };

        let mut matches = Vec::new();
        let mut truncated = false;
        'files: for file in files {
            let Ok(metadata) = tokio::fs::metadata(&file).await else {
                continue;
            };
            if metadata.len() > self.read_max_bytes {
                continue;
            }
            let Ok(content) = tokio::fs::read_to_string(&file).await else {
                continue;
            };
            let display = self.workspace.relative_display(&file);
            for (index, line) in content.lines().enumerate() {
                if !regex.is_match(line) {
                    continue;
                }
                if matches.len() >= GREP_MAX_MATCHES {
                    truncated = true;
                    break 'files;
                }
                matches.push(json!({
                    "path": display,
                    "line": index + 1,
                    "text": line.chars().take(GREP_LINE_MAX_CHARS).collect::<String>(),
                }));
            }
        }

        Ok(json!({
            "ok": true,
            "matches": matches,
            "truncated": truncated,
        }))
    }

    async fn write_file(&mut self, raw: &str, content: String) -> Result<Value, SandboxError> {
        let resolved = self.workspace.resolve(raw)?;
        let before = self.existing_content(&resolved).await?;

        if let Some(parent) = resolved.absolute.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|error| {
                SandboxError::io("create parent directories for", &resolved.relative, error)
            })?;
            self.workspace
                .ensure_still_inside(parent, &resolved.relative)?;
        }

        tokio::fs::write(&resolved.absolute, &content)
            .await
            .map_err(|error| SandboxError::io("write", &resolved.relative, error))?;

        self.read_set.mark(resolved.absolute.clone());
        self.notify_write(&resolved.absolute, &content).await;

        let diff = unified_diff(
            &resolved.relative,
            before.as_deref().unwrap_or(""),
            &content,
        );
        Ok(json!({
            "ok": true,
            "path": resolved.relative,
            "created": before.is_none(),
            "before": before,
            "after": content,
            "diff": diff,
        }))
    }

    async fn apply_patch(&mut self, patch: &str) -> Result<Value, SandboxError> {
        if patch.trim().is_empty() {
            return Err(SandboxError::InvalidArguments(
                "apply_patch requires a non-empty patch".to_string(),
            ));
        }

        let parsed = parse_patch(patch)?;

        // Every touched path is confined and read-checked before the patch
        // program runs.
        let mut touched = Vec::with_capacity(parsed.targets.len());
        for target in &parsed.targets {
            let resolved = self.workspace.resolve(&target.path)?;
            let before = self.existing_content(&resolved).await?;
            touched.push((resolved, before));
        }

        run_patch(&self.patch_program, self.workspace.root(), parsed.strip, patch).await?;

        let mut files = Vec::with_capacity(touched.len());
        for (resolved, before) in touched {
            let after = match tokio::fs::read(&resolved.absolute).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(error) if error.kind() == ErrorKind::NotFound => String::new(),
                Err(error) => return Err(SandboxError::io("read", &resolved.relative, error)),
            };
            files.push(json!({
                "path": resolved.relative,
                "diff": unified_diff(&resolved.relative, before.as_deref().unwrap_or(""), &after),
            }));
            self.read_set.mark(resolved.absolute.clone());
            self.notify_write(&resolved.absolute, &after).await;
        }

        Ok(json!({ "ok": true, "files": files }))
    }

    async fn deploy(&self, args: DeployArgs, ctx: ToolContext<'_>) -> Result<Value, SandboxError> {
        let app_id = ctx
            .app_id
            .filter(|app_id| !app_id.trim().is_empty())
            .ok_or(SandboxError::NoLinkedApp)?;

        let changed = self.changed_files().await?;
        let mut files = BTreeMap::new();
        for path in changed {
            let resolved = match self.workspace.resolve(&path.to_string_lossy()) {
                Ok(resolved) => resolved,
                Err(SandboxError::PathViolation(_)) => {
                    tracing::debug!(path = %path.display(), "skipping change outside workspace");
                    continue;
                }
                Err(error) => return Err(error),
            };
            if resolved.absolute.is_dir() {
                continue;
            }
            let content = self.read_text(&resolved).await?;
            files.insert(resolved.relative, content);
        }

        if files.is_empty() {
            return Err(SandboxError::NothingToDeploy);
        }

        let message = args
            .message
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DEPLOY_MESSAGE.to_string());
        let paths: Vec<String> = files.keys().cloned().collect();

        let commit_id = ctx
            .remote
            .commit_files(app_id, files, &message)
            .await
            .map_err(|error| SandboxError::Remote(format!("commit failed: {error:#}")))?;
        let deployment_id = ctx
            .remote
            .trigger_deployment(app_id, &commit_id)
            .await
            .map_err(|error| SandboxError::Remote(format!("deployment failed: {error:#}")))?;

        tracing::info!(app_id, %commit_id, %deployment_id, files = paths.len(), "deployment triggered");

        Ok(json!({
            "ok": true,
            "commitId": commit_id,
            "deploymentId": deployment_id,
            "files": paths,
        }))
    }

    /// Changed paths under the root, as absolute paths.
    async fn changed_files(&self) -> Result<Vec<PathBuf>, SandboxError> {
        let toplevel = self
            .git(&["rev-parse", "--show-toplevel"])
            .await?
            .trim()
            .to_string();
        let status = self
            .git(&["status", "--porcelain", "--untracked-files=all", "-z", "--", "."])
            .await?;

        let toplevel = PathBuf::from(toplevel);
        Ok(parse_porcelain(&status)?
            .into_iter()
            .map(|path| toplevel.join(path))
            .collect())
    }

    async fn git(&self, args: &[&str]) -> Result<String, SandboxError> {
        let output = Command::new(&self.git_program)
            .args(args)
            .current_dir(self.workspace.root())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|error| {
                SandboxError::Subprocess(format!("failed to run {}: {error}", self.git_program))
            })?;

        if !output.status.success() {
            return Err(SandboxError::Subprocess(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Current content of an existing target, enforcing read-before-write.
    /// `None` when the target does not exist yet.
    async fn existing_content(&self, resolved: &ResolvedPath) -> Result<Option<String>, SandboxError> {
        match tokio::fs::metadata(&resolved.absolute).await {
            Ok(metadata) if metadata.is_dir() => {
                Err(SandboxError::IsDirectory(resolved.relative.clone()))
            }
            Ok(_) => {
                if !self.read_set.contains(&resolved.absolute) {
                    return Err(SandboxError::ReadBeforeWrite(resolved.relative.clone()));
                }
                self.read_text(resolved).await.map(Some)
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(SandboxError::io("inspect", &resolved.relative, error)),
        }
    }

    async fn read_text(&self, resolved: &ResolvedPath) -> Result<String, SandboxError> {
        let metadata = tokio::fs::metadata(&resolved.absolute)
            .await
            .map_err(|error| SandboxError::io("read", &resolved.relative, error))?;
        if metadata.is_dir() {
            return Err(SandboxError::IsDirectory(resolved.relative.clone()));
        }
        if metadata.len() > self.read_max_bytes {
            return Err(SandboxError::TooLarge {
                path: resolved.relative.clone(),
                size: metadata.len(),
                limit: self.read_max_bytes,
            });
        }

        let bytes = tokio::fs::read(&resolved.absolute)
            .await
            .map_err(|error| SandboxError::io("read", &resolved.relative, error))?;
        String::from_utf8(bytes).map_err(|_| SandboxError::NotUtf8(resolved.relative.clone()))
    }

    async fn notify_read(&self, path: &Path, content: &str) {
        if let Some(code_intel) = &self.code_intel {
            if let Err(error) = code_intel.did_read(path, content).await {
                tracing::debug!(path = %path.display(), error = %format!("{error:#}"), "code intel read notification failed");
            }
        }
    }

    async fn notify_write(&self, path: &Path, content: &str) {
        if let Some(code_intel) = &self.code_intel {
            if let Err(error) = code_intel.did_write(path, content).await {
                tracing::debug!(path = %path.display(), error = %format!("{error:#}"), "code intel write notification failed");
            }
        }
    }
}

fn parse_arguments(raw: &Value) -> Result<Value, SandboxError> {
    match raw {
        Value::Null => Ok(json!({})),
        Value::String(text) if text.trim().is_empty() => Ok(json!({})),
        Value::String(text) => serde_json::from_str(text).map_err(|error| {
            SandboxError::InvalidArguments(format!("arguments are not valid JSON: {error}"))
        }),
        other => Ok(other.clone()),
    }
}

fn decode<T: DeserializeOwned>(kind: ToolKind, args: Value) -> Result<T, SandboxError> {
    serde_json::from_value(args)
        .map_err(|error| SandboxError::InvalidArguments(format!("{}: {error}", kind.name())))
}

/// Parses `git status --porcelain -z` records into repository-relative paths.
///
/// Deletions are refused because a snapshot cannot express them.
fn parse_porcelain(output: &str) -> Result<Vec<String>, SandboxError> {
    let mut records = output.split('\0').filter(|record| !record.is_empty());
    let mut paths = Vec::new();

    while let Some(record) = records.next() {
        let (Some(status), Some(path)) = (record.get(..2), record.get(3..)) else {
            continue;
        };
        if status.contains('D') {
            return Err(SandboxError::DeletionUnsupported(path.to_string()));
        }
        if status.starts_with('R') || status.starts_with('C') {
            // -z puts the source path of a rename or copy in its own record.
            records.next();
        }
        paths.push(path.to_string());
    }

    Ok(paths)
}
