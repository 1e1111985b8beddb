use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::SandboxError;

const DEV_NULL: &str = "/dev/null";

/// One file touched by a unified diff, as named by its headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTarget {
    /// Path after stripping the `-p` prefix.
    pub path: String,
    /// Old side is `/dev/null`.
    pub creates: bool,
    /// New side is `/dev/null`.
    pub deletes: bool,
}

/// Header-level view of a unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPatch {
    pub strip: u8,
    pub targets: Vec<PatchTarget>,
}

/// Collects the files a patch touches from its `---`/`+++` header pairs.
///
/// Uses `-p1` when every real header path carries a git style `a/` or `b/`
/// prefix, `-p0` otherwise.
pub fn parse_patch(patch: &str) -> Result<ParsedPatch, SandboxError> {
    let mut pairs = Vec::new();
    let mut pending_old: Option<String> = None;

    for line in patch.lines() {
        if let Some(rest) = line.strip_prefix("--- ") {
            pending_old = Some(header_path(rest));
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(old) = pending_old.take() {
                pairs.push((old, header_path(rest)));
            }
        } else {
            pending_old = None;
        }
    }

    if pairs.is_empty() {
        return Err(SandboxError::InvalidArguments(
            "patch has no ---/+++ file headers".to_string(),
        ));
    }

    let git_prefixed = pairs.iter().all(|(old, new)| {
        let old_ok = old == DEV_NULL || old.starts_with("a/");
        let new_ok = new == DEV_NULL || new.starts_with("b/");
        old_ok && new_ok
    });
    let strip: u8 = if git_prefixed { 1 } else { 0 };

    let mut targets: Vec<PatchTarget> = Vec::new();
    for (old, new) in pairs {
        let creates = old == DEV_NULL;
        let deletes = new == DEV_NULL;
        if creates && deletes {
            return Err(SandboxError::InvalidArguments(
                "patch header has /dev/null on both sides".to_string(),
            ));
        }
        // `patch` edits whichever side exists, so both sides must name the
        // same file.
        let mut named = Vec::with_capacity(2);
        for side in [&old, &new] {
            if side == DEV_NULL {
                continue;
            }
            let path = strip_components(side, strip);
            if path.is_empty() {
                return Err(SandboxError::InvalidArguments(format!(
                    "patch header path {side} is empty after stripping"
                )));
            }
            named.push(path);
        }
        if let [old_path, new_path] = named.as_slice() {
            if old_path != new_path {
                return Err(SandboxError::InvalidArguments(format!(
                    "patch header renames {old_path} to {new_path}; renames are not supported"
                )));
            }
        }
        let Some(path) = named.pop() else {
            continue;
        };
        if !targets.iter().any(|target| target.path == path) {
            targets.push(PatchTarget {
                path,
                creates,
                deletes,
            });
        }
    }

    Ok(ParsedPatch { strip, targets })
}

fn header_path(rest: &str) -> String {
    let path = rest.split('\t').next().unwrap_or(rest).trim_end();
    path.trim_matches('"').to_string()
}

fn strip_components(path: &str, strip: u8) -> String {
    let mut parts = path.split('/').filter(|part| !part.is_empty());
    for _ in 0..strip {
        parts.next();
    }
    parts.collect::<Vec<_>>().join("/")
}

/// Runs the external `patch` program from `root`: a dry run first, so a
/// rejected hunk leaves no partial application, then the real run.
pub async fn run_patch(
    program: &str,
    root: &Path,
    strip: u8,
    patch: &str,
) -> Result<(), SandboxError> {
    invoke(program, root, strip, patch, true).await?;
    invoke(program, root, strip, patch, false).await
}

async fn invoke(
    program: &str,
    root: &Path,
    strip: u8,
    patch: &str,
    dry_run: bool,
) -> Result<(), SandboxError> {
    let mut command = Command::new(program);
    command
        .arg(format!("-p{strip}"))
        .arg("--forward")
        .arg("--batch")
        .current_dir(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if dry_run {
        command.arg("--dry-run");
    }

    let mut child = command
        .spawn()
        .map_err(|error| SandboxError::Subprocess(format!("failed to launch {program}: {error}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(patch.as_bytes())
            .await
            .map_err(|error| SandboxError::Subprocess(format!("failed to feed {program}: {error}")))?;
        if !patch.ends_with('\n') {
            let _ = stdin.write_all(b"\n").await;
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|error| SandboxError::Subprocess(format!("failed waiting for {program}: {error}")))?;

    if output.status.success() {
        return Ok(());
    }

    let mut detail = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !detail.is_empty() {
            detail.push('\n');
        }
        detail.push_str(stderr.trim());
    }
    if detail.is_empty() {
        detail = match output.status.code() {
            Some(code) => format!("{program} exited with code {code}"),
            None => format!("{program} was terminated by a signal"),
        };
    }
    Err(SandboxError::PatchRejected(detail))
}

#[cfg(test)]
mod tests {
    use super::{parse_patch, PatchTarget};

    #[test]
    fn git_prefixed_headers_use_strip_one() {
        let patch = "diff --git a/src/lib.rs b/src/lib.rs\n--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -1 +1 @@\n-a\n+b\n";
        let parsed = parse_patch(patch).expect("parse");
        assert_eq!(parsed.strip, 1);
        assert_eq!(
            parsed.targets,
            vec![PatchTarget {
                path: "src/lib.rs".to_string(),
                creates: false,
                deletes: false,
            }]
        );
    }

    #[test]
    fn plain_headers_use_strip_zero_and_drop_timestamps() {
        let patch = "--- notes.txt\t2024-01-01 00:00:00\n+++ notes.txt\t2024-01-02 00:00:00\n@@ -1 +1 @@\n-a\n+b\n";
        let parsed = parse_patch(patch).expect("parse");
        assert_eq!(parsed.strip, 0);
        assert_eq!(parsed.targets[0].path, "notes.txt");
    }

    #[test]
    fn creation_and_deletion_are_flagged() {
        let patch = concat!(
            "--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1 @@\n+x\n",
            "--- a/old.txt\n+++ /dev/null\n@@ -1 +0,0 @@\n-y\n",
        );
        let parsed = parse_patch(patch).expect("parse");
        assert_eq!(parsed.strip, 1);
        assert!(parsed.targets[0].creates);
        assert_eq!(parsed.targets[1].path, "old.txt");
        assert!(parsed.targets[1].deletes);
    }

    #[test]
    fn mismatched_header_sides_are_rejected() {
        let patch = "--- a/secret.txt\n+++ b/other.txt\n@@ -1 +1 @@\n-a\n+b\n";
        let error = parse_patch(patch).expect_err("rename");
        assert!(error.to_string().contains("secret.txt to other.txt"), "{error}");

        let plain = "--- secret.txt\n+++ other.txt\n@@ -1 +1 @@\n-a\n+b\n";
        assert!(parse_patch(plain).is_err());
    }

    #[test]
    fn patch_without_headers_is_rejected() {
        assert!(parse_patch("@@ -1 +1 @@\n-a\n+b\n").is_err());
    }
}
