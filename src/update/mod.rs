pub mod download;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::UpdateError;

pub use download::{ArtifactFetcher, HttpFetcher};

/// Environment variable the update command sees, pointing at the downloaded artifact.
pub const ARTIFACT_ENV: &str = "UPDATE_ARTIFACT_PATH";

const TEMP_PREFIX: &str = "receiver-update-";

/// A validated `update` command. Building one touches no resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub url: String,
    /// Bare file name, already stripped of any directory components.
    pub filename: String,
    pub command: String,
    pub argv: Vec<String>,
}

impl UpdateRequest {
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, UpdateError> {
        let url = required_str(payload, "url")?;
        let command = required_str(payload, "command")?;
        let filename = required_str(payload, "filename")?;

        let safe_name = sanitize_filename(filename)
            .ok_or_else(|| UpdateError::InvalidFilename(filename.to_string()))?;

        let argv = shlex::split(command)
            .filter(|argv| !argv.is_empty())
            .ok_or_else(|| UpdateError::InvalidCommand(command.to_string()))?;

        Ok(Self {
            url: url.to_string(),
            filename: safe_name.to_string(),
            command: command.to_string(),
            argv,
        })
    }
}

fn required_str<'a>(
    payload: &'a serde_json::Value,
    field: &'static str,
) -> Result<&'a str, UpdateError> {
    payload
        .get(field)
        .and_then(serde_json::Value::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or(UpdateError::MissingField(field))
}

/// Reduce a sender-supplied name to its final path component.
///
/// Both `/` and `\` count as separators so a Windows-style path cannot smuggle
/// directories through on Unix. Returns `None` when nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<&str> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    match base {
        "" | "." | ".." => None,
        _ if base.contains('\0') => None,
        _ => Some(base),
    }
}

/// Runs update commands in throwaway directories under `work_root`.
pub struct UpdateHandler {
    fetcher: Arc<dyn ArtifactFetcher>,
    work_root: PathBuf,
}

impl UpdateHandler {
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            work_root: work_root.into(),
        }
    }

    /// Download the artifact, run the command against it, and remove the
    /// scratch directory whatever the result.
    pub async fn apply(&self, request: &UpdateRequest) -> Result<(), UpdateError> {
        let workdir = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(&self.work_root)
            .map_err(UpdateError::TempDir)?;
        let dir = workdir.path().to_path_buf();

        let result = self.download_and_run(request, &dir).await;

        match workdir.close() {
            Ok(()) => debug!("Removed temporary artifact directory {}", dir.display()),
            Err(e) => warn!(
                "Could not remove temporary artifact directory {}: {}",
                dir.display(),
                e
            ),
        }
        result
    }

    async fn download_and_run(&self, request: &UpdateRequest, dir: &Path) -> Result<(), UpdateError> {
        let artifact = dir.join(&request.filename);
        if artifact.parent() != Some(dir) {
            return Err(UpdateError::InvalidFilename(request.filename.clone()));
        }

        let bytes = self
            .fetcher
            .fetch(&request.url, &artifact)
            .await
            .map_err(|reason| UpdateError::Download {
                url: request.url.clone(),
                reason,
            })?;
        info!(
            "Downloaded update artifact to {} ({} bytes)",
            artifact.display(),
            bytes
        );

        let Some((program, args)) = request.argv.split_first() else {
            return Err(UpdateError::InvalidCommand(request.command.clone()));
        };
        let status = Command::new(program)
            .args(args)
            .current_dir(dir)
            .env(ARTIFACT_ENV, &artifact)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| UpdateError::Command {
                command: request.command.clone(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(UpdateError::Command {
                command: request.command.clone(),
                reason: format!("exited with {status}"),
            });
        }

        info!("Executed update command: {}", request.command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct StaticFetcher {
        body: Result<Vec<u8>, String>,
        seen: Mutex<Vec<PathBuf>>,
    }

    impl StaticFetcher {
        fn serving(body: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                body: Ok(body.to_vec()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(reason: &str) -> Arc<Self> {
            Arc::new(Self {
                body: Err(reason.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ArtifactFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str, dest: &Path) -> Result<u64, String> {
            self.seen.lock().unwrap().push(dest.to_path_buf());
            let body = self.body.clone()?;
            std::fs::write(dest, &body).map_err(|e| e.to_string())?;
            Ok(body.len() as u64)
        }
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    fn request(filename: &str, command: &str) -> UpdateRequest {
        UpdateRequest::from_payload(&json!({
            "action": "update",
            "url": "https://example.com/artifact",
            "filename": filename,
            "command": command,
        }))
        .unwrap()
    }

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_filename("x.py"), Some("x.py"));
        assert_eq!(sanitize_filename("../../etc/passwd"), Some("passwd"));
        assert_eq!(sanitize_filename("/abs/path/tool.sh"), Some("tool.sh"));
        assert_eq!(sanitize_filename("..\\..\\evil.bat"), Some("evil.bat"));
    }

    #[test]
    fn sanitize_rejects_empty_and_dot_names() {
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename("dir/"), None);
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename("a/."), None);
        assert_eq!(sanitize_filename("bad\0name"), None);
    }

    #[test]
    fn request_requires_each_field() {
        for field in ["url", "command", "filename"] {
            let mut payload = json!({
                "action": "update",
                "url": "https://example.com/a",
                "filename": "a.py",
                "command": "python a.py",
            });
            payload.as_object_mut().unwrap().remove(field);
            let err = UpdateRequest::from_payload(&payload).unwrap_err();
            assert!(matches!(err, UpdateError::MissingField(f) if f == field));
        }
    }

    #[test]
    fn request_rejects_non_string_and_blank_fields() {
        let payload = json!({"action": "update", "url": 5, "filename": "a", "command": "ls"});
        assert!(matches!(
            UpdateRequest::from_payload(&payload),
            Err(UpdateError::MissingField("url"))
        ));
        let payload = json!({"action": "update", "url": "u", "filename": "a", "command": "  "});
        assert!(matches!(
            UpdateRequest::from_payload(&payload),
            Err(UpdateError::MissingField("command"))
        ));
    }

    #[test]
    fn request_splits_command_like_a_shell() {
        let req = request("x.py", "python 'my script.py' --flag");
        assert_eq!(req.argv, vec!["python", "my script.py", "--flag"]);

        let payload = json!({"action": "update", "url": "u", "filename": "a", "command": "echo \"open"});
        assert!(matches!(
            UpdateRequest::from_payload(&payload),
            Err(UpdateError::InvalidCommand(_))
        ));
    }

    #[tokio::test]
    async fn traversal_filename_stays_inside_temp_dir() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher::serving(b"data");
        let handler = UpdateHandler::new(fetcher.clone(), root.path());

        handler.apply(&request("../../etc/passwd", "true")).await.unwrap();

        let seen = fetcher.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        let dest = &seen[0];
        assert_eq!(dest.file_name().unwrap(), "passwd");
        let parent = dest.parent().unwrap();
        assert_eq!(parent.parent().unwrap(), root.path());
        assert!(parent.file_name().unwrap().to_string_lossy().starts_with(TEMP_PREFIX));
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn command_sees_artifact_path_and_runs_in_temp_dir() {
        let root = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let handler = UpdateHandler::new(StaticFetcher::serving(b"print('hi')"), root.path());

        let command = format!(
            "sh -c 'cat \"$UPDATE_ARTIFACT_PATH\" > {out}/content; echo \"$UPDATE_ARTIFACT_PATH\" > {out}/path; pwd > {out}/cwd'",
            out = out.path().display()
        );
        handler.apply(&request("x.py", &command)).await.unwrap();

        let content = std::fs::read_to_string(out.path().join("content")).unwrap();
        assert_eq!(content, "print('hi')");
        let path = std::fs::read_to_string(out.path().join("path")).unwrap();
        let cwd = std::fs::read_to_string(out.path().join("cwd")).unwrap();
        assert_eq!(PathBuf::from(path.trim()), PathBuf::from(cwd.trim()).join("x.py"));
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn download_failure_skips_command_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let marker = out.path().join("ran");
        let handler = UpdateHandler::new(StaticFetcher::failing("404 Not Found"), root.path());

        let err = handler
            .apply(&request("a.sh", &format!("touch {}", marker.display())))
            .await
            .unwrap_err();

        assert!(matches!(err, UpdateError::Download { ref reason, .. } if reason == "404 Not Found"));
        assert!(!marker.exists());
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_and_cleaned_up() {
        let root = tempfile::tempdir().unwrap();
        let handler = UpdateHandler::new(StaticFetcher::serving(b"x"), root.path());

        let err = handler.apply(&request("a.sh", "sh -c 'exit 3'")).await.unwrap_err();

        assert!(matches!(err, UpdateError::Command { .. }));
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn missing_program_is_reported_and_cleaned_up() {
        let root = tempfile::tempdir().unwrap();
        let handler = UpdateHandler::new(StaticFetcher::serving(b"x"), root.path());

        let err = handler
            .apply(&request("a.sh", "no-such-program-for-update-tests"))
            .await
            .unwrap_err();

        assert!(matches!(err, UpdateError::Command { .. }));
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn missing_work_root_fails_before_download() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher::serving(b"x");
        let handler = UpdateHandler::new(fetcher.clone(), root.path().join("absent"));

        let err = handler.apply(&request("a.sh", "true")).await.unwrap_err();

        assert!(matches!(err, UpdateError::TempDir(_)));
        assert!(fetcher.seen.lock().unwrap().is_empty());
    }
}
