//! Git-backed remote copy of the state file.
//!
//! Every publish works in a fresh clone:
//!
//! ```text
//! <tmp>/repo  <- git clone --branch <branch> <url>
//!                (plain clone + checkout -b when the branch is new)
//!             <- copy state file, git add
//!             <- git commit (skipped when the file is unchanged)
//!             <- git push origin HEAD:<branch>
//! <tmp>       <- removed on every exit path
//! ```
//!
//! Commands run with an explicit working directory and per-command identity
//! (`git -c user.name=..`); neither the process cwd nor any global git config
//! is touched.

use super::{RemoteSync, StoreError};
use crate::config::CommitAuthor;
use crate::utils::{redact_credentials, truncate_for_log};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tempfile::TempDir;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Where and how state commits are published.
#[derive(Debug, Clone)]
pub struct GitRemote {
    pub repo_url: String,
    pub branch: String,
    pub author: CommitAuthor,
    pub message: String,
}

impl RemoteSync for GitRemote {
    #[instrument(level = "info", skip_all, fields(repo = %redact_credentials(&self.repo_url), branch = %self.branch))]
    async fn publish(&self, file: &Path) -> Result<(), StoreError> {
        let session = RemoteRepoSession::clone(&self.repo_url, &self.branch).await?;

        let result = async {
            session.stage(file).await?;
            if session.commit(&self.message, &self.author).await? {
                info!("Committed state update");
            } else {
                info!("State file unchanged; nothing to commit");
            }
            session.push(&self.branch).await
        }
        .await;

        session.close();
        result
    }
}

/// A throwaway clone of the state repository.
///
/// The clone lives inside a [`TempDir`], so it is deleted when the session
/// is closed or dropped, whatever happened in between.
#[derive(Debug)]
pub struct RemoteRepoSession {
    workdir: TempDir,
    repo: PathBuf,
    secrets: Vec<String>,
}

impl RemoteRepoSession {
    /// Clone `branch` of `repo_url` into a new temporary directory.
    ///
    /// A branch the remote does not have yet (including every branch of an
    /// empty repository) is started locally; the first push creates it.
    pub async fn clone(repo_url: &str, branch: &str) -> Result<Self, StoreError> {
        let workdir = tempfile::Builder::new()
            .prefix("news-state-")
            .tempdir()
            .map_err(StoreError::Workspace)?;
        let repo = workdir.path().join("repo");
        let session = Self {
            secrets: secrets_of(repo_url),
            workdir,
            repo,
        };

        let head = format!("refs/heads/{branch}");
        let output = session
            .output(
                "ls-remote",
                session.workdir.path(),
                ["ls-remote", "--exit-code", "--heads", repo_url, head.as_str()].map(OsStr::new),
            )
            .await?;
        let exists = match output.status.code() {
            Some(0) => true,
            Some(2) => false,
            code => return Err(session.failure("ls-remote", code, &output.stderr)),
        };

        if exists {
            session
                .run(
                    "clone",
                    session.workdir.path(),
                    [
                        OsStr::new("clone"),
                        OsStr::new("--quiet"),
                        OsStr::new("--branch"),
                        OsStr::new(branch),
                        OsStr::new("--"),
                        OsStr::new(repo_url),
                        session.repo.as_os_str(),
                    ],
                )
                .await?;
        } else {
            info!(branch, "Branch not on remote yet; starting it locally");
            session
                .run(
                    "clone",
                    session.workdir.path(),
                    [
                        OsStr::new("clone"),
                        OsStr::new("--quiet"),
                        OsStr::new("--"),
                        OsStr::new(repo_url),
                        session.repo.as_os_str(),
                    ],
                )
                .await?;
            session
                .git("checkout", ["checkout", "--quiet", "-b", branch].map(OsStr::new))
                .await?;
        }
        debug!(path = %session.repo.display(), "Cloned state repository");
        Ok(session)
    }

    #[cfg(test)]
    pub(crate) fn path(&self) -> &Path {
        &self.repo
    }

    /// Copy `file` into the clone root and stage it.
    pub async fn stage(&self, file: &Path) -> Result<(), StoreError> {
        let name = file.file_name().ok_or_else(|| StoreError::Io {
            path: file.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file path"),
        })?;
        let dest = self.repo.join(name);
        if let Err(source) = fs::copy(file, &dest).await {
            return Err(StoreError::Io { path: dest, source });
        }

        self.git("add", [OsStr::new("add"), OsStr::new("--"), name])
            .await?;
        Ok(())
    }

    /// Commit whatever is staged. Returns `false` when nothing was staged.
    pub async fn commit(&self, message: &str, author: &CommitAuthor) -> Result<bool, StoreError> {
        let status = Command::new("git")
            .args(["diff", "--cached", "--quiet"])
            .current_dir(&self.repo)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|source| StoreError::Spawn { step: "diff", source })?;
        match status.code() {
            Some(0) => return Ok(false),
            Some(1) => {}
            code => {
                return Err(StoreError::Git {
                    step: "diff",
                    code,
                    stderr: String::new(),
                });
            }
        }

        let name = format!("user.name={}", author.name);
        let email = format!("user.email={}", author.email);
        self.git(
            "commit",
            [
                "-c",
                name.as_str(),
                "-c",
                email.as_str(),
                "commit",
                "--quiet",
                "-m",
                message,
            ]
            .map(OsStr::new),
        )
        .await?;
        Ok(true)
    }

    /// Push the checked-out head to `branch` on `origin`.
    pub async fn push(&self, branch: &str) -> Result<(), StoreError> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        self.git("push", ["push", "--quiet", "origin", refspec.as_str()].map(OsStr::new))
            .await
    }

    /// Delete the working directory, logging (not failing) on error.
    pub fn close(self) {
        let path = self.workdir.path().to_path_buf();
        if let Err(e) = self.workdir.close() {
            warn!(path = %path.display(), error = %e, "Could not remove temporary clone");
        }
    }

    async fn git<'a, I>(&self, step: &'static str, args: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = &'a OsStr>,
    {
        self.run(step, &self.repo, args).await
    }

    async fn run<'a, I>(&self, step: &'static str, cwd: &Path, args: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = &'a OsStr>,
    {
        let output = self.output(step, cwd, args).await?;
        if output.status.success() {
            debug!(step, "git step succeeded");
            return Ok(());
        }
        Err(self.failure(step, output.status.code(), &output.stderr))
    }

    async fn output<'a, I>(&self, step: &'static str, cwd: &Path, args: I) -> Result<Output, StoreError>
    where
        I: IntoIterator<Item = &'a OsStr>,
    {
        Command::new("git")
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| StoreError::Spawn { step, source })
    }

    fn failure(&self, step: &'static str, code: Option<i32>, stderr: &[u8]) -> StoreError {
        let stderr = self.scrub(String::from_utf8_lossy(stderr).trim());
        StoreError::Git {
            step,
            code,
            stderr: truncate_for_log(&stderr, 500),
        }
    }

    fn scrub(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), "***"))
    }
}

/// Credential fragments of `repo_url` that must not leak into error text.
fn secrets_of(repo_url: &str) -> Vec<String> {
    let Ok(url) = Url::parse(repo_url) else {
        return Vec::new();
    };
    [Some(url.username()), url.password()]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
