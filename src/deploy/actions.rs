//! Concrete step actions.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::error::{EdgeshipError, Result};

use super::runner::{CommandRunner, Invocation};
use super::secrets::{live_entries, materialize, merge_into_file};
use super::step::{ActionOutcome, StepAction, StepKind};

async fn run_checked(
    runner: &dyn CommandRunner,
    kind: StepKind,
    invocation: &Invocation,
) -> Result<()> {
    let failed = |source| EdgeshipError::Process {
        step: kind.to_string(),
        source,
    };
    runner
        .run(invocation)
        .await
        .map_err(failed)?
        .check(&invocation.program)
        .map_err(failed)?;
    Ok(())
}

/// Clones the template repository, or fast-forwards an existing checkout.
#[derive(Debug, Clone)]
pub struct TemplateSync {
    /// Source-control program.
    pub git: String,
    /// Repository location.
    pub repo_url: String,
    /// Checkout directory.
    pub dir: PathBuf,
}

impl TemplateSync {
    /// The invocation appropriate for the current checkout state.
    #[must_use]
    pub fn invocation(&self) -> Invocation {
        if self.dir.join(".git").exists() {
            Invocation::new(&self.git)
                .arg("-C")
                .arg(self.dir.to_string_lossy())
                .args(["pull", "--ff-only"])
        } else {
            Invocation::new(&self.git)
                .args(["clone", "--depth", "1"])
                .arg(&self.repo_url)
                .arg(self.dir.to_string_lossy())
        }
    }
}

#[async_trait]
impl StepAction for TemplateSync {
    async fn run(&self, runner: &dyn CommandRunner) -> Result<ActionOutcome> {
        let invocation = self.invocation();
        info!("Syncing templates: {invocation}");
        run_checked(runner, StepKind::TemplateSync, &invocation).await?;
        Ok(ActionOutcome::Done)
    }
}

/// Runs a configured command line, such as the build or the deploy.
#[derive(Debug, Clone)]
pub struct CommandAction {
    /// Step the command belongs to.
    pub kind: StepKind,
    /// Program and arguments.
    pub command: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Environment overrides.
    pub env: BTreeMap<String, String>,
}

impl CommandAction {
    /// Creates an action with no environment overrides.
    #[must_use]
    pub fn new(kind: StepKind, command: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            command,
            cwd: cwd.into(),
            env: BTreeMap::new(),
        }
    }

    /// Adds an environment override.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn invocation(&self) -> Result<Invocation> {
        let invocation = Invocation::from_command(&self.command).ok_or_else(|| {
            EdgeshipError::internal(format!("No command configured for step '{}'", self.kind))
        })?;
        Ok(self
            .env
            .iter()
            .fold(invocation.current_dir(&self.cwd), |inv, (k, v)| inv.env(k, v)))
    }
}

#[async_trait]
impl StepAction for CommandAction {
    async fn run(&self, runner: &dyn CommandRunner) -> Result<ActionOutcome> {
        let invocation = self.invocation()?;
        info!("Running {}: {invocation}", self.kind);
        run_checked(runner, self.kind, &invocation).await?;
        Ok(ActionOutcome::Done)
    }
}

/// Materializes the secrets file if needed and uploads its live entries.
#[derive(Debug, Clone)]
pub struct SecretSync {
    /// Upload command; the file path is appended.
    pub command: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Secrets file.
    pub path: PathBuf,
    /// Values available for generation.
    pub values: BTreeMap<String, String>,
    /// Names written to a generated file.
    pub allow_list: Vec<String>,
    /// Values obtained during the run; merged into the file even when it
    /// already exists.
    pub overrides: BTreeMap<String, String>,
    /// Environment overrides for the upload.
    pub env: BTreeMap<String, String>,
}

#[async_trait]
impl StepAction for SecretSync {
    async fn run(&self, runner: &dyn CommandRunner) -> Result<ActionOutcome> {
        let allow_list: Vec<&str> = self.allow_list.iter().map(String::as_str).collect();
        materialize(&self.path, &self.values, &allow_list).await?;
        if !self.overrides.is_empty() {
            merge_into_file(&self.path, &self.overrides).await?;
        }

        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| EdgeshipError::Secrets {
                path: self.path.clone(),
                source,
            })?;
        let live = live_entries(&text).len();
        if live == 0 {
            return Ok(ActionOutcome::Skipped(format!(
                "{} has no live entries",
                self.path.display()
            )));
        }

        let mut command = self.command.clone();
        command.push(self.path.to_string_lossy().into_owned());
        let upload = CommandAction {
            kind: StepKind::SecretSync,
            command,
            cwd: self.cwd.clone(),
            env: self.env.clone(),
        };
        info!("Uploading {live} secret(s)");
        upload.run(runner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::testing::RecordingRunner;
    use crate::error::ProcessError;
    use tempfile::TempDir;

    fn words(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_template_sync_clones_then_pulls() {
        let temp = TempDir::new().expect("temp dir");
        let sync = TemplateSync {
            git: String::from("git"),
            repo_url: String::from("https://example.com/templates.git"),
            dir: temp.path().join("templates"),
        };
        let runner = RecordingRunner::default();

        sync.run(&runner).await.expect("clone");
        std::fs::create_dir_all(sync.dir.join(".git")).expect("mkdir");
        sync.run(&runner).await.expect("pull");

        let calls = runner.calls();
        assert!(calls[0].starts_with("git clone --depth 1 https://example.com/templates.git"));
        assert!(calls[1].starts_with("git -C "));
        assert!(calls[1].ends_with("pull --ff-only"));
    }

    #[tokio::test]
    async fn test_command_failure_carries_exit_details() {
        let runner = RecordingRunner::default().failing("npm run build");
        let action = CommandAction::new(StepKind::Build, words(&["npm", "run", "build"]), ".");
        let err = action.run(&runner).await.expect_err("should fail");
        assert!(matches!(
            err,
            EdgeshipError::Process {
                ref step,
                source: ProcessError::Exit { code: Some(1), .. },
            } if step == "build"
        ));
    }

    #[tokio::test]
    async fn test_deploy_receives_env_overrides() {
        let runner = RecordingRunner::default();
        CommandAction::new(StepKind::Deploy, words(&["npx", "wrangler", "deploy"]), "/srv")
            .with_env("CLOUDFLARE_ACCOUNT_ID", "acct123")
            .run(&runner)
            .await
            .expect("deploy");
        let invocation = runner.invocations().pop().expect("one call");
        assert_eq!(invocation.env["CLOUDFLARE_ACCOUNT_ID"], "acct123");
        assert_eq!(invocation.cwd, Some(PathBuf::from("/srv")));
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let runner = RecordingRunner::default();
        let action = CommandAction::new(StepKind::Build, Vec::new(), ".");
        assert!(matches!(
            action.run(&runner).await,
            Err(EdgeshipError::Internal(_))
        ));
    }

    fn secret_sync(dir: &TempDir, values: BTreeMap<String, String>) -> SecretSync {
        SecretSync {
            command: words(&["npx", "wrangler", "secret", "bulk"]),
            cwd: dir.path().to_path_buf(),
            path: dir.path().join(".dev.vars"),
            values,
            allow_list: words(&["GITHUB_TOKEN", "SESSION_SECRET"]),
            overrides: BTreeMap::new(),
            env: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_secret_sync_merges_overrides_into_existing_file() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join(".dev.vars");
        std::fs::write(&path, "# SESSION_SECRET=\"change-me\"\n").expect("write");
        let runner = RecordingRunner::default();

        let mut sync = secret_sync(&temp, BTreeMap::new());
        sync.overrides = BTreeMap::from([(String::from("SESSION_SECRET"), String::from("s3"))]);
        let outcome = sync.run(&runner).await.expect("sync");

        assert_eq!(outcome, ActionOutcome::Done);
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(
            std::fs::read_to_string(&path).expect("read"),
            "SESSION_SECRET=\"s3\"\n"
        );
    }

    #[tokio::test]
    async fn test_secret_sync_generates_and_uploads() {
        let temp = TempDir::new().expect("temp dir");
        let values = BTreeMap::from([(String::from("GITHUB_TOKEN"), String::from("ghp_live"))]);
        let runner = RecordingRunner::default();

        let outcome = secret_sync(&temp, values).run(&runner).await.expect("sync");
        assert_eq!(outcome, ActionOutcome::Done);
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("npx wrangler secret bulk "));
        assert!(calls[0].ends_with(".dev.vars"));
    }

    #[tokio::test]
    async fn test_secret_sync_skips_without_live_entries() {
        let temp = TempDir::new().expect("temp dir");
        let runner = RecordingRunner::default();

        let outcome = secret_sync(&temp, BTreeMap::new())
            .run(&runner)
            .await
            .expect("sync");
        assert!(matches!(outcome, ActionOutcome::Skipped(_)));
        assert!(runner.calls().is_empty());
        assert!(temp.path().join(".dev.vars").exists());
    }
}
