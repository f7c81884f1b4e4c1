use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::manifest::{Hook, HookStage, HookType};
use crate::utils::{copy_tree, timestamp_suffix};

pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_OUTPUT_IN_ERROR: usize = 2000;

/// Where a hook runs and what it may touch.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub collection_id: String,
    pub work_dir: PathBuf,
    /// The currently installed copy, if any. `backup` hooks snapshot it.
    pub existing_install: Option<PathBuf>,
    /// Directory that receives `backup` hook snapshots.
    pub backup_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Ran { command: String },
    Validated { missing_optional: Vec<String> },
    BackedUp(Option<PathBuf>),
    Confirmed,
}

#[derive(Debug, Clone)]
pub struct HookRunner {
    timeout: Duration,
}

impl Default for HookRunner {
    fn default() -> Self {
        Self::new(DEFAULT_HOOK_TIMEOUT)
    }
}

impl HookRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs the hooks of one stage in order and stops at the first failure.
    ///
    /// Failures are returned as warnings: once files are staged, a broken hook never
    /// undoes the install.
    pub async fn run_stage(&self, stage: HookStage, hooks: &[Hook], ctx: &HookContext) -> Vec<String> {
        if hooks.is_empty() {
            return Vec::new();
        }
        debug!("Running {} {} hook(s) for {}", hooks.len(), stage, ctx.collection_id);

        let mut warnings = Vec::new();
        for (index, hook) in hooks.iter().enumerate() {
            match self.run_hook(hook, ctx).await {
                Ok(HookOutcome::Validated { missing_optional }) if !missing_optional.is_empty() => {
                    warnings.push(format!(
                        "{} hook #{}: optional tool(s) not found: {}",
                        stage,
                        index + 1,
                        missing_optional.join(", ")
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("{} hook #{} failed for {}: {}", stage, index + 1, ctx.collection_id, e);
                    warnings.push(format!("{} hook #{} failed: {}", stage, index + 1, e));
                    break;
                }
            }
        }
        warnings
    }

    pub async fn run_hook(&self, hook: &Hook, ctx: &HookContext) -> Result<HookOutcome> {
        let kind = hook
            .kind()
            .ok_or_else(|| StoreError::HookFailed(format!("unknown hook type '{}'", hook.hook_type)))?;

        match kind {
            HookType::Command => {
                let command = hook
                    .command
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| StoreError::HookFailed("command hook has no command".to_string()))?;
                self.run_command(command, &ctx.work_dir).await?;
                Ok(HookOutcome::Ran {
                    command: command.to_string(),
                })
            }
            HookType::Validate => {
                let mut missing_optional = Vec::new();
                for check in &hook.checks {
                    if which::which(&check.tool).is_ok() {
                        continue;
                    }
                    if check.optional {
                        missing_optional.push(check.tool.clone());
                    } else {
                        return Err(StoreError::HookFailed(format!(
                            "required tool '{}' was not found on PATH",
                            check.tool
                        )));
                    }
                }
                Ok(HookOutcome::Validated { missing_optional })
            }
            HookType::Backup => {
                let Some(existing) = ctx.existing_install.as_deref().filter(|p| p.is_dir()) else {
                    debug!("Nothing to back up for {}", ctx.collection_id);
                    return Ok(HookOutcome::BackedUp(None));
                };
                let target = ctx.backup_dir.join(format!("hook-{}", timestamp_suffix()));
                copy_tree(existing, &target, &[".git/"]).await?;
                info!("Backed up {} to {:?}", ctx.collection_id, target);
                Ok(HookOutcome::BackedUp(Some(target)))
            }
            HookType::Confirm => {
                let message = hook
                    .message
                    .as_deref()
                    .or(hook.description.as_deref())
                    .unwrap_or("continue?");
                info!("Confirmation for {} auto-accepted: {}", ctx.collection_id, message);
                Ok(HookOutcome::Confirmed)
            }
        }
    }

    async fn run_command(&self, command: &str, work_dir: &Path) -> Result<()> {
        debug!("Running hook command in {:?}: {}", work_dir, command);
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StoreError::HookFailed(format!("failed to start '{}': {}", command, e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| StoreError::HookFailed(e.to_string()))?,
            Err(_) => {
                return Err(StoreError::Timeout(format!(
                    "hook '{}' did not finish within {:?}",
                    command, self.timeout
                )))
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if combined.len() > MAX_OUTPUT_IN_ERROR {
            let mut cut = MAX_OUTPUT_IN_ERROR;
            while !combined.is_char_boundary(cut) {
                cut -= 1;
            }
            combined.truncate(cut);
        }
        Err(StoreError::HookFailed(format!(
            "'{}' exited with {}: {}",
            command,
            output.status,
            combined.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ToolCheck;
    use tempfile::TempDir;

    fn ctx(dir: &Path) -> HookContext {
        HookContext {
            collection_id: "alice/devops".to_string(),
            work_dir: dir.to_path_buf(),
            existing_install: None,
            backup_dir: dir.join(".backups"),
        }
    }

    fn command(cmd: &str) -> Hook {
        Hook {
            hook_type: "command".to_string(),
            command: Some(cmd.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_command_runs_in_work_dir() {
        let temp_dir = TempDir::new().unwrap();
        let runner = HookRunner::default();
        runner
            .run_hook(&command("echo ok > marker.txt"), &ctx(temp_dir.path()))
            .await
            .unwrap();
        assert!(temp_dir.path().join("marker.txt").is_file());
    }

    #[tokio::test]
    async fn test_failing_command_stops_stage() {
        let temp_dir = TempDir::new().unwrap();
        let runner = HookRunner::default();
        let hooks = vec![command("exit 3"), command("touch never.txt")];
        let warnings = runner
            .run_stage(HookStage::PostInstall, &hooks, &ctx(temp_dir.path()))
            .await;
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("post_install hook #1 failed"));
        assert!(!temp_dir.path().join("never.txt").exists());
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let runner = HookRunner::new(Duration::from_millis(100));
        let err = runner
            .run_hook(&command("sleep 5"), &ctx(temp_dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_validate_hook_checks_tools() {
        let temp_dir = TempDir::new().unwrap();
        let runner = HookRunner::default();
        let hook = Hook {
            hook_type: "validate".to_string(),
            checks: vec![
                ToolCheck {
                    tool: "sh".to_string(),
                    optional: false,
                },
                ToolCheck {
                    tool: "definitely-not-a-real-tool".to_string(),
                    optional: true,
                },
            ],
            ..Default::default()
        };
        let outcome = runner.run_hook(&hook, &ctx(temp_dir.path())).await.unwrap();
        assert_eq!(
            outcome,
            HookOutcome::Validated {
                missing_optional: vec!["definitely-not-a-real-tool".to_string()]
            }
        );

        let required = Hook {
            hook_type: "validate".to_string(),
            checks: vec![ToolCheck {
                tool: "definitely-not-a-real-tool".to_string(),
                optional: false,
            }],
            ..Default::default()
        };
        assert!(runner.run_hook(&required, &ctx(temp_dir.path())).await.is_err());
    }

    #[tokio::test]
    async fn test_backup_hook_snapshots_existing_install() {
        let temp_dir = TempDir::new().unwrap();
        let existing = temp_dir.path().join("installed");
        tokio::fs::create_dir_all(&existing).await.unwrap();
        tokio::fs::write(existing.join("a.md"), "a").await.unwrap();

        let mut context = ctx(temp_dir.path());
        context.existing_install = Some(existing);
        let hook = Hook {
            hook_type: "backup".to_string(),
            ..Default::default()
        };
        let outcome = HookRunner::default().run_hook(&hook, &context).await.unwrap();
        match outcome {
            HookOutcome::BackedUp(Some(path)) => assert!(path.join("a.md").is_file()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
