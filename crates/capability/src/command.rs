//! Subprocess-backed capabilities
//!
//! Each capability runs a configured program with `{placeholder}` arguments.
//! The account secret is handed over through the `BATCHCAST_ACCOUNT_SECRET`
//! environment variable so it never shows up in the process list.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use credential_store::CredentialRecord;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{Authenticator, CapabilityError, Fetcher, Result, TaskParams, Uploader};

/// Environment variable carrying the account secret to login/upload commands.
pub const ACCOUNT_SECRET_ENV: &str = "BATCHCAST_ACCOUNT_SECRET";

/// Maximum stderr bytes kept in a `CommandFailed` error.
const STDERR_TAIL: usize = 512;

/// An external program with placeholder arguments.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Kill the process if it runs longer than this
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    /// Substitute `{name}` placeholders. Unknown placeholders are left as-is.
    ///
    /// Each argument is scanned once, so substituted values are never
    /// expanded again.
    pub fn render_args(&self, vars: &[(String, String)]) -> Vec<String> {
        self.args.iter().map(|arg| render_one(arg, vars)).collect()
    }

    /// Run the program to completion. Non-zero exit is `CommandFailed`.
    pub async fn run(&self, vars: &[(String, String)], envs: &[(&str, &str)]) -> Result<()> {
        let args = self.render_args(vars);

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in envs {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|e| CapabilityError::Launch {
            program: self.program.clone(),
            message: e.to_string(),
        })?;

        let output = match self.timeout_secs {
            Some(secs) => {
                match tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output())
                    .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(program = %self.program, timeout_secs = secs, "command timed out");
                        return Err(CapabilityError::TimedOut {
                            program: self.program.clone(),
                            secs,
                        });
                    }
                }
            }
            None => child.wait_with_output().await,
        }
        .map_err(|e| CapabilityError::Launch {
            program: self.program.clone(),
            message: format!("waiting for process: {e}"),
        })?;

        if output.status.success() {
            debug!(program = %self.program, "command succeeded");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let tail_start = stderr
            .char_indices()
            .rev()
            .nth(STDERR_TAIL.saturating_sub(1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        Err(CapabilityError::CommandFailed {
            program: self.program.clone(),
            status: output.status.to_string(),
            stderr: stderr[tail_start..].to_string(),
        })
    }
}

fn render_one(arg: &str, vars: &[(String, String)]) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            rest = &rest[open..];
            break;
        };
        let name = &after[..close];
        match vars.iter().find(|(key, _)| key == name) {
            Some((_, value)) => out.push_str(value),
            None => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

fn var(name: &str, value: &str) -> (String, String) {
    (name.to_string(), value.to_string())
}

/// Authenticator used when no login command is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuthenticator;

impl Authenticator for NoopAuthenticator {
    fn id(&self) -> &str {
        "noop"
    }

    fn authenticate<'a>(
        &'a self,
        _account: &'a CredentialRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }
}

/// Runs a login command per account. Placeholder: `{account}`.
#[derive(Debug, Clone)]
pub struct CommandAuthenticator {
    command: ExternalCommand,
}

impl CommandAuthenticator {
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

impl Authenticator for CommandAuthenticator {
    fn id(&self) -> &str {
        "command"
    }

    fn authenticate<'a>(
        &'a self,
        account: &'a CredentialRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let vars = [var("account", account.identifier())];
            self.command
                .run(&vars, &[(ACCOUNT_SECRET_ENV, account.secret().expose())])
                .await
        })
    }
}

/// Runs an upload command per account.
///
/// Placeholders: `{account}`, `{resource}`, `{title}` and `{option.<key>}`
/// for every entry in `TaskParams::options`.
#[derive(Debug, Clone)]
pub struct CommandUploader {
    command: ExternalCommand,
}

impl CommandUploader {
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

impl Uploader for CommandUploader {
    fn id(&self) -> &str {
        "command"
    }

    fn upload<'a>(
        &'a self,
        account: &'a CredentialRecord,
        params: &'a TaskParams,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut vars = vec![
                var("account", account.identifier()),
                var("resource", &params.resource),
                var("title", &params.title),
            ];
            vars.extend(
                params
                    .options
                    .iter()
                    .map(|(key, value)| (format!("option.{key}"), value.clone())),
            );
            self.command
                .run(&vars, &[(ACCOUNT_SECRET_ENV, account.secret().expose())])
                .await
        })
    }
}

/// Runs a downloader per resource. Placeholders: `{resource}`, `{output_dir}`.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    command: ExternalCommand,
}

impl CommandFetcher {
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

impl Fetcher for CommandFetcher {
    fn id(&self) -> &str {
        "command"
    }

    fn fetch<'a>(
        &'a self,
        resource: &'a str,
        output_dir: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let output_dir = output_dir.display().to_string();
            let vars = [var("resource", resource), var("output_dir", &output_dir)];
            self.command.run(&vars, &[]).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, extra: &[&str]) -> ExternalCommand {
        let mut args = vec!["-c".to_string(), script.to_string(), "sh".to_string()];
        args.extend(extra.iter().map(|s| s.to_string()));
        ExternalCommand::new("sh", args)
    }

    #[test]
    fn render_args_substitutes_known_placeholders() {
        let command = ExternalCommand::new(
            "twitch-dl",
            vec![
                "download".into(),
                "{resource}".into(),
                "-o".into(),
                "{output_dir}/clips".into(),
                "{unknown}".into(),
            ],
        );
        let rendered = command.render_args(&[
            var("resource", "https://clips.twitch.tv/Abc"),
            var("output_dir", "/tmp/out"),
        ]);
        assert_eq!(
            rendered,
            vec![
                "download",
                "https://clips.twitch.tv/Abc",
                "-o",
                "/tmp/out/clips",
                "{unknown}"
            ]
        );
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let command = ExternalCommand::new(
            "uploader",
            vec![
                "--title={title}".into(),
                "{resource}".into(),
                "--proxy".into(),
                "{option.proxy}".into(),
            ],
        );
        let rendered = command.render_args(&[
            var("resource", "{title}"),
            var("title", "{option.proxy}"),
            var("option.proxy", "socks5://127.0.0.1:1080"),
        ]);
        assert_eq!(
            rendered,
            vec![
                "--title={option.proxy}",
                "{title}",
                "--proxy",
                "socks5://127.0.0.1:1080"
            ]
        );
    }

    #[test]
    fn unbalanced_braces_are_kept_literally() {
        let command = ExternalCommand::new(
            "uploader",
            vec!["{title".into(), "a}{title}{".into(), "{}".into()],
        );
        let rendered = command.render_args(&[var("title", "clip")]);
        assert_eq!(rendered, vec!["{title", "a}clip{", "{}"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_exit_is_success() {
        sh("exit 0", &[]).run(&[], &[]).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_command_failed_with_stderr() {
        let err = sh("echo 'quota reached' >&2; exit 3", &[])
            .run(&[], &[])
            .await
            .unwrap_err();
        match err {
            CapabilityError::CommandFailed { stderr, .. } => assert_eq!(stderr, "quota reached"),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_launch_error() {
        let err = ExternalCommand::new("/nonexistent/batchcast-uploader", vec![])
            .run(&[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Launch { .. }), "got: {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let err = sh("sleep 5", &[])
            .with_timeout(Duration::from_secs(1))
            .run(&[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::TimedOut { secs: 1, .. }), "got: {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn uploader_passes_placeholders_and_secret_env() {
        let uploader = CommandUploader::new(sh(
            r#"test "$1" = acct-1 && test "$2" = "My clip" && test "$3" = private && test "$BATCHCAST_ACCOUNT_SECRET" = pw_1"#,
            &["{account}", "{title}", "{option.visibility}"],
        ));
        let account = CredentialRecord::new("acct-1", "pw_1");
        let mut params = TaskParams {
            resource: "clip.mp4".into(),
            title: "My clip".into(),
            ..TaskParams::default()
        };
        params.options.insert("visibility".into(), "private".into());

        uploader.upload(&account, &params).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn authenticator_failure_propagates() {
        let auth = CommandAuthenticator::new(sh(r#"test "$1" = someone-else"#, &["{account}"]));
        let account = CredentialRecord::new("acct-1", "pw_1");

        let err = auth.authenticate(&account).await.unwrap_err();
        assert!(matches!(err, CapabilityError::CommandFailed { .. }), "got: {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fetcher_writes_into_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = CommandFetcher::new(sh(
            r#"echo data > "$2/$1.bin""#,
            &["{resource}", "{output_dir}"],
        ));

        fetcher.fetch("clip-one", dir.path()).await.unwrap();
        assert!(dir.path().join("clip-one.bin").exists());
    }

    #[tokio::test]
    async fn noop_authenticator_always_succeeds() {
        let account = CredentialRecord::new("acct-1", "pw_1");
        NoopAuthenticator.authenticate(&account).await.unwrap();
    }
}
