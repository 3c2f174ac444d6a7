//! Compiler sysroot discovery with an explicit retry policy.

use std::path::PathBuf;

use crate::config::ToolchainConfig;
use crate::env::Environment;
use crate::error::ProvisionError;
use crate::runner::{CommandRunner, Invocation};

/// Which compiler to ask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SysrootCommand {
    /// `<manager> run <channel> rustc --print sysroot`
    ViaManager(ToolchainConfig),
    /// `rustc --print sysroot` from the search path.
    Bare,
}

impl SysrootCommand {
    fn invocation(&self) -> Invocation {
        match self {
            Self::ViaManager(config) => config.manager.invocation([
                "run",
                config.channel.as_str(),
                "rustc",
                "--print",
                "sysroot",
            ]),
            Self::Bare => Invocation::new("rustc").args(["--print", "sysroot"]),
        }
    }
}

/// One way of changing the environment before another sysroot attempt.
pub trait RetryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Adjust `env` for the next attempt. Returns false when there is nothing
    /// to change, in which case the attempt is skipped.
    fn prepare(&self, env: &mut Environment) -> bool;
}

/// Prepends the user-local cargo binary directory (`~/.cargo/bin`) to `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtendSearchPath;

impl RetryStrategy for ExtendSearchPath {
    fn name(&self) -> &'static str {
        "extend PATH with ~/.cargo/bin"
    }

    fn prepare(&self, env: &mut Environment) -> bool {
        let Some(home) = env.home_dir() else {
            return false;
        };
        let bin = home.join(".cargo").join("bin");
        env.prepend_path("PATH", &bin.to_string_lossy());
        true
    }
}

/// Ordered retry strategies; each is tried at most once, after the previous
/// attempt has finished.
pub struct RetryPolicy {
    strategies: Vec<Box<dyn RetryStrategy>>,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    #[must_use]
    pub fn then(mut self, strategy: impl RetryStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none().then(ExtendSearchPath)
    }
}

/// A sysroot together with the environment that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sysroot {
    pub path: PathBuf,
    /// Includes any changes a retry strategy made.
    pub env: Environment,
}

pub struct SysrootResolver<'a> {
    runner: &'a dyn CommandRunner,
    command: SysrootCommand,
    policy: RetryPolicy,
}

impl<'a> SysrootResolver<'a> {
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner, command: SysrootCommand) -> Self {
        Self {
            runner,
            command,
            policy: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Query the sysroot under `env`, then once per retry strategy.
    ///
    /// On success the returned environment carries the retry's changes; on
    /// failure the caller's `env` is untouched and the last error is returned.
    pub async fn resolve(&self, env: &Environment) -> Result<Sysroot, ProvisionError> {
        let mut last_err = match self.query(env).await {
            Ok(path) => {
                return Ok(Sysroot {
                    path,
                    env: env.clone(),
                });
            }
            Err(e) => e,
        };

        let mut attempt_env = env.clone();
        for strategy in &self.policy.strategies {
            tracing::warn!("{last_err}; retrying with strategy: {}", strategy.name());
            if !strategy.prepare(&mut attempt_env) {
                continue;
            }
            match self.query(&attempt_env).await {
                Ok(path) => {
                    return Ok(Sysroot {
                        path,
                        env: attempt_env,
                    });
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    async fn query(&self, env: &Environment) -> Result<PathBuf, ProvisionError> {
        let inv = self.command.invocation().env(env.clone());
        let output =
            self.runner
                .run(&inv)
                .await
                .map_err(|e| ProvisionError::SysrootUnavailable {
                    reason: e.to_string(),
                })?;
        let sysroot = output.stdout.trim_end_matches(['\n', '\r']);
        if sysroot.is_empty() {
            return Err(ProvisionError::SysrootUnavailable {
                reason: "got no output".to_string(),
            });
        }
        Ok(PathBuf::from(sysroot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Manager;
    use crate::testing::{Reply, ScriptedRunner};

    fn env() -> Environment {
        Environment::from_pairs([("HOME", "/home/ferris"), ("PATH", "/usr/bin")])
    }

    fn via_manager() -> SysrootCommand {
        SysrootCommand::ViaManager(ToolchainConfig::new("nightly", Manager::default()))
    }

    #[tokio::test]
    async fn first_attempt_success_keeps_environment() {
        let runner = ScriptedRunner::new();
        runner.on(&["run"], Reply::ok("/home/ferris/.rustup/toolchains/nightly\n"));
        let resolver = SysrootResolver::new(&runner, via_manager());

        let sysroot = resolver.resolve(&env()).await.unwrap();
        assert_eq!(
            sysroot.path,
            PathBuf::from("/home/ferris/.rustup/toolchains/nightly")
        );
        assert_eq!(sysroot.env, env());
        assert_eq!(
            runner.calls()[0].command_line(),
            "rustup run nightly rustc --print sysroot"
        );
    }

    #[tokio::test]
    async fn trims_carriage_return_and_newline() {
        let runner = ScriptedRunner::new();
        runner.on(&["--print", "sysroot"], Reply::ok("C:\\rust\\sysroot\r\n"));
        let resolver = SysrootResolver::new(&runner, SysrootCommand::Bare);
        let sysroot = resolver.resolve(&env()).await.unwrap();
        assert_eq!(sysroot.path, PathBuf::from("C:\\rust\\sysroot"));
    }

    #[tokio::test]
    async fn second_attempt_result_wins_after_path_extension() {
        let runner = ScriptedRunner::new();
        runner.on(&["run"], Reply::not_found());
        runner.on(&["run"], Reply::ok("/opt/sysroot\n"));
        let resolver = SysrootResolver::new(&runner, via_manager());

        let sysroot = resolver.resolve(&env()).await.unwrap();
        assert_eq!(sysroot.path, PathBuf::from("/opt/sysroot"));

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        let retried_path = calls[1].environment().unwrap().get("PATH").unwrap();
        assert!(
            retried_path.starts_with("/home/ferris/.cargo/bin"),
            "PATH was {retried_path}"
        );
        assert_eq!(
            sysroot.env.get("PATH"),
            Some(retried_path),
            "extended PATH is kept for the server"
        );
    }

    #[tokio::test]
    async fn retries_exactly_once_then_fails() {
        let runner = ScriptedRunner::new();
        runner.on(&["run"], Reply::fail("error: toolchain 'nightly' is not installed"));
        let resolver = SysrootResolver::new(&runner, via_manager());

        let err = resolver.resolve(&env()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::SysrootUnavailable { .. }));
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn empty_output_is_unavailable() {
        let runner = ScriptedRunner::new();
        runner.on(&["--print"], Reply::ok("\n"));
        let resolver =
            SysrootResolver::new(&runner, SysrootCommand::Bare).with_policy(RetryPolicy::none());
        let err = resolver.resolve(&env()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not get sysroot from `rustc`: got no output"
        );
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn default_policy_has_one_strategy() {
        assert_eq!(RetryPolicy::default().len(), 1);
        assert!(RetryPolicy::none().is_empty());
    }
}
