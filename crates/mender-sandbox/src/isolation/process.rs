//! Local process backend

use super::{capture, prepare, shell_quote, ExecutionRequest, Runtime};
use crate::classify::{classify, Phase};
use crate::error::SandboxError;
use crate::limits::{NetworkPolicy, SandboxConfig};
use crate::outcome::ExecutionOutcome;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::OnceCell;

/// `ulimit -f` ceiling, in 512-byte blocks
const FILE_SIZE_BLOCKS: u64 = 65_536;

/// Fallback when the host has no `PATH`
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Runs programs with the host toolchains.
///
/// Each run gets a private temp dir as cwd and `HOME`, a cleared
/// environment, CPU/file-size/address-space rlimits applied through
/// `ulimit`, and its own process group so stragglers are reaped. With
/// [`NetworkPolicy::Deny`] the program runs in a fresh user+network
/// namespace via `unshare` when the host allows it.
#[derive(Debug)]
pub struct ProcessRuntime {
    config: SandboxConfig,
    unshare: OnceCell<bool>,
}

/// Resource limits applied to one step
struct StepLimits {
    cpu_secs: u64,
    memory_kb: Option<u64>,
    isolate_network: bool,
}

impl ProcessRuntime {
    /// Create runtime with the given limits
    #[inline]
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            unshare: OnceCell::new(),
        }
    }

    async fn network_isolation(&self) -> bool {
        if self.config.network == NetworkPolicy::Host {
            return false;
        }
        *self.unshare.get_or_init(probe_unshare).await
    }

    fn command(&self, dir: &Path, argv: &[String], limits: &StepLimits) -> Command {
        let mut script = format!(
            "ulimit -t {}; ulimit -f {FILE_SIZE_BLOCKS}",
            limits.cpu_secs
        );
        if let Some(kb) = limits.memory_kb {
            script.push_str(&format!("; ulimit -v {kb}"));
        }
        script.push_str("; exec \"$@\"");

        let mut cmd = if limits.isolate_network {
            let mut cmd = Command::new("unshare");
            cmd.args(["--user", "--map-root-user", "--net", "sh"]);
            cmd
        } else {
            Command::new("sh")
        };
        cmd.arg("-c").arg(script).arg("sh").args(argv);

        let path = std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        cmd.current_dir(dir)
            .env_clear()
            .env("PATH", path)
            .env("HOME", dir)
            .env("TMPDIR", dir)
            .env("LANG", "C.UTF-8")
            .env("PYTHONDONTWRITEBYTECODE", "1");
        cmd
    }

    async fn run_steps(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, SandboxError> {
        let started = Instant::now();
        let prepared = prepare(request, self.config.memory_mb).await?;
        let isolate_network = self.network_isolation().await;
        let dir = prepared.dir.path();
        let max_output = self.config.max_output_bytes;

        if let Some(compile) = &prepared.toolchain.compile {
            let budget = self.config.overhead();
            let limits = StepLimits {
                cpu_secs: cpu_seconds(budget),
                memory_kb: None,
                isolate_network,
            };
            tracing::debug!(language = %request.language, command = %shell_line(compile), "compiling");
            let captured = capture(self.command(dir, compile, &limits), budget, max_output).await?;
            if captured.timed_out || captured.exit_code != Some(0) {
                return Ok(classify(
                    request.language,
                    captured.into_raw(Phase::Compile, started.elapsed()),
                ));
            }
        }

        let limits = StepLimits {
            cpu_secs: cpu_seconds(request.time_budget),
            memory_kb: prepared
                .toolchain
                .address_limit
                .then_some(self.config.memory_mb * 1024),
            isolate_network,
        };
        let run = &prepared.toolchain.run;
        tracing::debug!(language = %request.language, command = %shell_line(run), "running");
        let captured = capture(self.command(dir, run, &limits), request.time_budget, max_output).await?;
        Ok(classify(
            request.language,
            captured.into_raw(Phase::Run, started.elapsed()),
        ))
    }
}

#[async_trait::async_trait]
impl Runtime for ProcessRuntime {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn run(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        match self.run_steps(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(language = %request.language, error = %e, "process runtime fault");
                ExecutionOutcome::infrastructure_fault(e)
            }
        }
    }
}

fn cpu_seconds(budget: Duration) -> u64 {
    budget.as_secs() + 1
}

fn shell_line(argv: &[String]) -> String {
    argv.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ")
}

async fn probe_unshare() -> bool {
    let probe = Command::new("unshare")
        .args(["--user", "--map-root-user", "--net", "true"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();
    let available = matches!(
        tokio::time::timeout(Duration::from_secs(2), probe).await,
        Ok(Ok(status)) if status.success()
    );
    if !available {
        tracing::warn!("unshare unavailable; programs will run without network isolation");
    }
    available
}
