//! Docker backend

use super::{capture, prepare, shell_quote, ExecutionRequest, Runtime};
use crate::classify::{classify, Phase};
use crate::error::SandboxError;
use crate::limits::SandboxConfig;
use crate::outcome::ExecutionOutcome;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Line written to stderr by the in-container script when compilation fails
const COMPILE_MARKER: &str = "__mender_compile_failed__";

/// Runs each program in a throwaway container.
///
/// The container has no network, a read-only root filesystem, capped
/// memory/CPU/pids, and the private working directory mounted at `/code`.
#[derive(Debug)]
pub struct ContainerRuntime {
    config: SandboxConfig,
}

impl ContainerRuntime {
    /// Create runtime with the given limits
    #[inline]
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn docker_args(&self, name: &str, dir: &Path, script: &str) -> Vec<String> {
        let memory = format!("{}m", self.config.memory_mb);
        vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--network".to_string(),
            "none".to_string(),
            "--memory".to_string(),
            memory.clone(),
            "--memory-swap".to_string(),
            memory,
            "--cpus".to_string(),
            self.config.cpus.to_string(),
            "--pids-limit".to_string(),
            "64".to_string(),
            "--read-only".to_string(),
            "--tmpfs".to_string(),
            "/tmp:rw,size=64m".to_string(),
            "-e".to_string(),
            "HOME=/code".to_string(),
            "-v".to_string(),
            format!("{}:/code:rw", dir.display()),
            "-w".to_string(),
            "/code".to_string(),
            self.config.container_image.clone(),
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
        ]
    }

    async fn run_container(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, SandboxError> {
        let started = Instant::now();
        let prepared = prepare(request, self.config.memory_mb).await?;
        let script = container_script(
            prepared.toolchain.compile.as_deref(),
            &prepared.toolchain.run,
        );
        let name = format!("mender-{}", uuid::Uuid::new_v4().simple());

        let mut cmd = Command::new("docker");
        cmd.args(self.docker_args(&name, prepared.dir.path(), &script));
        let budget = request.time_budget + self.config.overhead();
        tracing::debug!(container = %name, language = %request.language, "starting container");

        let mut captured = capture(cmd, budget, self.config.max_output_bytes).await?;
        if captured.timed_out {
            kill_container(&name).await;
        }

        let phase = if captured.stderr.contains(COMPILE_MARKER) {
            captured.stderr = captured
                .stderr
                .lines()
                .filter(|l| l.trim() != COMPILE_MARKER)
                .collect::<Vec<_>>()
                .join("\n");
            Phase::Compile
        } else {
            Phase::Run
        };
        Ok(classify(
            request.language,
            captured.into_raw(phase, started.elapsed()),
        ))
    }
}

#[async_trait::async_trait]
impl Runtime for ContainerRuntime {
    fn name(&self) -> &'static str {
        "container"
    }

    async fn run(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        match self.run_container(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(language = %request.language, error = %e, "container runtime fault");
                ExecutionOutcome::infrastructure_fault(e)
            }
        }
    }
}

/// `sh -c` script: compile (marking failures), then exec the program
fn container_script(compile: Option<&[String]>, run: &[String]) -> String {
    let join = |argv: &[String]| argv.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ");
    match compile {
        Some(compile) => format!(
            "{} || {{ echo {COMPILE_MARKER} >&2; exit 1; }}; exec {}",
            join(compile),
            join(run)
        ),
        None => format!("exec {}", join(run)),
    }
}

/// The docker client dying does not stop the container; kill it by name.
async fn kill_container(name: &str) {
    let kill = Command::new("docker")
        .args(["kill", name])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();
    if tokio::time::timeout(Duration::from_secs(5), kill).await.is_err() {
        tracing::warn!(container = %name, "docker kill did not finish");
    }
}
