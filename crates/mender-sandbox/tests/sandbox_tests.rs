use mender_sandbox::{
    AdmissionError, Classification, ErrorKind, ExecutionOutcome, ExecutionRequest, Language,
    NetworkPolicy, Runtime, Sandbox, SandboxConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Runtime that sleeps and tracks peak concurrency
struct SlowRuntime {
    delay: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowRuntime {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Runtime for SlowRuntime {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn run(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        ExecutionOutcome::success(request.code.clone())
    }
}

fn python3_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn local_config() -> SandboxConfig {
    SandboxConfig::default()
        .with_timeout_secs(2)
        .with_network(NetworkPolicy::Host)
}

#[tokio::test]
async fn test_admission_limit_never_exceeded() {
    let runtime = Arc::new(SlowRuntime::new(Duration::from_millis(30)));
    let config = SandboxConfig::default().with_max_concurrent(2);
    let sandbox = Arc::new(Sandbox::with_runtime(config, runtime.clone()));

    let mut handles = Vec::new();
    for i in 0..8 {
        let sandbox = Arc::clone(&sandbox);
        handles.push(tokio::spawn(async move {
            sandbox
                .execute(
                    &format!("job {i}"),
                    Language::Python,
                    mender_sandbox::Admission::Queue,
                    None,
                )
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_success());
    }
    assert!(runtime.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(sandbox.pool_stats().admitted, 8);
}

#[tokio::test]
async fn test_execute_once_reports_saturation() {
    let runtime = Arc::new(SlowRuntime::new(Duration::from_millis(300)));
    let config = SandboxConfig::default()
        .with_max_concurrent(1)
        .with_admission_wait_ms(20);
    let sandbox = Arc::new(Sandbox::with_runtime(config, runtime));

    let busy = {
        let sandbox = Arc::clone(&sandbox);
        tokio::spawn(async move { sandbox.execute_once("busy", Language::Python).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = sandbox.execute_once("late", Language::Python).await.unwrap_err();
    assert!(matches!(err, AdmissionError::Saturated { limit: 1, .. }));
    assert!(busy.await.unwrap().is_ok());
}

#[test]
fn test_invalid_config_rejected() {
    assert!(Sandbox::from_config(SandboxConfig::default().with_max_concurrent(0)).is_err());
}

#[tokio::test]
async fn test_python_success_and_failure() {
    if !python3_available() {
        return;
    }
    let sandbox = Sandbox::from_config(local_config()).unwrap();

    let ok = sandbox.execute_once("print('hello')", Language::Python).await.unwrap();
    assert_eq!(ok.classification, Classification::Success);
    assert_eq!(ok.stdout, "hello\n");

    let bad = sandbox
        .execute_once("print(undefined_name)", Language::Python)
        .await
        .unwrap();
    assert_eq!(bad.classification, Classification::Error);
    assert_eq!(bad.error_kind(), Some(ErrorKind::Name));
    assert!(bad.error_message().starts_with("NameError"));
}

#[tokio::test]
async fn test_python_timeout_keeps_partial_output() {
    if !python3_available() {
        return;
    }
    let sandbox = Sandbox::from_config(local_config().with_timeout_secs(1)).unwrap();
    let code = "import time\nprint('tick', flush=True)\nwhile True:\n    time.sleep(0.05)\n";
    let out = sandbox.execute_once(code, Language::Python).await.unwrap();
    assert_eq!(out.classification, Classification::Timeout);
    assert_eq!(out.stdout, "tick\n");
    assert!(out.duration_ms < 5_000);
}

#[tokio::test]
async fn test_concurrent_runs_use_private_directories() {
    if !python3_available() {
        return;
    }
    let sandbox = Arc::new(Sandbox::from_config(local_config()).unwrap());
    let write_then_read = |tag: &'static str| {
        let sandbox = Arc::clone(&sandbox);
        async move {
            let code = format!(
                "import time\nopen('shared.txt', 'w').write('{tag}')\ntime.sleep(0.2)\nprint(open('shared.txt').read())\n"
            );
            sandbox.execute_once(&code, Language::Python).await
        }
    };
    let (a, b) = tokio::join!(write_then_read("alpha"), write_then_read("beta"));
    assert_eq!(a.unwrap().stdout, "alpha\n");
    assert_eq!(b.unwrap().stdout, "beta\n");
}

#[tokio::test]
async fn test_output_is_capped() {
    if !python3_available() {
        return;
    }
    let sandbox =
        Sandbox::from_config(local_config().with_max_output_bytes(64)).unwrap();
    let out = sandbox
        .execute_once("print('x' * 10000)", Language::Python)
        .await
        .unwrap();
    assert!(out.is_success());
    assert!(out.truncated);
    assert_eq!(out.stdout.len(), 64);
}

mod properties {
    use mender_sandbox::classify::analyze_stderr;
    use mender_sandbox::Language;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_stderr_analysis_always_has_message(
            stderr in "[ -~\n]{0,200}",
            exit_code in prop::option::of(0i32..200),
            language in prop::sample::select(Language::ALL.to_vec()),
        ) {
            let (_, message) = analyze_stderr(language, &stderr, exit_code);
            prop_assert!(!message.trim().is_empty());
        }

        #[test]
        fn prop_language_tags_parse_case_insensitively(
            language in prop::sample::select(Language::ALL.to_vec()),
            upper in any::<bool>(),
        ) {
            let tag = if upper {
                language.as_str().to_ascii_uppercase()
            } else {
                language.as_str().to_string()
            };
            prop_assert_eq!(tag.parse::<Language>().unwrap(), language);
        }
    }
}
