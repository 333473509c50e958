use crate::error::SandboxError;
use crate::harness::{self, FAULT_MARK, RESULT_MARK};
use crate::limits::apply_rlimits;
use crate::preflight;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use toolforge_core::{ExecLimits, Outcome};
use tracing::{debug, info};

const OUTPUT_CAP: usize = 256 * 1024;

/// Runs candidate source in a disposable `python3 -I` process: fresh
/// tempdir per call, scrubbed environment, rlimits applied between fork
/// and exec, wall-clock kill from the host side. Nothing survives between
/// invocations.
#[derive(Clone)]
pub struct SandboxExecutor {
    python_bin: String,
}

impl SandboxExecutor {
    /// Interpreter preflight is the isolation check: if it fails, the
    /// caller must abort rather than run candidates unsandboxed.
    pub async fn new() -> Result<Self, SandboxError> {
        let bin =
            std::env::var("TOOLFORGE_PYTHON").unwrap_or_else(|_| "python3".to_string());
        Self::with_python(bin).await
    }

    pub async fn with_python(python_bin: String) -> Result<Self, SandboxError> {
        let version = preflight::check_interpreter(&python_bin).await?;
        info!("Sandbox interpreter ready: {}", version);
        Ok(Self { python_bin })
    }

    pub async fn execute(
        &self,
        source: &str,
        entry_point: &str,
        args: &[serde_json::Value],
        limits: &ExecLimits,
    ) -> Result<Outcome, SandboxError> {
        let workdir = tempfile::TempDir::new()?;
        tokio::fs::write(workdir.path().join("tool.py"), source).await?;
        tokio::fs::write(
            workdir.path().join("runner.py"),
            harness::harness_source(entry_point),
        )
        .await?;
        tokio::fs::write(
            workdir.path().join("input.json"),
            serde_json::to_vec(args)?,
        )
        .await?;

        // Scrubbed environment; PATH is kept so the interpreter resolves
        // the same way it did during preflight.
        let path = std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string());
        let mut cmd = Command::new(&self.python_bin);
        cmd.arg("-I")
            .arg("runner.py")
            .current_dir(workdir.path())
            .env_clear()
            .env("PATH", path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child_limits = *limits;
        // Safety: apply_rlimits only calls setrlimit, which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || apply_rlimits(&child_limits));
        }

        let child = cmd.spawn()?;
        let wall = Duration::from_millis(limits.wallclock_millis);

        let output = match timeout(wall, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                // Dropping the in-flight wait kills the child (kill_on_drop).
                debug!(
                    "Sandboxed {} exceeded {}ms wall clock",
                    entry_point, limits.wallclock_millis
                );
                return Ok(Outcome::TimedOut);
            }
        };

        Ok(classify(&output))
    }
}

#[derive(Deserialize)]
struct FaultPayload {
    kind: String,
    message: String,
}

fn classify(output: &std::process::Output) -> Outcome {
    let stdout_full = String::from_utf8_lossy(&output.stdout);
    let stdout = cap(&stdout_full);

    // The harness emits its marker last; a chatty candidate's own prints
    // come first, so take the rightmost marker.
    let result_at = stdout.rfind(RESULT_MARK);
    let fault_at = stdout.rfind(FAULT_MARK);

    match (result_at, fault_at) {
        (Some(r), None) => {
            let payload = &stdout[r + RESULT_MARK.len()..];
            match serde_json::from_str(payload.trim()) {
                Ok(value) => Outcome::Returned(value),
                Err(_) => Outcome::Faulted {
                    kind: "EncodingError".to_string(),
                    message: "candidate emitted an unparseable result".to_string(),
                },
            }
        }
        (Some(r), f) if f.map(|f| r > f).unwrap_or(true) => {
            let payload = &stdout[r + RESULT_MARK.len()..];
            match serde_json::from_str(payload.trim()) {
                Ok(value) => Outcome::Returned(value),
                Err(_) => Outcome::Faulted {
                    kind: "EncodingError".to_string(),
                    message: "candidate emitted an unparseable result".to_string(),
                },
            }
        }
        (_, Some(f)) => {
            let payload = &stdout[f + FAULT_MARK.len()..];
            match serde_json::from_str::<FaultPayload>(payload.trim()) {
                // The AS rlimit surfaces inside Python as MemoryError.
                Ok(p) if p.kind == "MemoryError" => Outcome::LimitExceeded,
                Ok(p) => Outcome::Faulted {
                    kind: p.kind,
                    message: p.message,
                },
                Err(_) => Outcome::Faulted {
                    kind: "EncodingError".to_string(),
                    message: "candidate emitted an unparseable fault".to_string(),
                },
            }
        }
        (None, None) => classify_exit(output),
    }
}

fn classify_exit(output: &std::process::Output) -> Outcome {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        // SIGXCPU / SIGKILL / SIGSEGV from the rlimit ceilings.
        if output.status.signal().is_some() {
            return Outcome::LimitExceeded;
        }
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if output.status.success() {
        Outcome::Faulted {
            kind: "NoOutput".to_string(),
            message: "candidate produced no result".to_string(),
        }
    } else {
        Outcome::Faulted {
            kind: "ProcessExit".to_string(),
            message: cap(&stderr).trim().to_string(),
        }
    }
}

fn cap(s: &str) -> &str {
    match s.char_indices().nth(OUTPUT_CAP) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
