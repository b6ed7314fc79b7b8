use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::script::{ScriptError, ScriptInput, ScriptKind, ScriptOutcome, ScriptSandbox};

/// 外部进程沙箱
///
/// 每次运行启动一次进程，把 `{kind, source, input}` 以 JSON 写入 stdin，
/// 从 stdout 读取 JSON 形式的 `ScriptOutcome`。非零退出码视为脚本失败。
/// 超过 `timeout` 仍未结束的进程会被杀掉。
#[derive(Debug, Clone)]
pub struct CommandSandbox {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

#[derive(Serialize)]
struct SandboxMessage<'a> {
    kind: ScriptKind,
    source: &'a str,
    input: &'a ScriptInput,
}

impl CommandSandbox {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[async_trait]
impl ScriptSandbox for CommandSandbox {
    async fn run(
        &self,
        kind: ScriptKind,
        source: &str,
        input: &ScriptInput,
    ) -> Result<ScriptOutcome, ScriptError> {
        let message = serde_json::to_vec(&SandboxMessage {
            kind,
            source,
            input,
        })
        .map_err(|e| ScriptError::Runtime(format!("failed to encode sandbox input: {}", e)))?;

        debug!(program = %self.program, kind = %kind, "spawning script sandbox");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // 写 stdin 与读 stdout/stderr 同时进行，避免双向管道写满
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&message).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (fed, output) =
            tokio::time::timeout(self.timeout, async { tokio::join!(feed, child.wait_with_output()) })
                .await
                .map_err(|_| ScriptError::Timeout(self.timeout))?;
        let output = output?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScriptError::Runtime(format!(
                "sandbox exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        match fed {
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                debug!(program = %self.program, "sandbox closed stdin early");
            }
            Err(e) => return Err(e.into()),
            Ok(()) => {}
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ScriptError::MalformedOutput(e.to_string()))
    }
}
