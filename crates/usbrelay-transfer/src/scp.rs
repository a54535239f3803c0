//! Secure-copy sink driving the `scp` client (or an `expect` wrapper around it).

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};
use usbrelay_config::ScpSettings;

use crate::error::{TransferError, TransferResult};
use crate::sink::Sink;

const SINK_NAME: &str = "scp";

/// Copies files to a remote host over SSH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpSink {
    script: Option<PathBuf>,
    create_dirs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    program: &'static str,
    args: Vec<OsString>,
}

impl ScpSink {
    /// Build a sink from the configured secure-copy settings.
    #[must_use]
    pub fn new(settings: &ScpSettings) -> Self {
        Self {
            script: settings.script.clone(),
            create_dirs: settings.create_dirs,
        }
    }

    fn copy_invocation(&self, local: &Path, remote: &str) -> Invocation {
        match &self.script {
            Some(script) => Invocation {
                program: "expect",
                args: vec![
                    "-f".into(),
                    script.as_os_str().to_owned(),
                    local.as_os_str().to_owned(),
                    remote.into(),
                ],
            },
            None => Invocation {
                program: "scp",
                args: vec![
                    "-B".into(),
                    "-p".into(),
                    local.as_os_str().to_owned(),
                    remote.into(),
                ],
            },
        }
    }

    fn mkdir_invocation(&self, remote: &str) -> Option<Invocation> {
        if !self.create_dirs {
            return None;
        }
        let (host, path) = split_remote(remote)?;
        let (parent, _) = path.rsplit_once('/')?;
        if parent.is_empty() {
            return None;
        }
        Some(Invocation {
            program: "ssh",
            args: vec![
                "-o".into(),
                "BatchMode=yes".into(),
                host.into(),
                "mkdir".into(),
                "-p".into(),
                parent.into(),
            ],
        })
    }
}

/// Split `host:path` into its parts. Local paths (no colon before the first slash) yield
/// `None`.
fn split_remote(remote: &str) -> Option<(&str, &str)> {
    let (host, path) = remote.split_once(':')?;
    if host.is_empty() || host.contains('/') {
        return None;
    }
    Some((host, path))
}

async fn run(invocation: Invocation) -> TransferResult<()> {
    debug!(program = invocation.program, args = ?invocation.args, "running transfer helper");
    let output = Command::new(invocation.program)
        .args(&invocation.args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| TransferError::Spawn {
            program: invocation.program,
            source,
        })?;
    if output.status.success() {
        return Ok(());
    }
    Err(TransferError::Command {
        program: invocation.program,
        status: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

#[async_trait]
impl Sink for ScpSink {
    fn name(&self) -> &'static str {
        SINK_NAME
    }

    async fn upload(&self, local: &Path, remote: &str) -> TransferResult<()> {
        if let Some(mkdir) = self.mkdir_invocation(remote) {
            run(mkdir).await?;
        }
        run(self.copy_invocation(local, remote)).await?;
        info!(source = %local.display(), destination = remote, "SCP transfer successful");
        Ok(())
    }
}
