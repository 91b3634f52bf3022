//! CommandService — runs a shell script and returns its structured result.
//!
//! The script is always passed as a single string to `sh -c`, i.e. the
//! shell itself performs the splitting. This is deliberate: passing a
//! two-path `rm -rf a b` as one combined argv entry to an `execFile`-style
//! call (no shell) silently treats it as a single path and is a known
//! footgun in the source this system was modeled on. Routing everything
//! through a real shell avoids that class of bug entirely.

use std::process::Stdio;
use std::time::Duration;

use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::proto::command_service_server::CommandService;
use crate::proto::{ExecuteRequest, ExecuteResponse};
use crate::state::SharedState;

pub struct CommandServiceImpl {
    state: SharedState,
}

impl CommandServiceImpl {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl CommandService for CommandServiceImpl {
    async fn execute(&self, request: Request<ExecuteRequest>) -> Result<Response<ExecuteResponse>, Status> {
        let req = request.into_inner();
        let _ = &self.state;

        debug!("executing remote command ({} bytes)", req.script.len());

        let timeout_secs = if req.timeout_secs == 0 { 60 } else { req.timeout_secs };

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&req.script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Status::internal(format!("failed to spawn command: {}", e)))?;

        let output = match tokio::time::timeout(Duration::from_secs(timeout_secs as u64), child.wait_with_output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Status::internal(format!("command failed: {}", e))),
            Err(_) => {
                warn!("remote command timed out after {}s", timeout_secs);
                return Err(Status::deadline_exceeded("command timed out"));
            }
        };

        Ok(Response::new(ExecuteResponse {
            exit_status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostdConfig;
    use crate::state::HostState;
    use std::sync::Arc;

    fn test_state() -> SharedState {
        Arc::new(HostState::new(HostdConfig::default()))
    }

    #[tokio::test]
    async fn executes_a_simple_script() {
        let svc = CommandServiceImpl::new(test_state());
        let resp = svc
            .execute(Request::new(ExecuteRequest { script: "echo hello".to_string(), timeout_secs: 5 }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.exit_status, 0);
        assert_eq!(resp.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn reports_nonzero_exit_status() {
        let svc = CommandServiceImpl::new(test_state());
        let resp = svc
            .execute(Request::new(ExecuteRequest { script: "exit 7".to_string(), timeout_secs: 5 }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.exit_status, 7);
    }
}
