//! Out-of-process advisor reached over stdin/stdout
//!
//! Every call spawns the configured command, writes one request, closes stdin
//! and waits for the child to exit with one response on stdout. The wait is
//! bounded by a timeout and interrupted by the caller's cancel token.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::protocol::{AdvisorAction, AdvisorRequest, AdvisorResponse};
use super::{AdvisorConfig, ProtectedOutput, ProtectionProvider};
use crate::cancel::CancelToken;
use crate::error::{InscriptError, Result};
use crate::layers::LayerId;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Kills the child if it is still running when the call unwinds
struct ChildGuard {
    child: Child,
}

impl ChildGuard {
    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            self.kill();
        }
    }
}

/// Advisor bridge that spawns a subprocess per request
#[derive(Debug, Clone)]
pub struct SubprocessAdvisor {
    command: String,
    args: Vec<String>,
    timeout: Duration,
    verify_roundtrip: bool,
}

impl SubprocessAdvisor {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            timeout: Duration::from_millis(super::DEFAULT_TIMEOUT_MS),
            verify_roundtrip: true,
        }
    }

    pub fn from_config(command: &str, config: &AdvisorConfig) -> Self {
        Self::new(command, config.args.clone())
            .with_timeout(Duration::from_millis(config.timeout_ms))
            .with_roundtrip_check(config.verify_roundtrip)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_roundtrip_check(mut self, enabled: bool) -> Self {
        self.verify_roundtrip = enabled;
        self
    }

    /// Run one request/response exchange with a fresh child
    fn exchange(&self, request: &AdvisorRequest, cancel: &CancelToken) -> Result<AdvisorResponse> {
        let body = serde_json::to_vec(request)
            .map_err(|e| InscriptError::bridge(format!("Failed to serialize request: {}", e)))?;

        let child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                InscriptError::bridge(format!("Failed to start advisor {:?}: {}", self.command, e))
            })?;
        let mut guard = ChildGuard { child };

        let mut stdin = guard
            .child
            .stdin
            .take()
            .ok_or_else(|| InscriptError::bridge("Advisor stdin not available"))?;
        let mut stdout = guard
            .child
            .stdout
            .take()
            .ok_or_else(|| InscriptError::bridge("Advisor stdout not available"))?;

        let (write_tx, write_rx) = mpsc::channel();
        thread::spawn(move || {
            let written = stdin.write_all(&body).and_then(|_| stdin.flush());
            drop(stdin);
            let _ = write_tx.send(written);
        });
        let (read_tx, read_rx) = mpsc::channel();
        thread::spawn(move || {
            let mut raw = Vec::new();
            let read = stdout.read_to_end(&mut raw).map(|_| raw);
            let _ = read_tx.send(read);
        });

        // One deadline covers the child's exit and both pipe transfers
        let deadline = Instant::now() + self.timeout;
        let status = self.wait(&mut guard, deadline, cancel)?;
        if !status.success() {
            return Err(InscriptError::bridge(format!("Advisor exited with {}", status)));
        }

        self.receive(&write_rx, deadline, cancel, "request write")?
            .map_err(|e| InscriptError::bridge(format!("Failed to write to advisor: {}", e)))?;
        let raw = self
            .receive(&read_rx, deadline, cancel, "response")?
            .map_err(|e| InscriptError::bridge(format!("Failed to read from advisor: {}", e)))?;

        serde_json::from_slice(&raw)
            .map_err(|e| InscriptError::bridge(format!("Failed to parse advisor response: {}", e)))
    }

    fn wait(&self, guard: &mut ChildGuard, deadline: Instant, cancel: &CancelToken) -> Result<ExitStatus> {
        loop {
            if cancel.is_cancelled() {
                guard.kill();
                return Err(InscriptError::Cancelled {
                    layer: LayerId::Sentinel,
                });
            }
            let polled = guard
                .child
                .try_wait()
                .map_err(|e| InscriptError::bridge(format!("Failed to poll advisor: {}", e)))?;
            if let Some(status) = polled {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                guard.kill();
                return Err(self.timed_out("exit"));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Wait for a pipe thread's result
    ///
    /// A grandchild that inherited the pipe can hold it open after the child
    /// exits; the thread is abandoned once the deadline passes.
    fn receive<T>(
        &self,
        rx: &Receiver<T>,
        deadline: Instant,
        cancel: &CancelToken,
        what: &str,
    ) -> Result<T> {
        loop {
            if cancel.is_cancelled() {
                return Err(InscriptError::Cancelled {
                    layer: LayerId::Sentinel,
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(self.timed_out(what));
            }
            match rx.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
                Ok(value) => return Ok(value),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(InscriptError::bridge(format!(
                        "Advisor {} thread stopped without a result",
                        what
                    )))
                }
            }
        }
    }

    fn timed_out(&self, what: &str) -> InscriptError {
        InscriptError::bridge(format!(
            "Advisor timed out after {}ms waiting for {}",
            self.timeout.as_millis(),
            what
        ))
    }

    fn call(
        &self,
        action: AdvisorAction,
        data: &[u8],
        metadata: &Value,
        cancel: &CancelToken,
    ) -> Result<(Vec<u8>, Value)> {
        let request = AdvisorRequest::new(action, data, metadata.clone());
        let response = self.exchange(&request, cancel)?;
        let payload = response.payload(action)?;
        Ok((payload, response.metadata))
    }
}

impl ProtectionProvider for SubprocessAdvisor {
    fn mode(&self) -> &'static str {
        "subprocess"
    }

    fn is_available(&self) -> bool {
        match self.exchange(&AdvisorRequest::status(), &CancelToken::new()) {
            Ok(response) => response.success,
            Err(e) => {
                tracing::debug!(command = %self.command, error = %e, "advisor status check failed");
                false
            }
        }
    }

    fn protect(&self, data: &[u8], metadata: &Value, cancel: &CancelToken) -> Result<ProtectedOutput> {
        let (protected, response_metadata) =
            self.call(AdvisorAction::Protect, data, metadata, cancel)?;

        if self.verify_roundtrip {
            let (restored, _) =
                self.call(AdvisorAction::Revert, &protected, &response_metadata, cancel)?;
            if restored != data {
                return Err(InscriptError::bridge(
                    "Advisor round-trip check returned different bytes",
                ));
            }
        }

        Ok(ProtectedOutput {
            data: protected,
            metadata: response_metadata,
        })
    }

    fn revert(&self, data: &[u8], metadata: &Value, cancel: &CancelToken) -> Result<Vec<u8>> {
        let (original, _) = self.call(AdvisorAction::Revert, data, metadata, cancel)?;
        Ok(original)
    }
}
