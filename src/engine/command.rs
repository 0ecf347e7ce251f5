//! Engine backed by an external bridge program.
//!
//! The program runs once per request as `program [args...] -- SYMBOL YYYY-MM-DD`
//! with `TRADINGAGENTS_DEBUG` set to `0` or `1`. The `--` keeps a symbol that
//! starts with `-` from being read as an option. The program prints a JSON
//! object on stdout, either the bare state or `{"state": {...}, "signal": ...}`.
//! Diagnostic lines may precede the JSON; in that case the last non-empty
//! line is decoded.
//!
//! Stdout is read up to [`MAX_STDOUT_BYTES`]; a process that writes more is
//! killed. Only the tail of stderr is kept.

use super::{AnalysisEngine, EngineError, EngineFactory, Signal, tail};
use crate::config::CommandConfig;
use crate::data_structures::AnalysisState;
use crate::utils::date::format_as_of;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

pub const MAX_STDOUT_BYTES: usize = 8 * 1024 * 1024;
const STDERR_TAIL_CHARS: usize = 2000;
// Room for STDERR_TAIL_CHARS of multi-byte UTF-8
const STDERR_TAIL_BYTES: usize = STDERR_TAIL_CHARS * 4;

pub struct CommandEngineFactory {
    config: CommandConfig,
}

impl CommandEngineFactory {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }
}

impl EngineFactory for CommandEngineFactory {
    fn create(&self, debug: bool) -> Result<Box<dyn AnalysisEngine>, EngineError> {
        if self.config.program.trim().is_empty() {
            return Err(EngineError::Config("engine program is empty".to_string()));
        }
        Ok(Box::new(CommandEngine {
            config: self.config.clone(),
            debug,
            stdout_limit: MAX_STDOUT_BYTES,
        }))
    }
}

pub struct CommandEngine {
    config: CommandConfig,
    debug: bool,
    stdout_limit: usize,
}

#[async_trait]
impl AnalysisEngine for CommandEngine {
    #[instrument(skip(self), fields(program = %self.config.program))]
    async fn propagate(
        &self,
        symbol: &str,
        as_of: NaiveDate,
    ) -> Result<(AnalysisState, Signal), EngineError> {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .arg("--")
            .arg(symbol)
            .arg(format_as_of(as_of))
            .env("TRADINGAGENTS_DEBUG", if self.debug { "1" } else { "0" })
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Spawning engine process");
        let mut child = command.spawn().map_err(|source| EngineError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(EngineError::Io(std::io::Error::other("engine pipes were not captured")));
        };

        // Drained on its own task so a chatty stderr never blocks stdout
        let stderr_tail = tokio::spawn(read_tail(stderr, STDERR_TAIL_BYTES));

        let mut captured = Vec::new();
        stdout
            .take(self.stdout_limit as u64 + 1)
            .read_to_end(&mut captured)
            .await?;
        if captured.len() > self.stdout_limit {
            warn!(limit = self.stdout_limit, "Engine output exceeded limit, killing process");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Engine process was already gone");
            }
            stderr_tail.abort();
            return Err(EngineError::OutputTooLarge {
                limit: self.stdout_limit,
            });
        }

        let status = child.wait().await?;
        if !status.success() {
            let stderr = stderr_tail.await.unwrap_or_default();
            let stderr = tail(&String::from_utf8_lossy(&stderr), STDERR_TAIL_CHARS);
            warn!(%status, %stderr, "Engine process failed");
            return Err(EngineError::Exited {
                status: status.to_string(),
                stderr,
            });
        }
        stderr_tail.abort();

        debug!(stdout_bytes = captured.len(), "Engine process finished");
        decode_output(&String::from_utf8_lossy(&captured))
    }
}

/// Read `reader` to the end, keeping only its last `keep` bytes.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, keep: usize) -> Vec<u8> {
    let mut kept = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                kept.extend_from_slice(&chunk[..n]);
                if kept.len() > keep {
                    kept.drain(..kept.len() - keep);
                }
            }
        }
    }
    kept
}

fn decode_output(stdout: &str) -> Result<(AnalysisState, Signal), EngineError> {
    let object = match serde_json::from_str::<Map<String, Value>>(stdout.trim()) {
        Ok(object) => object,
        Err(whole_err) => match stdout.lines().rev().find(|line| !line.trim().is_empty()) {
            Some(last) => serde_json::from_str::<Map<String, Value>>(last.trim())?,
            None => return Err(whole_err.into()),
        },
    };
    Ok(split_envelope(object))
}

fn split_envelope(mut object: Map<String, Value>) -> (AnalysisState, Signal) {
    match object.remove("state") {
        Some(Value::Object(state)) => {
            let signal = match object.remove("signal") {
                None | Some(Value::Null) => None,
                Some(Value::String(text)) => Some(text),
                Some(other) => Some(other.to_string()),
            };
            (AnalysisState(state), signal)
        }
        // A non-object `state` is just another key of a bare state
        Some(other) => {
            object.insert("state".to_string(), other);
            (AnalysisState(object), None)
        }
        None => (AnalysisState(object), None),
    }
}
