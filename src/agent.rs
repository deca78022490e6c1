//! The Session Controller: spawns an agent subprocess, drives the ACP
//! handshake, serializes turns, and emits a single stream of [`Message`]
//! values to the consumer.
//!
//! Construction is a two-phase process: [`Config`]/[`SessionOptions`]
//! describe *how* to talk to an agent, and [`Session::start`] is the factory
//! that actually spawns the child, performs the handshake, and only then
//! hands back a live [`Session`] handle. A failed handshake kills the child
//! and returns an error without ever exposing a handle — there is no
//! "connecting" state visible to callers, only "started" or "failed".

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde_json::Value;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{sanitize_code, AcpError};
use crate::jsonrpc::{JsonRpcClient, Response, DEFAULT_MAX_MESSAGE_SIZE};
use crate::message::{decode_session_update, Message, MessageKind, TurnUsage};
use crate::permissions::{handle_permission_request, Hitl, PermissionHandler};
use crate::protocol::{
    AgentInfo, ClientCapabilities, ClientInfo, ConfigOptionEntry, ContentBlock, InitializeParams,
    InitializeResult, PromptUsage, SessionLoadParams, SessionNewParams, SessionPromptParams,
    SessionPromptResult, SessionResult, SetConfigOptionParams, SetModeParams,
};

/// Default capacity of the output channel (`OutputBuffer`).
pub const DEFAULT_OUTPUT_BUFFER: usize = 4096;
/// Default capacity of the intermediate queue between the read loop and the
/// dispatch task — not a construction-time option, an internal constant.
const DEFAULT_INTERMEDIATE_BUFFER: usize = 1024;
/// Default SIGTERM-to-SIGKILL delay (`GracePeriod`).
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
/// Default handshake deadline (`HandshakeTimeout`).
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default permission-callback deadline (`PermissionTimeout`).
pub const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Effort levels this controller recognizes for `Options["effort"]`. The
/// value is validated at session start but not yet forwarded to the agent —
/// there is no wire method for it in the current protocol surface.
const VALID_EFFORT_LEVELS: &[&str] = &["low", "medium", "high"];

/// Matches both resume ids and agent-returned session ids.
fn is_valid_identifier(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 256
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Construction-time configuration — the §6 "Configuration surface" table.
#[derive(Clone)]
pub struct Config {
    pub binary: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub output_buffer: usize,
    pub grace_period: Duration,
    pub handshake_timeout: Duration,
    pub permission_timeout: Duration,
    pub max_message_size: usize,
    pub permission_handler: Option<PermissionHandler>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("binary", &self.binary)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("output_buffer", &self.output_buffer)
            .field("grace_period", &self.grace_period)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("permission_timeout", &self.permission_timeout)
            .field("max_message_size", &self.max_message_size)
            .field("permission_handler", &self.permission_handler.is_some())
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binary: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            output_buffer: DEFAULT_OUTPUT_BUFFER,
            grace_period: DEFAULT_GRACE_PERIOD,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            permission_timeout: DEFAULT_PERMISSION_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            permission_handler: None,
        }
    }
}

impl Config {
    /// Loads `binary`/`args`/`env` (and `command`, an alternative to `args`
    /// parsed as a shell command line) from a TOML document. This is
    /// intentionally much smaller than a full agent-discovery catalogue —
    /// resolving the binary on the host's PATH is the caller's job.
    pub fn from_toml(doc: &str) -> Result<Self, AcpError> {
        #[derive(serde::Deserialize, Default)]
        struct Raw {
            #[serde(default)]
            binary: String,
            #[serde(default)]
            args: Option<Vec<String>>,
            #[serde(default)]
            command: Option<String>,
            #[serde(default)]
            env: HashMap<String, String>,
        }
        let raw: Raw = toml::from_str(doc).map_err(|e| AcpError::InvalidOption {
            name: "config",
            reason: e.to_string(),
        })?;
        let args = match raw.args {
            Some(a) => a,
            None => match raw.command {
                Some(cmd) => shell_words::split(&cmd).map_err(|e| AcpError::InvalidOption {
                    name: "command",
                    reason: e.to_string(),
                })?,
                None => Vec::new(),
            },
        };
        Ok(Config {
            binary: raw.binary,
            args,
            env: raw.env,
            ..Config::default()
        })
    }

    fn validate(&self) -> Result<(), AcpError> {
        for (key, value) in &self.env {
            if key.is_empty() || key.contains('=') {
                return Err(AcpError::InvalidOption {
                    name: "env",
                    reason: format!("invalid environment key {key:?}"),
                });
            }
            if key.bytes().any(|b| b == 0) || value.bytes().any(|b| b == 0) {
                return Err(AcpError::InvalidOption {
                    name: "env",
                    reason: format!("null byte in environment entry {key:?}"),
                });
            }
        }
        Ok(())
    }
}

/// Per-session options — the §6 "Session surface" table.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub cwd: String,
    pub hitl: Option<String>,
    pub mode: Option<String>,
    pub resume_id: Option<String>,
    pub effort: Option<String>,
    pub model: Option<String>,
}

impl SessionOptions {
    fn validate(&self) -> Result<Hitl, AcpError> {
        if !Path::new(&self.cwd).is_absolute() {
            return Err(AcpError::InvalidOption {
                name: "cwd",
                reason: "must be an absolute path".to_string(),
            });
        }
        let hitl = match &self.hitl {
            Some(raw) => Hitl::parse(raw).ok_or_else(|| AcpError::InvalidOption {
                name: "hitl",
                reason: format!("unrecognized value {raw:?}"),
            })?,
            None => Hitl::Off,
        };
        if let Some(effort) = &self.effort {
            if !VALID_EFFORT_LEVELS.contains(&effort.as_str()) {
                return Err(AcpError::InvalidOption {
                    name: "effort",
                    reason: format!("unrecognized value {effort:?}"),
                });
            }
        }
        Ok(hitl)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A live, handshaken ACP session. Turns are strictly serialized; the event
/// stream is obtained once via [`Session::output`].
pub struct Session {
    session_id: String,
    client: Arc<JsonRpcClient>,
    intermediate_tx: mpsc::Sender<Message>,
    output_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    turn_lock: Mutex<()>,
    stopping: Arc<AtomicBool>,
    term_err: Arc<Mutex<Option<Arc<AcpError>>>>,
    done: CancellationToken,
    inner_cancel: CancellationToken,
    grace_period: Duration,
    child_pid: i32,
}

impl Session {
    /// Spawns the agent, performs the handshake, and applies post-handshake
    /// configuration. See the module doc for the two-phase construction
    /// model; on any failure the spawned child is killed before returning.
    pub async fn start(config: Config, options: SessionOptions) -> Result<Self, AcpError> {
        config.validate()?;
        let hitl = options.validate()?;

        log::info!("acp: spawning agent binary={}", config.binary);
        let mut command = Command::new(&config.binary);
        command
            .args(&config.args)
            .envs(&config.env)
            .current_dir(&options.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(AcpError::Spawn)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AcpError::Handshake("failed to capture agent stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AcpError::Handshake("failed to capture agent stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                use tokio::io::AsyncBufReadExt;
                let mut reader = tokio::io::BufReader::new(stderr);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            let trimmed = line.trim();
                            if !trimmed.is_empty() {
                                log::warn!("acp agent stderr: {trimmed}");
                            }
                        }
                    }
                }
            });
        }

        let mut rpc_client = JsonRpcClient::new(stdin, config.max_message_size);

        let (intermediate_tx, mut intermediate_rx) =
            mpsc::channel::<Message>(DEFAULT_INTERMEDIATE_BUFFER);
        let (output_tx, output_rx) = mpsc::channel::<Message>(config.output_buffer);

        let update_tx = intermediate_tx.clone();
        rpc_client.on_notification("session/update", move |params| {
            let update_tx = update_tx.clone();
            async move {
                if let Some(msg) = decode_session_update(params) {
                    let _ = update_tx.send(msg).await;
                }
            }
        });

        let permission_tx = intermediate_tx.clone();
        let permission_handler = config.permission_handler.clone();
        let permission_timeout = config.permission_timeout;
        let permission_cancel = CancellationToken::new();
        rpc_client.on_method("session/request_permission", move |params| {
            let queue = permission_tx.clone();
            let handler = permission_handler.clone();
            let cancel = permission_cancel.clone();
            async move { handle_permission_request(params, hitl, handler, permission_timeout, cancel, queue).await }
        });

        let client = Arc::new(rpc_client);

        let done = CancellationToken::new();
        let inner_cancel = CancellationToken::new();
        let stopping = Arc::new(AtomicBool::new(false));
        let term_err: Arc<Mutex<Option<Arc<AcpError>>>> = Arc::new(Mutex::new(None));

        {
            let dispatch_done = done.clone();
            let dispatch_cancel = inner_cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        maybe = intermediate_rx.recv() => {
                            match maybe {
                                Some(msg) => {
                                    tokio::select! {
                                        biased;
                                        res = output_tx.send(msg) => { let _ = res; }
                                        _ = dispatch_cancel.cancelled() => {}
                                    }
                                }
                                None => break,
                            }
                        }
                        _ = dispatch_done.cancelled() => break,
                    }
                }
            });
        }

        {
            let reader_client = Arc::clone(&client);
            let reader_done = done.clone();
            let reader_inner_cancel = inner_cancel.clone();
            let reader_stopping = Arc::clone(&stopping);
            let reader_term_err = Arc::clone(&term_err);
            tokio::spawn(async move {
                let result = reader_client
                    .run(stdout, |line, err| {
                        log::warn!("acp: malformed json line ({} bytes): {err}", line.len());
                    })
                    .await;
                if let Err(e) = result {
                    if e.is_fatal() {
                        log::error!("acp: read loop ended with fatal error: {e}");
                    } else {
                        log::warn!("acp: read loop ended with error: {e}");
                    }
                    let final_err = if reader_stopping.load(Ordering::SeqCst) {
                        AcpError::Terminated
                    } else {
                        e
                    };
                    let mut slot = reader_term_err.lock().await;
                    if slot.is_none() {
                        *slot = Some(Arc::new(final_err));
                    }
                    drop(slot);
                    reader_inner_cancel.cancel();
                    reader_done.cancel();
                }
            });
        }

        macro_rules! fail {
            ($err:expr) => {{
                let _ = child.kill().await;
                return Err($err);
            }};
        }

        let init_params = InitializeParams {
            protocol_version: 1,
            client_capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "acp-harness".to_string(),
                title: "ACP Harness".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        log::debug!("acp: sending initialize");
        let init_value = serde_json::to_value(&init_params)?;
        let init_response = match tokio::time::timeout(
            config.handshake_timeout,
            client.call("initialize", Some(init_value), &CancellationToken::new()),
        )
        .await
        {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => fail!(AcpError::Handshake(e.to_string())),
            Err(_) => fail!(AcpError::Handshake("initialize timed out".to_string())),
        };
        if let Some(err) = init_response.error {
            fail!(AcpError::Handshake(format!(
                "initialize failed: {} ({})",
                err.message, err.code
            )));
        }
        let init_result: InitializeResult = match init_response
            .result
            .ok_or_else(|| AcpError::Handshake("initialize returned no result".to_string()))
            .and_then(|v| serde_json::from_value(v).map_err(AcpError::from))
        {
            Ok(r) => r,
            Err(e) => fail!(e),
        };
        log::debug!(
            "acp: initialize complete agent={}",
            init_result.agent_info.as_ref().map(|a| a.name.as_str()).unwrap_or("?")
        );

        let session_result: SessionResult = if let Some(resume_id) = &options.resume_id {
            if !is_valid_identifier(resume_id) {
                fail!(AcpError::SessionNotFound(format!(
                    "invalid resume id {resume_id:?}"
                )));
            }
            log::debug!("acp: resuming session {resume_id}");
            let params = SessionLoadParams {
                cwd: options.cwd.clone(),
                session_id: resume_id.clone(),
                mcp_servers: Vec::new(),
            };
            let value = match serde_json::to_value(&params) {
                Ok(v) => v,
                Err(e) => fail!(AcpError::from(e)),
            };
            let response = match client
                .call("session/load", Some(value), &CancellationToken::new())
                .await
            {
                Ok(resp) => resp,
                Err(e) => fail!(AcpError::SessionNotFound(e.to_string())),
            };
            if let Some(err) = response.error {
                fail!(AcpError::SessionNotFound(format!(
                    "{} ({})",
                    err.message, err.code
                )));
            }
            match response
                .result
                .ok_or_else(|| AcpError::SessionNotFound("session/load returned no result".to_string()))
                .and_then(|v| serde_json::from_value(v).map_err(AcpError::from))
            {
                Ok(r) => r,
                Err(e) => fail!(e),
            }
        } else {
            log::debug!("acp: creating new session cwd={}", options.cwd);
            let params = SessionNewParams {
                cwd: options.cwd.clone(),
                mcp_servers: Vec::new(),
            };
            let value = match serde_json::to_value(&params) {
                Ok(v) => v,
                Err(e) => fail!(AcpError::from(e)),
            };
            let response = match client
                .call("session/new", Some(value), &CancellationToken::new())
                .await
            {
                Ok(resp) => resp,
                Err(e) => fail!(AcpError::Handshake(e.to_string())),
            };
            if let Some(err) = response.error {
                fail!(AcpError::Handshake(format!("{} ({})", err.message, err.code)));
            }
            match response
                .result
                .ok_or_else(|| AcpError::Handshake("session/new returned no result".to_string()))
                .and_then(|v| serde_json::from_value(v).map_err(AcpError::from))
            {
                Ok(r) => r,
                Err(e) => fail!(e),
            }
        };

        if !is_valid_identifier(&session_result.session_id) {
            fail!(AcpError::Handshake(format!(
                "agent returned invalid session id {:?}",
                session_result.session_id
            )));
        }

        let agent_name = init_result
            .agent_info
            .as_ref()
            .map(|a| sanitize_code(&a.name))
            .unwrap_or_default();
        let agent_version = init_result
            .agent_info
            .as_ref()
            .map(|a| sanitize_code(&a.version))
            .unwrap_or_default();
        let model = session_result
            .models
            .as_ref()
            .map(|m| sanitize_code(&m.current_model_id));

        let _ = intermediate_tx
            .send(Message::now(MessageKind::Init {
                resume_id: session_result.session_id.clone(),
                agent_name,
                agent_version,
                model: model.clone(),
            }))
            .await;

        if let Some(mode) = &options.mode {
            if session_result.modes.is_some() {
                let params = SetModeParams {
                    session_id: session_result.session_id.clone(),
                    mode_id: mode.clone(),
                };
                let value = match serde_json::to_value(&params) {
                    Ok(v) => v,
                    Err(e) => fail!(AcpError::from(e)),
                };
                let response = match client
                    .call("session/set_mode", Some(value), &CancellationToken::new())
                    .await
                {
                    Ok(resp) => resp,
                    Err(e) => fail!(AcpError::Handshake(e.to_string())),
                };
                if let Some(err) = response.error {
                    fail!(AcpError::Handshake(format!("set_mode failed: {} ({})", err.message, err.code)));
                }
            }
        }

        if let Some(requested_model) = &options.model {
            if let Some(model_entry) = model_config_option(&session_result.config_options) {
                let params = SetConfigOptionParams {
                    session_id: session_result.session_id.clone(),
                    config_id: model_entry.id.clone(),
                    value: Value::String(requested_model.clone()),
                };
                if let Ok(value) = serde_json::to_value(&params) {
                    match client
                        .call("session/set_config_option", Some(value), &CancellationToken::new())
                        .await
                    {
                        Ok(resp) if resp.error.is_none() => {}
                        Ok(resp) => {
                            let err = resp.error.expect("checked above");
                            let _ = intermediate_tx
                                .send(Message::now(MessageKind::Error {
                                    code: "set_config_option_failed".to_string(),
                                    content: format!("{} ({})", err.message, err.code),
                                }))
                                .await;
                        }
                        Err(e) => {
                            let _ = intermediate_tx
                                .send(Message::now(MessageKind::Error {
                                    code: "set_config_option_failed".to_string(),
                                    content: e.to_string(),
                                }))
                                .await;
                        }
                    }
                }
            }
        }

        let child_pid = child.id().unwrap_or(0) as i32;

        {
            let waiter_done = done.clone();
            let waiter_inner_cancel = inner_cancel.clone();
            let waiter_stopping = Arc::clone(&stopping);
            let waiter_term_err = Arc::clone(&term_err);
            tokio::spawn(async move {
                let status = child.wait().await;
                log::info!("acp: agent process exited status={status:?}");
                let final_err = if waiter_stopping.load(Ordering::SeqCst) {
                    Some(AcpError::Terminated)
                } else {
                    match status {
                        Ok(s) => {
                            let code = s.code().unwrap_or(-1);
                            if code == 0 {
                                None
                            } else {
                                Some(AcpError::ProcessExited(code))
                            }
                        }
                        Err(e) => Some(AcpError::Spawn(e)),
                    }
                };
                if let Some(err) = final_err {
                    let mut slot = waiter_term_err.lock().await;
                    if slot.is_none() {
                        *slot = Some(Arc::new(err));
                    }
                }
                waiter_inner_cancel.cancel();
                waiter_done.cancel();
            });
        }

        Ok(Session {
            session_id: session_result.session_id,
            client,
            intermediate_tx,
            output_rx: Mutex::new(Some(output_rx)),
            turn_lock: Mutex::new(()),
            stopping,
            term_err,
            done,
            inner_cancel,
            grace_period: config.grace_period,
            child_pid,
        })
    }

    /// The agent-assigned session id (also usable as a future `resume_id`).
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Takes ownership of the output stream. Returns `None` if already taken.
    pub async fn output(&self) -> Option<mpsc::Receiver<Message>> {
        self.output_rx.lock().await.take()
    }

    /// The terminal error, if the session has ended.
    pub async fn err(&self) -> Option<Arc<AcpError>> {
        self.term_err.lock().await.clone()
    }

    /// Resolves once the session has fully terminated.
    pub async fn wait(&self) {
        self.done.cancelled().await;
    }

    /// Sends one turn. Turns are strictly serialized by an internal mutex;
    /// `cancel` only governs this call, not the turn mutex itself.
    pub async fn send(&self, text: &str, cancel: &CancellationToken) -> Result<(), AcpError> {
        if self.stopping.load(Ordering::SeqCst) || self.done.is_cancelled() {
            return Err(AcpError::Terminated);
        }
        let _turn_guard = self.turn_lock.lock().await;
        if self.stopping.load(Ordering::SeqCst) || self.done.is_cancelled() {
            return Err(AcpError::Terminated);
        }

        let params = SessionPromptParams {
            session_id: self.session_id.clone(),
            prompt: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
        };
        let params_value = serde_json::to_value(&params)?;

        let client = Arc::clone(&self.client);
        let call_cancel = cancel.clone();
        let mut helper =
            tokio::spawn(async move { client.call("session/prompt", Some(params_value), &call_cancel).await });

        // Biased: a response that has already arrived always wins over a
        // concurrently-ready done/cancel branch — the no-loss tie-break rule.
        let outcome = tokio::select! {
            biased;
            res = &mut helper => res.unwrap_or(Err(AcpError::Cancelled)),
            _ = self.done.cancelled() => Err(AcpError::Terminated),
            _ = cancel.cancelled() => Err(AcpError::Cancelled),
        };

        match outcome {
            Ok(response) => self.handle_prompt_response(response).await,
            Err(e) => Err(e),
        }
    }

    async fn handle_prompt_response(&self, response: Response) -> Result<(), AcpError> {
        if let Some(err) = response.error {
            return Err(AcpError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        let result: SessionPromptResult = serde_json::from_value(response.result.unwrap_or(Value::Null))?;
        let stop_reason = result.stop_reason.as_deref().map(sanitize_code).unwrap_or_default();
        let usage = result.usage.and_then(prompt_usage_to_turn_usage);
        self.emit(Message::now(MessageKind::Result { stop_reason, usage })).await;
        Ok(())
    }

    async fn emit(&self, msg: Message) {
        tokio::select! {
            biased;
            res = self.intermediate_tx.send(msg) => { let _ = res; }
            _ = self.inner_cancel.cancelled() => {}
        }
    }

    fn send_signal(&self, sig: Signal) {
        if self.child_pid > 0 {
            let _ = signal::kill(Pid::from_raw(self.child_pid), sig);
        }
    }

    /// Idempotent three-stage termination: soft shutdown, SIGTERM with a
    /// grace period, then SIGKILL. Returns once `done` has closed.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<(), AcpError> {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            log::info!("acp: stopping session {} (SIGTERM, grace={:?})", self.session_id, self.grace_period);
            let _ = self.client.notify("shutdown", None).await;
            self.client.close_writer().await;
            self.inner_cancel.cancel();
            self.send_signal(Signal::SIGTERM);
        }

        tokio::select! {
            _ = self.done.cancelled() => {}
            _ = tokio::time::sleep(self.grace_period) => {
                log::info!("acp: grace period elapsed for session {}, sending SIGKILL", self.session_id);
                self.send_signal(Signal::SIGKILL);
                self.done.cancelled().await;
            }
            _ = cancel.cancelled() => {
                log::info!("acp: stop cancelled for session {}, sending SIGKILL", self.session_id);
                self.send_signal(Signal::SIGKILL);
                self.done.cancelled().await;
            }
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            self.send_signal(Signal::SIGKILL);
        }
    }
}

fn model_config_option(entries: &Option<Vec<ConfigOptionEntry>>) -> Option<&ConfigOptionEntry> {
    entries
        .as_ref()
        .and_then(|entries| entries.iter().find(|e| e.category == "model"))
}

fn prompt_usage_to_turn_usage(usage: PromptUsage) -> Option<TurnUsage> {
    let turn = TurnUsage {
        input_tokens: usage.input_tokens.unwrap_or(0),
        output_tokens: usage.output_tokens.unwrap_or(0),
        cached_read_tokens: usage.cached_read_tokens.unwrap_or(0),
        cached_write_tokens: usage.cached_write_tokens.unwrap_or(0),
        thinking_tokens: usage.thinking_tokens.unwrap_or(0),
    };
    if turn.is_zero() {
        None
    } else {
        Some(turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_identifier_accepts_expected_shapes() {
        assert!(is_valid_identifier("abc-123_XYZ"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("bad id!"));
        assert!(!is_valid_identifier(&"a".repeat(257)));
    }

    #[test]
    fn config_validate_rejects_empty_env_key() {
        let mut config = Config::default();
        config.env.insert(String::new(), "v".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_validate_rejects_null_byte_in_value() {
        let mut config = Config::default();
        config.env.insert("KEY".to_string(), "bad\0value".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_validate_rejects_equals_in_key() {
        let mut config = Config::default();
        config.env.insert("A=B".to_string(), "v".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_validate_accepts_clean_env() {
        let mut config = Config::default();
        config.env.insert("PATH".to_string(), "/usr/bin".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn session_options_rejects_relative_cwd() {
        let options = SessionOptions {
            cwd: "relative/path".to_string(),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn session_options_rejects_unknown_hitl() {
        let options = SessionOptions {
            cwd: "/tmp".to_string(),
            hitl: Some("maybe".to_string()),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn session_options_defaults_hitl_to_off() {
        let options = SessionOptions {
            cwd: "/tmp".to_string(),
            ..Default::default()
        };
        assert_eq!(options.validate().unwrap(), Hitl::Off);
    }

    #[test]
    fn session_options_rejects_unknown_effort() {
        let options = SessionOptions {
            cwd: "/tmp".to_string(),
            effort: Some("ludicrous".to_string()),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn prompt_usage_all_zero_yields_none() {
        assert!(prompt_usage_to_turn_usage(PromptUsage::default()).is_none());
    }

    #[test]
    fn prompt_usage_nonzero_yields_some() {
        let usage = PromptUsage {
            input_tokens: Some(10),
            ..Default::default()
        };
        let turn = prompt_usage_to_turn_usage(usage).unwrap();
        assert_eq!(turn.input_tokens, 10);
    }

    #[test]
    fn config_from_toml_reads_binary_args_env() {
        let doc = r#"
            binary = "some-agent"
            args = ["--flag"]
            [env]
            FOO = "bar"
        "#;
        let config = Config::from_toml(doc).unwrap();
        assert_eq!(config.binary, "some-agent");
        assert_eq!(config.args, vec!["--flag".to_string()]);
        assert_eq!(config.env.get("FOO"), Some(&"bar".to_string()));
    }

    #[test]
    fn config_from_toml_parses_command_as_shell_words() {
        let doc = r#"
            binary = "some-agent"
            command = "--flag value --other"
        "#;
        let config = Config::from_toml(doc).unwrap();
        assert_eq!(
            config.args,
            vec!["--flag".to_string(), "value".to_string(), "--other".to_string()]
        );
    }
}
