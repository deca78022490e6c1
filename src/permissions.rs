//! Permission Bridge: services the agent's `session/request_permission`
//! method call.
//!
//! Bound into the RPC multiplexer's method-handler registry (see
//! [`crate::jsonrpc::JsonRpcClient::on_method`]), so it always runs on its
//! own concurrent task and never blocks the read loop. It translates the
//! agent's option-based request into either an automatic decision (HITL off,
//! or HITL on with no callback configured) or a call out to a caller-supplied
//! [`PermissionHandler`], bounded by a timeout and isolated from panics.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{truncate_diagnostic, AcpError};
use crate::jsonrpc::{marshal_result, RpcError};
use crate::message::{Message, MessageKind};
use crate::protocol::{
    PermissionOption, PermissionOptionKind, PermissionOutcome, RequestPermissionParams,
    RequestPermissionResponse,
};

/// Default deadline for a permission callback, per the construction-time
/// `PermissionTimeout` option.
pub const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether the session requires human confirmation before a tool call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Hitl {
    #[default]
    Off,
    On,
}

impl Hitl {
    /// Parses the `Options["hitl"]` session value. Only `"on"`/`"off"` are
    /// recognized; anything else is a validation error at session-start time.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "off" => Some(Hitl::Off),
            "on" => Some(Hitl::On),
            _ => None,
        }
    }
}

/// The fields handed to a [`PermissionHandler`] callback.
#[derive(Debug, Clone)]
pub struct PermissionRequestInfo {
    pub session_id: String,
    pub tool_name: String,
    pub tool_call_id: String,
    pub description: String,
}

/// A caller-supplied decision callback: `true` grants the request, `false`
/// denies it. Invoked on its own task so a panic inside it surfaces as a
/// `JoinError` rather than taking down the read loop.
pub type PermissionHandler =
    Arc<dyn Fn(PermissionRequestInfo) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

/// Picks the first option matching `primary`, falling back to `secondary`.
/// Returns `None` if neither kind is present among `options`.
fn pick_option<'a>(
    options: &'a [PermissionOption],
    primary: PermissionOptionKind,
    secondary: PermissionOptionKind,
) -> Option<&'a PermissionOption> {
    options
        .iter()
        .find(|o| o.kind == Some(primary))
        .or_else(|| options.iter().find(|o| o.kind == Some(secondary)))
}

fn outcome_from(option: Option<&PermissionOption>) -> PermissionOutcome {
    match option {
        Some(o) => PermissionOutcome::selected(o.option_id.clone()),
        None => PermissionOutcome::cancelled(),
    }
}

fn tool_name_from(tool_call: &Value) -> String {
    tool_call
        .get("title")
        .and_then(|v| v.as_str())
        .and_then(|t| t.split_whitespace().next())
        .unwrap_or("")
        .to_string()
}

async fn emit_error(queue: &mpsc::Sender<Message>, code: &str, content: String) {
    let _ = queue
        .send(Message::now(MessageKind::Error {
            code: code.to_string(),
            content: truncate_diagnostic(&content),
        }))
        .await;
}

/// Runs `handler` on its own task, racing it against `timeout` and `cancel`.
/// A panic inside the handler is caught by the task boundary and reported as
/// [`AcpError::PermissionHandlerPanicked`] rather than propagating.
async fn run_with_timeout(
    handler: PermissionHandler,
    info: PermissionRequestInfo,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<bool, AcpError> {
    let join = tokio::spawn(handler(info));
    tokio::select! {
        res = join => match res {
            Ok(allowed) => Ok(allowed),
            Err(e) if e.is_panic() => Err(AcpError::PermissionHandlerPanicked),
            Err(_) => Err(AcpError::Cancelled),
        },
        _ = tokio::time::sleep(timeout) => Err(AcpError::Timeout(timeout)),
        _ = cancel.cancelled() => Err(AcpError::Cancelled),
    }
}

/// Services one `session/request_permission` call per §4.5. Always returns a
/// well-formed result — there is no path that propagates an RPC error back to
/// the agent, since a malformed or failed request still needs an outcome.
pub async fn handle_permission_request(
    params: Option<Value>,
    hitl: Hitl,
    handler: Option<PermissionHandler>,
    timeout: Duration,
    cancel: CancellationToken,
    queue: mpsc::Sender<Message>,
) -> Result<Value, RpcError> {
    let params = match params {
        Some(p) => p,
        None => {
            emit_error(&queue, "permission_request_invalid", "missing permission request params".to_string()).await;
            return marshal_result(&RequestPermissionResponse {
                outcome: PermissionOutcome::cancelled(),
            });
        }
    };

    let request: RequestPermissionParams = match serde_json::from_value(params) {
        Ok(r) => r,
        Err(e) => {
            emit_error(
                &queue,
                "permission_request_invalid",
                format!("failed to parse permission request: {e}"),
            )
            .await;
            return marshal_result(&RequestPermissionResponse {
                outcome: PermissionOutcome::cancelled(),
            });
        }
    };

    log::debug!(
        "permission request session={} options={}",
        request.session_id,
        request.options.len()
    );

    let outcome = match hitl {
        Hitl::Off => {
            outcome_from(pick_option(
                &request.options,
                PermissionOptionKind::AllowOnce,
                PermissionOptionKind::AllowAlways,
            ))
        }
        Hitl::On => match handler {
            None => outcome_from(pick_option(
                &request.options,
                PermissionOptionKind::RejectOnce,
                PermissionOptionKind::RejectAlways,
            )),
            Some(handler) => {
                let info = PermissionRequestInfo {
                    session_id: request.session_id.clone(),
                    tool_name: tool_name_from(&request.tool_call),
                    tool_call_id: request
                        .tool_call
                        .get("toolCallId")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    description: request
                        .tool_call
                        .get("title")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                };
                match run_with_timeout(handler, info, timeout, cancel).await {
                    Ok(true) => outcome_from(pick_option(
                        &request.options,
                        PermissionOptionKind::AllowOnce,
                        PermissionOptionKind::AllowAlways,
                    )),
                    Ok(false) => outcome_from(pick_option(
                        &request.options,
                        PermissionOptionKind::RejectOnce,
                        PermissionOptionKind::RejectAlways,
                    )),
                    Err(err) => {
                        emit_error(&queue, "permission_handler_failed", err.to_string()).await;
                        PermissionOutcome::cancelled()
                    }
                }
            }
        },
    };

    marshal_result(&RequestPermissionResponse { outcome })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<PermissionOption> {
        vec![
            PermissionOption {
                option_id: "a".to_string(),
                name: "Allow".to_string(),
                kind: Some(PermissionOptionKind::AllowOnce),
            },
            PermissionOption {
                option_id: "b".to_string(),
                name: "Deny".to_string(),
                kind: Some(PermissionOptionKind::RejectOnce),
            },
        ]
    }

    fn params_value(opts: Vec<PermissionOption>) -> Value {
        serde_json::to_value(RequestPermissionParams {
            session_id: "sess-1".to_string(),
            tool_call: serde_json::json!({"toolCallId": "tc-1", "title": "Write file"}),
            options: opts,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn hitl_off_auto_approves_first_allow_once() {
        let (tx, _rx) = mpsc::channel(8);
        let result = handle_permission_request(
            Some(params_value(options())),
            Hitl::Off,
            None,
            DEFAULT_PERMISSION_TIMEOUT,
            CancellationToken::new(),
            tx,
        )
        .await
        .unwrap();
        let resp: RequestPermissionResponse = serde_json::from_value(result).unwrap();
        assert_eq!(resp.outcome.outcome, "selected");
        assert_eq!(resp.outcome.option_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn hitl_off_with_no_allow_option_cancels() {
        let (tx, _rx) = mpsc::channel(8);
        let only_reject = vec![PermissionOption {
            option_id: "b".to_string(),
            name: "Deny".to_string(),
            kind: Some(PermissionOptionKind::RejectOnce),
        }];
        let result = handle_permission_request(
            Some(params_value(only_reject)),
            Hitl::Off,
            None,
            DEFAULT_PERMISSION_TIMEOUT,
            CancellationToken::new(),
            tx,
        )
        .await
        .unwrap();
        let resp: RequestPermissionResponse = serde_json::from_value(result).unwrap();
        assert_eq!(resp.outcome.outcome, "cancelled");
    }

    #[tokio::test]
    async fn hitl_on_without_handler_auto_denies() {
        let (tx, _rx) = mpsc::channel(8);
        let result = handle_permission_request(
            Some(params_value(options())),
            Hitl::On,
            None,
            DEFAULT_PERMISSION_TIMEOUT,
            CancellationToken::new(),
            tx,
        )
        .await
        .unwrap();
        let resp: RequestPermissionResponse = serde_json::from_value(result).unwrap();
        assert_eq!(resp.outcome.outcome, "selected");
        assert_eq!(resp.outcome.option_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn hitl_on_with_handler_true_selects_allow() {
        let (tx, _rx) = mpsc::channel(8);
        let handler: PermissionHandler = Arc::new(|_info| Box::pin(async { true }));
        let result = handle_permission_request(
            Some(params_value(options())),
            Hitl::On,
            Some(handler),
            DEFAULT_PERMISSION_TIMEOUT,
            CancellationToken::new(),
            tx,
        )
        .await
        .unwrap();
        let resp: RequestPermissionResponse = serde_json::from_value(result).unwrap();
        assert_eq!(resp.outcome.option_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn hitl_on_with_handler_false_selects_reject() {
        let (tx, _rx) = mpsc::channel(8);
        let handler: PermissionHandler = Arc::new(|_info| Box::pin(async { false }));
        let result = handle_permission_request(
            Some(params_value(options())),
            Hitl::On,
            Some(handler),
            DEFAULT_PERMISSION_TIMEOUT,
            CancellationToken::new(),
            tx,
        )
        .await
        .unwrap();
        let resp: RequestPermissionResponse = serde_json::from_value(result).unwrap();
        assert_eq!(resp.outcome.option_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn handler_panic_is_caught_and_cancels() {
        let (tx, mut rx) = mpsc::channel(8);
        let handler: PermissionHandler = Arc::new(|_info| {
            Box::pin(async {
                panic!("boom");
            })
        });
        let result = handle_permission_request(
            Some(params_value(options())),
            Hitl::On,
            Some(handler),
            DEFAULT_PERMISSION_TIMEOUT,
            CancellationToken::new(),
            tx,
        )
        .await
        .unwrap();
        let resp: RequestPermissionResponse = serde_json::from_value(result).unwrap();
        assert_eq!(resp.outcome.outcome, "cancelled");
        let emitted = rx.recv().await.expect("expected error message");
        match emitted.kind {
            MessageKind::Error { code, .. } => assert_eq!(code, "permission_handler_failed"),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_params_cancels_and_emits_error() {
        let (tx, mut rx) = mpsc::channel(8);
        let bad = serde_json::json!({"sessionId": 42});
        let result = handle_permission_request(
            Some(bad),
            Hitl::Off,
            None,
            DEFAULT_PERMISSION_TIMEOUT,
            CancellationToken::new(),
            tx,
        )
        .await
        .unwrap();
        let resp: RequestPermissionResponse = serde_json::from_value(result).unwrap();
        assert_eq!(resp.outcome.outcome, "cancelled");
        let emitted = rx.recv().await.expect("expected error message");
        match emitted.kind {
            MessageKind::Error { code, .. } => assert_eq!(code, "permission_request_invalid"),
            other => panic!("expected Error, got {other:?}"),
        }
    }
}
