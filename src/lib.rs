//! acp-harness: a bidirectional Agent Client Protocol (ACP) engine.
//!
//! Drives an ACP-compatible agent as a subprocess: spawns it, performs the
//! `initialize`/`session/new`(or `session/load`) handshake, serializes turns,
//! and exposes the agent's streamed output as a single flat [`Message`]
//! channel.
//!
//! # Architecture
//!
//! - [`agent`] — the Session Controller: [`agent::Config`], [`agent::SessionOptions`], [`agent::Session`]
//! - [`jsonrpc`] — JSON-RPC 2.0 multiplexer over the child's stdio (component B)
//! - [`message`] — the Update Parser and the public [`Message`] event type (component C)
//! - [`permissions`] — the Permission Bridge servicing `session/request_permission` (component E)
//! - [`protocol`] — wire types for every ACP method this engine speaks
//! - [`error`] — the crate's error taxonomy
//!
//! # Example
//!
//! ```ignore
//! use acp_harness::{Config, Session, SessionOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! let session = Session::start(Config::default(), SessionOptions {
//!     cwd: "/path/to/project".to_string(),
//!     ..Default::default()
//! }).await?;
//!
//! let mut output = session.output().await.expect("output taken once");
//! let cancel = CancellationToken::new();
//! session.send("list the files here", &cancel).await?;
//! while let Some(msg) = output.recv().await {
//!     println!("{:?}", msg.kind);
//! }
//! ```

pub mod agent;
pub mod error;
pub mod jsonrpc;
pub mod message;
pub mod permissions;
pub mod protocol;

pub use agent::{Config, Session, SessionOptions};
pub use error::AcpError;
pub use jsonrpc::{IncomingMessage, JsonRpcClient, Request, Response, RpcError};
pub use message::{Message, MessageKind, Tool, TurnUsage};
pub use permissions::{Hitl, PermissionHandler, PermissionRequestInfo};
pub use protocol::{
    AgentCapabilities, AgentInfo, ClientCapabilities, ClientInfo, ContentBlock, InitializeParams,
    InitializeResult, PermissionOption, PermissionOutcome, RequestPermissionParams,
    RequestPermissionResponse, SessionLoadParams, SessionNewParams, SessionPromptParams,
    SessionPromptResult, SessionResult, SessionUpdate, SessionUpdateParams,
};
