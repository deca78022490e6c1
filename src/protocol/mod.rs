//! ACP (Agent Client Protocol) message type definitions.
//!
//! These types model the JSON-RPC parameter and result objects exchanged
//! between the host and an ACP-compatible agent.
//!
//! The module is organized by domain:
//! - [`initialize`] — Handshake types (`initialize` request/response)
//! - [`session`] — Session lifecycle and update types
//! - [`content`] — Content block types used in prompts
//! - [`permissions`] — Permission request/response types

pub mod content;
pub mod initialize;
pub mod permissions;
pub mod session;

pub use content::{ContentBlock, ResourceContent};
pub use initialize::{
    AgentCapabilities, AgentInfo, AuthMethod, ClientCapabilities, ClientInfo, InitializeParams,
    InitializeResult, PromptCapabilities,
};
pub use permissions::{
    PermissionOption, PermissionOptionKind, PermissionOutcome, RequestPermissionParams,
    RequestPermissionResponse,
};
pub use session::{
    AgentCommand, ConfigOptionEntry, ModeEntry, ModelEntry, ModelsInfo, ModesInfo, PlanEntry,
    PlanInfo, PromptUsage, SessionLoadParams, SessionNewParams, SessionPromptParams,
    SessionPromptResult, SessionResult, SessionUpdate, SessionUpdateParams, SetConfigOptionParams,
    SetModeParams, ToolCallInfo, ToolCallUpdateInfo,
};
