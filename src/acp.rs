//! Agent Client Protocol domain vocabulary: method names, session update
//! variants, capability negotiation structs, and the `_meta` passthrough
//! newtype shared by every ACP payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::RequestId;

/// ACP method names, grouped the way `protocol/constants.rs` groups the
/// teacher's MCP method names.
pub mod method {
    /// Negotiate protocol version and capabilities.
    pub const INITIALIZE: &str = "initialize";
    /// Complete an out-of-band authentication flow.
    pub const AUTHENTICATE: &str = "authenticate";
    /// Create a new session.
    pub const SESSION_NEW: &str = "session/new";
    /// Load a previously created session.
    pub const SESSION_LOAD: &str = "session/load";
    /// List known sessions.
    pub const SESSION_LIST: &str = "session/list";
    /// Fork an existing session.
    pub const SESSION_FORK: &str = "session/fork";
    /// Resume a session from a checkpoint.
    pub const SESSION_RESUME: &str = "session/resume";
    /// Run a prompt turn.
    pub const SESSION_PROMPT: &str = "session/prompt";
    /// Change a session's active mode.
    pub const SESSION_SET_MODE: &str = "session/set_mode";
    /// Change a session's active model.
    pub const SESSION_SET_MODEL: &str = "session/set_model";
    /// Change a session-scoped configuration option.
    pub const SESSION_SET_CONFIG_OPTION: &str = "session/set_config_option";
    /// Cancel an in-flight prompt turn. Notification, no response.
    pub const SESSION_CANCEL: &str = "session/cancel";
    /// Stream a session update. Notification, no response.
    pub const SESSION_UPDATE: &str = "session/update";
    /// Read a text file from the client's filesystem.
    pub const FS_READ_TEXT_FILE: &str = "fs/read_text_file";
    /// Write a text file to the client's filesystem.
    pub const FS_WRITE_TEXT_FILE: &str = "fs/write_text_file";
    /// Create a terminal.
    pub const TERMINAL_CREATE: &str = "terminal/create";
    /// Fetch a terminal's accumulated output.
    pub const TERMINAL_OUTPUT: &str = "terminal/output";
    /// Wait for a terminal's command to exit.
    pub const TERMINAL_WAIT_FOR_EXIT: &str = "terminal/wait_for_exit";
    /// Release a terminal's resources.
    pub const TERMINAL_RELEASE: &str = "terminal/release";
    /// Kill a terminal's running command.
    pub const TERMINAL_KILL: &str = "terminal/kill";
    /// Ask the client to grant or deny a permission.
    pub const CLIENT_REQUEST_PERMISSION: &str = "client/request_permission";
}

/// The open-ended `_meta` object carried by ACP payloads. Strictly passed
/// through: an SDK consumer that sets `_meta` on an outbound payload gets the
/// identical object back on any inbound echo, untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta(#[serde(default, skip_serializing_if = "Option::is_none")] pub Option<Map<String, Value>>);

impl Meta {
    /// Whether this carries no meta object at all (as opposed to an empty one).
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }
}

/// Identifies the agent implementation, returned alongside `agentCapabilities`
/// during `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// The agent's name.
    pub name: String,
    /// The agent's version string.
    pub version: String,
}

/// Identifies the client implementation, sent alongside `clientCapabilities`
/// during `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// The client's name.
    pub name: String,
    /// The client's version string.
    pub version: String,
}

/// One authentication method an agent supports, advertised during
/// `initialize` so a client can drive `authenticate` if the agent requires it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthMethod {
    /// A stable identifier for this method, passed back to `authenticate`.
    pub id: String,
    /// A human-readable name for this method.
    pub name: String,
    /// An optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Capabilities an agent advertises during `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCapabilities {
    /// Whether the agent supports `session/load`.
    #[serde(default)]
    pub load_session: bool,
    /// Whether the agent supports `session/fork`.
    #[serde(default)]
    pub fork_session: bool,
    /// Whether the agent supports `session/resume`.
    #[serde(default)]
    pub resume_session: bool,
    /// Whether the agent supports `session/list`.
    #[serde(default)]
    pub list_sessions: bool,
    /// Whether the agent supports `session/set_model`.
    #[serde(default)]
    pub set_session_model: bool,
    /// Whether the agent supports `session/set_config_option`.
    #[serde(default)]
    pub set_session_config_option: bool,
    /// `_meta` passthrough.
    #[serde(rename = "_meta", default, skip_serializing_if = "Meta::is_none")]
    pub meta: Meta,
}

/// Capabilities a client advertises during `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Whether the client implements `fs/read_text_file` and `fs/write_text_file`.
    #[serde(default)]
    pub file_system: bool,
    /// Whether the client implements the `terminal/*` family.
    #[serde(default)]
    pub terminal: bool,
    /// `_meta` passthrough.
    #[serde(rename = "_meta", default, skip_serializing_if = "Meta::is_none")]
    pub meta: Meta,
}

/// Why a prompt turn stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The agent completed its turn normally.
    EndTurn,
    /// The turn was cancelled via `session/cancel`.
    Cancelled,
    /// The agent hit a configured step or token limit.
    MaxTokens,
    /// The agent hit its configured limit on turn requests.
    MaxTurnRequests,
    /// The agent refused to continue.
    Refusal,
}

/// A streamed update delivered via the `session/update` notification.
///
/// Internally tagged on `sessionUpdate`, matching ACP's wire discriminator.
/// Nested payload shapes that carry no runtime-significant fields for this
/// SDK (chunk content blocks, tool call fields, plan entries) are represented
/// as opaque [`Value`] so callers can deserialize them into their own richer
/// types without this crate needing to track every content-block variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// A chunk of a user-authored message.
    UserMessageChunk {
        /// The chunk's content block.
        content: Value,
    },
    /// A chunk of the agent's reply.
    AgentMessageChunk {
        /// The chunk's content block.
        content: Value,
    },
    /// A chunk of the agent's visible reasoning.
    AgentThoughtChunk {
        /// The chunk's content block.
        content: Value,
    },
    /// A new tool call was started.
    ToolCall {
        /// The tool call's fields.
        #[serde(flatten)]
        fields: Value,
    },
    /// An existing tool call's status or output changed.
    ToolCallUpdate {
        /// The updated fields.
        #[serde(flatten)]
        fields: Value,
    },
    /// The agent's current plan.
    Plan {
        /// The plan's entries.
        entries: Value,
    },
    /// The set of commands available to the user changed.
    AvailableCommandsUpdate {
        /// The updated command list.
        #[serde(rename = "availableCommands")]
        available_commands: Value,
    },
    /// The session's active mode changed.
    CurrentModeUpdate {
        /// The new mode id.
        #[serde(rename = "currentModeId")]
        current_mode_id: Value,
    },
    /// A file diff to display.
    Diff {
        /// The diff's fields.
        #[serde(flatten)]
        fields: Value,
    },
    /// Output produced by a terminal embedded in the conversation.
    TerminalOutput {
        /// The terminal's fields.
        #[serde(flatten)]
        fields: Value,
    },
}

/// Negotiate the protocol version used for the rest of a connection: the
/// lesser of what the client offered and what the agent supports. Both sides
/// are parsed as integers when possible; if either fails to parse, the two
/// strings are compared lexicographically instead.
pub fn negotiate_protocol_version(client_offered: &str, agent_supported: &str) -> String {
    match (client_offered.parse::<u64>(), agent_supported.parse::<u64>()) {
        (Ok(client), Ok(agent)) => client.min(agent).to_string(),
        _ => std::cmp::min(client_offered, agent_supported).to_string(),
    }
}

/// The notification body for `session/cancel`: scoped to a session and a
/// specific in-flight request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelNotification {
    /// The session whose prompt turn should be cancelled.
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// The id of the `session/prompt` request to cancel.
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
}
