// Language model interface layer.
//
// The engine never talks HTTP itself; it speaks to whatever implements
// `LlmClient`. The message types mirror the block-structured chat format
// the driver loop needs: text blocks, tool-use requests, and tool-result
// replies.

pub mod client;
pub mod types;

pub use client::LlmClient;
pub use types::{ChatMessage, ContentBlock, LlmRequest, LlmResponse, Role};
