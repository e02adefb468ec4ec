//! Canonical request/response value objects.
//!
//! Every provider backend, whatever its native wire format, is mapped into
//! these shapes before anything reaches a caller. The router and usage
//! recorders only ever see these types.

pub mod chat_completion;

pub use chat_completion::{
    ChatCompletionChunk, ChatCompletionResult, ChatRequest, FinishReason, Message, Role, Usage,
};
