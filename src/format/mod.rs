pub mod duckchat;

pub use duckchat::{
    ChatPayload, ContentPart, Message, MessageContent, Metadata, Role, StreamData, ToolChoice,
};
