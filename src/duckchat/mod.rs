pub mod client;
pub mod rate_limit;
pub mod request;
pub mod session;
pub mod sse;
pub mod token;

pub use client::{HttpTransport, ResponseBody, Transport, TransportResponse};
pub use rate_limit::RateLimitPolicy;
pub use request::{ImageAttachment, build_payload, build_tool_choice, format_content};
pub use session::{
    ChatSession, Endpoints, MessageStream, SessionConfig, SessionState, StreamEvent, ToolOverrides,
};
pub use sse::{StreamDecoder, StreamFrame};
pub use token::TokenProvider;
