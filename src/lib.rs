pub mod config;
pub mod duckchat;
pub mod error;
pub mod format;
pub mod models;

pub use config::Config;
pub use duckchat::{ChatSession, ImageAttachment, MessageStream, SessionConfig, StreamEvent};
pub use error::{Error, Result};
