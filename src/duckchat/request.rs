use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::borrow::Cow;
use std::path::Path;

use crate::config::{ClientProfile, ToolCapabilities};
use crate::error::Result;
use crate::format::{ChatPayload, ContentPart, Message, MessageContent, Metadata, ToolChoice};
use crate::models::{supports_images, supports_web_search};

type Headers = Vec<(Cow<'static, str>, Cow<'static, str>)>;

/// An image to send alongside a user message, already base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub base64: String,
}

impl ImageAttachment {
    pub fn new(mime_type: impl Into<String>, base64: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            base64: base64.into(),
        }
    }

    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(mime_type, STANDARD.encode(bytes))
    }

    /// Read an image file, guessing the mime type from its extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let mime = match ext.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            _ => "image/png",
        };
        Ok(Self::from_bytes(mime, &bytes))
    }

    fn is_complete(&self) -> bool {
        !self.mime_type.is_empty() && !self.base64.is_empty()
    }

    fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

fn fingerprint_headers(profile: &ClientProfile, headers: &mut Headers) {
    headers.push((
        Cow::Borrowed("Accept-Language"),
        Cow::Owned(profile.accept_language.clone()),
    ));
    headers.push((Cow::Borrowed("DNT"), Cow::Borrowed("1")));
    headers.push((Cow::Borrowed("Priority"), Cow::Borrowed("u=1, i")));
    headers.push((
        Cow::Borrowed("Referer"),
        Cow::Owned(format!("{}/", profile.origin.trim_end_matches('/'))),
    ));
    headers.push((Cow::Borrowed("Sec-CH-UA"), Cow::Owned(profile.sec_ch_ua.clone())));
    headers.push((Cow::Borrowed("Sec-CH-UA-Mobile"), Cow::Borrowed("?0")));
    headers.push((
        Cow::Borrowed("Sec-CH-UA-Platform"),
        Cow::Owned(profile.sec_ch_ua_platform.clone()),
    ));
    headers.push((Cow::Borrowed("Sec-Fetch-Dest"), Cow::Borrowed("empty")));
    headers.push((Cow::Borrowed("Sec-Fetch-Mode"), Cow::Borrowed("cors")));
    headers.push((Cow::Borrowed("Sec-Fetch-Site"), Cow::Borrowed("same-origin")));
    headers.push((Cow::Borrowed("Sec-GPC"), Cow::Borrowed("1")));
    headers.push((Cow::Borrowed("User-Agent"), Cow::Owned(profile.user_agent.clone())));
}

/// Headers for the status probe that hands out a session token.
pub fn build_status_headers(profile: &ClientProfile) -> Headers {
    let mut headers = Vec::with_capacity(16);
    headers.push((Cow::Borrowed("Accept"), Cow::Borrowed("*/*")));
    headers.push((Cow::Borrowed("Cache-Control"), Cow::Borrowed("no-store")));
    fingerprint_headers(profile, &mut headers);
    headers.push((Cow::Borrowed("x-vqd-accept"), Cow::Borrowed("1")));
    headers.push((Cow::Borrowed("Cookie"), Cow::Owned(profile.cookie_header())));
    headers
}

/// Headers for a chat exchange carrying the current session token.
pub fn build_chat_headers(profile: &ClientProfile, token: &str) -> Headers {
    let mut headers = Vec::with_capacity(20);
    headers.push((Cow::Borrowed("Accept"), Cow::Borrowed("text/event-stream")));
    headers.push((
        Cow::Borrowed("Content-Type"),
        Cow::Borrowed("application/json"),
    ));
    headers.push((Cow::Borrowed("Origin"), Cow::Owned(profile.origin.clone())));
    fingerprint_headers(profile, &mut headers);
    headers.push((Cow::Borrowed("x-fe-signals"), Cow::Owned(profile.fe_signals.clone())));
    headers.push((Cow::Borrowed("x-fe-version"), Cow::Owned(profile.fe_version.clone())));
    headers.push((Cow::Borrowed("x-vqd-4"), Cow::Owned(token.to_string())));
    headers.push((Cow::Borrowed("x-vqd-hash-1"), Cow::Owned(profile.vqd_hash.clone())));
    headers.push((Cow::Borrowed("Cookie"), Cow::Owned(profile.cookie_header())));
    headers
}

/// Tool flags for `model`. `WebSearch` is only present for the model that supports it.
pub fn build_tool_choice(tools: &ToolCapabilities, model: &str) -> ToolChoice {
    ToolChoice {
        web_search: supports_web_search(model).then_some(tools.web_search),
        news_search: tools.news_search,
        videos_search: tools.videos_search,
        local_search: tools.local_search,
        weather_forecast: tools.weather_forecast,
    }
}

/// User message content. Images are dropped for models without image support,
/// and incomplete attachments are skipped.
pub fn format_content(text: &str, images: &[ImageAttachment], model: &str) -> MessageContent {
    if images.is_empty() || !supports_images(model) {
        return MessageContent::Text(text.to_string());
    }

    let mut parts = Vec::with_capacity(images.len() + 1);
    parts.push(ContentPart::Text {
        text: text.to_string(),
    });
    parts.extend(
        images
            .iter()
            .filter(|img| img.is_complete())
            .map(|img| ContentPart::Image {
                mime_type: img.mime_type.clone(),
                image: img.data_uri(),
            }),
    );

    MessageContent::Parts(parts)
}

pub fn build_payload(model: &str, tools: &ToolCapabilities, history: &[Message]) -> ChatPayload {
    ChatPayload {
        model: model.to_string(),
        metadata: Metadata {
            tool_choice: build_tool_choice(tools, model),
        },
        messages: history.to_vec(),
        can_use_tools: true,
    }
}
