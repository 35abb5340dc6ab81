use serde::{Deserialize, Serialize};

/// Models served by the chat endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Model {
    #[default]
    Gpt4oMini,
    Claude3Haiku,
    Llama3_3_70b,
    MistralSmall3,
    O4Mini,
}

impl Model {
    pub fn id(&self) -> &'static str {
        match self {
            Model::Gpt4oMini => "gpt-4o-mini",
            Model::Claude3Haiku => "claude-3-haiku-20240307",
            Model::Llama3_3_70b => "meta-llama/Llama-3.3-70B-Instruct-Turbo",
            Model::MistralSmall3 => "mistralai/Mistral-Small-24B-Instruct-2501",
            Model::O4Mini => "o4-mini",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Model::Gpt4oMini => "GPT-4o mini",
            Model::Claude3Haiku => "Claude 3 Haiku",
            Model::Llama3_3_70b => "Llama 3.3 70B",
            Model::MistralSmall3 => "Mistral Small 3",
            Model::O4Mini => "o4-mini",
        }
    }

    pub fn all() -> &'static [Model] {
        &[
            Model::Gpt4oMini,
            Model::Claude3Haiku,
            Model::Llama3_3_70b,
            Model::MistralSmall3,
            Model::O4Mini,
        ]
    }

    pub fn from_id(id: &str) -> Option<Model> {
        Model::all().iter().copied().find(|m| m.id() == id)
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// The only model the service accepts the `WebSearch` tool for.
pub const WEB_SEARCH_MODEL: &str = "gpt-4o-mini";

const IMAGE_CAPABLE_MODELS: &[&str] = &["gpt-4o-mini"];
const ADVANCED_TOOL_MODELS: &[&str] = &["gpt-4o-mini"];

pub fn supports_images(model_id: &str) -> bool {
    IMAGE_CAPABLE_MODELS.contains(&model_id)
}

pub fn supports_advanced_tools(model_id: &str) -> bool {
    ADVANCED_TOOL_MODELS.contains(&model_id)
}

pub fn supports_web_search(model_id: &str) -> bool {
    model_id == WEB_SEARCH_MODEL
}

/// All model identifiers, in catalogue order.
pub fn available_models() -> Vec<&'static str> {
    Model::all().iter().map(Model::id).collect()
}

/// Resolve short aliases ("gpt", "claude", "llama", ...) to full model identifiers.
/// Unknown names pass through untouched so new server-side models stay usable.
pub fn resolve_model_alias(model: &str) -> &str {
    match model.to_ascii_lowercase().as_str() {
        "gpt" | "gpt-4o" | "4o-mini" | "mini" => Model::Gpt4oMini.id(),
        "claude" | "haiku" | "claude-3-haiku" => Model::Claude3Haiku.id(),
        "llama" | "llama-3.3" | "llama3" => Model::Llama3_3_70b.id(),
        "mistral" | "mixtral" | "mistral-small" => Model::MistralSmall3.id(),
        "o4" => Model::O4Mini.id(),
        _ => model,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_ids_round_trip() {
        for model in Model::all() {
            assert_eq!(Model::from_id(model.id()), Some(*model));
        }
        assert_eq!(Model::from_id("gpt-5"), None);
    }

    #[test]
    fn test_capabilities_only_for_gpt4o_mini() {
        assert!(supports_images("gpt-4o-mini"));
        assert!(supports_advanced_tools("gpt-4o-mini"));
        assert!(supports_web_search("gpt-4o-mini"));

        for id in ["claude-3-haiku-20240307", "o4-mini", "unknown"] {
            assert!(!supports_images(id));
            assert!(!supports_advanced_tools(id));
            assert!(!supports_web_search(id));
        }
    }

    #[test]
    fn test_resolve_model_alias() {
        assert_eq!(resolve_model_alias("claude"), "claude-3-haiku-20240307");
        assert_eq!(resolve_model_alias("Llama"), "meta-llama/Llama-3.3-70B-Instruct-Turbo");
        assert_eq!(resolve_model_alias("o4"), "o4-mini");
        assert_eq!(resolve_model_alias("some-new-model"), "some-new-model");
    }

    #[test]
    fn test_available_models() {
        let models = available_models();
        assert_eq!(models.len(), 5);
        assert_eq!(models[0], "gpt-4o-mini");
    }
}
