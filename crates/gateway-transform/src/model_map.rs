//! Public-to-upstream model name mapping (§4.1.1 "Model mapping"). A fixed
//! table translates well-known OpenAI-style model names to the Gemini model
//! that serves them; anything already shaped like a Gemini model name passes
//! through unchanged, and anything else falls back to a configured default.

use gateway_protocol::openai::get_model::types::{Model, ModelObjectType};

/// (public name, upstream Gemini model) pairs, grounded on the richest draft's
/// `MODEL_MAPPING` table.
const MODEL_MAPPING: &[(&str, &str)] = &[
    ("gpt-4o", "gemini-2.5-pro"),
    ("gpt-4o-mini", "gemini-2.5-flash"),
    ("gpt-4-turbo", "gemini-2.5-pro"),
    ("gpt-4", "gemini-2.5-pro"),
    ("gpt-3.5-turbo", "gemini-2.5-flash"),
    ("gpt-4-1106-preview", "gemini-2.5-pro"),
    ("gpt-4-0125-preview", "gemini-2.5-pro"),
    ("gpt-3.5-turbo-1106", "gemini-2.5-flash"),
];

/// Default upstream model for public names the table does not recognize.
pub const DEFAULT_UPSTREAM_MODEL: &str = "gemini-2.5-flash";

/// Maps a public model name to the upstream Gemini model name. A name that
/// already looks like a Gemini model (starts with `gemini` or `models/gemini`)
/// is forwarded unchanged so clients that already speak Gemini model names
/// are not silently redirected to the default.
pub fn map_model(public_model: &str) -> String {
    let bare = public_model.strip_prefix("models/").unwrap_or(public_model);
    if bare.starts_with("gemini") {
        return bare.to_string();
    }
    MODEL_MAPPING
        .iter()
        .find(|(public, _)| *public == public_model)
        .map(|(_, upstream)| upstream.to_string())
        .unwrap_or_else(|| DEFAULT_UPSTREAM_MODEL.to_string())
}

/// The public model catalog exposed by `GET /v1/models` and `GET
/// /v1/models/{model}` — one descriptor per entry in the mapping table.
pub fn model_catalog(created: i64) -> Vec<Model> {
    MODEL_MAPPING
        .iter()
        .map(|(public, _)| Model {
            id: public.to_string(),
            created: Some(created),
            object: ModelObjectType::Model,
            owned_by: "openai-emulated".to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_public_names_map_to_their_gemini_model() {
        assert_eq!(map_model("gpt-4o"), "gemini-2.5-pro");
        assert_eq!(map_model("gpt-3.5-turbo"), "gemini-2.5-flash");
    }

    #[test]
    fn unknown_public_names_fall_back_to_the_default() {
        assert_eq!(map_model("some-future-model"), DEFAULT_UPSTREAM_MODEL);
    }

    #[test]
    fn gemini_model_names_pass_through_unchanged() {
        assert_eq!(map_model("gemini-2.5-flash"), "gemini-2.5-flash");
        assert_eq!(map_model("models/gemini-1.5-pro-latest"), "gemini-1.5-pro-latest");
    }

    #[test]
    fn catalog_covers_every_mapped_public_name() {
        let catalog = model_catalog(0);
        assert_eq!(catalog.len(), MODEL_MAPPING.len());
        assert!(catalog.iter().any(|m| m.id == "gpt-4o"));
    }
}
