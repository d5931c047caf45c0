use std::env;
use std::time::Duration;

use retouch_contracts::models::{
    ModelRegistry, ModelSelector, ModelSpec, CAP_IMAGE_EDIT, CAP_VISION,
};
use retouch_contracts::restoration::RestoreError;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_REQUEST_TIMEOUT_S: f64 = 120.0;
pub const API_KEY_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

/// Everything needed to build a gateway. Environment first, CLI flags on top.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub text_model: Option<String>,
    pub image_model: Option<String>,
    pub request_timeout: Duration,
}

/// Models picked for a run, all served by `provider`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModels {
    pub provider: String,
    pub text_model: String,
    pub image_model: String,
    pub notes: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            text_model: None,
            image_model: None,
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_S),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    /// Builds a config from any key lookup; values are trimmed and blank
    /// values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();
        Self {
            api_key: API_KEY_ENV_VARS.iter().find_map(|key| get(*key)),
            api_base: get("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            text_model: get("RETOUCH_TEXT_MODEL"),
            image_model: get("RETOUCH_IMAGE_MODEL"),
            request_timeout: get("RETOUCH_REQUEST_TIMEOUT")
                .and_then(|value| value.parse::<f64>().ok())
                .filter(|value| value.is_finite())
                .map(|value| Duration::from_secs_f64(value.clamp(5.0, 600.0)))
                .unwrap_or(defaults.request_timeout),
        }
    }

    pub fn with_text_model(mut self, model: Option<String>) -> Self {
        if let Some(model) = model.filter(|value| !value.trim().is_empty()) {
            self.text_model = Some(model.trim().to_string());
        }
        self
    }

    pub fn with_image_model(mut self, model: Option<String>) -> Self {
        if let Some(model) = model.filter(|value| !value.trim().is_empty()) {
            self.image_model = Some(model.trim().to_string());
        }
        self
    }

    /// Picks the text and image models. An explicitly requested, known model
    /// decides the provider; the other model defaults within that provider.
    pub fn resolve(&self) -> Result<ResolvedModels, RestoreError> {
        let registry = ModelRegistry::new(None);
        let hint = [
            (self.text_model.as_deref(), CAP_VISION),
            (self.image_model.as_deref(), CAP_IMAGE_EDIT),
        ]
        .into_iter()
        .find_map(|(requested, capability)| {
            requested.and_then(|name| registry.ensure(name, capability))
        })
        .map(|spec| spec.provider);

        let mut notes = Vec::new();
        let text = pick_model(
            &registry,
            self.text_model.as_deref(),
            CAP_VISION,
            hint.as_deref(),
            &mut notes,
        )?;
        let image = pick_model(
            &registry,
            self.image_model.as_deref(),
            CAP_IMAGE_EDIT,
            hint.as_deref(),
            &mut notes,
        )?;
        if text.provider != image.provider {
            return Err(RestoreError::Config(format!(
                "text model '{}' ({}) and image model '{}' ({}) must use the same provider",
                text.name, text.provider, image.name, image.provider
            )));
        }
        Ok(ResolvedModels {
            provider: text.provider,
            text_model: text.name,
            image_model: image.name,
            notes,
        })
    }
}

fn pick_model(
    registry: &ModelRegistry,
    requested: Option<&str>,
    capability: &str,
    provider_hint: Option<&str>,
    notes: &mut Vec<String>,
) -> Result<ModelSpec, RestoreError> {
    if let Some(spec) = requested.and_then(|name| registry.ensure(name, capability)) {
        return Ok(spec);
    }
    let fallback = match provider_hint.and_then(|provider| registry.default_for(capability, provider)) {
        Some(spec) => spec,
        None => {
            ModelSelector::new(Some(registry.clone()))
                .select(None, capability)
                .map_err(RestoreError::Config)?
                .model
        }
    };
    if let Some(requested) = requested {
        notes.push(format!(
            "Requested model '{requested}' unavailable for capability '{capability}'; using '{}'.",
            fallback.name
        ));
    }
    Ok(fallback)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use retouch_contracts::restoration::RestoreError;

    use super::{GatewayConfig, DEFAULT_API_BASE};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn reads_keys_in_precedence_order() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "   "),
            ("GOOGLE_API_KEY", "google-key"),
            ("API_KEY", "plain-key"),
            ("GEMINI_API_BASE", "http://localhost:9000/v1beta/"),
            ("RETOUCH_REQUEST_TIMEOUT", "1"),
        ]));
        assert_eq!(config.api_key.as_deref(), Some("google-key"));
        assert_eq!(config.api_base, "http://localhost:9000/v1beta");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = GatewayConfig::from_lookup(lookup(&[("RETOUCH_REQUEST_TIMEOUT", "soon")]));
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn flags_override_environment_models() {
        let config = GatewayConfig::from_lookup(lookup(&[("RETOUCH_TEXT_MODEL", "gemini-2.5-pro")]))
            .with_text_model(Some("gemini-2.5-flash".to_string()))
            .with_image_model(Some("  ".to_string()));
        assert_eq!(config.text_model.as_deref(), Some("gemini-2.5-flash"));
        assert_eq!(config.image_model, None);
    }

    #[test]
    fn resolve_defaults_to_gemini_pair() -> anyhow::Result<()> {
        let resolved = GatewayConfig::default().resolve()?;
        assert_eq!(resolved.provider, "gemini");
        assert_eq!(resolved.text_model, "gemini-2.5-flash");
        assert_eq!(resolved.image_model, "gemini-2.5-flash-image");
        assert!(resolved.notes.is_empty());
        Ok(())
    }

    #[test]
    fn explicit_model_pulls_the_other_into_its_provider() -> anyhow::Result<()> {
        let config = GatewayConfig {
            image_model: Some("dryrun-image-1".to_string()),
            ..GatewayConfig::default()
        };
        let resolved = config.resolve()?;
        assert_eq!(resolved.provider, "dryrun");
        assert_eq!(resolved.text_model, "dryrun-text-1");
        Ok(())
    }

    #[test]
    fn unknown_model_falls_back_with_a_note() -> anyhow::Result<()> {
        let config = GatewayConfig {
            text_model: Some("gpt-4o".to_string()),
            ..GatewayConfig::default()
        };
        let resolved = config.resolve()?;
        assert_eq!(resolved.text_model, "gemini-2.5-flash");
        assert_eq!(resolved.notes.len(), 1);
        assert!(resolved.notes[0].contains("gpt-4o"));
        Ok(())
    }

    #[test]
    fn mixed_providers_are_rejected() {
        let config = GatewayConfig {
            text_model: Some("dryrun-text-1".to_string()),
            image_model: Some("gemini-2.5-flash-image".to_string()),
            ..GatewayConfig::default()
        };
        assert!(matches!(config.resolve(), Err(RestoreError::Config(_))));
    }
}
