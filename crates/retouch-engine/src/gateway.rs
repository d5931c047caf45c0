use anyhow::Result;
use retouch_contracts::restoration::{ImageRef, PlanStep, RestoreError};

use crate::config::GatewayConfig;
use crate::dryrun::DryrunGateway;
use crate::gemini::GeminiGateway;

/// The remote service a restoration run talks to.
///
/// Calls block until the service answers. Implementations report transport,
/// status and payload problems as errors; the run loop decides what they mean.
pub trait RestorationGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Ordered restoration goals for `image`.
    fn request_plan(&self, image: &ImageRef, instructions: &str) -> Result<Vec<PlanStep>>;

    /// Edit instruction for one goal, written against the image as it is now.
    fn request_edit_prompt(&self, image: &ImageRef, goal: &str, instructions: &str)
        -> Result<String>;

    /// Applies `prompt` to `image` and returns the edited image.
    fn request_image_edit(&self, image: &ImageRef, prompt: &str) -> Result<ImageRef>;
}

pub const GATEWAY_PROVIDERS: &[&str] = &["gemini", "dryrun"];

/// Builds the gateway named by the config's resolved models. Credentials and
/// model choices are checked here, before any run starts.
pub fn build_gateway(config: &GatewayConfig) -> Result<Box<dyn RestorationGateway>, RestoreError> {
    let resolved = config.resolve()?;
    match resolved.provider.as_str() {
        "gemini" => Ok(Box::new(GeminiGateway::new(config, &resolved)?)),
        "dryrun" => Ok(Box::new(DryrunGateway::new())),
        other => Err(RestoreError::Config(format!(
            "no gateway for provider '{other}' (known: {})",
            GATEWAY_PROVIDERS.join(", ")
        ))),
    }
}

/// Flattens an error chain into one line, dropping repeated causes.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use retouch_contracts::restoration::RestoreError;

    use super::{build_gateway, error_chain_text, truncate_text};
    use crate::config::GatewayConfig;

    #[test]
    fn error_chain_text_joins_distinct_causes() {
        let err = anyhow!("connection reset")
            .context("Gemini request failed")
            .context("Gemini request failed");
        assert_eq!(
            error_chain_text(&err, 200),
            "Gemini request failed | caused by: connection reset"
        );
    }

    #[test]
    fn truncate_text_marks_cut() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }

    #[test]
    fn dryrun_models_build_without_credentials() {
        let config = GatewayConfig {
            text_model: Some("dryrun-text-1".to_string()),
            ..GatewayConfig::default()
        };
        let gateway = build_gateway(&config).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(gateway.name(), "dryrun");
    }

    #[test]
    fn gemini_without_key_is_a_config_error() {
        let config = GatewayConfig::default();
        match build_gateway(&config) {
            Err(RestoreError::Config(message)) => assert!(message.contains("GEMINI_API_KEY")),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("gateway built without credentials"),
        }
    }
}
