use indexmap::IndexMap;

/// Reads images and answers in text: used for planning and prompt writing.
pub const CAP_VISION: &str = "vision";
/// Takes an image plus an instruction and returns an edited image.
pub const CAP_IMAGE_EDIT: &str = "image_edit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Known models in preference order; the first model with a capability is
/// the default for it.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name.trim())
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    /// Default model for `capability` among those served by `provider`.
    pub fn default_for(&self, capability: &str, provider: &str) -> Option<ModelSpec> {
        self.models
            .values()
            .find(|model| model.provider == provider && model.supports(capability))
            .cloned()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
            },
        );
    };

    insert("gemini-2.5-flash", "gemini", &["text", CAP_VISION]);
    insert("gemini-2.5-pro", "gemini", &["text", CAP_VISION]);
    insert("gemini-3-pro-preview", "gemini", &["text", CAP_VISION]);
    insert("gemini-2.5-flash-image", "gemini", &[CAP_IMAGE_EDIT]);
    insert("gemini-2.5-flash-image-preview", "gemini", &[CAP_IMAGE_EDIT]);
    insert("gemini-3-pro-image-preview", "gemini", &[CAP_IMAGE_EDIT]);
    insert("dryrun-text-1", "dryrun", &["text", CAP_VISION]);
    insert("dryrun-image-1", "dryrun", &[CAP_IMAGE_EDIT]);

    map
}

#[cfg(test)]
mod tests {
    use super::{ModelRegistry, CAP_IMAGE_EDIT, CAP_VISION};

    #[test]
    fn defaults_prefer_gemini_models() {
        let registry = ModelRegistry::new(None);
        assert_eq!(registry.by_capability(CAP_VISION)[0].name, "gemini-2.5-flash");
        assert_eq!(
            registry.by_capability(CAP_IMAGE_EDIT)[0].name,
            "gemini-2.5-flash-image"
        );
    }

    #[test]
    fn every_default_model_serves_one_side_of_the_run() {
        let registry = ModelRegistry::new(None);
        assert_eq!(registry.by_capability(CAP_VISION).len(), 4);
        assert_eq!(registry.by_capability(CAP_IMAGE_EDIT).len(), 4);
        assert!(registry
            .by_capability(CAP_IMAGE_EDIT)
            .iter()
            .all(|model| !model.supports(CAP_VISION)));
    }

    #[test]
    fn default_for_respects_provider() {
        let registry = ModelRegistry::new(None);
        let text = registry.default_for(CAP_VISION, "dryrun").map(|spec| spec.name);
        assert_eq!(text.as_deref(), Some("dryrun-text-1"));
        assert!(registry.default_for(CAP_VISION, "openai").is_none());
    }

    #[test]
    fn ensure_checks_capability() {
        let registry = ModelRegistry::new(None);
        assert!(registry.ensure("gemini-2.5-flash", CAP_VISION).is_some());
        assert!(registry.ensure("gemini-2.5-flash", CAP_IMAGE_EDIT).is_none());
        assert!(registry.ensure(" dryrun-image-1 ", CAP_IMAGE_EDIT).is_some());
        assert!(registry.ensure("missing", CAP_VISION).is_none());
    }
}
