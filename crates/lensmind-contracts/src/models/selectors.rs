use super::registry::{Capability, ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: Capability,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        if let Some(name) = requested {
            if let Some(model) = self.registry.ensure(name, capability) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(name.to_string()),
                    fallback_reason: None,
                });
            }
        }

        let Some(model) = self.registry.by_capability(capability).into_iter().next() else {
            return Err(format!("No models available for capability '{capability}'."));
        };
        let fallback_reason = match requested {
            Some(name) => format!(
                "Requested model '{name}' unavailable for capability '{capability}'; using '{}'.",
                model.name
            ),
            None => format!("No {capability} model specified; using '{}'.", model.name),
        };
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason: Some(fallback_reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::ModelSelector;
    use crate::models::{Capability, ModelRegistry, ModelSpec};

    #[test]
    fn default_registry_prefers_imagen_and_gemini() {
        let selector = ModelSelector::new(None);
        let image = selector.select(None, Capability::Image).unwrap();
        assert_eq!(image.model.name, "imagen-3.0-generate-002");
        let vision = selector.select(None, Capability::Vision).unwrap();
        assert_eq!(vision.model.name, "gemini-2.0-flash");
        assert_eq!(
            vision.fallback_reason.as_deref(),
            Some("No vision model specified; using 'gemini-2.0-flash'.")
        );
    }

    #[test]
    fn explicit_model_is_honoured_without_fallback() {
        let selection = ModelSelector::new(None)
            .select(Some(" dryrun-image-1 "), Capability::Image)
            .unwrap();
        assert_eq!(selection.model.name, "dryrun-image-1");
        assert!(selection.model.is_dryrun());
        assert_eq!(selection.fallback_reason, None);
    }

    #[test]
    fn wrong_capability_falls_back_with_reason() {
        let selection = ModelSelector::new(None)
            .select(Some("gemini-2.0-flash"), Capability::Image)
            .unwrap();
        assert_eq!(selection.model.name, "imagen-3.0-generate-002");
        assert_eq!(selection.requested.as_deref(), Some("gemini-2.0-flash"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some(
                "Requested model 'gemini-2.0-flash' unavailable for capability 'image'; using 'imagen-3.0-generate-002'."
            )
        );
    }

    #[test]
    fn empty_registry_reports_missing_capability() {
        let mut models = IndexMap::new();
        models.insert(
            "only-image".to_string(),
            ModelSpec::new("only-image", "dryrun", &[Capability::Image]),
        );
        let err = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(None, Capability::Vision)
            .unwrap_err();
        assert_eq!(err, "No models available for capability 'vision'.");
    }
}
