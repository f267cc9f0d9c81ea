use indexmap::IndexMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Generate,
    Edit,
}

/// How a canvas resolution string is turned into the upstream size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizePolicy {
    /// One of the fixed OpenAI sizes, `1024x1024` when unrecognized.
    OpenAiPreset,
    /// Explicit width and height parsed from `WxH`.
    Dimensions,
    Ignored,
}

/// Which seed ends up in the response metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedReporting {
    /// The vendor does not report seeds; metadata carries 0.
    Zero,
    Vendor,
    Omitted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointProfile {
    pub upstream_model: String,
    pub reported_model: String,
    pub sizing: SizePolicy,
    pub seed: SeedReporting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub generate: Option<EndpointProfile>,
    pub edit: Option<EndpointProfile>,
}

impl ModelSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.profile(capability).is_some()
    }

    pub fn profile(&self, capability: Capability) -> Option<&EndpointProfile> {
        match capability {
            Capability::Generate => self.generate.as_ref(),
            Capability::Edit => self.edit.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ModelAlias {
    capability: Capability,
    target: String,
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
    aliases: IndexMap<String, Vec<ModelAlias>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        let builtin = models.is_none();
        let mut registry = Self {
            models: models.unwrap_or_else(default_models),
            aliases: IndexMap::new(),
        };
        if builtin {
            registry.add_alias("gpt-image-1", Capability::Generate, "dall-e-3");
        }
        registry
    }

    /// Lets `name` stand in for `target` when resolving `capability`.
    pub fn add_alias(&mut self, name: &str, capability: Capability, target: &str) {
        self.aliases
            .entry(name.to_string())
            .or_default()
            .push(ModelAlias {
                capability,
                target: target.to_string(),
            });
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    /// Direct lookup only; aliases are ignored.
    pub fn ensure(&self, name: &str, capability: Capability) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }

    /// Lookup that falls back to an alias registered for `capability`.
    pub fn resolve(&self, name: &str, capability: Capability) -> Option<&ModelSpec> {
        if let Some(model) = self.get(name).filter(|model| model.supports(capability)) {
            return Some(model);
        }
        self.aliases
            .get(name)?
            .iter()
            .find(|alias| alias.capability == capability)
            .and_then(|alias| self.get(&alias.target))
            .filter(|model| model.supports(capability))
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert =
        |name: &str, provider: &str, generate: Option<EndpointProfile>, edit: Option<EndpointProfile>| {
            map.insert(
                name.to_string(),
                ModelSpec {
                    name: name.to_string(),
                    provider: provider.to_string(),
                    generate,
                    edit,
                },
            );
        };

    insert(
        "dall-e-3",
        "openai",
        Some(EndpointProfile {
            upstream_model: "dall-e-3".to_string(),
            reported_model: "dall-e-3".to_string(),
            sizing: SizePolicy::OpenAiPreset,
            seed: SeedReporting::Zero,
        }),
        None,
    );
    insert(
        "stable-diffusion",
        "stability",
        Some(EndpointProfile {
            upstream_model: "stable-diffusion-xl-1024-v1-0".to_string(),
            reported_model: "stable-diffusion-xl".to_string(),
            sizing: SizePolicy::Dimensions,
            seed: SeedReporting::Vendor,
        }),
        None,
    );
    insert(
        "gpt-image-1",
        "openai",
        None,
        Some(EndpointProfile {
            upstream_model: "gpt-image-1".to_string(),
            reported_model: "gpt-image-1".to_string(),
            sizing: SizePolicy::Ignored,
            seed: SeedReporting::Omitted,
        }),
    );

    map
}
