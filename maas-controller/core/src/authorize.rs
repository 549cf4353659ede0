use std::fmt;

/// What the registry knows about a model for authorization purposes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelAccess {
    pub namespace: String,
    pub name: String,
    /// The raw tier allowlist annotation.
    pub tiers: Option<String>,
}

/// Looks up models by name across all namespaces.
pub trait DiscoverModels {
    /// Returns every model with the given name, ordered by namespace.
    fn models_named(&self, name: &str) -> Vec<ModelAccess>;
}

/// A parsed tier allowlist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllowedTiers {
    /// No annotation, an empty annotation, `null` or `[]`.
    Any,
    Only(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthorizeError {
    #[error("invalid path format: expected /llm/{{model-name}}/...")]
    MalformedPath,

    #[error("model name not found in path")]
    MissingModelName,

    #[error("model not found: {0}")]
    NotFound(String),

    #[error("invalid tier annotation format on {namespace}/{name}: {source}")]
    InvalidAllowlist {
        namespace: String,
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Extracts the model name from a `/llm/{model-name}/...` request path.
pub fn model_name_from_path(path: &str) -> Result<&str, AuthorizeError> {
    let mut parts = path.strip_prefix('/').unwrap_or(path).split('/');
    match (parts.next(), parts.next()) {
        (Some("llm"), Some("")) => Err(AuthorizeError::MissingModelName),
        (Some("llm"), Some(name)) => Ok(name),
        _ => Err(AuthorizeError::MalformedPath),
    }
}

/// Decides whether `tier` may reach the model addressed by `path`.
///
/// When several namespaces hold a model with the same name, each of them is
/// evaluated and the tier is allowed only if all of them allow it.
pub fn authorize<D>(models: &D, path: &str, tier: &str) -> Result<Decision, AuthorizeError>
where
    D: DiscoverModels + ?Sized,
{
    let name = model_name_from_path(path)?;
    let matches = models.models_named(name);
    if matches.is_empty() {
        return Err(AuthorizeError::NotFound(name.to_string()));
    }
    if matches.len() > 1 {
        tracing::debug!(
            model = %name,
            namespaces = ?matches.iter().map(|m| &m.namespace).collect::<Vec<_>>(),
            "Model name is ambiguous; every match must allow the tier"
        );
    }

    let mut decision = Decision::allow();
    for model in matches {
        let allowed = AllowedTiers::parse(model.tiers.as_deref()).map_err(|source| {
            AuthorizeError::InvalidAllowlist {
                namespace: model.namespace.clone(),
                name: model.name.clone(),
                source,
            }
        })?;
        tracing::trace!(namespace = %model.namespace, model = %name, ?allowed, %tier);
        if decision.allowed && !allowed.permits(tier) {
            decision = Decision::deny(tier);
        }
    }
    Ok(decision)
}

// === impl AllowedTiers ===

impl AllowedTiers {
    pub fn parse(annotation: Option<&str>) -> Result<Self, serde_json::Error> {
        let annotation = match annotation {
            None | Some("") => return Ok(Self::Any),
            Some(a) => a,
        };
        // Whitespace alone is not valid JSON and is reported as malformed.
        match serde_json::from_str::<Option<Vec<String>>>(annotation)? {
            Some(tiers) if !tiers.is_empty() => Ok(Self::Only(tiers)),
            _ => Ok(Self::Any),
        }
    }

    pub fn permits(&self, tier: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Only(tiers) => tiers.iter().any(|t| t == tier),
        }
    }
}

// === impl Decision ===

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(tier: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(format!("user tier '{tier}' not in model's allowed tiers")),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.allowed, &self.reason) {
            (true, _) => f.write_str("allowed"),
            (false, Some(reason)) => write!(f, "denied: {reason}"),
            (false, None) => f.write_str("denied"),
        }
    }
}
