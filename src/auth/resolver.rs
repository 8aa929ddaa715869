//! Layered credential resolution: explicit field, then environment, then failure.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::types::redacted_vars;
use super::{
    AuthKind, AuthSettings, ANTHROPIC_API_KEY_ENV, ANTHROPIC_MODEL_ENV, AWS_REGION_ENV,
    CLOUD_ML_REGION_ENV, USE_BEDROCK_ENV, USE_VERTEX_ENV, VERTEX_PROJECT_ID_ENV,
};
use crate::error::{Error, Result};

/// Read-only view of environment variables.
pub trait EnvSource {
    /// Look up a variable, returning `None` when unset.
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl<T: EnvSource + ?Sized> EnvSource for &T {
    fn var(&self, name: &str) -> Option<String> {
        (**self).var(name)
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl EnvSource for BTreeMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Environment overlay applied on top of the inherited environment of one invocation.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    vars: BTreeMap<String, String>,
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("vars", &redacted_vars(&self.vars))
            .finish()
    }
}

impl AuthContext {
    /// Get a variable from the overlay.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Returns true if the overlay sets the variable.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Iterate over the overlay in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn into_vars(self) -> BTreeMap<String, String> {
        self.vars
    }

    fn set(&mut self, name: &str, value: impl Into<String>) {
        self.vars.insert(name.to_string(), value.into());
    }
}

/// Resolves [`AuthSettings`] into an [`AuthContext`].
#[derive(Debug, Clone, Default)]
pub struct AuthResolver<E = ProcessEnv> {
    env: E,
}

impl AuthResolver<ProcessEnv> {
    /// Resolver backed by the process environment.
    #[must_use]
    pub fn new() -> Self {
        Self { env: ProcessEnv }
    }
}

impl<E: EnvSource> AuthResolver<E> {
    /// Resolver backed by a custom environment source.
    pub fn with_env(env: E) -> Self {
        Self { env }
    }

    /// Resolve the settings into an environment overlay.
    ///
    /// # Errors
    ///
    /// Returns `Error::Authentication` naming the first required field that is
    /// neither set explicitly nor present in the environment.
    pub fn resolve(&self, settings: &AuthSettings) -> Result<AuthContext> {
        let mut ctx = AuthContext::default();
        let kind = settings.kind;

        match kind {
            AuthKind::AnthropicApi => {
                let key = self.require(
                    settings.api_key.as_deref(),
                    ANTHROPIC_API_KEY_ENV,
                    "api_key",
                    &format!("API key is required for {} authentication", kind.display_name()),
                )?;
                ctx.set(ANTHROPIC_API_KEY_ENV, key);
            }
            AuthKind::Bedrock => {
                let region = self.require(
                    settings.region.as_deref(),
                    AWS_REGION_ENV,
                    "region",
                    &format!("Region is required for {} authentication", kind.display_name()),
                )?;
                ctx.set(USE_BEDROCK_ENV, "1");
                ctx.set(AWS_REGION_ENV, region);
            }
            AuthKind::Vertex => {
                let region = self.require(
                    settings.region.as_deref(),
                    CLOUD_ML_REGION_ENV,
                    "region",
                    &format!("Region is required for {} authentication", kind.display_name()),
                )?;
                let project_id = self.require(
                    settings.project_id.as_deref(),
                    VERTEX_PROJECT_ID_ENV,
                    "project_id",
                    &format!(
                        "Project ID is required for {} authentication",
                        kind.display_name()
                    ),
                )?;
                ctx.set(USE_VERTEX_ENV, "1");
                ctx.set(CLOUD_ML_REGION_ENV, region);
                ctx.set(VERTEX_PROJECT_ID_ENV, project_id);
            }
        }

        if let Some(model) = self.lookup(settings.model.as_deref(), ANTHROPIC_MODEL_ENV) {
            ctx.set(ANTHROPIC_MODEL_ENV, model);
        }

        tracing::debug!(
            auth = ?kind,
            vars = ?ctx.vars.keys().collect::<Vec<_>>(),
            "Resolved authentication overlay"
        );
        Ok(ctx)
    }

    fn lookup(&self, explicit: Option<&str>, env_name: &str) -> Option<String> {
        explicit
            .filter(|v| !v.trim().is_empty())
            .map(str::to_string)
            .or_else(|| self.env.var(env_name).filter(|v| !v.trim().is_empty()))
    }

    fn require(
        &self,
        explicit: Option<&str>,
        env_name: &str,
        field: &'static str,
        message: &str,
    ) -> Result<String> {
        self.lookup(explicit, env_name)
            .ok_or_else(|| Error::Authentication {
                field,
                message: format!("{message} (set `{field}` or {env_name})"),
            })
    }
}
