//! Authentication types and the environment variables they map to.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Environment variable holding the Anthropic API key.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
/// Environment variable selecting the model.
pub const ANTHROPIC_MODEL_ENV: &str = "ANTHROPIC_MODEL";
/// Switch that routes the agent through AWS Bedrock.
pub const USE_BEDROCK_ENV: &str = "CLAUDE_CODE_USE_BEDROCK";
/// AWS region for Bedrock.
pub const AWS_REGION_ENV: &str = "AWS_REGION";
/// Switch that routes the agent through Google Vertex AI.
pub const USE_VERTEX_ENV: &str = "CLAUDE_CODE_USE_VERTEX";
/// Cloud ML region for Vertex AI.
pub const CLOUD_ML_REGION_ENV: &str = "CLOUD_ML_REGION";
/// Google Cloud project for Vertex AI.
pub const VERTEX_PROJECT_ID_ENV: &str = "ANTHROPIC_VERTEX_PROJECT_ID";

/// Placeholder printed instead of a secret.
pub const REDACTED: &str = "<redacted>";

/// How the agent authenticates with the model provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthKind {
    /// Direct Anthropic API key.
    #[default]
    AnthropicApi,
    /// AWS Bedrock; requires a region.
    Bedrock,
    /// Google Vertex AI; requires a region and a project id.
    Vertex,
}

impl AuthKind {
    /// Provider name used in error messages.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::AnthropicApi => "Anthropic API",
            Self::Bedrock => "AWS Bedrock",
            Self::Vertex => "Google Vertex AI",
        }
    }
}

/// Credentials and provider settings supplied by the caller.
///
/// Every field is optional here; [`AuthResolver`](super::AuthResolver) fills
/// gaps from the environment and rejects what is still missing.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Which provider to authenticate against.
    #[serde(rename = "auth")]
    pub kind: AuthKind,
    /// Anthropic API key.
    pub api_key: Option<String>,
    /// AWS region or Cloud ML region.
    pub region: Option<String>,
    /// Google Cloud project id.
    pub project_id: Option<String>,
    /// Model identifier in provider-specific format.
    pub model: Option<String>,
}

impl AuthSettings {
    #[must_use]
    pub fn new(kind: AuthKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("kind", &self.kind)
            .field("api_key", &self.api_key.as_ref().map(|_| REDACTED))
            .field("region", &self.region)
            .field("project_id", &self.project_id)
            .field("model", &self.model)
            .finish()
    }
}

/// Environment overlay with secret values replaced by [`REDACTED`], for `Debug` output.
pub(crate) fn redacted_vars(vars: &BTreeMap<String, String>) -> BTreeMap<&str, &str> {
    vars.iter()
        .map(|(name, value)| {
            let value = if name == ANTHROPIC_API_KEY_ENV {
                REDACTED
            } else {
                value.as_str()
            };
            (name.as_str(), value)
        })
        .collect()
}
