//! Per-request provider credentials and their mapping onto worker environment
//! variables.
//!
//! Several providers speak the OpenAI wire protocol; those reuse the
//! `OPENAI_API_KEY` / `OPENAI_BASE_URL` pair and differ only in their default
//! base URL.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Recognized model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    Openai,
    Openrouter,
    Google,
    Mistral,
    Xai,
    Deepseek,
    Groq,
    Together,
}

/// Environment variable names and default endpoint for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderEnv {
    pub api_key_var: &'static str,
    pub base_url_var: &'static str,
    pub default_base_url: Option<&'static str>,
}

const OPENAI_KEY: &str = "OPENAI_API_KEY";
const OPENAI_BASE: &str = "OPENAI_BASE_URL";

pub const XAI_BASE_URL: &str = "https://api.x.ai/v1";
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const TOGETHER_BASE_URL: &str = "https://api.together.xyz/v1";

const fn own(api_key_var: &'static str, base_url_var: &'static str) -> ProviderEnv {
    ProviderEnv {
        api_key_var,
        base_url_var,
        default_base_url: None,
    }
}

const fn openai_compatible(default_base_url: &'static str) -> ProviderEnv {
    ProviderEnv {
        api_key_var: OPENAI_KEY,
        base_url_var: OPENAI_BASE,
        default_base_url: Some(default_base_url),
    }
}

impl ProviderKind {
    pub const ALL: [Self; 9] = [
        Self::Anthropic,
        Self::Openai,
        Self::Openrouter,
        Self::Google,
        Self::Mistral,
        Self::Xai,
        Self::Deepseek,
        Self::Groq,
        Self::Together,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Openrouter => "openrouter",
            Self::Google => "google",
            Self::Mistral => "mistral",
            Self::Xai => "xai",
            Self::Deepseek => "deepseek",
            Self::Groq => "groq",
            Self::Together => "together",
        }
    }

    /// Parse a provider name. Matching is exact; unknown names yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    pub fn env(&self) -> ProviderEnv {
        match self {
            Self::Anthropic => own("ANTHROPIC_API_KEY", "ANTHROPIC_BASE_URL"),
            Self::Openai => own(OPENAI_KEY, OPENAI_BASE),
            Self::Openrouter => own("OPENROUTER_API_KEY", "OPENROUTER_BASE_URL"),
            Self::Google => own("GEMINI_API_KEY", "GEMINI_BASE_URL"),
            Self::Mistral => own("MISTRAL_API_KEY", "MISTRAL_BASE_URL"),
            Self::Xai => openai_compatible(XAI_BASE_URL),
            Self::Deepseek => openai_compatible(DEEPSEEK_BASE_URL),
            Self::Groq => openai_compatible(GROQ_BASE_URL),
            Self::Together => openai_compatible(TOGETHER_BASE_URL),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials supplied with a single request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub provider: ProviderKind,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

// Keys must never reach log output.
impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ProviderCredentials {
    /// Build credentials from an untrusted JSON value.
    ///
    /// Returns `None` for anything that is not an object with a recognized
    /// `provider` and a non-empty `api_key`. An empty or non-string
    /// `base_url` is treated as absent.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let Some(provider) = obj
            .get("provider")
            .and_then(Value::as_str)
            .and_then(ProviderKind::parse)
        else {
            debug!("dropping credentials with unrecognized provider");
            return None;
        };

        let api_key = obj.get("api_key").and_then(Value::as_str).unwrap_or("");
        if api_key.trim().is_empty() {
            debug!(%provider, "dropping credentials with empty api_key");
            return None;
        }

        let base_url = obj
            .get("base_url")
            .and_then(Value::as_str)
            .filter(|url| !url.trim().is_empty())
            .map(str::to_string);

        Some(Self {
            provider,
            api_key: api_key.to_string(),
            base_url,
        })
    }

    /// Environment overrides for one worker invocation.
    pub fn env_vars(&self) -> BTreeMap<String, String> {
        let env = self.provider.env();
        let mut vars = BTreeMap::new();
        vars.insert(env.api_key_var.to_string(), self.api_key.clone());

        let base_url = self.base_url.as_deref().or(env.default_base_url);
        if let Some(url) = base_url {
            vars.insert(env.base_url_var.to_string(), url.to_string());
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn xai_defaults_base_url() {
        let creds = ProviderCredentials::from_value(&json!({
            "provider": "xai",
            "api_key": "xai-secret"
        }))
        .unwrap();

        let vars = creds.env_vars();
        assert_eq!(vars.get("OPENAI_API_KEY").unwrap(), "xai-secret");
        assert_eq!(vars.get("OPENAI_BASE_URL").unwrap(), XAI_BASE_URL);
    }

    #[test]
    fn explicit_base_url_overrides_default_verbatim() {
        let creds = ProviderCredentials::from_value(&json!({
            "provider": "xai",
            "api_key": "xai-secret",
            "base_url": "http://localhost:9000/custom/"
        }))
        .unwrap();

        let vars = creds.env_vars();
        assert_eq!(
            vars.get("OPENAI_BASE_URL").unwrap(),
            "http://localhost:9000/custom/"
        );
    }

    #[test]
    fn anthropic_without_base_url_sets_only_key() {
        let creds = ProviderCredentials::from_value(&json!({
            "provider": "anthropic",
            "api_key": "sk-ant"
        }))
        .unwrap();

        let vars = creds.env_vars();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.get("ANTHROPIC_API_KEY").unwrap(), "sk-ant");
    }

    #[test]
    fn openai_compatible_providers_share_variables() {
        for kind in [
            ProviderKind::Xai,
            ProviderKind::Deepseek,
            ProviderKind::Groq,
            ProviderKind::Together,
        ] {
            let env = kind.env();
            assert_eq!(env.api_key_var, "OPENAI_API_KEY");
            assert_eq!(env.base_url_var, "OPENAI_BASE_URL");
            assert!(env.default_base_url.is_some(), "{kind} needs a default");
        }
        assert!(ProviderKind::Openai.env().default_base_url.is_none());
    }

    #[test]
    fn every_provider_round_trips_through_its_name() {
        for kind in ProviderKind::ALL {
            assert_eq!(ProviderKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn invalid_shapes_are_dropped() {
        assert!(ProviderCredentials::from_value(&json!("sk-123")).is_none());
        assert!(ProviderCredentials::from_value(&json!({"api_key": "k"})).is_none());
        assert!(
            ProviderCredentials::from_value(&json!({"provider": "acme", "api_key": "k"}))
                .is_none()
        );
        assert!(
            ProviderCredentials::from_value(&json!({"provider": "openai", "api_key": ""}))
                .is_none()
        );
        assert!(
            ProviderCredentials::from_value(&json!({"provider": "openai", "api_key": 42}))
                .is_none()
        );
        assert!(ProviderCredentials::from_value(&json!({"provider": "OpenAI", "api_key": "k"}))
            .is_none());
    }

    #[test]
    fn empty_base_url_is_treated_as_absent() {
        let creds = ProviderCredentials::from_value(&json!({
            "provider": "groq",
            "api_key": "gsk",
            "base_url": ""
        }))
        .unwrap();
        assert!(creds.base_url.is_none());
        assert_eq!(creds.env_vars().get("OPENAI_BASE_URL").unwrap(), GROQ_BASE_URL);
    }

    #[test]
    fn debug_output_redacts_key() {
        let creds = ProviderCredentials {
            provider: ProviderKind::Openai,
            api_key: "sk-very-secret".to_string(),
            base_url: None,
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("sk-very-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
