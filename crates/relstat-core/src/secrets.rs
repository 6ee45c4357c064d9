//! Secret providers and output masking.

use crate::{Error, Result};
use async_trait::async_trait;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::collections::HashMap;
use std::path::Path;

const MASK: &str = "***";

/// The set `url` encodes in the userinfo of a URL.
const USERINFO: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'=')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'|');

/// A secret value with its source.
#[derive(Clone)]
pub struct SecretValue {
    pub value: String,
    pub provider: &'static str,
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretValue")
            .field("value", &MASK)
            .field("provider", &self.provider)
            .finish()
    }
}

/// Trait for secret providers.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Get a secret by name.
    async fn get(&self, name: &str) -> Result<SecretValue>;

    /// Check if a secret exists.
    async fn exists(&self, name: &str) -> Result<bool> {
        match self.get(name).await {
            Ok(_) => Ok(true),
            Err(Error::SecretNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}

/// Environment variable secret provider.
pub struct EnvProvider {
    prefix: Option<String>,
}

impl EnvProvider {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    fn resolve_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(p) => format!("{}_{}", p, name),
            None => name.to_string(),
        }
    }
}

impl Default for EnvProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl SecretProvider for EnvProvider {
    async fn get(&self, name: &str) -> Result<SecretValue> {
        let env_name = self.resolve_name(name);
        std::env::var(&env_name)
            .map(|value| SecretValue {
                value,
                provider: self.name(),
            })
            .map_err(|_| Error::SecretNotFound(name.to_string()))
    }

    fn name(&self) -> &'static str {
        "env"
    }
}

/// Secrets held in memory, loaded from a JSON object or a dotenv file.
pub struct FileProvider {
    secrets: HashMap<String, String>,
    kind: &'static str,
}

impl FileProvider {
    pub fn from_map(secrets: HashMap<String, String>) -> Self {
        Self {
            secrets,
            kind: "file",
        }
    }

    /// Load a flat JSON object of string values.
    pub async fn load_json(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Internal(format!("Failed to read secrets file {}: {}", path.display(), e))
        })?;

        let secrets: HashMap<String, String> = serde_json::from_str(&content)?;
        Ok(Self::from_map(secrets))
    }

    /// Load `KEY=VALUE` lines without touching the process environment.
    pub fn load_dotenv(path: &Path) -> Result<Self> {
        let iter = dotenvy::from_path_iter(path)
            .map_err(|e| Error::Internal(format!("Failed to read {}: {}", path.display(), e)))?;

        let mut secrets = HashMap::new();
        for item in iter {
            let (key, value) = item.map_err(|e| {
                Error::Internal(format!("Failed to parse {}: {}", path.display(), e))
            })?;
            secrets.insert(key, value);
        }
        Ok(Self {
            secrets,
            kind: "dotenv",
        })
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

#[async_trait]
impl SecretProvider for FileProvider {
    async fn get(&self, name: &str) -> Result<SecretValue> {
        self.secrets
            .get(name)
            .map(|value| SecretValue {
                value: value.clone(),
                provider: self.kind,
            })
            .ok_or_else(|| Error::SecretNotFound(name.to_string()))
    }

    fn name(&self) -> &'static str {
        self.kind
    }
}

/// Ordered list of providers; the first one holding a name wins.
#[derive(Default)]
pub struct ProviderChain {
    providers: Vec<Box<dyn SecretProvider>>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: impl SecretProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn push(&mut self, provider: Box<dyn SecretProvider>) {
        self.providers.push(provider);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

#[async_trait]
impl SecretProvider for ProviderChain {
    async fn get(&self, name: &str) -> Result<SecretValue> {
        for provider in &self.providers {
            match provider.get(name).await {
                Err(Error::SecretNotFound(_)) => continue,
                other => return other,
            }
        }
        Err(Error::SecretNotFound(name.to_string()))
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}

/// Replaces secret values in text with `***`.
///
/// Percent-encoded forms are masked as well since secrets end up inside
/// URLs.
#[derive(Clone, Default)]
pub struct SecretMasker {
    needles: Vec<String>,
}

impl std::fmt::Debug for SecretMasker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretMasker")
            .field("needles", &self.needles.len())
            .finish()
    }
}

impl SecretMasker {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut masker = Self::default();
        for secret in secrets {
            masker.add(secret.as_ref());
        }
        masker
    }

    pub fn add(&mut self, secret: &str) {
        if secret.is_empty() {
            return;
        }
        let encoded = utf8_percent_encode(secret, USERINFO).to_string();
        for needle in [secret.to_string(), encoded] {
            if !self.needles.contains(&needle) {
                self.needles.push(needle);
            }
        }
        // Longest first so a secret containing another is masked whole.
        self.needles.sort_by_key(|n| std::cmp::Reverse(n.len()));
    }

    pub fn is_empty(&self) -> bool {
        self.needles.is_empty()
    }

    pub fn mask(&self, input: &str) -> String {
        let mut output = input.to_string();
        for needle in &self.needles {
            if output.contains(needle.as_str()) {
                output = output.replace(needle.as_str(), MASK);
            }
        }
        output
    }
}
