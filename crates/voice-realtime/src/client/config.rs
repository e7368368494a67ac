use crate::client::consts::{BASE_URL, VOICE_API_KEY, VOICE_BASE_URL};
use secrecy::SecretString;

pub struct Config {
    base_url: String,
    api_key: SecretString,
}

#[derive(Default)]
pub struct ConfigBuilder {
    base_url: Option<String>,
    api_key: Option<SecretString>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Fills anything not set explicitly from the environment.
    pub fn build(self) -> Config {
        let defaults = Config::new();
        Config {
            base_url: self.base_url.unwrap_or(defaults.base_url),
            api_key: self.api_key.unwrap_or(defaults.api_key),
        }
    }
}

impl Config {
    /// Reads `VOICE_BASE_URL` and `VOICE_API_KEY`, falling back to a local endpoint and an empty key.
    pub fn new() -> Self {
        Self {
            base_url: std::env::var(VOICE_BASE_URL)
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| BASE_URL.to_string()),
            api_key: std::env::var(VOICE_API_KEY)
                .unwrap_or_default()
                .into(),
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
