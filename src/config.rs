pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

// surfaced to clients while the store is unconfigured
pub const STORE_SETUP_HINT: &str =
    "Database not configured. Set DATABASE_URL to a SQLite URL (e.g. sqlite://ecomate.db) and restart.";

pub const GENERATION_SETUP_HINT: &str =
    "Generation API not configured. Set GOOGLE_API_KEY to enable chat.";

// Unconfigured is a first-class state: the server still runs and the
// session routes degrade instead of refusing to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Url(String),
    Unconfigured,
}

impl StoreConfig {
    pub fn url(&self) -> Option<&str> {
        match self {
            StoreConfig::Url(url) => Some(url),
            StoreConfig::Unconfigured => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub generation: GenerationConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let store = match std::env::var("DATABASE_URL") {
            Ok(url) if !url.is_empty() => StoreConfig::Url(url),
            _ => StoreConfig::Unconfigured,
        };
        let generation = GenerationConfig {
            api_key: std::env::var("GOOGLE_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.into()),
            base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_BASE_URL.into()),
        };
        Self { store, generation }
    }
}
