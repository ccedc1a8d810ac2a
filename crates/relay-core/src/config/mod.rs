//! Application configuration schemas.
//!
//! All configuration structs are deserialized through the `config` crate
//! from optional TOML files plus environment variables. Each sub-module
//! represents a logical configuration section.

pub mod app;
pub mod auth;
pub mod logging;
pub mod realtime;
pub mod store;

use serde::{Deserialize, Serialize};

pub use self::app::ServerConfig;
pub use self::auth::AuthConfig;
pub use self::logging::LoggingConfig;
pub use self::realtime::RealtimeConfig;
pub use self::store::StoreConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// Every section falls back to its defaults, so the relay starts with no
/// configuration file at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP / WebSocket listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Session introspection settings.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Pub/sub backing store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Connection liveness and buffering settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Flat environment variables honoured for compatibility with existing
/// deployments, mapped onto their structured keys.
const FLAT_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("API_URL", "auth.api_url"),
    ("REDIS_HOST", "store.host"),
    ("REDIS_PORT", "store.port"),
    ("REDIS_DB", "store.db"),
    ("PORT", "server.port"),
];

impl AppConfig {
    /// Load configuration.
    ///
    /// Sources, lowest precedence first: `config/default.toml`,
    /// `config/{env}.toml`, `RELAY__SECTION__FIELD` variables, and finally
    /// the flat variables in [`FLAT_ENV_OVERRIDES`].
    pub fn load(env: &str) -> Result<Self, AppError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in FLAT_ENV_OVERRIDES {
            builder = builder.set_override_option(*key, std::env::var(var).ok())?;
        }

        let config = builder
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}
