mod settings;

use config::{Config, ConfigError, Environment, File};

use crate::queue::StartOffset;
use settings::PartialSettings;

pub use settings::{
    Backend, FeedSettings, LogSettings, QueueSettings, ServerSettings, Settings, StoreSettings,
};

/// Prefix of the environment variables read by [`load_config`], e.g.
/// `LIVEFEED__QUEUE__WORKERS=3`.
pub const ENV_PREFIX: &str = "LIVEFEED";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct with one section per component
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    let settings = Settings::merge(partial);
    start_offset(&settings)?;
    Ok(settings)
}

/// Parses `queue.start_offset`.
pub fn start_offset(settings: &Settings) -> Result<StartOffset, ConfigError> {
    settings
        .queue
        .start_offset
        .parse()
        .map_err(|e| ConfigError::Message(format!("queue.start_offset: {e}")))
}
