//! Configuration loading
//!
//! Sources, lowest precedence first: built-in defaults, an optional
//! `alerts.toml` (or the file named by `ALERTS_CONFIG`), then environment
//! variables such as `ALERTS__POLL__INTERVAL_SECS=60`.

use config::{Config, Environment, File};

use alerts_core::{CoreError, CoreResult, ReceiverConfig};

pub const ENV_PREFIX: &str = "ALERTS";
pub const DEFAULT_CONFIG_FILE: &str = "alerts";

/// Price API URL variable used by the earlier deployment
pub const LEGACY_PRICES_VAR: &str = "PRICES";

pub fn load() -> CoreResult<ReceiverConfig> {
    let file = std::env::var("ALERTS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    let legacy_prices = std::env::var(LEGACY_PRICES_VAR).ok();

    let config = build(&file, Environment::with_prefix(ENV_PREFIX), legacy_prices)?;
    config.validate()?;
    Ok(config)
}

fn build(
    file: &str,
    environment: Environment,
    legacy_prices: Option<String>,
) -> CoreResult<ReceiverConfig> {
    let defaults = Config::try_from(&ReceiverConfig::default()).map_err(invalid)?;

    Config::builder()
        .add_source(defaults)
        .add_source(File::with_name(file).required(false))
        .add_source(
            environment
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("poll.price_api_url", legacy_prices)
        .map_err(invalid)?
        .build()
        .map_err(invalid)?
        .try_deserialize()
        .map_err(invalid)
}

fn invalid(e: config::ConfigError) -> CoreError {
    CoreError::InvalidConfig(e.to_string())
}
