mod settings;

use std::time::Duration;

use ::config::{Config, Environment, File};
use thiserror::Error;

use crate::codec::ProtocolVersion;

pub use settings::{
    LoggingSettings, PartialSettings, PersistenceSettings, SessionSettings, Settings,
    StoreBackend,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("keepalive factor must be a finite number >= 1, got {0}")]
    InvalidKeepaliveFactor(f64),

    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(u8),

    #[error("keepalive must be at most {max} seconds, got {0:?}", max = MAX_KEEPALIVE_SECS)]
    KeepaliveTooLong(Duration),

    #[error("keepalive timeout overflows: {keepalive:?} x {factor}")]
    KeepaliveTimeoutOverflow { keepalive: Duration, factor: f64 },
}

/// Longest keepalive period accepted, the largest value of the protocol's
/// two-byte keepalive field.
pub const MAX_KEEPALIVE_SECS: u64 = u16::MAX as u64;

/// Loads the configuration from `config/default`, a `.env` file and
/// `POPSUB_*` environment variables, merged over default values.
///
/// Nested keys use a double underscore, e.g.
/// `POPSUB_SESSION__KEEPALIVE_SECS=30`.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Same as [`load_config`] with an explicit base file (extension optional).
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    dotenvy::dotenv().ok();

    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("POPSUB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::default().merge(partial))
}

/// Validated runtime parameters of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Keepalive period; zero disables the keepalive monitor.
    pub keepalive: Duration,
    /// Multiplier applied to `keepalive` to get the ping response timeout.
    pub keepalive_factor: f64,
    pub protocol_version: ProtocolVersion,
    /// Resend the send-direction entries of the store when the session starts.
    pub resume: bool,
}

impl SessionConfig {
    pub fn new(keepalive: Duration, keepalive_factor: f64) -> Result<Self, ConfigError> {
        let config = Self {
            keepalive,
            keepalive_factor,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.keepalive_factor.is_finite() || self.keepalive_factor < 1.0 {
            return Err(ConfigError::InvalidKeepaliveFactor(self.keepalive_factor));
        }
        if self.keepalive > Duration::from_secs(MAX_KEEPALIVE_SECS) {
            return Err(ConfigError::KeepaliveTooLong(self.keepalive));
        }
        Duration::try_from_secs_f64(self.keepalive.as_secs_f64() * self.keepalive_factor)
            .map_err(|_| ConfigError::KeepaliveTimeoutOverflow {
                keepalive: self.keepalive,
                factor: self.keepalive_factor,
            })?;
        Ok(())
    }

    pub fn keepalive_enabled(&self) -> bool {
        !self.keepalive.is_zero()
    }

    /// Interval between two PingReq: three quarters of the keepalive period.
    pub fn ping_interval(&self) -> Duration {
        self.keepalive.saturating_mul(3) / 4
    }

    /// How long to wait for a PingResp after sending a PingReq. Saturates at
    /// [`Duration::MAX`] for values [`SessionConfig::validate`] rejects.
    pub fn keepalive_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.keepalive.as_secs_f64() * self.keepalive_factor)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_secs(60),
            keepalive_factor: 1.5,
            protocol_version: ProtocolVersion::default(),
            resume: false,
        }
    }
}

impl TryFrom<&SessionSettings> for SessionConfig {
    type Error = ConfigError;

    fn try_from(settings: &SessionSettings) -> Result<Self, Self::Error> {
        let protocol_version = ProtocolVersion::try_from(settings.protocol_version)
            .map_err(|_| ConfigError::UnsupportedProtocolVersion(settings.protocol_version))?;
        let config = Self {
            keepalive: Duration::from_secs(settings.keepalive_secs),
            keepalive_factor: settings.keepalive_factor,
            protocol_version,
            resume: settings.resume,
        };
        config.validate()?;
        Ok(config)
    }
}

impl TryFrom<&Settings> for SessionConfig {
    type Error = ConfigError;

    fn try_from(settings: &Settings) -> Result<Self, Self::Error> {
        SessionConfig::try_from(&settings.session)
    }
}

#[cfg(test)]
mod tests;
