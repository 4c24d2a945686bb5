use serde::Deserialize;

/// Top-level configuration settings for a session.
///
/// Includes the protocol session parameters, the redelivery store and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub session: SessionSettings,
    pub persistence: PersistenceSettings,
    pub logging: LoggingSettings,
}

/// Protocol parameters of one broker connection.
///
/// `keepalive_secs = 0` disables the keepalive monitor. The timeout waited
/// for a ping response is `keepalive_secs * keepalive_factor`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SessionSettings {
    pub keepalive_secs: u64,
    pub keepalive_factor: f64,
    pub protocol_version: u8,
    pub resume: bool,
}

/// Which store keeps in-flight exchanges.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sled,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PersistenceSettings {
    pub backend: StoreBackend,
    pub path: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub session: Option<PartialSessionSettings>,
    pub persistence: Option<PartialPersistenceSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialSessionSettings {
    pub keepalive_secs: Option<u64>,
    pub keepalive_factor: Option<f64>,
    pub protocol_version: Option<u8>,
    pub resume: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PartialPersistenceSettings {
    pub backend: Option<StoreBackend>,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            session: SessionSettings {
                keepalive_secs: 60,
                keepalive_factor: 1.5,
                protocol_version: 4,
                resume: false,
            },
            persistence: PersistenceSettings {
                backend: StoreBackend::Memory,
                path: "popsub_session_db".to_string(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Overlays the values present in `partial` on these settings.
    pub fn merge(self, partial: PartialSettings) -> Self {
        let session = partial.session;
        let persistence = partial.persistence;
        let logging = partial.logging;

        Settings {
            session: SessionSettings {
                keepalive_secs: session
                    .as_ref()
                    .and_then(|s| s.keepalive_secs)
                    .unwrap_or(self.session.keepalive_secs),
                keepalive_factor: session
                    .as_ref()
                    .and_then(|s| s.keepalive_factor)
                    .unwrap_or(self.session.keepalive_factor),
                protocol_version: session
                    .as_ref()
                    .and_then(|s| s.protocol_version)
                    .unwrap_or(self.session.protocol_version),
                resume: session
                    .as_ref()
                    .and_then(|s| s.resume)
                    .unwrap_or(self.session.resume),
            },
            persistence: PersistenceSettings {
                backend: persistence
                    .as_ref()
                    .and_then(|p| p.backend)
                    .unwrap_or(self.persistence.backend),
                path: persistence
                    .and_then(|p| p.path)
                    .unwrap_or(self.persistence.path),
            },
            logging: LoggingSettings {
                level: logging
                    .and_then(|l| l.level)
                    .unwrap_or(self.logging.level),
            },
        }
    }
}
