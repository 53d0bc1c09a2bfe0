use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebradarError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Map asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("System error: {message}")]
    System { message: String },
}

/// Connection could not be opened, or closed/errored while open.
///
/// A handshake rejected by the relay (bad or missing key) also lands here:
/// the client retries it like any other transport failure.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Invalid endpoint '{endpoint}': {details}")]
    InvalidEndpoint { endpoint: String, details: String },

    #[error("Connection to {endpoint} failed: {details}")]
    ConnectFailed { endpoint: String, details: String },

    #[error("Connection attempt timed out after {timeout:?}")]
    ConnectTimeout { timeout: Duration },

    #[error("Handshake rejected with HTTP status {status}")]
    Rejected { status: u16 },

    #[error("Connection closed: {reason}")]
    Closed { reason: String },

    #[error("Connection error: {details}")]
    Io { details: String },
}

/// Inbound payload did not decode as a telemetry frame.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed telemetry frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Duplicate player id {id} in frame")]
    DuplicatePlayerId { id: i64 },
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to bind relay on {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Relay startup failed: {details}")]
    StartupFailed { details: String },

    #[error("Relay server error: {details}")]
    Server { details: String },
}

/// Map calibration could not be resolved for a map name.
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Calibration for map '{map}' not found at {}", path.display())]
    NotFound { map: String, path: PathBuf },

    #[error("Failed to read calibration for map '{map}': {source}")]
    Read {
        map: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid calibration for map '{map}': {details}")]
    Invalid { map: String, details: String },

    #[error("Rejected map name '{map}'")]
    InvalidName { map: String },
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to write settings to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

impl WebradarError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    /// Whether the hosting process should keep running after this error.
    ///
    /// Only configuration problems and a relay that cannot bind are fatal;
    /// everything else degrades to "wait and show status".
    pub fn is_recoverable(&self) -> bool {
        match self {
            WebradarError::Config(_) | WebradarError::Serialization(_) => false,
            WebradarError::Relay(RelayError::BindFailed { .. })
            | WebradarError::Relay(RelayError::StartupFailed { .. }) => false,
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, WebradarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability_classification() {
        let transport = WebradarError::from(TransportError::ConnectTimeout {
            timeout: Duration::from_millis(5000),
        });
        assert!(transport.is_recoverable());

        let rejected = WebradarError::from(TransportError::Rejected { status: 401 });
        assert!(rejected.is_recoverable());

        let asset = WebradarError::from(AssetError::InvalidName {
            map: "../etc".to_string(),
        });
        assert!(asset.is_recoverable());

        let bind = WebradarError::from(RelayError::BindFailed {
            address: "0.0.0.0:22006".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        });
        assert!(!bind.is_recoverable());

        let config = WebradarError::from(config::ConfigError::Message("bad".to_string()));
        assert!(!config.is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = TransportError::ConnectFailed {
            endpoint: "ws://localhost:22006/cs2_webradar".to_string(),
            details: "refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Connection to ws://localhost:22006/cs2_webradar failed: refused"
        );

        let err = ProtocolError::DuplicatePlayerId { id: 7 };
        assert_eq!(err.to_string(), "Duplicate player id 7 in frame");
    }
}
