pub mod config;
pub mod error;
pub mod logging;
pub mod map;
pub mod radar;
pub mod settings;
pub mod shutdown;
pub mod telemetry;

#[cfg(feature = "relay")]
pub mod relay;

#[cfg(feature = "viewer")]
pub mod viewer;

pub use config::{RelayConfig, RenderConfig, TeamPolicy, ViewerConfig, WebradarConfig};
pub use error::{
    AssetError, ProtocolError, RelayError, Result, SettingsError, TransportError, WebradarError,
};
pub use logging::{init_logging, LogOptions, LoggingGuard};
pub use map::{MapAsset, MapCalibration, MapCatalog, MapTracker};
pub use radar::{
    world_to_radar, CameraTransform, FollowCamera, RadarPoint, RenderSnapshot, RenderState,
    ViewportMetrics,
};
pub use settings::{Settings, SettingsStore};
pub use telemetry::{BombState, PlayerId, PlayerState, Position, Team, TelemetryFrame};

#[cfg(feature = "relay")]
pub use relay::{PeerRegistry, RelayServer, RelayServerBuilder, RelayStats};

#[cfg(feature = "viewer")]
pub use viewer::{ConnectionManager, ConnectionStatus, Connector, WsConnector};
