mod settings;

pub use settings::{
    AuthConfig, LoggingConfig, ServerConfig, Settings, ShutdownSettings, WebSocketConfig,
};
