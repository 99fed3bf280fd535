pub mod backend;
pub mod config;
pub mod error;
pub mod gpio;
pub mod routes;

pub use config::{AppConfig, HttpConfig, PlatformConfig, PullMode, SensorConfig, SensorEntry};
pub use error::AppError;
pub use gpio::{
    BinaryState, GpioBinarySensor, GpioInput, SensorDescriptor, SensorRuntime, StateChange,
};
pub use routes::AppState;

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::MockGpioBackend;
