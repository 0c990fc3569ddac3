pub mod device;
pub mod location;
pub mod telemetry;

pub use device::{Device, DeviceDetail, DeviceSummary};
pub use location::{Location, LocationKey, LocationPoint};
pub use telemetry::{TelemetryBatch, TelemetryPoint};
