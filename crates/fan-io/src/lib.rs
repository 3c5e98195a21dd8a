//! Platform providers and observability for the fan control daemon.

pub mod hwmon;
pub mod metrics;
pub mod nvidia;
pub mod probe;
pub mod smc;

pub use hwmon::{discover_sensors, discover_temps, HwmonError, HwmonPwm, TempInput};
pub use metrics::{init_metrics, serve_metrics, PrometheusSink};
pub use nvidia::{NvidiaError, NvidiaSmiSession};
pub use probe::{PlatformProbe, PlatformReport};
pub use smc::{AppleSmcFan, APPLESMC_DIR};
