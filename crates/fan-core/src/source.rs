//! Temperature providers.
//!
//! Every provider implements [`SensorSource`]. `read` is infallible by
//! contract: failures come back as invalid readings. [`TimedSource`] runs a
//! provider on its own worker thread so that a slow device cannot stall a
//! tick past its deadline.

use crate::error::SensorError;
use crate::reading::SensorReading;
use crate::worker::{Pending, Worker, WorkerError};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Linux hwmon and AppleSMC report temperatures in millidegrees Celsius.
pub const MILLIDEGREES_PER_DEGREE: f64 = 1000.0;

pub trait SensorSource: Send {
    fn id(&self) -> &str;
    fn read(&mut self) -> SensorReading;
}

impl<S: SensorSource + ?Sized> SensorSource for Box<S> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn read(&mut self) -> SensorReading {
        (**self).read()
    }
}

/// Reads an integer millidegree value from a fixed sysfs path.
#[derive(Debug, Clone)]
pub struct SysfsSensor {
    id: String,
    path: PathBuf,
}

impl SysfsSensor {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_celsius(&self) -> Result<f64, SensorError> {
        let raw = fs::read_to_string(&self.path).map_err(|e| SensorError::Unreadable {
            reason: format!("{}: {}", self.path.display(), e),
        })?;
        let millidegrees = raw
            .trim()
            .parse::<i64>()
            .map_err(|_| SensorError::Malformed {
                raw: raw.trim().to_string(),
            })?;
        Ok(millidegrees as f64 / MILLIDEGREES_PER_DEGREE)
    }
}

impl SensorSource for SysfsSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn read(&mut self) -> SensorReading {
        let observed_at = Instant::now();
        match self.read_celsius() {
            Ok(celsius) => SensorReading::valid(&self.id, celsius, observed_at),
            Err(fault) => SensorReading::invalid(&self.id, observed_at, fault),
        }
    }
}

/// A temperature sample returned by a vendor management library.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VendorSample {
    pub celsius: f64,
    /// When the library took the sample, which may predate the query.
    pub sampled_at: Instant,
}

/// An open management-library session.
///
/// The session is acquired by whoever constructs it and released by its
/// `Drop` impl; [`VendorSensor`] owns it exclusively.
pub trait VendorSession: Send {
    fn device_temperature(&mut self, device: u32) -> Result<VendorSample, SensorError>;
}

impl<S: VendorSession + ?Sized> VendorSession for Box<S> {
    fn device_temperature(&mut self, device: u32) -> Result<VendorSample, SensorError> {
        (**self).device_temperature(device)
    }
}

/// Queries one device of an owned vendor session.
pub struct VendorSensor<S: VendorSession> {
    id: String,
    device: u32,
    session: S,
}

impl<S: VendorSession> VendorSensor<S> {
    pub fn new(id: impl Into<String>, session: S, device: u32) -> Self {
        Self {
            id: id.into(),
            device,
            session,
        }
    }

    pub fn device(&self) -> u32 {
        self.device
    }
}

impl<S: VendorSession> SensorSource for VendorSensor<S> {
    fn id(&self) -> &str {
        &self.id
    }

    fn read(&mut self) -> SensorReading {
        match self.session.device_temperature(self.device) {
            Ok(sample) => SensorReading::valid(&self.id, sample.celsius, sample.sampled_at),
            Err(fault) => SensorReading::invalid(&self.id, Instant::now(), fault),
        }
    }
}

/// Runs a source on a worker thread and bounds every read by `timeout`.
pub struct TimedSource {
    id: String,
    timeout: Duration,
    worker: Worker<Box<dyn SensorSource>>,
}

impl TimedSource {
    pub fn spawn(source: Box<dyn SensorSource>, timeout: Duration) -> std::io::Result<Self> {
        let id = source.id().to_string();
        let worker = Worker::spawn(format!("sensor-{id}"), source)?;
        Ok(Self {
            id,
            timeout,
            worker,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Starts a read without waiting for it.
    pub fn request(&self) -> PendingReading {
        PendingReading {
            id: self.id.clone(),
            requested_at: Instant::now(),
            timeout: self.timeout,
            pending: self.worker.submit(|source| source.read()),
        }
    }
}

impl SensorSource for TimedSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn read(&mut self) -> SensorReading {
        let deadline = Instant::now() + self.timeout;
        self.request().wait_until(deadline)
    }
}

/// An in-flight read started by [`TimedSource::request`].
pub struct PendingReading {
    id: String,
    requested_at: Instant,
    timeout: Duration,
    pending: Result<Pending<SensorReading>, WorkerError>,
}

impl PendingReading {
    pub fn wait_until(self, deadline: Instant) -> SensorReading {
        let waited = self
            .pending
            .and_then(|pending| pending.wait_until(deadline));
        match waited {
            Ok(reading) => reading,
            Err(e) => {
                let fault = match e {
                    WorkerError::Busy => SensorError::Busy,
                    WorkerError::TimedOut => SensorError::Timeout {
                        after: self.timeout,
                    },
                    WorkerError::Gone => SensorError::Unreadable {
                        reason: "sensor worker exited".to_string(),
                    },
                };
                SensorReading::invalid(self.id, self.requested_at, fault)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn sysfs_sensor_converts_millidegrees() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp1_input");
        fs::write(&path, "45500\n").unwrap();

        let mut sensor = SysfsSensor::new("smc:TC0P", &path);
        let reading = sensor.read();
        assert_eq!(reading.source_id(), "smc:TC0P");
        assert_eq!(reading.celsius(), Some(45.5));
    }

    #[test]
    fn missing_file_is_invalid_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sensor = SysfsSensor::new("gone", dir.path().join("temp9_input"));
        let reading = sensor.read();
        assert!(!reading.is_valid());
        assert!(matches!(
            reading.fault(),
            Some(SensorError::Unreadable { .. })
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp1_input");
        fs::write(&path, "n/a").unwrap();
        let reading = SysfsSensor::new("bad", &path).read();
        assert_eq!(
            reading.fault(),
            Some(&SensorError::Malformed { raw: "n/a".into() })
        );
    }

    struct FakeSession {
        temps: Vec<f64>,
    }

    impl VendorSession for FakeSession {
        fn device_temperature(&mut self, device: u32) -> Result<VendorSample, SensorError> {
            self.temps
                .get(device as usize)
                .map(|&celsius| VendorSample {
                    celsius,
                    sampled_at: Instant::now(),
                })
                .ok_or(SensorError::Device {
                    reason: format!("no device {device}"),
                })
        }
    }

    #[test]
    fn vendor_sensor_queries_its_device() {
        let mut gpu = VendorSensor::new("gpu1", FakeSession { temps: vec![50.0, 71.0] }, 1);
        assert_eq!(gpu.read().celsius(), Some(71.0));

        let mut missing = VendorSensor::new("gpu5", FakeSession { temps: vec![] }, 5);
        assert!(!missing.read().is_valid());
    }

    struct Sluggish;

    impl SensorSource for Sluggish {
        fn id(&self) -> &str {
            "sluggish"
        }

        fn read(&mut self) -> SensorReading {
            thread::sleep(Duration::from_millis(300));
            SensorReading::valid("sluggish", 30.0, Instant::now())
        }
    }

    #[test]
    fn timed_source_bounds_a_slow_read() {
        let mut timed = TimedSource::spawn(Box::new(Sluggish), Duration::from_millis(30)).unwrap();
        let started = Instant::now();
        let reading = timed.read();
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(matches!(reading.fault(), Some(SensorError::Timeout { .. })));

        // Still stuck in the first read: fails fast instead of queueing.
        let again = timed.read();
        assert_eq!(again.fault(), Some(&SensorError::Busy));
    }
}
