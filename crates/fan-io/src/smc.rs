//! AppleSMC fans (`applesmc` driver).
//!
//! The SMC takes a target speed in RPM rather than a duty, so percentages
//! are mapped linearly onto the fan's `[fanN_min, fanN_max]` range.

use crate::hwmon::{read_number, write_value, HwmonError};
use fan_core::{ActuatorError, DutyWriter};
use std::path::{Path, PathBuf};

pub const APPLESMC_DIR: &str = "/sys/devices/platform/applesmc.768";

#[derive(Debug)]
pub struct AppleSmcFan {
    id: String,
    dir: PathBuf,
    index: usize,
    min_rpm: u32,
    max_rpm: u32,
}

impl AppleSmcFan {
    /// Reads the speed range of fan `index` (1-based, as in sysfs).
    pub fn open(dir: impl Into<PathBuf>, index: usize) -> Result<Self, HwmonError> {
        let dir = dir.into();
        let min_rpm = read_number(&dir.join(format!("fan{index}_min")))?;
        let max_rpm = read_number(&dir.join(format!("fan{index}_max")))?;
        if max_rpm <= min_rpm {
            return Err(HwmonError::EmptyRange {
                dir,
                min: min_rpm,
                max: max_rpm,
            });
        }
        tracing::debug!(fan = index, min_rpm, max_rpm, "opened applesmc fan");
        Ok(Self {
            id: format!("applesmc/fan{index}"),
            dir,
            index,
            min_rpm,
            max_rpm,
        })
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir.join(format!("fan{}_{}", self.index, name))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn rpm_for(&self, percent: f64) -> u32 {
        let span = f64::from(self.max_rpm - self.min_rpm);
        self.min_rpm + (percent.clamp(0.0, 100.0) / 100.0 * span).round() as u32
    }

    fn percent_for(&self, rpm: u32) -> f64 {
        let rpm = rpm.clamp(self.min_rpm, self.max_rpm);
        f64::from(rpm - self.min_rpm) / f64::from(self.max_rpm - self.min_rpm) * 100.0
    }
}

impl DutyWriter for AppleSmcFan {
    fn id(&self) -> &str {
        &self.id
    }

    fn write_duty(&mut self, percent: f64) -> Result<(), ActuatorError> {
        write_value(&self.file("output"), self.rpm_for(percent))
    }

    fn read_duty(&mut self) -> Option<f64> {
        read_number(&self.file("output"))
            .or_else(|_| read_number(&self.file("input")))
            .ok()
            .map(|rpm| self.percent_for(rpm))
    }

    fn acquire(&mut self) -> Result<(), ActuatorError> {
        write_value(&self.file("manual"), 1)?;
        tracing::info!(fan = %self.id, "applesmc fan in manual mode");
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        write_value(&self.file("manual"), 0)?;
        tracing::info!(fan = %self.id, "applesmc fan returned to the smc");
        Ok(())
    }
}
