//! Linux hwmon sysfs: temperature discovery and PWM fan control.

use fan_core::{ActuatorError, DutyWriter, SysfsSensor};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Raw value of a fully driven `pwmN` file.
pub const PWM_MAX: u32 = 255;
/// `pwmN_enable` value for manual (userspace) control.
pub const PWM_ENABLE_MANUAL: u8 = 1;
/// `pwmN_enable` value for automatic (chip) control.
pub const PWM_ENABLE_AUTO: u8 = 2;

#[derive(Debug, Error)]
pub enum HwmonError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unexpected contents in {path}: {raw:?}")]
    Parse { path: PathBuf, raw: String },

    #[error("fan range in {dir} is empty (min {min}, max {max})")]
    EmptyRange { dir: PathBuf, min: u32, max: u32 },
}

pub(crate) fn read_trimmed(path: &Path) -> Result<String, HwmonError> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| HwmonError::Io {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn read_number(path: &Path) -> Result<u32, HwmonError> {
    let raw = read_trimmed(path)?;
    raw.parse().map_err(|_| HwmonError::Parse {
        path: path.to_path_buf(),
        raw,
    })
}

pub(crate) fn write_value(path: &Path, value: impl ToString) -> Result<(), ActuatorError> {
    fs::write(path, value.to_string()).map_err(|e| ActuatorError::Write {
        reason: format!("{}: {}", path.display(), e),
    })
}

/// Index `N` of a file named `{prefix}N{suffix}`.
pub fn extract_index(fname: &str, prefix: &str, suffix: &str) -> Option<usize> {
    fname
        .strip_prefix(prefix)?
        .strip_suffix(suffix)?
        .parse()
        .ok()
}

/// One `tempN_input` file and its optional `tempN_label`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempInput {
    pub index: usize,
    pub label: Option<String>,
    pub path: PathBuf,
}

/// Lists the temperature inputs of one chip directory, ordered by index.
pub fn discover_temps(dir: &Path) -> Result<Vec<TempInput>, HwmonError> {
    let entries = fs::read_dir(dir).map_err(|source| HwmonError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut inputs = Vec::new();
    for entry in entries.flatten() {
        let fname = entry.file_name().to_string_lossy().into_owned();
        let Some(index) = extract_index(&fname, "temp", "_input") else {
            continue;
        };
        let label = read_trimmed(&dir.join(format!("temp{index}_label")))
            .ok()
            .filter(|l| !l.is_empty());
        inputs.push(TempInput {
            index,
            label,
            path: entry.path(),
        });
    }
    inputs.sort_by_key(|t| t.index);
    Ok(inputs)
}

/// Builds one sensor per temperature input, named `{prefix}/{label}` (or
/// `{prefix}/tempN` when unlabelled or the label repeats). Ids still taken
/// after that get a `#k` suffix.
pub fn discover_sensors(dir: &Path, prefix: &str) -> Result<Vec<SysfsSensor>, HwmonError> {
    let mut seen = HashSet::new();
    let sensors: Vec<SysfsSensor> = discover_temps(dir)?
        .into_iter()
        .map(|t| {
            let mut id = match &t.label {
                Some(label) => format!("{prefix}/{label}"),
                None => format!("{prefix}/temp{}", t.index),
            };
            if seen.contains(&id) {
                id = format!("{prefix}/temp{}", t.index);
            }
            let base = id.clone();
            let mut k = 2;
            while !seen.insert(id.clone()) {
                id = format!("{base}#{k}");
                k += 1;
            }
            SysfsSensor::new(id, t.path)
        })
        .collect();

    tracing::debug!(dir = %dir.display(), count = sensors.len(), "discovered temperature inputs");
    Ok(sensors)
}

pub fn percent_to_raw(percent: f64, max_raw: u32) -> u32 {
    ((percent.clamp(0.0, 100.0) / 100.0) * f64::from(max_raw)).round() as u32
}

pub fn raw_to_percent(raw: u32, max_raw: u32) -> f64 {
    if max_raw == 0 {
        return 0.0;
    }
    (f64::from(raw.min(max_raw)) / f64::from(max_raw)) * 100.0
}

/// A `pwmN` output. Acquiring switches `pwmN_enable` to manual; releasing
/// restores the mode found at acquire time (automatic if unknown).
#[derive(Debug)]
pub struct HwmonPwm {
    id: String,
    pwm_path: PathBuf,
    enable_path: Option<PathBuf>,
    max_raw: u32,
    saved_enable: Option<u8>,
}

impl HwmonPwm {
    pub fn new(pwm_path: impl Into<PathBuf>) -> Self {
        let pwm_path = pwm_path.into();
        let sibling = |suffix: &str| {
            let mut name = pwm_path.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        };
        let enable_path = Some(sibling("_enable")).filter(|p| p.exists());
        let max_raw = read_number(&sibling("_max"))
            .ok()
            .filter(|m| *m > 0)
            .unwrap_or(PWM_MAX);
        let id = pwm_path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| pwm_path.display().to_string());

        Self {
            id,
            pwm_path,
            enable_path,
            max_raw,
            saved_enable: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.pwm_path
    }

    pub fn max_raw(&self) -> u32 {
        self.max_raw
    }
}

impl DutyWriter for HwmonPwm {
    fn id(&self) -> &str {
        &self.id
    }

    fn write_duty(&mut self, percent: f64) -> Result<(), ActuatorError> {
        write_value(&self.pwm_path, percent_to_raw(percent, self.max_raw))
    }

    fn read_duty(&mut self) -> Option<f64> {
        read_number(&self.pwm_path)
            .ok()
            .map(|raw| raw_to_percent(raw, self.max_raw))
    }

    fn acquire(&mut self) -> Result<(), ActuatorError> {
        let Some(enable) = &self.enable_path else {
            return Ok(());
        };
        self.saved_enable = read_number(enable).ok().and_then(|v| u8::try_from(v).ok());
        write_value(enable, PWM_ENABLE_MANUAL)?;
        tracing::info!(pwm = %self.pwm_path.display(), previous = ?self.saved_enable, "pwm switched to manual");
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        let Some(enable) = &self.enable_path else {
            return Ok(());
        };
        let mode = match self.saved_enable.take() {
            Some(mode) if mode != PWM_ENABLE_MANUAL => mode,
            _ => PWM_ENABLE_AUTO,
        };
        write_value(enable, mode)?;
        tracing::info!(pwm = %self.pwm_path.display(), mode, "pwm handed back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fan_core::SensorSource;

    fn chip() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        fs::write(p.join("temp1_input"), "45000\n").unwrap();
        fs::write(p.join("temp1_label"), "TC0P\n").unwrap();
        fs::write(p.join("temp2_input"), "51500\n").unwrap();
        fs::write(p.join("temp10_input"), "38000\n").unwrap();
        fs::write(p.join("temp10_label"), "TC0P\n").unwrap();
        fs::write(p.join("fan1_input"), "1800\n").unwrap();
        dir
    }

    #[test]
    fn extracts_indices() {
        assert_eq!(extract_index("temp12_input", "temp", "_input"), Some(12));
        assert_eq!(extract_index("temp_input", "temp", "_input"), None);
        assert_eq!(extract_index("pwm2", "pwm", ""), Some(2));
        assert_eq!(extract_index("fan1_input", "temp", "_input"), None);
    }

    #[test]
    fn discovers_labelled_inputs_in_index_order() {
        let dir = chip();
        let temps = discover_temps(dir.path()).unwrap();
        let indices: Vec<_> = temps.iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![1, 2, 10]);
        assert_eq!(temps[0].label.as_deref(), Some("TC0P"));
        assert_eq!(temps[1].label, None);
    }

    #[test]
    fn sensor_ids_are_unique_and_readable() {
        let dir = chip();
        let mut sensors = discover_sensors(dir.path(), "applesmc").unwrap();
        let ids: Vec<_> = sensors.iter().map(|s| s.id().to_string()).collect();
        assert_eq!(
            ids,
            vec!["applesmc/TC0P", "applesmc/temp2", "applesmc/temp10"]
        );
        assert_eq!(sensors[1].read().celsius(), Some(51.5));
    }

    #[test]
    fn label_shaped_like_an_index_does_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        fs::write(p.join("temp1_input"), "40000\n").unwrap();
        fs::write(p.join("temp1_label"), "temp2\n").unwrap();
        fs::write(p.join("temp2_input"), "42000\n").unwrap();
        fs::write(p.join("temp3_input"), "44000\n").unwrap();
        fs::write(p.join("temp3_label"), "temp2\n").unwrap();

        let sensors = discover_sensors(p, "chip").unwrap();
        let ids: Vec<_> = sensors.iter().map(|s| s.id().to_string()).collect();
        assert_eq!(ids, vec!["chip/temp2", "chip/temp2#2", "chip/temp3"]);

        let mut aggregator = fan_core::SensorAggregator::new(Default::default());
        for sensor in sensors {
            aggregator.register(Box::new(sensor)).unwrap();
        }
    }

    #[test]
    fn missing_chip_is_an_error() {
        let err = discover_temps(Path::new("/nonexistent/hwmon9")).unwrap_err();
        assert!(matches!(err, HwmonError::Io { .. }));
    }

    #[test]
    fn percent_maps_onto_raw_range() {
        assert_eq!(percent_to_raw(0.0, PWM_MAX), 0);
        assert_eq!(percent_to_raw(50.0, PWM_MAX), 128);
        assert_eq!(percent_to_raw(100.0, PWM_MAX), 255);
        assert_eq!(percent_to_raw(140.0, PWM_MAX), 255);
        assert_eq!(raw_to_percent(255, PWM_MAX), 100.0);
    }

    #[test]
    fn pwm_takes_and_returns_control() {
        let dir = tempfile::tempdir().unwrap();
        let pwm = dir.path().join("pwm1");
        let enable = dir.path().join("pwm1_enable");
        fs::write(&pwm, "100\n").unwrap();
        fs::write(&enable, "5\n").unwrap();

        let mut fan = HwmonPwm::new(&pwm);
        assert_eq!(fan.id(), "pwm1");
        assert_eq!(fan.read_duty().map(|d| d.round()), Some(39.0));

        fan.acquire().unwrap();
        assert_eq!(fs::read_to_string(&enable).unwrap(), "1");
        fan.write_duty(75.0).unwrap();
        assert_eq!(fs::read_to_string(&pwm).unwrap(), "191");
        fan.release().unwrap();
        assert_eq!(fs::read_to_string(&enable).unwrap(), "5");
    }

    #[test]
    fn release_without_saved_mode_returns_to_automatic() {
        let dir = tempfile::tempdir().unwrap();
        let pwm = dir.path().join("pwm3");
        let enable = dir.path().join("pwm3_enable");
        fs::write(&pwm, "0").unwrap();
        fs::write(&enable, "1").unwrap();

        let mut fan = HwmonPwm::new(&pwm);
        fan.acquire().unwrap();
        fan.release().unwrap();
        assert_eq!(fs::read_to_string(&enable).unwrap(), "2");
    }

    #[test]
    fn write_to_missing_pwm_reports_the_path() {
        let mut fan = HwmonPwm::new("/nonexistent/pwm1");
        let err = fan.write_duty(50.0).unwrap_err();
        assert!(matches!(err, ActuatorError::Write { ref reason } if reason.contains("/nonexistent/pwm1")));
    }
}
