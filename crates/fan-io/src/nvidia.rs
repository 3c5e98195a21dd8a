//! NVIDIA GPU temperatures through the `nvidia-smi` management tool.
//!
//! A [`NvidiaSmiSession`] is opened once, checked against the driver, and
//! then owned by the sensor that uses it. Dropping it ends the session.

use fan_core::{SensorError, VendorSample, VendorSession};
use std::path::PathBuf;
use std::process::Command;
use std::time::Instant;
use thiserror::Error;

pub const NVIDIA_SMI: &str = "nvidia-smi";

#[derive(Debug, Error)]
pub enum NvidiaError {
    #[error("{binary} not available: {reason}")]
    Unavailable { binary: String, reason: String },

    #[error("{binary} reported no GPUs")]
    NoDevices { binary: String },
}

#[derive(Debug)]
pub struct NvidiaSmiSession {
    binary: PathBuf,
    devices: usize,
}

impl NvidiaSmiSession {
    pub fn open() -> Result<Self, NvidiaError> {
        Self::open_with(NVIDIA_SMI)
    }

    /// Opens a session against a specific `nvidia-smi` binary.
    pub fn open_with(binary: impl Into<PathBuf>) -> Result<Self, NvidiaError> {
        let binary = binary.into();
        let name = binary.display().to_string();
        let output = Command::new(&binary)
            .arg("-L")
            .output()
            .map_err(|e| NvidiaError::Unavailable {
                binary: name.clone(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(NvidiaError::Unavailable {
                binary: name,
                reason: format!("exited with {}", output.status),
            });
        }

        let devices = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| l.starts_with("GPU "))
            .count();
        if devices == 0 {
            return Err(NvidiaError::NoDevices { binary: name });
        }
        tracing::info!(devices, "nvidia management session opened");
        Ok(Self { binary, devices })
    }

    pub fn device_count(&self) -> usize {
        self.devices
    }
}

impl VendorSession for NvidiaSmiSession {
    fn device_temperature(&mut self, device: u32) -> Result<VendorSample, SensorError> {
        let output = Command::new(&self.binary)
            .args([
                "--query-gpu=temperature.gpu",
                "--format=csv,noheader,nounits",
                "-i",
                &device.to_string(),
            ])
            .output()
            .map_err(|e| SensorError::Device {
                reason: format!("nvidia-smi: {e}"),
            })?;
        let sampled_at = Instant::now();
        if !output.status.success() {
            return Err(SensorError::Device {
                reason: format!(
                    "nvidia-smi exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        let celsius = parse_temperature(&String::from_utf8_lossy(&output.stdout))?;
        Ok(VendorSample {
            celsius,
            sampled_at,
        })
    }
}

impl Drop for NvidiaSmiSession {
    fn drop(&mut self) {
        tracing::info!("nvidia management session closed");
    }
}

/// Parses the single-line output of a `temperature.gpu` query.
pub fn parse_temperature(stdout: &str) -> Result<f64, SensorError> {
    let line = stdout.lines().next().unwrap_or("").trim();
    match line.parse::<f64>() {
        Ok(celsius) if celsius.is_finite() => Ok(celsius),
        _ => Err(SensorError::Malformed {
            raw: line.to_string(),
        }),
    }
}
