//! Startup inventory of the thermal hardware this host exposes.
//!
//! Nothing here is fatal: a missing SMC or GPU tool is reported and the
//! daemon carries on with whatever is present.

use crate::hwmon::read_trimmed;
use crate::nvidia::NVIDIA_SMI;
use serde::Serialize;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HwmonChip {
    pub dir: PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PlatformReport {
    pub applesmc: Option<PathBuf>,
    pub nvidia_smi: Option<PathBuf>,
    pub hwmon: Vec<HwmonChip>,
}

impl PlatformReport {
    pub fn log(&self) {
        match &self.applesmc {
            Some(dir) => tracing::info!(dir = %dir.display(), "applesmc present"),
            None => tracing::warn!("applesmc not found"),
        }
        match &self.nvidia_smi {
            Some(bin) => tracing::info!(binary = %bin.display(), "nvidia management available"),
            None => tracing::warn!("nvidia management not available"),
        }
        for chip in &self.hwmon {
            tracing::debug!(name = %chip.name, dir = %chip.dir.display(), "hwmon chip");
        }
    }
}

pub struct PlatformProbe {
    sys_root: PathBuf,
    search_path: Option<OsString>,
}

impl Default for PlatformProbe {
    fn default() -> Self {
        Self {
            sys_root: PathBuf::from("/sys"),
            search_path: env::var_os("PATH"),
        }
    }
}

impl PlatformProbe {
    /// Probes under `sys_root` instead of `/sys`, looking for tools in
    /// `search_path`.
    pub fn with_roots(sys_root: impl Into<PathBuf>, search_path: Option<OsString>) -> Self {
        Self {
            sys_root: sys_root.into(),
            search_path,
        }
    }

    pub fn run(&self) -> PlatformReport {
        PlatformReport {
            applesmc: self.applesmc(),
            nvidia_smi: self.find_tool(NVIDIA_SMI),
            hwmon: self.hwmon_chips(),
        }
    }

    fn applesmc(&self) -> Option<PathBuf> {
        let dir = self.sys_root.join("devices/platform/applesmc.768");
        dir.is_dir().then_some(dir)
    }

    fn find_tool(&self, name: &str) -> Option<PathBuf> {
        let paths = self.search_path.as_ref()?;
        env::split_paths(paths)
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
    }

    fn hwmon_chips(&self) -> Vec<HwmonChip> {
        let class = self.sys_root.join("class/hwmon");
        let Ok(entries) = fs::read_dir(&class) else {
            return Vec::new();
        };
        let mut chips: Vec<HwmonChip> = entries
            .flatten()
            .map(|e| e.path())
            .map(|dir| {
                let name = read_trimmed(&dir.join("name")).unwrap_or_else(|_| dir_name(&dir));
                HwmonChip { dir, name }
            })
            .collect();
        chips.sort_by(|a, b| a.dir.cmp(&b.dir));
        chips
    }
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_host_reports_nothing() {
        let root = tempfile::tempdir().unwrap();
        let report = PlatformProbe::with_roots(root.path(), None).run();
        assert_eq!(report.applesmc, None);
        assert_eq!(report.nvidia_smi, None);
        assert!(report.hwmon.is_empty());
    }

    #[test]
    fn finds_smc_chips_and_tools() {
        let root = tempfile::tempdir().unwrap();
        let sys = root.path().join("sys");
        fs::create_dir_all(sys.join("devices/platform/applesmc.768")).unwrap();
        fs::create_dir_all(sys.join("class/hwmon/hwmon0")).unwrap();
        fs::create_dir_all(sys.join("class/hwmon/hwmon1")).unwrap();
        fs::write(sys.join("class/hwmon/hwmon0/name"), "coretemp\n").unwrap();

        let bin = root.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join(NVIDIA_SMI), "").unwrap();

        let report = PlatformProbe::with_roots(&sys, Some(bin.clone().into_os_string())).run();
        assert!(report.applesmc.is_some());
        assert_eq!(report.nvidia_smi, Some(bin.join(NVIDIA_SMI)));
        let names: Vec<_> = report.hwmon.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["coretemp", "hwmon1"]);
    }
}
