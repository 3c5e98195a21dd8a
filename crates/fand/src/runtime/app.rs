use crate::infra::recorder::{RecordEventType, TickRecorder};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use fan_core::{
    ConfigError, ControlLoop, DutyWriter, ExecutionStats, LogSink, LoopError, PlantParams,
    SensorSource, SysfsSensor, ThermalPlant, TimeBase, VendorSensor,
};
use fan_io::{
    discover_sensors, AppleSmcFan, HwmonError, HwmonPwm, NvidiaSmiSession, PlatformProbe,
    PlatformReport, PrometheusSink, APPLESMC_DIR,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid control configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot open fan: {0}")]
    Fan(#[from] HwmonError),

    #[error("no fan to drive: pass --pwm, --smc-fan or --simulate")]
    NoFan,

    #[error("cannot open record file {path}: {source}")]
    Record {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{what}: {source}")]
    Io {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Loop(#[from] LoopError),

    #[error("control thread panicked")]
    Panicked,
}

pub fn run_from_args() -> ExitCode {
    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fand: {e}");
            return ExitCode::from(2);
        }
    };
    if config.show_help {
        RuntimeConfig::print_help();
        return ExitCode::SUCCESS;
    }

    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref());
    match run(config) {
        Ok(stats) => {
            info!(
                ticks_executed = stats.ticks_executed,
                ticks_missed = stats.ticks_missed,
                fail_safe_ticks = stats.fail_safe_ticks,
                actuator_failures = stats.actuator_failures,
                "Run complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "fand failed");
            ExitCode::FAILURE
        }
    }
}

/// The hardware the loop will drive, assembled from flags.
struct Hardware {
    sources: Vec<Box<dyn SensorSource>>,
    fan: Box<dyn DutyWriter>,
}

fn simulated(config: &RuntimeConfig) -> Hardware {
    let plant = ThermalPlant::new(PlantParams {
        time_scale: config.sim_speed,
        ..PlantParams::default()
    });
    info!(speed = config.sim_speed, "Driving simulated thermal plant");
    Hardware {
        sources: vec![
            Box::new(plant.sensor("sim/die", 0.0)) as Box<dyn SensorSource>,
            Box::new(plant.sensor("sim/board", -6.0)),
        ],
        fan: Box::new(plant.fan("sim/fan")),
    }
}

/// Missing chips and vendor tools are reported and skipped.
fn hardware_sources(config: &RuntimeConfig, report: &PlatformReport) -> Vec<Box<dyn SensorSource>> {
    let mut sources: Vec<Box<dyn SensorSource>> = Vec::new();

    for (id, path) in &config.sensors {
        sources.push(Box::new(SysfsSensor::new(id.clone(), path.clone())));
    }

    let mut chips: Vec<(PathBuf, String)> = config
        .hwmon_dirs
        .iter()
        .map(|dir| (dir.clone(), chip_prefix(dir, report)))
        .collect();
    if config.applesmc {
        match &report.applesmc {
            Some(dir) => chips.push((dir.clone(), "applesmc".to_string())),
            None => warn!("--applesmc given but no AppleSMC found; continuing without it"),
        }
    }
    for (dir, prefix) in chips {
        match discover_sensors(&dir, &prefix) {
            Ok(found) if found.is_empty() => {
                warn!(dir = %dir.display(), "chip has no temperature inputs")
            }
            Ok(found) => {
                info!(dir = %dir.display(), count = found.len(), "Adding hwmon sensors");
                sources.extend(found.into_iter().map(|s| Box::new(s) as Box<dyn SensorSource>));
            }
            Err(e) => warn!(error = %e, "skipping hwmon chip"),
        }
    }

    for &index in &config.nvidia {
        match NvidiaSmiSession::open() {
            Ok(session) => sources.push(Box::new(VendorSensor::new(
                format!("nvidia/gpu{index}"),
                session,
                index,
            ))),
            Err(e) => warn!(error = %e, gpu = index, "skipping NVIDIA sensor"),
        }
    }
    sources
}

fn chip_prefix(dir: &Path, report: &PlatformReport) -> String {
    report
        .hwmon
        .iter()
        .find(|chip| chip.dir == dir)
        .map(|chip| chip.name.clone())
        .or_else(|| {
            std::fs::read_to_string(dir.join("name"))
                .ok()
                .map(|n| n.trim().to_string())
        })
        .unwrap_or_else(|| dir.display().to_string())
}

fn hardware_fan(config: &RuntimeConfig, report: &PlatformReport) -> Result<Box<dyn DutyWriter>, AppError> {
    if let Some(path) = &config.pwm {
        return Ok(Box::new(HwmonPwm::new(path)));
    }
    if let Some(index) = config.smc_fan {
        let dir = report
            .applesmc
            .clone()
            .unwrap_or_else(|| PathBuf::from(APPLESMC_DIR));
        return Ok(Box::new(AppleSmcFan::open(dir, index)?));
    }
    Err(AppError::NoFan)
}

fn hardware(config: &RuntimeConfig) -> Result<Hardware, AppError> {
    if config.simulate {
        return Ok(simulated(config));
    }
    let report = PlatformProbe::default().run();
    report.log();
    let fan = hardware_fan(config, &report)?;
    Ok(Hardware {
        sources: hardware_sources(config, &report),
        fan,
    })
}

fn open_recorder(path: Option<&PathBuf>) -> Result<Option<TickRecorder>, AppError> {
    path.map(|path| {
        TickRecorder::new(path)
            .map(|recorder| {
                info!(path = %path.display(), "Tick recording enabled");
                recorder
            })
            .map_err(|source| AppError::Record {
                path: path.clone(),
                source,
            })
    })
    .transpose()
}

/// Waits for Ctrl-C, SIGTERM, or the configured run time.
async fn shutdown_signal(run_seconds: Option<u64>) {
    let deadline = async {
        match run_seconds {
            Some(seconds) => {
                info!(seconds, "Running for limited duration");
                tokio::time::sleep(Duration::from_secs(seconds)).await
            }
            None => std::future::pending().await,
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = terminate => info!("Terminated"),
        _ = deadline => {}
    }
}

pub fn run(config: RuntimeConfig) -> Result<ExecutionStats, AppError> {
    telemetry::init();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let timebase = TimeBase::new();
    let recorder = open_recorder(config.record_path.as_ref())?;
    let hw = hardware(&config)?;
    let source_ids: Vec<String> = hw.sources.iter().map(|s| s.id().to_string()).collect();
    let fan_id = hw.fan.id().to_string();

    let mut builder = ControlLoop::builder(config.control.clone())
        .curve(config.curve.clone())
        .sources(hw.sources)
        .actuator(hw.fan)
        .timebase(timebase)
        .sink(Box::new(LogSink));
    if config.metrics_addr.is_some() {
        builder = builder.sink(Box::new(PrometheusSink));
    }
    if let Some(recorder) = &recorder {
        builder = builder.sink(Box::new(recorder.clone()));
    }
    let mut control = builder.build()?;

    if let Some(recorder) = &recorder {
        let _ = recorder.log_event(
            timebase.now_us(),
            timebase.unix_us(),
            RecordEventType::SystemStart,
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "simulate": config.simulate,
                "sources": source_ids,
                "fan": fan_id,
                "curve": config.curve,
                "control": config.control,
            }),
        );
    }

    info!(
        tick_ms = config.control.tick_period.as_millis() as u64,
        sources = source_ids.len(),
        fan = %fan_id,
        "Starting control loop"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let stop_loop = Arc::clone(&stop);
    let control_handle = thread::Builder::new()
        .name("fand-loop".to_string())
        .spawn(move || control.run(&stop_loop))
        .map_err(|source| AppError::Io {
            what: "cannot spawn control thread",
            source,
        })?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| AppError::Io {
            what: "cannot start signal runtime",
            source,
        })?;
    runtime.block_on(shutdown_signal(config.run_seconds));

    stop.store(true, Ordering::Release);
    let stats = control_handle.join().map_err(|_| AppError::Panicked)??;

    if let Some(recorder) = &recorder {
        let _ = recorder.log_event(
            timebase.now_us(),
            timebase.unix_us(),
            RecordEventType::SystemShutdown,
            serde_json::to_value(&stats).unwrap_or_default(),
        );
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fan_is_reported() {
        let config = RuntimeConfig::default();
        let report = PlatformReport::default();
        assert!(matches!(
            hardware_fan(&config, &report),
            Err(AppError::NoFan)
        ));
    }

    #[test]
    fn absent_hardware_is_skipped_not_fatal() {
        let config = RuntimeConfig {
            hwmon_dirs: vec![PathBuf::from("/nonexistent/hwmon7")],
            applesmc: true,
            sensors: vec![("cpu".into(), PathBuf::from("/nonexistent/temp1_input"))],
            ..RuntimeConfig::default()
        };
        let sources = hardware_sources(&config, &PlatformReport::default());
        let ids: Vec<_> = sources.iter().map(|s| s.id().to_string()).collect();
        assert_eq!(ids, vec!["cpu"]);
    }

    #[test]
    fn hwmon_chips_are_named_after_the_chip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("name"), "coretemp\n").unwrap();
        std::fs::write(dir.path().join("temp1_input"), "40000").unwrap();
        std::fs::write(dir.path().join("temp1_label"), "Package id 0").unwrap();

        let config = RuntimeConfig {
            hwmon_dirs: vec![dir.path().to_path_buf()],
            ..RuntimeConfig::default()
        };
        let sources = hardware_sources(&config, &PlatformReport::default());
        assert_eq!(sources[0].id(), "coretemp/Package id 0");
    }

    #[test]
    fn simulated_run_records_start_ticks_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let mut config = RuntimeConfig {
            simulate: true,
            run_seconds: Some(1),
            record_path: Some(path.clone()),
            ..RuntimeConfig::default()
        };
        config.control.tick_period = Duration::from_millis(100);

        let stats = run(config).unwrap();
        assert!(stats.ticks_executed >= 5, "{stats:?}");

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.first().unwrap()["event_type"], "system_start");
        assert_eq!(lines.last().unwrap()["event_type"], "system_shutdown");
        assert!(lines.iter().any(|l| l["event_type"] == "tick"));
    }
}
