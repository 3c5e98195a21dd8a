use fan_core::{parse_points, ControlLoopConfig, CurvePoint, CurvePreset};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ArgError {
    #[error("{flag} expects a value")]
    MissingValue { flag: String },

    #[error("invalid value {value:?} for {flag}: {reason}")]
    InvalidValue {
        flag: String,
        value: String,
        reason: String,
    },

    #[error("unknown option {0} (see --help)")]
    Unknown(String),
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub run_seconds: Option<u64>,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub record_path: Option<PathBuf>,

    pub simulate: bool,
    pub sim_speed: f64,
    pub sensors: Vec<(String, PathBuf)>,
    pub hwmon_dirs: Vec<PathBuf>,
    pub applesmc: bool,
    pub nvidia: Vec<u32>,
    pub pwm: Option<PathBuf>,
    pub smc_fan: Option<usize>,

    pub curve: Vec<CurvePoint>,
    pub control: ControlLoopConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            run_seconds: None,
            json_logs: false,
            log_dir: None,
            metrics_addr: None,
            record_path: None,
            simulate: false,
            sim_speed: 1.0,
            sensors: Vec::new(),
            hwmon_dirs: Vec::new(),
            applesmc: false,
            nvidia: Vec::new(),
            pwm: None,
            smc_fan: None,
            curve: CurvePreset::Balanced.points(),
            control: ControlLoopConfig::default(),
        }
    }
}

fn value<'a>(args: &'a [String], i: usize) -> Result<&'a str, ArgError> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| ArgError::MissingValue {
            flag: args[i].clone(),
        })
}

fn parse<T>(flag: &str, raw: &str) -> Result<T, ArgError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ArgError::InvalidValue {
        flag: flag.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_curve(flag: &str, raw: &str) -> Result<Vec<CurvePoint>, ArgError> {
    if let Ok(preset) = raw.parse::<CurvePreset>() {
        return Ok(preset.points());
    }
    parse_points(raw).map_err(|reason| ArgError::InvalidValue {
        flag: flag.to_string(),
        value: raw.to_string(),
        reason,
    })
}

fn parse_sensor(flag: &str, raw: &str) -> Result<(String, PathBuf), ArgError> {
    match raw.split_once('=') {
        Some((id, path)) if !id.is_empty() && !path.is_empty() => {
            Ok((id.to_string(), PathBuf::from(path)))
        }
        _ => Err(ArgError::InvalidValue {
            flag: flag.to_string(),
            value: raw.to_string(),
            reason: "expected ID=PATH".to_string(),
        }),
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ArgError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Result<Self, ArgError> {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            // Flags without a value `continue` early; the rest consume one.
            match flag {
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                    i += 1;
                    continue;
                }
                "--simulate" => {
                    cfg.simulate = true;
                    i += 1;
                    continue;
                }
                "--applesmc" => {
                    cfg.applesmc = true;
                    i += 1;
                    continue;
                }
                _ => {}
            }

            let raw = value(args, i);
            let c = &mut cfg.control;
            match flag {
                "--run-seconds" => cfg.run_seconds = Some(parse(flag, raw?)?),
                "--log-dir" => cfg.log_dir = Some(PathBuf::from(raw?)),
                "--metrics-addr" => cfg.metrics_addr = Some(raw?.to_string()),
                "--record" => cfg.record_path = Some(PathBuf::from(raw?)),
                "--sim-speed" => cfg.sim_speed = parse(flag, raw?)?,
                "--sensor" => cfg.sensors.push(parse_sensor(flag, raw?)?),
                "--hwmon-dir" => cfg.hwmon_dirs.push(PathBuf::from(raw?)),
                "--nvidia" => cfg.nvidia.push(parse(flag, raw?)?),
                "--pwm" => cfg.pwm = Some(PathBuf::from(raw?)),
                "--smc-fan" => cfg.smc_fan = Some(parse(flag, raw?)?),
                "--curve" => cfg.curve = parse_curve(flag, raw?)?,
                "--tick-ms" => c.tick_period = Duration::from_millis(parse(flag, raw?)?),
                "--hysteresis" => c.hysteresis_celsius = parse(flag, raw?)?,
                "--min-sources" => c.min_valid_sources = parse(flag, raw?)?,
                "--max-step" => c.max_duty_change_per_tick = parse(flag, raw?)?,
                "--fail-safe-duty" => c.fail_safe_duty = parse(flag, raw?)?,
                "--fail-safe-after" => c.fail_safe_after_ticks = parse(flag, raw?)?,
                "--recovery-ticks" => c.recovery_ticks = parse(flag, raw?)?,
                "--sensor-timeout-ms" => {
                    c.sensor_timeout = Duration::from_millis(parse(flag, raw?)?)
                }
                "--actuator-timeout-ms" => {
                    c.actuator_timeout = Duration::from_millis(parse(flag, raw?)?)
                }
                "--initial-duty" => c.initial_duty = parse(flag, raw?)?,
                "--shutdown-duty" => c.shutdown_duty = Some(parse(flag, raw?)?),
                other => return Err(ArgError::Unknown(other.to_string())),
            }
            i += 2;
        }
        Ok(cfg)
    }

    pub fn print_help() {
        println!(
            r#"fand - sensor-driven fan control daemon

USAGE:
    fand [OPTIONS]

HARDWARE:
    --simulate                Drive a simulated thermal plant instead of hardware
    --sim-speed <X>           Simulated seconds per real second [default: 1]
    --sensor <ID=PATH>        Add a sysfs millidegree sensor (repeatable)
    --hwmon-dir <PATH>        Add every temp*_input of an hwmon chip (repeatable)
    --applesmc                Add every AppleSMC temperature sensor
    --nvidia <INDEX>          Add an NVIDIA GPU temperature via nvidia-smi (repeatable)
    --pwm <PATH>              Drive an hwmon pwmN file
    --smc-fan <N>             Drive AppleSMC fan N

CONTROL:
    --curve <PRESET|POINTS>   quiet|balanced|performance|full-speed or TEMP:DUTY,...
                              [default: balanced]
    --tick-ms <MS>            Tick period [default: 1000]
    --hysteresis <C>          Hysteresis band in degrees [default: 3]
    --min-sources <N>         Valid sources required for a healthy tick [default: 1]
    --max-step <PCT>          Largest duty change per tick [default: 10]
    --fail-safe-duty <PCT>    Duty forced when blind [default: 100]
    --fail-safe-after <N>     Blind ticks tolerated before fail-safe [default: 3]
    --recovery-ticks <N>      Seeing ticks required to leave fail-safe [default: 1]
    --sensor-timeout-ms <MS>  Per-tick sensor read deadline [default: 250]
    --actuator-timeout-ms <MS> Duty write deadline [default: 500]
    --initial-duty <PCT>      Assumed duty when the fan cannot report one [default: 50]
    --shutdown-duty <PCT>     Duty written before handing control back

RUNTIME:
    --run-seconds <SECS>      Run for a fixed duration then exit
    --json-logs               Output logs in JSON format
    --log-dir <PATH>          Also write daily-rolling log files to PATH
    --metrics-addr <ADDR>     Enable Prometheus metrics server (e.g. 127.0.0.1:9101)
    --record <PATH>           Append tick records to a JSONL file
    -h, --help                Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                  Set log filter (e.g. RUST_LOG=debug,fan_core=trace)

EXAMPLES:
    # Try it without hardware
    fand --simulate --sim-speed 20 --tick-ms 250

    # MacBook Pro: SMC sensors plus the discrete GPU, SMC fan 1
    fand --applesmc --nvidia 0 --smc-fan 1 --metrics-addr 127.0.0.1:9101
"#
        );
    }
}
