//! Simulated thermal plant for running the loop without hardware.
//!
//! One heat source cooled passively and by a fan. Sensors and the fan share
//! the plant; every read or write first advances it by the wall-clock time
//! elapsed since the last access, so the daemon's `--simulate` mode behaves
//! like a real machine warming up and settling.

use crate::actuator::DutyWriter;
use crate::error::{ActuatorError, SensorError};
use crate::reading::SensorReading;
use crate::source::SensorSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PlantParams {
    pub ambient_c: f64,
    /// Heat dissipated by the load, in watts.
    pub load_watts: f64,
    /// J/K.
    pub thermal_mass: f64,
    /// W/K with the fan stopped.
    pub passive_cooling: f64,
    /// Extra W/K at 100% duty.
    pub fan_cooling: f64,
    /// Simulated seconds per wall-clock second.
    pub time_scale: f64,
}

impl Default for PlantParams {
    fn default() -> Self {
        Self {
            ambient_c: 25.0,
            load_watts: 60.0,
            thermal_mass: 40.0,
            passive_cooling: 0.5,
            fan_cooling: 1.5,
            time_scale: 1.0,
        }
    }
}

#[derive(Debug)]
struct PlantState {
    params: PlantParams,
    temperature_c: f64,
    duty: f64,
    last_advance: Instant,
}

impl PlantState {
    fn step(&mut self, dt_s: f64) {
        let p = &self.params;
        let conductance = p.passive_cooling + p.fan_cooling * self.duty / 100.0;
        let heat_out = conductance * (self.temperature_c - p.ambient_c);
        self.temperature_c += (p.load_watts - heat_out) * dt_s / p.thermal_mass;
    }

    fn advance(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_advance).as_secs_f64() * self.params.time_scale;
        self.last_advance = now;
        if dt > 0.0 {
            self.step(dt);
        }
    }
}

/// Shared handle to the plant; clones observe the same state.
#[derive(Debug, Clone)]
pub struct ThermalPlant {
    state: Arc<Mutex<PlantState>>,
}

impl ThermalPlant {
    pub fn new(params: PlantParams) -> Self {
        let temperature_c = params.ambient_c;
        Self {
            state: Arc::new(Mutex::new(PlantState {
                params,
                temperature_c,
                duty: 0.0,
                last_advance: Instant::now(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlantState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advances the model by `dt_s` simulated seconds.
    pub fn step(&self, dt_s: f64) {
        self.lock().step(dt_s);
    }

    pub fn temperature(&self) -> f64 {
        let mut state = self.lock();
        state.advance();
        state.temperature_c
    }

    pub fn duty(&self) -> f64 {
        self.lock().duty
    }

    pub fn set_load(&self, watts: f64) {
        let mut state = self.lock();
        state.advance();
        state.params.load_watts = watts;
    }

    /// Temperature the plant settles at for a fixed duty.
    pub fn equilibrium(&self, duty: f64) -> f64 {
        let state = self.lock();
        let p = &state.params;
        p.ambient_c + p.load_watts / (p.passive_cooling + p.fan_cooling * duty / 100.0)
    }

    /// A probe reading the plant temperature plus `offset_c`.
    pub fn sensor(&self, id: impl Into<String>, offset_c: f64) -> SimulatedSensor {
        SimulatedSensor {
            id: id.into(),
            plant: self.clone(),
            offset_c,
            fault: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fan(&self, id: impl Into<String>) -> SimulatedFan {
        SimulatedFan {
            id: id.into(),
            plant: self.clone(),
            fail_writes: Arc::new(AtomicBool::new(false)),
            manual: false,
        }
    }
}

impl Default for ThermalPlant {
    fn default() -> Self {
        Self::new(PlantParams::default())
    }
}

pub struct SimulatedSensor {
    id: String,
    plant: ThermalPlant,
    offset_c: f64,
    fault: Arc<AtomicBool>,
}

impl SimulatedSensor {
    /// While set, every read fails.
    pub fn fault_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fault)
    }
}

impl SensorSource for SimulatedSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn read(&mut self) -> SensorReading {
        if self.fault.load(Ordering::Relaxed) {
            return SensorReading::invalid(
                &self.id,
                Instant::now(),
                SensorError::Device {
                    reason: "injected fault".to_string(),
                },
            );
        }
        let celsius = self.plant.temperature() + self.offset_c;
        SensorReading::valid(&self.id, celsius, Instant::now())
    }
}

pub struct SimulatedFan {
    id: String,
    plant: ThermalPlant,
    fail_writes: Arc<AtomicBool>,
    manual: bool,
}

impl SimulatedFan {
    /// While set, every write fails.
    pub fn fault_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_writes)
    }
}

impl DutyWriter for SimulatedFan {
    fn id(&self) -> &str {
        &self.id
    }

    fn write_duty(&mut self, percent: f64) -> Result<(), ActuatorError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(ActuatorError::Write {
                reason: "injected fault".to_string(),
            });
        }
        if !self.manual {
            log::debug!("simulated fan {} written before acquire", self.id);
        }
        let mut state = self.plant.lock();
        state.advance();
        state.duty = percent;
        Ok(())
    }

    fn read_duty(&mut self) -> Option<f64> {
        Some(self.plant.duty())
    }

    fn acquire(&mut self) -> Result<(), ActuatorError> {
        self.manual = true;
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        self.manual = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlLoopConfig;
    use crate::control_loop::ControlLoop;
    use crate::curve::CurvePreset;

    fn frozen() -> ThermalPlant {
        ThermalPlant::new(PlantParams {
            time_scale: 0.0,
            ..PlantParams::default()
        })
    }

    #[test]
    fn fan_pulls_temperature_toward_equilibrium() {
        let plant = frozen();
        let mut fan = plant.fan("fan");
        fan.write_duty(100.0).unwrap();
        for _ in 0..2_000 {
            plant.step(0.5);
        }
        assert!((plant.temperature() - plant.equilibrium(100.0)).abs() < 0.1);
        assert_eq!(plant.equilibrium(100.0), 55.0);
    }

    #[test]
    fn sensors_report_offset_and_injected_faults() {
        let plant = frozen();
        let mut sensor = plant.sensor("gpu", 4.0);
        assert_eq!(sensor.read().celsius(), Some(29.0));

        sensor.fault_switch().store(true, Ordering::Relaxed);
        assert!(!sensor.read().is_valid());
    }

    #[test]
    fn failing_fan_leaves_plant_duty_unchanged() {
        let plant = frozen();
        let mut fan = plant.fan("fan");
        fan.write_duty(40.0).unwrap();
        fan.fault_switch().store(true, Ordering::Relaxed);
        assert!(fan.write_duty(90.0).is_err());
        assert_eq!(plant.duty(), 40.0);
    }

    #[test]
    fn closed_loop_settles_below_the_curve_ceiling() {
        let plant = frozen();
        let mut lp = ControlLoop::builder(ControlLoopConfig::default())
            .curve(CurvePreset::Balanced.points())
            .source(Box::new(plant.sensor("die", 0.0)))
            .actuator(Box::new(plant.fan("fan")))
            .build()
            .unwrap();
        lp.start().unwrap();
        for _ in 0..300 {
            lp.tick().unwrap();
            plant.step(1.0);
        }
        let settled = plant.temperature();
        assert!((55.0..75.0).contains(&settled), "settled at {settled}");
        assert!(plant.duty() > 20.0);
        lp.shutdown().unwrap();
    }
}
