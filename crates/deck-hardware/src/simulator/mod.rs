//! Simulated robot.
//!
//! [`SimulatedHardware`] implements [`HardwareControl`] without any motors.
//! It tracks where each mount is, which pipettes carry tips and how much
//! liquid they hold, records every actuating call for later inspection and
//! can be scripted to fail through [`FaultScript`]s.
//!
//! # Timing
//!
//! In [`SimulationMode::Instant`] every call completes immediately. In
//! [`SimulationMode::Realistic`] moves sleep for their travel time at
//! [`SIMULATED_GANTRY_SPEED`] and plunger motions for `volume / flow_rate`,
//! both capped at [`MAX_SIMULATED_DELAY`].
//!
//! # Example
//!
//! ```rust,ignore
//! let hardware = SimulatedHardware::builder()
//!     .pipette(MountType::Left, "p1000_single")
//!     .gripper(true)
//!     .module("TM-001", ModuleModel::TemperatureModuleV2)
//!     .build();
//!
//! hardware.home(None).await?;
//! assert_eq!(hardware.calls().len(), 1);
//! ```

mod faults;
mod pipettes;

pub use faults::{Fault, FaultScript, HardwareOperation};
pub use pipettes::{pipette_config, PIPETTE_NAMES, SIMULATED_MAX_NOZZLE_Z};

use async_trait::async_trait;
use deck_core::definitions::{ModuleModel, ModuleType, PipetteConfig};
use deck_core::hardware::{
    AttachedModule, DoorState, HardwareControl, HardwareError, HardwareResult, ModuleOperation,
};
use deck_core::limits::{GRIPPER_MAX_Z, MAX_SIMULATED_DELAY, SIMULATED_GANTRY_SPEED};
use deck_core::types::{point, CriticalPoint, Mount, MountType, MotorAxis, Point, TipPresence};
use faults::FaultInjector;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Gantry x/y after homing (mm).
const HOME_XY: (f64, f64) = (477.2, 493.8);

/// Fraction of the probed depth the simulator reports as filled by default.
const DEFAULT_LIQUID_FILL: f64 = 0.5;

/// How long simulated operations take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationMode {
    /// Every call returns immediately
    #[default]
    Instant,
    /// Calls sleep for a duration derived from distance or volume
    Realistic,
}

/// One actuating call made against the simulator.
///
/// Queries (`gantry_position`, `tip_presence`, `has_gripper`,
/// `attached_modules`) are not recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareCall {
    Home {
        axes: Option<Vec<MotorAxis>>,
    },
    MoveTo {
        mount: Mount,
        position: Point,
        critical_point: Option<CriticalPoint>,
    },
    MoveRel {
        mount: Mount,
        delta: Point,
    },
    CacheInstrument {
        mount: MountType,
        requested_name: String,
    },
    PickUpTip {
        mount: MountType,
        tip_length: f64,
    },
    DropTip {
        mount: MountType,
        home_after: bool,
    },
    PrepareForAspirate {
        mount: MountType,
    },
    Aspirate {
        mount: MountType,
        volume: f64,
        flow_rate: f64,
    },
    Dispense {
        mount: MountType,
        volume: f64,
        flow_rate: f64,
        push_out: Option<f64>,
    },
    Grip {
        force: f64,
    },
    Ungrip,
    ProbeLiquid {
        mount: MountType,
        max_distance: f64,
    },
    ModuleCommand {
        serial_number: String,
        operation: ModuleOperation,
    },
    Halt,
}

impl HardwareCall {
    /// Whether the call drives the gripper, its jaws or its mount.
    pub fn is_gripper_call(&self) -> bool {
        match self {
            HardwareCall::Grip { .. } | HardwareCall::Ungrip => true,
            HardwareCall::MoveTo { mount, .. } | HardwareCall::MoveRel { mount, .. } => {
                *mount == Mount::Extension
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
struct SimPipette {
    name: String,
    config: Option<PipetteConfig>,
    tip_length: Option<f64>,
    volume: f64,
}

#[derive(Debug)]
struct SimState {
    /// Nozzle position for pipette mounts, jaw center for the extension
    positions: HashMap<Mount, Point>,
    pipettes: HashMap<MountType, SimPipette>,
    gripper: bool,
    jaw_closed: bool,
    modules: Vec<AttachedModule>,
    door: DoorState,
    calls: Vec<HardwareCall>,
    faults: FaultInjector,
    liquid_fill: f64,
}

impl SimState {
    fn position(&self, mount: Mount) -> Point {
        self.positions
            .get(&mount)
            .copied()
            .unwrap_or_else(|| home_position(mount))
    }

    fn pipette(&self, mount: MountType) -> HardwareResult<&SimPipette> {
        self.pipettes
            .get(&mount)
            .ok_or(HardwareError::InstrumentNotFound { mount })
    }

    fn pipette_mut(&mut self, mount: MountType) -> HardwareResult<&mut SimPipette> {
        self.pipettes
            .get_mut(&mount)
            .ok_or(HardwareError::InstrumentNotFound { mount })
    }

    /// Distance below the nozzle of whatever the critical point refers to.
    fn tip_offset(&self, mount: Mount) -> f64 {
        let pipette_mount = match mount {
            Mount::Left => MountType::Left,
            Mount::Right => MountType::Right,
            Mount::Extension => return 0.0,
        };
        self.pipettes
            .get(&pipette_mount)
            .and_then(|p| p.tip_length)
            .unwrap_or(0.0)
    }

    /// Count `operation` against the fault scripts.
    fn check_fault(&mut self, operation: HardwareOperation) -> Option<Fault> {
        let fault = self.faults.check(operation);
        if let Some(fault) = &fault {
            warn!(%operation, ?fault, "Injecting simulated fault");
        }
        fault
    }
}

fn home_position(mount: Mount) -> Point {
    let z = match mount {
        Mount::Extension => GRIPPER_MAX_Z,
        _ => SIMULATED_MAX_NOZZLE_Z,
    };
    point(HOME_XY.0, HOME_XY.1, z)
}

/// Error for faults that are not handled specially by the operation.
fn fault_error(fault: Fault, mount: Mount, position: Point) -> Option<HardwareError> {
    match fault {
        Fault::Overpressure => Some(HardwareError::Overpressure { mount, position }),
        Fault::LiquidNotFound => Some(HardwareError::LiquidNotFound { mount, position }),
        Fault::Gripper { kind } => Some(HardwareError::Gripper { kind }),
        Fault::Stall => Some(HardwareError::Stall { axis: None }),
        Fault::Communication { message } => Some(HardwareError::Communication(message)),
        Fault::TipStuck | Fault::TipMissed => None,
    }
}

fn supports(module_type: ModuleType, operation: &ModuleOperation) -> bool {
    use ModuleOperation as Op;
    match module_type {
        ModuleType::Magnetic => matches!(operation, Op::EngageMagnet { .. } | Op::DisengageMagnet),
        ModuleType::Temperature => {
            matches!(operation, Op::SetTemperature { .. } | Op::DeactivateTemperature)
        }
        ModuleType::Thermocycler => matches!(
            operation,
            Op::OpenLid | Op::CloseLid | Op::SetBlockTemperature { .. } | Op::DeactivateTemperature
        ),
        ModuleType::HeaterShaker => matches!(
            operation,
            Op::OpenLatch
                | Op::CloseLatch
                | Op::SetShakeSpeed { .. }
                | Op::DeactivateShaker
                | Op::SetTemperature { .. }
                | Op::DeactivateTemperature
        ),
        ModuleType::MagneticBlock => false,
    }
}

/// Decrements the active-move counter when a move finishes or is dropped.
struct ActiveMove<'a>(&'a AtomicUsize);

impl Drop for ActiveMove<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A robot with no motors.
pub struct SimulatedHardware {
    state: Mutex<SimState>,
    mode: SimulationMode,
    door_sensor: bool,
    door: broadcast::Sender<DoorState>,
    active_moves: AtomicUsize,
    peak_moves: AtomicUsize,
}

impl std::fmt::Debug for SimulatedHardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedHardware")
            .field("mode", &self.mode)
            .field("door_sensor", &self.door_sensor)
            .finish_non_exhaustive()
    }
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SimulatedHardware {
    pub fn builder() -> SimulatedHardwareBuilder {
        SimulatedHardwareBuilder::default()
    }

    /// Every actuating call made so far, oldest first.
    pub fn calls(&self) -> Vec<HardwareCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Add a fault script after construction.
    pub fn inject(&self, script: FaultScript) {
        self.state.lock().faults.push(script);
    }

    /// Whether every scripted fault has fired as often as requested.
    pub fn faults_exhausted(&self) -> bool {
        self.state.lock().faults.exhausted()
    }

    /// Raw mount position: nozzle for pipettes, jaw center for the gripper.
    pub fn position(&self, mount: Mount) -> Point {
        self.state.lock().position(mount)
    }

    pub fn has_tip(&self, mount: MountType) -> bool {
        self.state
            .lock()
            .pipettes
            .get(&mount)
            .is_some_and(|p| p.tip_length.is_some())
    }

    /// Liquid currently held by the pipette on `mount` (µL).
    pub fn plunger_volume(&self, mount: MountType) -> f64 {
        self.state
            .lock()
            .pipettes
            .get(&mount)
            .map_or(0.0, |p| p.volume)
    }

    pub fn jaw_closed(&self) -> bool {
        self.state.lock().jaw_closed
    }

    pub fn door_state(&self) -> DoorState {
        self.state.lock().door
    }

    /// Open or close the front door, notifying door subscribers.
    pub fn set_door(&self, door: DoorState) {
        self.state.lock().door = door;
        info!(?door, "Simulated door changed");
        // No subscribers is fine.
        let _ = self.door.send(door);
    }

    /// Highest number of moves that were ever in flight at once.
    pub fn peak_concurrent_moves(&self) -> usize {
        self.peak_moves.load(Ordering::SeqCst)
    }

    fn record(&self, state: &mut SimState, call: HardwareCall) {
        debug!(?call, "Simulated hardware call");
        state.calls.push(call);
    }

    fn begin_move(&self) -> ActiveMove<'_> {
        let now = self.active_moves.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_moves.fetch_max(now, Ordering::SeqCst);
        ActiveMove(&self.active_moves)
    }

    async fn simulate_delay(&self, seconds: f64) {
        if self.mode == SimulationMode::Instant || !seconds.is_finite() || seconds <= 0.0 {
            return;
        }
        let delay = Duration::from_secs_f64(seconds).min(MAX_SIMULATED_DELAY);
        tokio::time::sleep(delay).await;
    }

    fn travel_time(distance: f64, speed: Option<f64>) -> f64 {
        let speed = speed
            .filter(|s| *s > 0.0)
            .unwrap_or(SIMULATED_GANTRY_SPEED);
        distance / speed
    }

    /// Move `mount` to the raw position `target`, failing if a fault is scripted.
    async fn travel(
        &self,
        operation: HardwareOperation,
        call: HardwareCall,
        mount: Mount,
        target: impl FnOnce(&SimState) -> Point,
        speed: Option<f64>,
    ) -> HardwareResult<()> {
        let _active = self.begin_move();
        // Give a concurrent caller the chance to overlap with this move.
        tokio::task::yield_now().await;
        let distance = {
            let mut state = self.state.lock();
            self.record(&mut state, call);
            let from = state.position(mount);
            if let Some(error) = state
                .check_fault(operation)
                .and_then(|fault| fault_error(fault, mount, from))
            {
                return Err(error);
            }
            let to = target(&*state);
            state.positions.insert(mount, to);
            from.distance(to)
        };
        self.simulate_delay(Self::travel_time(distance, speed)).await;
        Ok(())
    }
}

#[async_trait]
impl HardwareControl for SimulatedHardware {
    async fn home(&self, axes: Option<&[MotorAxis]>) -> HardwareResult<()> {
        let _active = self.begin_move();
        let mut state = self.state.lock();
        self.record(
            &mut state,
            HardwareCall::Home {
                axes: axes.map(<[MotorAxis]>::to_vec),
            },
        );
        if let Some(error) = state
            .check_fault(HardwareOperation::Home)
            .and_then(|fault| fault_error(fault, Mount::Left, state.position(Mount::Left)))
        {
            return Err(error);
        }
        let all = [
            MotorAxis::X,
            MotorAxis::Y,
            MotorAxis::LeftZ,
            MotorAxis::RightZ,
            MotorAxis::ExtensionZ,
        ];
        let axes = axes.unwrap_or(&all);
        for mount in [Mount::Left, Mount::Right, Mount::Extension] {
            let home = home_position(mount);
            let mut position = state.position(mount);
            if axes.contains(&MotorAxis::X) {
                position.x = home.x;
            }
            if axes.contains(&MotorAxis::Y) {
                position.y = home.y;
            }
            let z_axis = match mount {
                Mount::Left => MotorAxis::LeftZ,
                Mount::Right => MotorAxis::RightZ,
                Mount::Extension => MotorAxis::ExtensionZ,
            };
            if axes.contains(&z_axis) {
                position.z = home.z;
            }
            state.positions.insert(mount, position);
        }
        info!(?axes, "Simulated home");
        Ok(())
    }

    async fn move_to(
        &self,
        mount: Mount,
        position: Point,
        critical_point: Option<CriticalPoint>,
        speed: Option<f64>,
    ) -> HardwareResult<()> {
        let call = HardwareCall::MoveTo {
            mount,
            position,
            critical_point,
        };
        self.travel(
            HardwareOperation::MoveTo,
            call,
            mount,
            |state| position + point(0.0, 0.0, state.tip_offset(mount)),
            speed,
        )
        .await
    }

    async fn move_rel(&self, mount: Mount, delta: Point, speed: Option<f64>) -> HardwareResult<()> {
        let call = HardwareCall::MoveRel { mount, delta };
        self.travel(
            HardwareOperation::MoveRel,
            call,
            mount,
            |state| state.position(mount) + delta,
            speed,
        )
        .await
    }

    async fn gantry_position(
        &self,
        mount: Mount,
        _critical_point: Option<CriticalPoint>,
    ) -> HardwareResult<Point> {
        let state = self.state.lock();
        Ok(state.position(mount) - point(0.0, 0.0, state.tip_offset(mount)))
    }

    async fn cache_instrument(
        &self,
        mount: MountType,
        requested_name: &str,
    ) -> HardwareResult<PipetteConfig> {
        let mut state = self.state.lock();
        self.record(
            &mut state,
            HardwareCall::CacheInstrument {
                mount,
                requested_name: requested_name.to_string(),
            },
        );
        let pipette = state.pipette(mount)?;
        if pipette.name != requested_name {
            return Err(HardwareError::InstrumentMismatch {
                mount,
                requested: requested_name.to_string(),
                found: pipette.name.clone(),
            });
        }
        pipette
            .config
            .clone()
            .ok_or(HardwareError::InstrumentNotFound { mount })
    }

    async fn has_gripper(&self) -> HardwareResult<bool> {
        Ok(self.state.lock().gripper)
    }

    async fn attached_modules(&self) -> HardwareResult<Vec<AttachedModule>> {
        Ok(self.state.lock().modules.clone())
    }

    async fn pick_up_tip(&self, mount: MountType, tip_length: f64) -> HardwareResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, HardwareCall::PickUpTip { mount, tip_length });
        state.pipette(mount)?;
        let position = state.position(mount.to_mount());
        let missed = match state.check_fault(HardwareOperation::PickUpTip) {
            Some(Fault::TipMissed) => true,
            Some(fault) => match fault_error(fault, mount.to_mount(), position) {
                Some(error) => return Err(error),
                None => false,
            },
            None => false,
        };
        let pipette = state.pipette_mut(mount)?;
        if !missed {
            pipette.tip_length = Some(tip_length);
            pipette.volume = 0.0;
        }
        Ok(())
    }

    async fn drop_tip(&self, mount: MountType, home_after: bool) -> HardwareResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, HardwareCall::DropTip { mount, home_after });
        state.pipette(mount)?;
        let position = state.position(mount.to_mount());
        let stuck = match state.check_fault(HardwareOperation::DropTip) {
            Some(Fault::TipStuck) => true,
            Some(fault) => match fault_error(fault, mount.to_mount(), position) {
                Some(error) => return Err(error),
                None => false,
            },
            None => false,
        };
        let pipette = state.pipette_mut(mount)?;
        pipette.volume = 0.0;
        if !stuck {
            pipette.tip_length = None;
        }
        if home_after {
            let mut position = state.position(mount.to_mount());
            position.z = SIMULATED_MAX_NOZZLE_Z;
            state.positions.insert(mount.to_mount(), position);
        }
        Ok(())
    }

    async fn tip_presence(&self, mount: MountType) -> HardwareResult<TipPresence> {
        let state = self.state.lock();
        let pipette = state.pipette(mount)?;
        Ok(if pipette.tip_length.is_some() {
            TipPresence::Present
        } else {
            TipPresence::Absent
        })
    }

    async fn prepare_for_aspirate(&self, mount: MountType) -> HardwareResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, HardwareCall::PrepareForAspirate { mount });
        state.pipette_mut(mount)?.volume = 0.0;
        Ok(())
    }

    async fn aspirate(&self, mount: MountType, volume: f64, flow_rate: f64) -> HardwareResult<()> {
        {
            let mut state = self.state.lock();
            self.record(
                &mut state,
                HardwareCall::Aspirate {
                    mount,
                    volume,
                    flow_rate,
                },
            );
            state.pipette(mount)?;
            let position = state.position(mount.to_mount());
            if let Some(error) = state
                .check_fault(HardwareOperation::Aspirate)
                .and_then(|fault| fault_error(fault, mount.to_mount(), position))
            {
                return Err(error);
            }
            state.pipette_mut(mount)?.volume += volume;
        }
        self.simulate_delay(volume / flow_rate).await;
        Ok(())
    }

    async fn dispense(
        &self,
        mount: MountType,
        volume: f64,
        flow_rate: f64,
        push_out: Option<f64>,
    ) -> HardwareResult<()> {
        {
            let mut state = self.state.lock();
            self.record(
                &mut state,
                HardwareCall::Dispense {
                    mount,
                    volume,
                    flow_rate,
                    push_out,
                },
            );
            state.pipette(mount)?;
            let position = state.position(mount.to_mount());
            if let Some(error) = state
                .check_fault(HardwareOperation::Dispense)
                .and_then(|fault| fault_error(fault, mount.to_mount(), position))
            {
                return Err(error);
            }
            let pipette = state.pipette_mut(mount)?;
            pipette.volume = (pipette.volume - volume).max(0.0);
        }
        self.simulate_delay(volume / flow_rate).await;
        Ok(())
    }

    async fn grip(&self, force: f64) -> HardwareResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, HardwareCall::Grip { force });
        if !state.gripper {
            return Err(HardwareError::GripperNotAttached);
        }
        let position = state.position(Mount::Extension);
        if let Some(error) = state
            .check_fault(HardwareOperation::Grip)
            .and_then(|fault| fault_error(fault, Mount::Extension, position))
        {
            return Err(error);
        }
        state.jaw_closed = true;
        Ok(())
    }

    async fn ungrip(&self) -> HardwareResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, HardwareCall::Ungrip);
        if !state.gripper {
            return Err(HardwareError::GripperNotAttached);
        }
        state.jaw_closed = false;
        Ok(())
    }

    async fn probe_liquid(&self, mount: MountType, max_distance: f64) -> HardwareResult<f64> {
        let mut state = self.state.lock();
        self.record(&mut state, HardwareCall::ProbeLiquid { mount, max_distance });
        state.pipette(mount)?;
        let physical = mount.to_mount();
        let tip = state.tip_offset(physical);
        let nozzle = state.position(physical);
        let start = nozzle - point(0.0, 0.0, tip);
        let limit = start - point(0.0, 0.0, max_distance);

        let fault = state.check_fault(HardwareOperation::ProbeLiquid);
        let not_found = matches!(fault, Some(Fault::LiquidNotFound)) || state.liquid_fill <= 0.0;
        if not_found {
            state.positions.insert(physical, limit + point(0.0, 0.0, tip));
            return Err(HardwareError::LiquidNotFound {
                mount: physical,
                position: limit,
            });
        }
        if let Some(error) = fault.and_then(|fault| fault_error(fault, physical, start)) {
            return Err(error);
        }
        let found_z = start.z - max_distance * (1.0 - state.liquid_fill);
        state
            .positions
            .insert(physical, point(nozzle.x, nozzle.y, found_z + tip));
        Ok(found_z)
    }

    async fn module_command(
        &self,
        serial_number: &str,
        operation: ModuleOperation,
    ) -> HardwareResult<()> {
        let mut state = self.state.lock();
        self.record(
            &mut state,
            HardwareCall::ModuleCommand {
                serial_number: serial_number.to_string(),
                operation,
            },
        );
        let position = state.position(Mount::Left);
        if let Some(fault) = state.check_fault(HardwareOperation::ModuleCommand) {
            let error = match fault {
                Fault::Communication { message } => HardwareError::Communication(message),
                other => HardwareError::Module {
                    serial: serial_number.to_string(),
                    message: fault_error(other, Mount::Left, position)
                        .map_or_else(|| "simulated fault".to_string(), |e| e.to_string()),
                },
            };
            return Err(error);
        }
        if serial_number.starts_with("virtual-") {
            return Ok(());
        }
        let module = state
            .modules
            .iter()
            .find(|m| m.serial_number == serial_number)
            .ok_or_else(|| HardwareError::Module {
                serial: serial_number.to_string(),
                message: "not attached".to_string(),
            })?;
        if !supports(module.model.module_type(), &operation) {
            return Err(HardwareError::Module {
                serial: serial_number.to_string(),
                message: format!("{} does not support {:?}", module.model, operation),
            });
        }
        Ok(())
    }

    async fn halt(&self) -> HardwareResult<()> {
        let mut state = self.state.lock();
        self.record(&mut state, HardwareCall::Halt);
        info!("Simulated halt");
        Ok(())
    }

    fn subscribe_door(&self) -> Option<broadcast::Receiver<DoorState>> {
        self.door_sensor.then(|| self.door.subscribe())
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SimulatedHardware`].
#[derive(Debug, Clone)]
pub struct SimulatedHardwareBuilder {
    mode: SimulationMode,
    pipettes: Vec<(MountType, String)>,
    gripper: bool,
    door_sensor: bool,
    modules: Vec<AttachedModule>,
    faults: Vec<FaultScript>,
    liquid_fill: f64,
}

impl Default for SimulatedHardwareBuilder {
    fn default() -> Self {
        Self {
            mode: SimulationMode::Instant,
            pipettes: Vec::new(),
            gripper: false,
            door_sensor: true,
            modules: Vec::new(),
            faults: Vec::new(),
            liquid_fill: DEFAULT_LIQUID_FILL,
        }
    }
}

impl SimulatedHardwareBuilder {
    pub fn mode(mut self, mode: SimulationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Attach a pipette by name. Unknown names attach an instrument the
    /// simulator cannot describe, which fails when cached.
    pub fn pipette(mut self, mount: MountType, name: impl Into<String>) -> Self {
        self.pipettes.retain(|(m, _)| *m != mount);
        self.pipettes.push((mount, name.into()));
        self
    }

    pub fn gripper(mut self, attached: bool) -> Self {
        self.gripper = attached;
        self
    }

    pub fn door_sensor(mut self, enabled: bool) -> Self {
        self.door_sensor = enabled;
        self
    }

    pub fn module(mut self, serial_number: impl Into<String>, model: ModuleModel) -> Self {
        self.modules.push(AttachedModule {
            serial_number: serial_number.into(),
            model,
        });
        self
    }

    pub fn fault(mut self, script: FaultScript) -> Self {
        self.faults.push(script);
        self
    }

    /// Fraction of a probed well the simulator reports as liquid, clamped to `0..=1`.
    pub fn liquid_fill(mut self, fraction: f64) -> Self {
        self.liquid_fill = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn build(self) -> SimulatedHardware {
        let pipettes = self
            .pipettes
            .into_iter()
            .map(|(mount, name)| {
                let config = pipette_config(&name);
                (
                    mount,
                    SimPipette {
                        name,
                        config,
                        tip_length: None,
                        volume: 0.0,
                    },
                )
            })
            .collect();
        let positions = [Mount::Left, Mount::Right, Mount::Extension]
            .into_iter()
            .map(|mount| (mount, home_position(mount)))
            .collect();
        let (door, _) = broadcast::channel(16);
        SimulatedHardware {
            state: Mutex::new(SimState {
                positions,
                pipettes,
                gripper: self.gripper,
                jaw_closed: false,
                modules: self.modules,
                door: DoorState::Closed,
                calls: Vec::new(),
                faults: FaultInjector::new(self.faults),
                liquid_fill: self.liquid_fill,
            }),
            mode: self.mode,
            door_sensor: self.door_sensor,
            door,
            active_moves: AtomicUsize::new(0),
            peak_moves: AtomicUsize::new(0),
        }
    }
}
