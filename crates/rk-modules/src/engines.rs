//! Motor engines module.
//!
//! Drives the two rear wheels of the rover. The hardware side (PWM,
//! encoders) is simulated: commands are recorded and encoder ticks are fed
//! in by the caller.
//!
//! # Payload layouts
//!
//! All floats are 4-byte little-endian.
//!
//! ```text
//! MOVE          direction u8 | distance f32 | blocking u8
//! MOVE_ARC      distance f32 | angle f32    | small_radius f32
//! MOVE_PERCENT  direction u8 | left % f32   | right % f32
//! REBOOT        code u8 (must be 0x17, anything else is ignored)
//! SPEED_LOOP    (none)
//! ```

use rk_common::error::{KernelError, KernelResult};
use rk_common::time::Millis;
use rk_runtime::{
    ArgReader, Dispatchable, ModuleId, ServiceBuffer, ServiceId, ServiceOutcome, ServiceSlot,
    TaskEntry, TimeBase,
};
use serde::Serialize;
use std::f32::consts::PI;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Registry slot of the engines module.
pub const ENGINES_MODULE_ID: ModuleId = 1;

/// Services offered by the engines module.
pub mod service {
    use rk_runtime::ServiceId;

    /// Drive straight or rotate in place.
    pub const MOVE: ServiceId = 0;
    /// Follow an arc.
    pub const MOVE_ARC: ServiceId = 1;
    /// Run each wheel at a percentage of full speed.
    pub const MOVE_PERCENT: ServiceId = 2;
    /// Reinitialize the motor hardware.
    pub const REBOOT: ServiceId = 3;
    /// Recompute wheel speeds from encoder counts.
    pub const SPEED_LOOP: ServiceId = 4;
}

/// Argument the reboot service must receive to act.
pub const REBOOT_CODE: u8 = 0x17;

/// Largest payload any engines service takes.
pub const MAX_PAYLOAD: usize = 12;

/// Movement direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum Direction {
    /// Both wheels forward.
    Forward = 0,
    /// Both wheels backward.
    Backward = 1,
    /// Rotate counter-clockwise in place.
    Left = 2,
    /// Rotate clockwise in place.
    Right = 3,
}

impl TryFrom<u8> for Direction {
    type Error = EngineFault;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Forward),
            1 => Ok(Self::Backward),
            2 => Ok(Self::Left),
            3 => Ok(Self::Right),
            other => Err(EngineFault::BadDirection(other)),
        }
    }
}

/// Why an engines service failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineFault {
    /// Payload shorter than the service layout.
    #[error("malformed payload: {0}")]
    BadArgs(#[from] KernelError),
    /// Unknown direction byte.
    #[error("unknown direction {0}")]
    BadDirection(u8),
    /// Numeric argument outside its valid range.
    #[error("argument out of range: {0}")]
    OutOfRange(f32),
}

impl EngineFault {
    /// Code written to the outcome slot.
    #[must_use]
    pub fn code(&self) -> u8 {
        match self {
            Self::BadArgs(_) => 1,
            Self::BadDirection(_) => 2,
            Self::OutOfRange(_) => 3,
        }
    }
}

/// Payload of [`service::MOVE`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MoveCommand {
    /// Direction of travel.
    pub direction: Direction,
    /// Distance in cm, or angle in degrees when rotating.
    pub distance: f32,
    /// Whether the caller expects the move to finish before returning.
    pub blocking: bool,
}

impl MoveCommand {
    /// Wire encoding.
    #[must_use]
    pub fn encode(&self) -> [u8; 6] {
        let mut out = [0u8; 6];
        out[0] = self.direction as u8;
        out[1..5].copy_from_slice(&self.distance.to_le_bytes());
        out[5] = u8::from(self.blocking);
        out
    }

    /// Append the encoding to `entry`'s payload.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ArgumentTooLarge`] if the entry lacks room.
    pub fn encode_into(&self, entry: &mut TaskEntry) -> KernelResult<()> {
        entry.append_bytes(&self.encode())
    }

    /// Decode from a payload reader.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineFault`] for a short payload or bad direction.
    pub fn decode(reader: &mut ArgReader<'_>) -> Result<Self, EngineFault> {
        let direction = Direction::try_from(reader.read_u8()?)?;
        let distance = reader.read_f32()?;
        let blocking = reader.read_bool()?;
        Ok(Self {
            direction,
            distance,
            blocking,
        })
    }
}

/// Payload of [`service::MOVE_ARC`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ArcCommand {
    /// Arc length in cm.
    pub distance: f32,
    /// Turn angle in degrees.
    pub angle: f32,
    /// Radius of the inner wheel's arc in cm.
    pub small_radius: f32,
}

impl ArcCommand {
    /// Wire encoding.
    #[must_use]
    pub fn encode(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&self.distance.to_le_bytes());
        out[4..8].copy_from_slice(&self.angle.to_le_bytes());
        out[8..12].copy_from_slice(&self.small_radius.to_le_bytes());
        out
    }

    /// Append the encoding to `entry`'s payload.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ArgumentTooLarge`] if the entry lacks room.
    pub fn encode_into(&self, entry: &mut TaskEntry) -> KernelResult<()> {
        entry.append_bytes(&self.encode())
    }

    /// Decode from a payload reader.
    ///
    /// # Errors
    ///
    /// Returns [`EngineFault::BadArgs`] for a short payload.
    pub fn decode(reader: &mut ArgReader<'_>) -> Result<Self, EngineFault> {
        Ok(Self {
            distance: reader.read_f32()?,
            angle: reader.read_f32()?,
            small_radius: reader.read_f32()?,
        })
    }
}

/// Payload of [`service::MOVE_PERCENT`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentCommand {
    /// Direction of travel.
    pub direction: Direction,
    /// Left wheel duty in percent (0..=100).
    pub left: f32,
    /// Right wheel duty in percent (0..=100).
    pub right: f32,
}

impl PercentCommand {
    /// Wire encoding.
    #[must_use]
    pub fn encode(&self) -> [u8; 9] {
        let mut out = [0u8; 9];
        out[0] = self.direction as u8;
        out[1..5].copy_from_slice(&self.left.to_le_bytes());
        out[5..9].copy_from_slice(&self.right.to_le_bytes());
        out
    }

    /// Append the encoding to `entry`'s payload.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ArgumentTooLarge`] if the entry lacks room.
    pub fn encode_into(&self, entry: &mut TaskEntry) -> KernelResult<()> {
        entry.append_bytes(&self.encode())
    }

    /// Decode from a payload reader, rejecting duties outside 0..=100.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineFault`] for a short payload, bad direction or duty.
    pub fn decode(reader: &mut ArgReader<'_>) -> Result<Self, EngineFault> {
        let direction = Direction::try_from(reader.read_u8()?)?;
        let left = reader.read_f32()?;
        let right = reader.read_f32()?;
        for duty in [left, right] {
            if !(0.0..=100.0).contains(&duty) {
                return Err(EngineFault::OutOfRange(duty));
            }
        }
        Ok(Self {
            direction,
            left,
            right,
        })
    }
}

/// Last command applied to the motors.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MotorCommand {
    /// Nothing applied since start or reboot.
    #[default]
    Idle,
    /// Straight move or rotation.
    Move(MoveCommand),
    /// Arc move.
    Arc(ArcCommand),
    /// Per-wheel duty.
    Percent(PercentCommand),
}

/// Wheel and encoder dimensions used by the speed loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelGeometry {
    /// Wheel diameter in cm.
    pub wheel_diameter_cm: f32,
    /// Encoder ticks per wheel revolution.
    pub encoder_resolution: f32,
}

impl Default for WheelGeometry {
    fn default() -> Self {
        Self {
            wheel_diameter_cm: 6.8,
            encoder_resolution: 360.0,
        }
    }
}

/// Observable state of the engines.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EngineSnapshot {
    /// Last command applied.
    pub last_command: MotorCommand,
    /// Encoder ticks per wheel [left, right].
    pub wheel_counter: [i32; 2],
    /// Wheel speed in cm/s [left, right], as of the last speed loop.
    pub wheel_speed: [f32; 2],
    /// Successful reboots.
    pub reboots: u32,
    /// Motion commands applied.
    pub commands: u64,
}

#[derive(Debug, Default)]
struct EngineState {
    snapshot: EngineSnapshot,
    last_counter: [i32; 2],
    last_speed_ms: Millis,
}

/// The engines kernel module.
#[derive(Debug)]
pub struct Engines {
    slot: ServiceSlot,
    state: Mutex<EngineState>,
    time_base: Arc<TimeBase>,
    geometry: WheelGeometry,
}

impl Engines {
    /// Create the module; `time_base` times the speed loop.
    #[must_use]
    pub fn new(time_base: Arc<TimeBase>) -> Self {
        Self::with_geometry(time_base, WheelGeometry::default())
    }

    /// Create the module with explicit wheel dimensions.
    #[must_use]
    pub fn with_geometry(time_base: Arc<TimeBase>, geometry: WheelGeometry) -> Self {
        Self {
            slot: ServiceSlot::new(MAX_PAYLOAD),
            state: Mutex::new(EngineState::default()),
            time_base,
            geometry,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current motor state.
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        self.state().snapshot
    }

    /// Feed simulated encoder ticks.
    pub fn add_encoder_ticks(&self, left: i32, right: i32) {
        let mut state = self.state();
        state.snapshot.wheel_counter[0] += left;
        state.snapshot.wheel_counter[1] += right;
    }

    fn apply(&self, command: MotorCommand) {
        debug!(?command, "Applying motor command");
        let mut state = self.state();
        state.snapshot.last_command = command;
        state.snapshot.commands += 1;
    }

    fn reboot(&self) {
        info!("Reinitializing motor hardware");
        let mut state = self.state();
        let reboots = state.snapshot.reboots + 1;
        *state = EngineState::default();
        state.snapshot.reboots = reboots;
        state.last_speed_ms = self.time_base.now_ms();
    }

    #[allow(clippy::cast_precision_loss)]
    fn speed_loop(&self) {
        let now = self.time_base.now_ms();
        let mut state = self.state();
        let counter = state.snapshot.wheel_counter;
        let speed = state.snapshot.wheel_speed;

        // Nothing moved and already at rest
        if counter == state.last_counter && speed[0] + speed[1] < 0.01 {
            return;
        }
        let elapsed_ms = now.saturating_sub(state.last_speed_ms);
        if elapsed_ms == 0 {
            return;
        }

        let cm_per_tick = PI * self.geometry.wheel_diameter_cm / self.geometry.encoder_resolution;
        let elapsed_s = elapsed_ms as f32 / 1000.0;
        for wheel in 0..2 {
            let ticks = counter[wheel] - state.last_counter[wheel];
            state.snapshot.wheel_speed[wheel] = ticks as f32 * cm_per_tick / elapsed_s;
        }
        state.last_counter = counter;
        state.last_speed_ms = now;
    }

    fn run(&self, service_id: ServiceId, reader: &mut ArgReader<'_>) -> Option<Result<(), EngineFault>> {
        let result = match service_id {
            service::MOVE => MoveCommand::decode(reader).map(|c| self.apply(MotorCommand::Move(c))),
            service::MOVE_ARC => {
                ArcCommand::decode(reader).map(|c| self.apply(MotorCommand::Arc(c)))
            }
            service::MOVE_PERCENT => {
                PercentCommand::decode(reader).map(|c| self.apply(MotorCommand::Percent(c)))
            }
            service::REBOOT => {
                if reader.read_u8().ok() != Some(REBOOT_CODE) {
                    debug!("Reboot request without reboot code ignored");
                    return None;
                }
                self.reboot();
                Ok(())
            }
            service::SPEED_LOOP => {
                self.speed_loop();
                Ok(())
            }
            other => {
                debug!(service_id = other, "Unknown engines service");
                return None;
            }
        };
        Some(result)
    }
}

impl Dispatchable for Engines {
    fn name(&self) -> &str {
        "engines"
    }

    fn service_slot(&self) -> &ServiceSlot {
        &self.slot
    }

    fn invoke(&self, request: &mut ServiceBuffer) {
        let service_id = request.service_id();
        let mut reader = request.reader();

        // Ignored requests leave the previous outcome in place
        let Some(result) = self.run(service_id, &mut reader) else {
            return;
        };

        let outcome = match result {
            Ok(()) => ServiceOutcome::Ok,
            Err(fault) => {
                warn!(service_id, error = %fault, "Engines service failed");
                ServiceOutcome::Failed(fault.code())
            }
        };
        request.set_outcome(outcome);
    }
}
