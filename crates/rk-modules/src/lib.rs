//! Kernel modules for the rover.
//!
//! Each module implements [`rk_runtime::Dispatchable`] and is registered at
//! a fixed module ID:
//!
//! - **Radio** ([`radio`], ID 0): TCP server and client sockets
//! - **Engines** ([`engines`], ID 1): motor commands and the speed loop
//!
//! Hardware is simulated; both modules expose their state for inspection.
//!
//! # Example
//!
//! ```
//! use rk_modules::engines::{service, Direction, Engines, MotorCommand, MoveCommand, ENGINES_MODULE_ID};
//! use rk_runtime::{DispatcherBuilder, TaskEntry};
//! use std::sync::Arc;
//!
//! let mut dispatcher = DispatcherBuilder::new().build().unwrap();
//! let engines = Arc::new(Engines::new(Arc::clone(dispatcher.time_base())));
//! dispatcher.register(ENGINES_MODULE_ID, engines.clone()).unwrap();
//!
//! let cmd = MoveCommand { direction: Direction::Forward, distance: 20.0, blocking: false };
//! let mut entry = TaskEntry::new(ENGINES_MODULE_ID, service::MOVE);
//! cmd.encode_into(&mut entry).unwrap();
//! dispatcher.queue().push_task(entry).unwrap();
//!
//! dispatcher.poll();
//! assert_eq!(engines.snapshot().last_command, MotorCommand::Move(cmd));
//! ```

pub mod engines;
pub mod radio;

pub use engines::{Engines, EngineFault, EngineSnapshot, ENGINES_MODULE_ID};
pub use radio::{Radio, RadioFault, RADIO_MODULE_ID};
