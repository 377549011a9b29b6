//! Cooperative, time-gated task dispatch for rover kernel modules.
//!
//! Producers push [`TaskEntry`] values (module, service, due time, payload)
//! into a fixed-capacity [`SharedQueue`]. A periodic [`TickSource`] advances
//! the [`TimeBase`]. The control loop polls the [`Dispatcher`], which pops
//! due entries in order and invokes the registered [`Dispatchable`] module
//! in-line.
//!
//! ```text
//!  producers ──push──► SharedQueue ──pop(due)──► Dispatcher ──invoke──► module
//!                                                    ▲
//!  TickSource ──tick──► TimeBase ──now_ms────────────┘
//! ```

pub mod dispatcher;
pub mod event_log;
pub mod kernel;
pub mod queue;
pub mod registry;
pub mod task;
pub mod time_base;

pub use dispatcher::*;
pub use event_log::*;
pub use kernel::*;
pub use queue::*;
pub use registry::*;
pub use task::*;
pub use time_base::*;
