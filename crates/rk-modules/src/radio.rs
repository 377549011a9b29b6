//! Wi-Fi radio module.
//!
//! Models the TCP side of the rover's radio: one optional listening server
//! and a small table of client sockets. No network traffic is generated;
//! outgoing frames are recorded and inbound data is injected by the caller.
//!
//! # Payload layouts
//!
//! ```text
//! TCP_SERVER   enable u8 | port u16
//! CONNECT_TCP  dotted IPv4 as ASCII | port u16
//! SEND_TCP     socket u8 | data
//! RECEIVE      socket u8
//! CLOSE_TCP    socket u8
//! ```
//!
//! Ports are little-endian.
//!
//! # Inbound hook
//!
//! [`Radio::set_hook`] installs a callback that runs on whichever thread
//! calls [`Radio::inject_inbound`], after the bytes are buffered. It plays
//! the part of the receive interrupt: typically it pushes a reply task onto
//! a [`SharedQueue`](rk_runtime::SharedQueue) for the dispatcher to run.

use rk_common::error::{KernelError, KernelResult};
use rk_runtime::{
    ArgReader, Dispatchable, ModuleId, ServiceBuffer, ServiceId, ServiceOutcome, ServiceSlot,
    TaskEntry, ARG_CAPACITY,
};
use std::collections::VecDeque;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Registry slot of the radio module.
pub const RADIO_MODULE_ID: ModuleId = 0;

/// Services offered by the radio module.
pub mod service {
    use rk_runtime::ServiceId;

    /// Start or stop the TCP server.
    pub const TCP_SERVER: ServiceId = 0;
    /// Open a client connection.
    pub const CONNECT_TCP: ServiceId = 1;
    /// Send data on an open socket.
    pub const SEND_TCP: ServiceId = 2;
    /// Collect data received on a socket.
    pub const RECEIVE: ServiceId = 3;
    /// Close a socket.
    pub const CLOSE_TCP: ServiceId = 4;
}

/// Maximum simultaneously open sockets.
pub const MAX_SOCKETS: usize = 5;

/// Frames kept in each of the sent and received logs; older ones are dropped.
pub const MAX_RETAINED_FRAMES: usize = 64;

/// Callback run when inbound data arrives, with the socket ID and the bytes.
pub type InboundHook = Box<dyn Fn(u8, &[u8]) + Send + Sync>;

/// Why a radio service failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RadioFault {
    /// Payload shorter than the service layout.
    #[error("malformed payload: {0}")]
    BadArgs(#[from] KernelError),
    /// Address text is not a dotted IPv4 address.
    #[error("invalid IPv4 address {0:?}")]
    BadAddress(String),
    /// Socket ID not open.
    #[error("socket {0} not open")]
    NoSuchSocket(u8),
    /// All sockets in use.
    #[error("no free socket")]
    NoFreeSocket,
}

impl RadioFault {
    /// Code written to the outcome slot.
    #[must_use]
    pub fn code(&self) -> u8 {
        match self {
            Self::BadArgs(_) => 1,
            Self::BadAddress(_) => 2,
            Self::NoSuchSocket(_) => 3,
            Self::NoFreeSocket => 4,
        }
    }
}

/// Payload of [`service::CONNECT_TCP`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Server address.
    pub ip: Ipv4Addr,
    /// Server port.
    pub port: u16,
}

impl ConnectRequest {
    /// Append the encoding to `entry`'s payload.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ArgumentTooLarge`] if the entry lacks room;
    /// the entry is left unchanged.
    pub fn encode_into(&self, entry: &mut TaskEntry) -> KernelResult<()> {
        let text = self.ip.to_string();
        let needed = text.len() + 2;
        if needed > entry.remaining() {
            return Err(KernelError::ArgumentTooLarge {
                requested: needed,
                available: entry.remaining(),
            });
        }
        entry.append_bytes(text.as_bytes())?;
        entry.append_u16(self.port)
    }

    /// Decode a whole payload: everything but the last two bytes is the
    /// address text.
    ///
    /// # Errors
    ///
    /// Returns a [`RadioFault`] for a short payload or unparsable address.
    pub fn decode(reader: &mut ArgReader<'_>) -> Result<Self, RadioFault> {
        let text_len = reader.remaining().checked_sub(2).ok_or(KernelError::PayloadUnderrun {
            needed: 2,
            remaining: reader.remaining(),
        })?;
        let text = reader.read_bytes(text_len)?;
        let port = reader.read_u16()?;

        let text = std::str::from_utf8(text)
            .map_err(|_| RadioFault::BadAddress(String::from_utf8_lossy(text).into_owned()))?;
        let ip = text
            .trim_end_matches('\0')
            .parse()
            .map_err(|_| RadioFault::BadAddress(text.to_owned()))?;
        Ok(Self { ip, port })
    }
}

/// Append a [`service::SEND_TCP`] payload to `entry`.
///
/// # Errors
///
/// Returns [`KernelError::ArgumentTooLarge`] if `data` plus the socket byte
/// does not fit; the entry is left unchanged.
pub fn encode_send(entry: &mut TaskEntry, socket: u8, data: &[u8]) -> KernelResult<()> {
    if data.len() + 1 > entry.remaining() {
        return Err(KernelError::ArgumentTooLarge {
            requested: data.len() + 1,
            available: entry.remaining(),
        });
    }
    entry.append_bytes(&[socket])?;
    entry.append_bytes(data)
}

/// An open client socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socket {
    /// Socket ID.
    pub id: u8,
    /// Remote address.
    pub ip: Ipv4Addr,
    /// Remote port.
    pub port: u16,
    inbound: Vec<u8>,
}

#[derive(Debug, Default)]
struct RadioState {
    server_port: Option<u16>,
    sockets: [Option<Socket>; MAX_SOCKETS],
    sent: VecDeque<(u8, Vec<u8>)>,
    received: VecDeque<(u8, Vec<u8>)>,
    frames_sent: u64,
}

fn retain(log: &mut VecDeque<(u8, Vec<u8>)>, frame: (u8, Vec<u8>)) {
    if log.len() == MAX_RETAINED_FRAMES {
        log.pop_front();
    }
    log.push_back(frame);
}

impl RadioState {
    fn socket_mut(&mut self, id: u8) -> Result<&mut Socket, RadioFault> {
        self.sockets
            .get_mut(usize::from(id))
            .and_then(Option::as_mut)
            .ok_or(RadioFault::NoSuchSocket(id))
    }
}

/// The radio kernel module.
pub struct Radio {
    slot: ServiceSlot,
    state: Mutex<RadioState>,
    hook: Mutex<Option<InboundHook>>,
}

impl fmt::Debug for Radio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let has_hook = self
            .hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        f.debug_struct("Radio")
            .field("slot", &self.slot)
            .field("state", &self.state)
            .field("has_hook", &has_hook)
            .finish()
    }
}

impl Default for Radio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio {
    /// Create the module with no server and no sockets.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: ServiceSlot::new(ARG_CAPACITY),
            state: Mutex::new(RadioState::default()),
            hook: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, RadioState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Port the TCP server listens on, if running.
    #[must_use]
    pub fn server_port(&self) -> Option<u16> {
        self.state().server_port
    }

    /// IDs of open sockets.
    #[must_use]
    pub fn open_sockets(&self) -> Vec<u8> {
        self.state()
            .sockets
            .iter()
            .flatten()
            .map(|s| s.id)
            .collect()
    }

    /// Socket by ID.
    #[must_use]
    pub fn socket(&self, id: u8) -> Option<Socket> {
        self.state().sockets.get(usize::from(id)).cloned().flatten()
    }

    /// Most recent sent frames, oldest first, as (socket, data).
    ///
    /// At most [`MAX_RETAINED_FRAMES`] are kept.
    #[must_use]
    pub fn sent_frames(&self) -> Vec<(u8, Vec<u8>)> {
        self.state().sent.iter().cloned().collect()
    }

    /// Drain the retained sent frames.
    pub fn take_sent_frames(&self) -> Vec<(u8, Vec<u8>)> {
        self.state().sent.drain(..).collect()
    }

    /// Frames sent since creation, including ones no longer retained.
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.state().frames_sent
    }

    /// Most recent data collected by the receive service, as (socket, data).
    ///
    /// At most [`MAX_RETAINED_FRAMES`] are kept.
    #[must_use]
    pub fn received(&self) -> Vec<(u8, Vec<u8>)> {
        self.state().received.iter().cloned().collect()
    }

    /// Drain the retained received data.
    pub fn take_received(&self) -> Vec<(u8, Vec<u8>)> {
        self.state().received.drain(..).collect()
    }

    /// Install the inbound hook, replacing any previous one.
    pub fn set_hook(&self, hook: InboundHook) {
        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    /// Remove the inbound hook.
    pub fn clear_hook(&self) {
        self.hook.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Queue inbound bytes on a socket, as if they arrived from the network,
    /// then run the inbound hook if one is set.
    ///
    /// The radio state is not locked while the hook runs.
    ///
    /// # Errors
    ///
    /// Returns [`RadioFault::NoSuchSocket`] if the socket is not open; the
    /// hook is not called.
    pub fn inject_inbound(&self, socket: u8, data: &[u8]) -> Result<(), RadioFault> {
        self.state().socket_mut(socket)?.inbound.extend_from_slice(data);

        let hook = self.hook.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hook) = hook.as_ref() {
            debug!(socket, len = data.len(), "Running inbound hook");
            hook(socket, data);
        }
        Ok(())
    }

    fn tcp_server(&self, reader: &mut ArgReader<'_>) -> Result<(), RadioFault> {
        let enable = reader.read_bool()?;
        let mut state = self.state();
        if enable {
            let port = reader.read_u16()?;
            info!(port, "TCP server started");
            state.server_port = Some(port);
        } else if let Some(port) = state.server_port.take() {
            info!(port, "TCP server stopped");
        }
        Ok(())
    }

    fn connect(&self, reader: &mut ArgReader<'_>) -> Result<(), RadioFault> {
        let request = ConnectRequest::decode(reader)?;
        let mut state = self.state();
        let (index, free) = state
            .sockets
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.is_none())
            .ok_or(RadioFault::NoFreeSocket)?;

        // index < MAX_SOCKETS
        #[allow(clippy::cast_possible_truncation)]
        let id = index as u8;
        *free = Some(Socket {
            id,
            ip: request.ip,
            port: request.port,
            inbound: Vec::new(),
        });
        info!(socket = id, ip = %request.ip, port = request.port, "Socket opened");
        Ok(())
    }

    fn send(&self, reader: &mut ArgReader<'_>) -> Result<(), RadioFault> {
        let id = reader.read_u8()?;
        let data = reader.rest();
        let mut state = self.state();
        state.socket_mut(id)?;
        debug!(socket = id, len = data.len(), "Frame sent");
        state.frames_sent += 1;
        retain(&mut state.sent, (id, data.to_vec()));
        Ok(())
    }

    fn receive(&self, reader: &mut ArgReader<'_>) -> Result<(), RadioFault> {
        let id = reader.read_u8()?;
        let mut state = self.state();
        let data = std::mem::take(&mut state.socket_mut(id)?.inbound);
        if !data.is_empty() {
            debug!(socket = id, len = data.len(), "Data received");
            retain(&mut state.received, (id, data));
        }
        Ok(())
    }

    fn close(&self, reader: &mut ArgReader<'_>) -> Result<(), RadioFault> {
        let id = reader.read_u8()?;
        let mut state = self.state();
        state.socket_mut(id)?;
        state.sockets[usize::from(id)] = None;
        info!(socket = id, "Socket closed");
        Ok(())
    }
}

impl Dispatchable for Radio {
    fn name(&self) -> &str {
        "radio"
    }

    fn service_slot(&self) -> &ServiceSlot {
        &self.slot
    }

    fn invoke(&self, request: &mut ServiceBuffer) {
        let service_id: ServiceId = request.service_id();
        let mut reader = request.reader();
        let result = match service_id {
            service::TCP_SERVER => self.tcp_server(&mut reader),
            service::CONNECT_TCP => self.connect(&mut reader),
            service::SEND_TCP => self.send(&mut reader),
            service::RECEIVE => self.receive(&mut reader),
            service::CLOSE_TCP => self.close(&mut reader),
            other => {
                debug!(service_id = other, "Unknown radio service");
                return;
            }
        };

        let outcome = match result {
            Ok(()) => ServiceOutcome::Ok,
            Err(fault) => {
                warn!(service_id, error = %fault, "Radio service failed");
                ServiceOutcome::Failed(fault.code())
            }
        };
        request.set_outcome(outcome);
    }
}
