//! Client-side coordination core for a multiplayer overlay over a
//! single-player Game Boy Advance RPG: ghost motion, the PvP duel flow,
//! and the buffer-relay battle controller. Embedded directly into a host
//! process that owns the emulator and the socket to the relay server;
//! this crate touches neither.

pub mod battle;
pub mod camera;
pub mod config;
pub mod duel;
pub mod error;
pub mod ghost;
pub mod interpolator;
pub mod memory;
pub mod model;
pub mod scheduler;
pub mod textbox;
pub mod transport;
pub mod warp;

pub use config::AddressMap;
pub use error::{ConfigError, MemoryError, WarpError};
pub use memory::{Domain, MemoryBus};
pub use scheduler::{GhostLayout, HostEvent, LocalFrameInputs, RemoteSpriteFrame, Scheduler, SchedulerOutput};
pub use transport::{ChannelTransportAdapter, TransportAdapter};
