//! Scopeslot: telescope connection slot manager
//!
//! A fixed set of numbered slots, each describing how to reach one
//! telescope: simulated, over a serial line (optionally bridged by an
//! external `TelescopeServer*` helper process) or over TCP. The crate
//! persists the slot descriptors, supervises helper processes, builds the
//! connections and drives them from a single tick loop.
//!
//! The `scopeslot` binary is a thin command-line front end over
//! [`core::SlotManager`].

#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
pub mod core;
pub mod protocol;

pub use crate::core::{
    ConnectionDescriptor, ConnectionKind, Equinox, J2000Position, Settings, SlotError,
    SlotManager, SlotNumber, SlotState,
};
