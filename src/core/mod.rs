/// Core slot management
///
/// This package contains everything that does not depend on a front end:
/// - Descriptor types, validation and persistence
/// - The device model catalog
/// - Helper server supervision
/// - Connection construction and the slot registry
/// - Per-slot log channels and the communication pump
/// - The tick loop and its command/event bus
pub mod bus;
pub mod client;
pub mod device_models;
pub mod logs;
pub mod manager;
pub mod persistence;
pub mod pump;
pub mod runtime;
pub mod settings;
pub mod slots;
pub mod subprocess;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use bus::{Bus, SlotCommand, SlotEvent};
pub use client::{ClientFactory, ClientInit, NoSelection, ObjectSelection, TelescopeClient};
pub use manager::SlotManager;
pub use runtime::{run_tick_loop, RuntimeConfig};
pub use settings::Settings;
pub use slots::{AsSlot, SlotError, SlotState};
pub use types::{ConnectionDescriptor, ConnectionKind, Equinox, J2000Position, SlotNumber};
