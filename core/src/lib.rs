//! guildhall-core: the message-bus and tick-replay engine behind an idle
//! guild-management game.
//!
//! Intents enter through the [`command_bus::CommandBus`], facts leave
//! through the [`event_bus::DomainEventBus`], time flows from the
//! [`tick_bus::TickBus`], and the [`persistence::PersistenceBus`] decides
//! when to write. [`engine::SimEngine`] wires them around one state cell.

pub mod clock;
pub mod command;
pub mod command_bus;
pub mod config;
mod delivery;
pub mod engine;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod message;
pub mod persistence;
pub mod state;
pub mod store;
pub mod tick_bus;
pub mod types;

pub use delivery::Subscription;
