//! Shared primitive types used across the engine.

/// A stable, unique identifier for any game entity (adventurer, mission, facility).
pub type EntityId = String;

/// Elapsed simulated time carried by a tick, in milliseconds.
pub type DeltaMs = u64;
