//! Capabilities ("addons") attached to units.
//!
//! An addon is attached to a unit before it starts and is owned by it from
//! then on. The unit drives the lifecycle:
//!
//! 1. `init(owner)` once, after the bootstrap program ran and before the
//!    init entry point is called
//! 2. `update(dt)` once per step, before the per-frame entry point
//! 3. `shutdown()` once, when the unit is destroyed, whatever state it
//!    ended in
//!
//! Addons are always visited in attachment order, so a later addon may rely
//! on earlier ones having applied their per-frame side effects.

mod clock;

pub use clock::FrameClock;

use crate::unit::Unit;

/// A named, versioned attachment to a unit.
pub trait Addon: Send {
    fn name(&self) -> &str;

    /// Opaque interface description consumed by script-side binders.
    fn descriptor(&self) -> &str;

    fn version(&self) -> &str;

    /// Called once before the unit's first step.
    ///
    /// `owner` is a borrowed view of the unit; keep a
    /// [`WeakUnit`](crate::unit::WeakUnit) if the addon needs it later.
    fn init(&mut self, owner: &Unit) -> anyhow::Result<()>;

    fn update(&mut self, dt: f64);

    fn shutdown(&mut self);
}

/// Static description of an attached addon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonInfo {
    pub name: String,
    pub descriptor: String,
    pub version: String,
}

impl AddonInfo {
    pub fn of(addon: &dyn Addon) -> Self {
        Self {
            name: addon.name().to_string(),
            descriptor: addon.descriptor().to_string(),
            version: addon.version().to_string(),
        }
    }
}
