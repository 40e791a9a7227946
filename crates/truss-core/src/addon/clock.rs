//! Frame clock addon.

use crate::addon::Addon;
use crate::message::MessageType;
use crate::registry::WeakRegistry;
use crate::unit::{Unit, UnitId};

const DESCRIPTOR: &str = "\
clock.<unit>.frame    CString  frames stepped so far
clock.<unit>.elapsed  CString  seconds accumulated from update dt";

/// Counts frames and accumulated time for its unit and publishes both to
/// the store under `clock.<unit id>.frame` and `clock.<unit id>.elapsed`.
#[derive(Default)]
pub struct FrameClock {
    owner: Option<(UnitId, WeakRegistry)>,
    frames: u64,
    elapsed: f64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    fn publish(&self) {
        let Some((unit, registry)) = &self.owner else {
            return;
        };
        let Some(registry) = registry.upgrade() else {
            return;
        };
        registry.set_store_bytes(
            &format!("clock.{}.frame", unit),
            MessageType::CString,
            self.frames.to_string().as_bytes(),
        );
        registry.set_store_bytes(
            &format!("clock.{}.elapsed", unit),
            MessageType::CString,
            format!("{:.6}", self.elapsed).as_bytes(),
        );
    }
}

impl Addon for FrameClock {
    fn name(&self) -> &str {
        "clock"
    }

    fn descriptor(&self) -> &str {
        DESCRIPTOR
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn init(&mut self, owner: &Unit) -> anyhow::Result<()> {
        self.owner = Some((owner.id(), owner.registry()));
        self.frames = 0;
        self.elapsed = 0.0;
        self.publish();
        Ok(())
    }

    fn update(&mut self, dt: f64) {
        self.frames += 1;
        self.elapsed += dt;
        self.publish();
    }

    fn shutdown(&mut self) {
        if let Some((unit, _)) = &self.owner {
            log::debug!("clock for unit {} stopped after {} frames", unit, self.frames);
        }
        self.owner = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Registry, RuntimeConfig};

    #[test]
    fn test_clock_publishes_frames() {
        let registry = Registry::new(RuntimeConfig::default());
        registry
            .add_memory_file(
                "scripts/core/bootstrap.rhai",
                "fn core_init(arg) {} fn core_update() {}",
            )
            .unwrap();
        let unit = registry.spawn().unwrap();
        unit.attach_addon(Box::new(FrameClock::new())).unwrap();
        unit.start("", false).unwrap();

        let key = format!("clock.{}.frame", unit.id());
        assert_eq!(registry.get_store_string(&key).as_deref(), Some("0"));
        unit.step().unwrap();
        unit.step().unwrap();
        assert_eq!(registry.get_store_string(&key).as_deref(), Some("2"));
        assert!(registry
            .get_store_string(&format!("clock.{}.elapsed", unit.id()))
            .is_some());
    }
}
