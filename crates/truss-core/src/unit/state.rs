//! Unit identity and lifecycle states.

use std::fmt;

/// Stable, process-unique unit identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u32);

impl UnitId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    /// Convert a script-side integer id.
    pub fn from_i64(id: i64) -> Option<Self> {
        u32::try_from(id).ok().map(Self)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a unit.
///
/// ```text
/// NotStarted ──start──▶ Idle ◀──▶ Running
///      │                 │           │
///      └───────┬─────────┴───────────┘
///              ▼ failure
///            Error ─────────▶ Terminated ◀── stop (from anywhere)
/// ```
///
/// `Error` and `Terminated` are absorbing: only `Error → Terminated` leaves
/// either of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    NotStarted,
    Idle,
    Running,
    Error,
    Terminated,
}

impl UnitState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: UnitState) -> bool {
        use UnitState::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Error, _) => false,
            (NotStarted, Idle) | (NotStarted, Error) => true,
            (Idle, Running) | (Idle, Error) => true,
            (Running, Idle) | (Running, Error) => true,
            _ => false,
        }
    }

    /// `Error` or `Terminated`.
    pub fn is_finished(self) -> bool {
        matches!(self, UnitState::Error | UnitState::Terminated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitState::NotStarted => "NOT_STARTED",
            UnitState::Idle => "IDLE",
            UnitState::Running => "RUNNING",
            UnitState::Error => "ERROR",
            UnitState::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::UnitState::*;
    use super::*;

    const ALL: [UnitState; 5] = [NotStarted, Idle, Running, Error, Terminated];

    #[test]
    fn test_idle_running_cycle() {
        assert!(NotStarted.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Running));
        assert!(Running.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(NotStarted));
        assert!(!NotStarted.can_transition_to(Running));
    }

    #[test]
    fn test_absorbing_states() {
        for next in ALL {
            assert!(!Terminated.can_transition_to(next));
            assert_eq!(Error.can_transition_to(next), next == Terminated);
        }
    }

    #[test]
    fn test_everything_can_terminate() {
        for state in [NotStarted, Idle, Running, Error] {
            assert!(state.can_transition_to(Terminated));
        }
    }

    #[test]
    fn test_unit_id_conversion() {
        assert_eq!(UnitId::from_i64(7), Some(UnitId::new(7)));
        assert_eq!(UnitId::from_i64(-1), None);
        assert_eq!(UnitId::new(3).to_string(), "3");
        assert_eq!(Running.to_string(), "RUNNING");
    }
}
