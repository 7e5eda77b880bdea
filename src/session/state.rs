//! Atomic session phase machine.
//!
//! Thread-safe phase tracking shared between the caller, the uplink and
//! downlink pumps, and the speaking watcher. The session is never in two
//! phases at once; transitions are CAS-guarded so racing tasks cannot
//! both claim one.

use std::sync::atomic::{AtomicU8, Ordering};

/// Session lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// No resources held. Initial and terminal.
    Idle = 0,
    /// Capture device and push-stream being established.
    Connecting = 1,
    /// Capture active, uplink streaming, playback queue empty.
    Listening = 2,
    /// Playback queue non-empty, audio going out.
    Speaking = 3,
    /// Terminal failure; resources released.
    Error = 4,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Listening,
            3 => Self::Speaking,
            4 => Self::Error,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Listening => write!(f, "listening"),
            Self::Speaking => write!(f, "speaking"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct PhaseMachine {
    phase: AtomicU8,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Idle as u8),
        }
    }

    pub fn current(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Claim Idle -> Connecting. Fails when any session is already live,
    /// which is how a second `start()` gets rejected without side effects.
    pub fn begin_connecting(&self) -> bool {
        self.phase
            .compare_exchange(
                Phase::Idle as u8,
                Phase::Connecting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Connecting -> Listening (start succeeded) or Speaking -> Listening
    /// (playback queue drained).
    pub fn mark_listening(&self) -> bool {
        for from in [Phase::Connecting, Phase::Speaking] {
            if self
                .phase
                .compare_exchange(
                    from as u8,
                    Phase::Listening as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    /// Listening -> Speaking, driven by the playback queue going non-empty.
    pub fn mark_speaking(&self) -> bool {
        self.phase
            .compare_exchange(
                Phase::Listening as u8,
                Phase::Speaking as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Any phase -> Error. True when the phase actually changed, so a
    /// second racing teardown does not announce the transition twice.
    pub fn mark_error(&self) -> bool {
        self.phase.swap(Phase::Error as u8, Ordering::AcqRel) != Phase::Error as u8
    }

    /// Back to Idle after teardown. True when the phase actually changed.
    pub fn reset(&self) -> bool {
        self.phase.swap(Phase::Idle as u8, Ordering::AcqRel) != Phase::Idle as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle_and_connects_once() {
        let machine = PhaseMachine::new();
        assert_eq!(machine.current(), Phase::Idle);
        assert!(machine.begin_connecting());
        // Second claim is rejected, phase unchanged.
        assert!(!machine.begin_connecting());
        assert_eq!(machine.current(), Phase::Connecting);
    }

    #[test]
    fn listening_speaking_cycle() {
        let machine = PhaseMachine::new();
        assert!(machine.begin_connecting());
        assert!(machine.mark_listening());
        assert!(machine.mark_speaking());
        assert_eq!(machine.current(), Phase::Speaking);
        assert!(machine.mark_listening());
        assert_eq!(machine.current(), Phase::Listening);
    }

    #[test]
    fn speaking_requires_listening() {
        let machine = PhaseMachine::new();
        assert!(!machine.mark_speaking());
        assert!(machine.begin_connecting());
        assert!(!machine.mark_speaking());
        assert_eq!(machine.current(), Phase::Connecting);
    }

    #[test]
    fn error_is_reachable_from_anywhere_and_reset_clears() {
        let machine = PhaseMachine::new();
        machine.begin_connecting();
        assert!(machine.mark_error());
        assert_eq!(machine.current(), Phase::Error);
        // start() stays rejected until a reset.
        assert!(!machine.begin_connecting());
        assert!(machine.reset());
        assert_eq!(machine.current(), Phase::Idle);
        assert!(machine.begin_connecting());
    }

    #[test]
    fn repeated_error_and_reset_report_no_change() {
        let machine = PhaseMachine::new();
        machine.begin_connecting();
        assert!(machine.mark_error());
        assert!(!machine.mark_error());
        assert!(machine.reset());
        assert!(!machine.reset());
        assert_eq!(machine.current(), Phase::Idle);
    }
}
