use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::memory::ModuleQuery;

/// Modules whose path contains this may always register handlers.
pub const VEH_DEBUGGER_MARKER: &str = "vehdebug";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehDecision {
    /// Pass the registration on to the real function.
    Forward,
    /// Swallow it and hand back a non-null dummy.
    Deny,
}

/// Who may register vectored exception handlers.
///
/// The game installs handlers that interfere with our hooks, so
/// registrations are refused until explicitly allowed, except from our own
/// module and from debugger helpers.
#[derive(Debug)]
pub struct VehPolicy {
    own_module: u64,
    allowed: AtomicBool,
    called: AtomicBool,
}

impl VehPolicy {
    pub fn new(own_module: u64) -> Self {
        Self {
            own_module,
            allowed: AtomicBool::new(false),
            called: AtomicBool::new(false),
        }
    }

    pub fn allow(&self) {
        self.allowed.store(true, Ordering::SeqCst);
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed.load(Ordering::SeqCst)
    }

    /// Whether any registration has been seen.
    pub fn was_called(&self) -> bool {
        self.called.load(Ordering::SeqCst)
    }

    pub fn decide<Q: ModuleQuery + ?Sized>(&self, modules: &Q, return_address: u64) -> VehDecision {
        self.called.store(true, Ordering::SeqCst);

        if self.is_allowed() {
            return VehDecision::Forward;
        }

        if let Some(caller) = modules.module_containing(return_address) {
            let debugger = caller
                .path
                .to_ascii_lowercase()
                .contains(VEH_DEBUGGER_MARKER);
            if debugger || caller.base == self.own_module {
                info!("Exception handler allowed for {}", caller.name);
                return VehDecision::Forward;
            }
        }

        warn!(
            "Exception handler registration from {:#x} not allowed",
            return_address
        );
        VehDecision::Deny
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Protection, SnapshotMemory};

    const GAME: u64 = 0x140000000;
    const OURS: u64 = 0x180000000;
    const DEBUGGER: u64 = 0x7FF700000000;

    fn modules() -> SnapshotMemory {
        SnapshotMemory::builder()
            .module("game.exe", GAME, vec![0; 0x1000], Protection::EXECUTE_READ)
            .module("reguard.dll", OURS, vec![0; 0x1000], Protection::EXECUTE_READ)
            .module("C:\\ce\\VEHDebug-x86_64.dll", DEBUGGER, vec![0; 0x1000], Protection::EXECUTE_READ)
            .build()
    }

    #[test]
    fn test_game_registration_denied() {
        let policy = VehPolicy::new(OURS);
        assert!(!policy.was_called());
        assert_eq!(policy.decide(&modules(), GAME + 0x10), VehDecision::Deny);
        assert!(policy.was_called());
    }

    #[test]
    fn test_own_and_debugger_modules_forwarded() {
        let policy = VehPolicy::new(OURS);
        let modules = modules();
        assert_eq!(policy.decide(&modules, OURS + 0x20), VehDecision::Forward);
        assert_eq!(policy.decide(&modules, DEBUGGER + 0x20), VehDecision::Forward);
        assert_eq!(policy.decide(&modules, 0x1000), VehDecision::Deny);
    }

    #[test]
    fn test_allow_forwards_everything() {
        let policy = VehPolicy::new(OURS);
        policy.allow();
        assert_eq!(policy.decide(&modules(), GAME), VehDecision::Forward);
    }
}
