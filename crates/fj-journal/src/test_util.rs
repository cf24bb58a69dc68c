//! Shared helpers for tests that touch the process-global registry.

use parking_lot::{const_mutex, Mutex, MutexGuard};

/// The instance table is process-global with a bounded slot count; tests
/// that mount through the registry serialise here so they never fight over
/// slots.
pub(crate) fn registry_gate() -> MutexGuard<'static, ()> {
    static GATE: Mutex<()> = const_mutex(());
    GATE.lock()
}
