/// Mirrors the server-declared read-only flag of a whole collection. The
/// flag only changes through a fetch; lock/unlock live on the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockGuard {
    locked: bool,
}

impl LockGuard {
    pub fn observe(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}
