use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// How a gate wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// An external event resolved the gate with this decision.
    Resolved(bool),
    /// Nobody answered within the configured window.
    TimedOut,
    /// The pending sender was dropped without resolving (adapter torn down
    /// or gate re-armed).
    Abandoned,
}

/// Single-use synchronization point pairing one suspended `ask` with one
/// externally-triggered `resolve`.
///
/// Owned exclusively by one adapter instance. At most one gate is pending at
/// a time; re-arming releases the previous waiter as abandoned. A resolution
/// consumes the pending sender, so a second resolution attempt finds nothing
/// and is a no-op.
pub struct GateSlot {
    pending: Mutex<Option<oneshot::Sender<bool>>>,
}

impl GateSlot {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }

    /// Create a fresh gate and return its receiver. Must be called before
    /// the prompt goes out, so an immediate button press still lands.
    pub fn arm(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        if pending.replace(tx).is_some() {
            warn!("gate armed while another was pending — previous waiter released");
        }
        rx
    }

    /// Resolve the pending gate. Returns whether a waiter was released;
    /// a resolution with no pending gate is logged and dropped.
    pub fn resolve(&self, decision: bool) -> bool {
        match self.pending.lock().take() {
            Some(tx) => {
                // Err only if the waiter already gave up; nothing to do then.
                let _ = tx.send(decision);
                true
            }
            None => {
                debug!("gate resolution with no pending gate — dropped");
                false
            }
        }
    }

    /// Drop the pending sender without resolving (timeout cleanup).
    pub fn clear(&self) {
        self.pending.lock().take();
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Await a previously armed gate. `timeout_secs == 0` waits forever.
    pub async fn wait(rx: oneshot::Receiver<bool>, timeout_secs: u64) -> GateOutcome {
        if timeout_secs == 0 {
            return match rx.await {
                Ok(decision) => GateOutcome::Resolved(decision),
                Err(_) => GateOutcome::Abandoned,
            };
        }
        match tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), rx).await {
            Ok(Ok(decision)) => GateOutcome::Resolved(decision),
            Ok(Err(_)) => GateOutcome::Abandoned,
            Err(_) => GateOutcome::TimedOut,
        }
    }
}

impl Default for GateSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_releases_waiter_with_decision() {
        let gate = GateSlot::new();
        let rx = gate.arm();
        assert!(gate.is_pending());

        assert!(gate.resolve(true));
        assert_eq!(GateSlot::wait(rx, 0).await, GateOutcome::Resolved(true));
        assert!(!gate.is_pending());
    }

    #[tokio::test]
    async fn test_second_resolution_is_noop() {
        let gate = GateSlot::new();
        let rx = gate.arm();

        assert!(gate.resolve(false));
        assert!(!gate.resolve(true));
        assert_eq!(GateSlot::wait(rx, 0).await, GateOutcome::Resolved(false));
    }

    #[tokio::test]
    async fn test_resolution_without_pending_gate_is_dropped() {
        let gate = GateSlot::new();
        assert!(!gate.resolve(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let gate = GateSlot::new();
        let rx = gate.arm();

        let outcome = GateSlot::wait(rx, 5).await;
        assert_eq!(outcome, GateOutcome::TimedOut);

        // Cleanup makes a late click a no-op.
        gate.clear();
        assert!(!gate.resolve(true));
    }

    #[tokio::test]
    async fn test_rearming_abandons_previous_waiter() {
        let gate = GateSlot::new();
        let first = gate.arm();
        let second = gate.arm();

        assert_eq!(GateSlot::wait(first, 0).await, GateOutcome::Abandoned);
        gate.resolve(true);
        assert_eq!(GateSlot::wait(second, 0).await, GateOutcome::Resolved(true));
    }
}
