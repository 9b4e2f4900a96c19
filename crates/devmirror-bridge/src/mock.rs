//! Mock bridge and companion for testing.

use std::sync::{Arc, Condvar, Mutex};

use anyhow::anyhow;

use crate::error::BridgeError;
use crate::{Bridge, Companion};

// ---------------------------------------------------------------------------
// MockBridge
// ---------------------------------------------------------------------------

/// A bridge operation as observed by [`MockBridge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCall {
    Reverse { socket_name: String, port: u16 },
    RemoveReverse { socket_name: String },
    Forward { port: u16, socket_name: String },
    RemoveForward { port: u16 },
    StartCompanion { args: Vec<String> },
}

#[derive(Default)]
struct BridgeState {
    calls: Vec<BridgeCall>,
    companion: Option<MockCompanionHandle>,
}

/// Mock bridge that records every call and succeeds unless told otherwise.
#[derive(Default)]
pub struct MockBridge {
    fail_reverse: bool,
    fail_forward: bool,
    state: Arc<Mutex<BridgeState>>,
}

impl MockBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `reverse` call fail.
    #[must_use]
    pub fn failing_reverse(mut self) -> Self {
        self.fail_reverse = true;
        self
    }

    /// Make every `forward` call fail.
    #[must_use]
    pub fn failing_forward(mut self) -> Self {
        self.fail_forward = true;
        self
    }

    /// Get a handle to observe calls after the bridge has been moved.
    pub fn handle(&self) -> MockBridgeHandle {
        MockBridgeHandle {
            state: self.state.clone(),
        }
    }

    fn record(&self, call: BridgeCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl Bridge for MockBridge {
    fn reverse(&self, socket_name: &str, port: u16) -> Result<(), BridgeError> {
        self.record(BridgeCall::Reverse {
            socket_name: socket_name.to_string(),
            port,
        });
        if self.fail_reverse {
            return Err(BridgeError::Other(anyhow!("mock reverse failure")));
        }
        Ok(())
    }

    fn remove_reverse(&self, socket_name: &str) -> Result<(), BridgeError> {
        self.record(BridgeCall::RemoveReverse {
            socket_name: socket_name.to_string(),
        });
        Ok(())
    }

    fn forward(&self, port: u16, socket_name: &str) -> Result<(), BridgeError> {
        self.record(BridgeCall::Forward {
            port,
            socket_name: socket_name.to_string(),
        });
        if self.fail_forward {
            return Err(BridgeError::Other(anyhow!("mock forward failure")));
        }
        Ok(())
    }

    fn remove_forward(&self, port: u16) -> Result<(), BridgeError> {
        self.record(BridgeCall::RemoveForward { port });
        Ok(())
    }

    fn start_companion(&self, args: &[String]) -> Result<Box<dyn Companion>, BridgeError> {
        self.record(BridgeCall::StartCompanion {
            args: args.to_vec(),
        });
        let companion = MockCompanion::new();
        self.state.lock().unwrap().companion = Some(companion.handle());
        Ok(Box::new(companion))
    }
}

/// Clonable handle for inspecting a [`MockBridge`] after it has been moved.
#[derive(Clone)]
pub struct MockBridgeHandle {
    state: Arc<Mutex<BridgeState>>,
}

impl MockBridgeHandle {
    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<BridgeCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Ports passed to `reverse`, in call order.
    pub fn reverse_ports(&self) -> Vec<u16> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BridgeCall::Reverse { port, .. } => Some(port),
                _ => None,
            })
            .collect()
    }

    /// Number of `remove_reverse` calls.
    pub fn reverse_removals(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BridgeCall::RemoveReverse { .. }))
            .count()
    }

    /// Number of `remove_forward` calls.
    pub fn forward_removals(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BridgeCall::RemoveForward { .. }))
            .count()
    }

    /// Handle to the most recently started companion.
    pub fn companion(&self) -> Option<MockCompanionHandle> {
        self.state.lock().unwrap().companion.clone()
    }
}

// ---------------------------------------------------------------------------
// MockCompanion
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CompanionState {
    exited: bool,
    kills: usize,
}

/// Mock companion process. Runs until killed or until a test makes it exit.
#[derive(Default)]
pub struct MockCompanion {
    shared: Arc<(Mutex<CompanionState>, Condvar)>,
}

impl MockCompanion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> MockCompanionHandle {
        MockCompanionHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Companion for MockCompanion {
    fn is_running(&self) -> bool {
        !self.shared.0.lock().unwrap().exited
    }

    fn wait(&self) -> Result<(), BridgeError> {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap();
        while !state.exited {
            state = cvar.wait(state).unwrap();
        }
        Ok(())
    }

    fn kill(&self) -> Result<(), BridgeError> {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap();
        state.kills += 1;
        state.exited = true;
        cvar.notify_all();
        Ok(())
    }
}

/// Clonable handle for driving and inspecting a [`MockCompanion`].
#[derive(Clone)]
pub struct MockCompanionHandle {
    shared: Arc<(Mutex<CompanionState>, Condvar)>,
}

impl MockCompanionHandle {
    /// Simulate the process exiting on its own.
    pub fn exit(&self) {
        let (lock, cvar) = &*self.shared;
        lock.lock().unwrap().exited = true;
        cvar.notify_all();
    }

    pub fn has_exited(&self) -> bool {
        self.shared.0.lock().unwrap().exited
    }

    /// Number of times `kill` was called.
    pub fn kills(&self) -> usize {
        self.shared.0.lock().unwrap().kills
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_in_order() {
        let bridge = MockBridge::new();
        let handle = bridge.handle();
        bridge.reverse("devmirror", 27183).unwrap();
        bridge.remove_reverse("devmirror").unwrap();
        assert_eq!(
            handle.calls(),
            vec![
                BridgeCall::Reverse {
                    socket_name: "devmirror".into(),
                    port: 27183
                },
                BridgeCall::RemoveReverse {
                    socket_name: "devmirror".into()
                },
            ]
        );
    }

    #[test]
    fn failing_reverse_still_records() {
        let bridge = MockBridge::new().failing_reverse();
        assert!(bridge.reverse("devmirror", 1).is_err());
        assert_eq!(bridge.handle().reverse_ports(), vec![1]);
    }

    #[test]
    fn companion_wait_unblocks_on_exit() {
        let companion = MockCompanion::new();
        let handle = companion.handle();
        let waiter = std::thread::spawn(move || companion.wait());
        handle.exit();
        waiter.join().unwrap().unwrap();
        assert!(handle.has_exited());
        assert_eq!(handle.kills(), 0);
    }

    #[test]
    fn kill_counts_and_unblocks() {
        let companion = MockCompanion::new();
        let handle = companion.handle();
        companion.kill().unwrap();
        companion.wait().unwrap();
        assert!(!companion.is_running());
        assert_eq!(handle.kills(), 1);
    }
}
