//! The launch hand-off between the out-of-band pairing subsystem and the
//! ANNOUNCE handler.
//!
//! Pairing parks a [`PendingLaunch`] before the client connects; ANNOUNCE
//! claims it through [`CredentialsProvider`]. An ANNOUNCE with nothing
//! parked is refused, which keeps unpaired clients from opening sessions.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use rand::Rng;

use crate::crypto::{IV_LEN, KEY_LEN};

/// AEAD key material for one session's input channel.
#[derive(Clone, PartialEq, Eq)]
pub struct LaunchCredentials {
    pub key: [u8; KEY_LEN],
    pub iv: [u8; IV_LEN],
}

impl LaunchCredentials {
    pub fn new(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        LaunchCredentials { key, iv }
    }

    pub fn random() -> Self {
        let mut rng = rand::rng();
        LaunchCredentials {
            key: rng.random(),
            iv: rng.random(),
        }
    }
}

// Key material stays out of logs.
impl fmt::Debug for LaunchCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchCredentials").finish_non_exhaustive()
    }
}

/// One parked launch: the input credentials plus the companion process the
/// session must watch, if the client asked for one.
#[derive(Debug, Clone)]
pub struct PendingLaunch {
    pub credentials: LaunchCredentials,
    pub app_id: Option<u32>,
}

impl PendingLaunch {
    pub fn new(credentials: LaunchCredentials) -> Self {
        PendingLaunch { credentials, app_id: None }
    }

    pub fn with_app(credentials: LaunchCredentials, app_id: u32) -> Self {
        PendingLaunch { credentials, app_id: Some(app_id) }
    }
}

/// Supplies the launch a prior out-of-band request parked, consumed once
/// per ANNOUNCE.
pub trait CredentialsProvider: Send + Sync {
    fn take_pending_launch(&self) -> Option<PendingLaunch>;
}

/// Liveness oracle for a launched companion application.
pub trait ProcessMonitor: Send + Sync {
    fn is_running(&self, app_id: u32) -> bool;
}

/// Receives decrypted input payloads for injection.
pub trait InputSink: Send + Sync {
    fn submit(&self, payload: &[u8]);
}

/// Default [`CredentialsProvider`]: a FIFO of parked launches behind a
/// mutex, shared between the pairing side and the accept loop.
#[derive(Default)]
pub struct LaunchQueue {
    pending: Mutex<VecDeque<PendingLaunch>>,
}

impl LaunchQueue {
    pub fn new() -> Self {
        LaunchQueue::default()
    }

    pub fn park(&self, launch: PendingLaunch) {
        self.pending.lock().push_back(launch);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

impl CredentialsProvider for LaunchQueue {
    fn take_pending_launch(&self) -> Option<PendingLaunch> {
        self.pending.lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_queue_is_fifo_and_drains() {
        let queue = LaunchQueue::new();
        assert!(queue.take_pending_launch().is_none());

        let first = LaunchCredentials::new([1; KEY_LEN], [2; IV_LEN]);
        let second = LaunchCredentials::new([3; KEY_LEN], [4; IV_LEN]);
        queue.park(PendingLaunch::new(first.clone()));
        queue.park(PendingLaunch::with_app(second.clone(), 7));
        assert_eq!(queue.pending_len(), 2);

        let taken = queue.take_pending_launch().unwrap();
        assert_eq!(taken.credentials, first);
        assert_eq!(taken.app_id, None);

        let taken = queue.take_pending_launch().unwrap();
        assert_eq!(taken.credentials, second);
        assert_eq!(taken.app_id, Some(7));

        assert!(queue.take_pending_launch().is_none());
    }

    #[test]
    fn credentials_debug_redacts_key_material() {
        let credentials = LaunchCredentials::new([0xAB; KEY_LEN], [0xCD; IV_LEN]);
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("171"));
        assert!(!rendered.contains("ab"));
        assert_eq!(rendered, "LaunchCredentials { .. }");
    }

    #[test]
    fn random_credentials_differ() {
        assert_ne!(LaunchCredentials::random(), LaunchCredentials::random());
    }
}
