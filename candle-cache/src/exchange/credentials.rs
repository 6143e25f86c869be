//! API credential rotation
//!
//! Each credential has a per-minute request quota on the remote side. The pool hands out the first
//! free credential in a fixed order, parks credentials that reported exhaustion, and frees all of
//! them again once a new wall-clock minute has started.

use crate::clock::{minute_passed, until_next_minute, Clock};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// API token
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(Arc<str>);

impl Credential {
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(Arc::from(token.as_ref()))
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = {
            let chars: Vec<char> = self.0.chars().collect();
            chars[chars.len().saturating_sub(4)..].iter().collect()
        };
        write!(f, "Credential(***{visible})")
    }
}

#[derive(Debug)]
struct Slot {
    credential: Credential,
    free: bool,
}

#[derive(Debug)]
struct PoolState {
    slots: Vec<Slot>,
    last_acquire: Option<DateTime<Utc>>,
}

/// Round-robin pool of API credentials, shared by every outbound call of the process
pub struct CredentialPool {
    state: Mutex<PoolState>,
    clock: Arc<dyn Clock>,
}

impl CredentialPool {
    /// Build a pool; order is preserved and duplicates dropped. An empty list is a configuration error.
    pub fn new(credentials: Vec<Credential>, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut slots: Vec<Slot> = Vec::with_capacity(credentials.len());
        for credential in credentials {
            if credential.token().trim().is_empty() {
                continue;
            }
            if slots.iter().any(|s| s.credential == credential) {
                continue;
            }
            slots.push(Slot {
                credential,
                free: true,
            });
        }

        if slots.is_empty() {
            return Err(Error::NoCredentials);
        }

        info!(count = slots.len(), "credential pool ready");
        Ok(Self {
            state: Mutex::new(PoolState {
                slots,
                last_acquire: None,
            }),
            clock,
        })
    }

    pub fn from_tokens<I, S>(tokens: I, clock: Arc<dyn Clock>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(tokens.into_iter().map(Credential::new).collect(), clock)
    }

    /// First free credential in pool order.
    ///
    /// When every credential is busy, waits for the next minute boundary and tries again.
    pub async fn acquire(&self) -> Credential {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = self.clock.now();

                if state.last_acquire.is_some_and(|last| minute_passed(last, now)) {
                    for slot in state.slots.iter_mut() {
                        slot.free = true;
                    }
                    debug!("new minute, all credentials freed");
                }
                state.last_acquire = Some(now);

                if let Some(slot) = state.slots.iter().find(|s| s.free) {
                    return slot.credential.clone();
                }
                until_next_minute(now)
            };

            info!(
                wait_secs = wait.num_seconds(),
                "all credentials are busy, waiting for the next minute"
            );
            self.clock.sleep(wait).await;
        }
    }

    /// Park one credential until the next minute boundary
    pub async fn mark_exhausted(&self, credential: &Credential) {
        let mut state = self.state.lock().await;
        match state.slots.iter_mut().find(|s| &s.credential == credential) {
            Some(slot) => {
                slot.free = false;
                debug!(?credential, "credential exhausted");
            }
            None => warn!(?credential, "exhausted credential is not in the pool"),
        }
    }

    pub async fn free_count(&self) -> usize {
        self.state.lock().await.slots.iter().filter(|s| s.free).count()
    }

    pub async fn size(&self) -> usize {
        self.state.lock().await.slots.len()
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool").finish_non_exhaustive()
    }
}
