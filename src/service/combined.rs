//! Primary/fallback composition with backend ownership tracking

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::Result;
use super::{BackendKind, ServiceBackend};
use crate::accounts::UserIdentity;

/// Tries the primary backend first and falls back on failure.
///
/// The ownership map records which backend started the helper for each uid,
/// so stop/disable/restart reach the backend that can actually act on it.
/// A uid without an owner is ignored by those operations.
pub struct CombinedBackend {
    primary: Arc<dyn ServiceBackend>,
    fallback: Arc<dyn ServiceBackend>,
    owners: Mutex<HashMap<u32, BackendKind>>,
}

impl CombinedBackend {
    /// Compose `primary` and `fallback`
    pub fn new(primary: Arc<dyn ServiceBackend>, fallback: Arc<dyn ServiceBackend>) -> Self {
        Self {
            primary,
            fallback,
            owners: Mutex::new(HashMap::new()),
        }
    }

    fn backend(&self, kind: BackendKind) -> &dyn ServiceBackend {
        match kind {
            BackendKind::Primary => self.primary.as_ref(),
            BackendKind::Fallback => self.fallback.as_ref(),
        }
    }

    /// Backend currently owning the helper of `uid`
    pub async fn owner(&self, uid: u32) -> Option<BackendKind> {
        self.owners.lock().await.get(&uid).copied()
    }

    /// Stop every owned helper
    pub async fn stop_all(&self) {
        let mut owners = self.owners.lock().await;
        let snapshot: Vec<(u32, BackendKind)> = owners.iter().map(|(u, k)| (*u, *k)).collect();

        for (uid, kind) in snapshot {
            match self.backend(kind).stop(uid).await {
                Ok(()) => {
                    owners.remove(&uid);
                }
                Err(e) => warn!(uid, backend = %kind, "Failed to stop helper: {}", e),
            }
        }
    }

    /// Disable every owned helper
    pub async fn disable_all(&self) {
        let mut owners = self.owners.lock().await;
        let snapshot: Vec<(u32, BackendKind)> = owners.iter().map(|(u, k)| (*u, *k)).collect();

        for (uid, kind) in snapshot {
            match self.backend(kind).disable(uid).await {
                Ok(()) => {
                    owners.remove(&uid);
                }
                Err(e) => warn!(uid, backend = %kind, "Failed to disable helper: {}", e),
            }
        }
    }
}

#[async_trait]
impl ServiceBackend for CombinedBackend {
    async fn enable(&self, identity: &UserIdentity) -> Result<()> {
        let mut owners = self.owners.lock().await;
        let uid = identity.uid;

        match self.primary.enable(identity).await {
            Ok(()) => {
                owners.insert(uid, BackendKind::Primary);
                return Ok(());
            }
            Err(e) => {
                warn!(uid, "Failed to enable helper via systemd: {}, falling back to fork", e);
            }
        }

        // Leave no half-enabled unit behind to autostart on next login
        if let Err(e) = self.primary.disable(uid).await {
            debug!(uid, "Failed to disable systemd unit after enable failed: {}", e);
        }

        self.fallback.enable(identity).await?;
        owners.insert(uid, BackendKind::Fallback);
        info!(uid, "Helper started via fork fallback");
        Ok(())
    }

    async fn stop(&self, uid: u32) -> Result<()> {
        let mut owners = self.owners.lock().await;
        let Some(kind) = owners.get(&uid).copied() else {
            debug!(uid, "Stop requested for helper with no owner");
            return Ok(());
        };

        self.backend(kind).stop(uid).await?;
        owners.remove(&uid);
        Ok(())
    }

    async fn disable(&self, uid: u32) -> Result<()> {
        let mut owners = self.owners.lock().await;
        let Some(kind) = owners.get(&uid).copied() else {
            debug!(uid, "Disable requested for helper with no owner");
            return Ok(());
        };

        self.backend(kind).disable(uid).await?;
        owners.remove(&uid);
        Ok(())
    }

    async fn restart(&self, uid: u32) -> Result<()> {
        let owners = self.owners.lock().await;
        let Some(kind) = owners.get(&uid).copied() else {
            debug!(uid, "Restart requested for helper with no owner");
            return Ok(());
        };

        self.backend(kind).restart(uid).await
    }
}
