//! The async shell around [`RelayState`].
//!
//! One `tokio::sync::Mutex` serializes every operation; the guard is held
//! across persistence, so no two operations ever observe each other
//! mid-flight. Each operation mutates a scratch copy and installs it only
//! after a successful save: a failed save leaves memory and disk untouched.

use crate::error::{OpError, OpResult};
use crate::model::{RelayLimits, RelayState};
use crate::store::{StateStore, StoreResult};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Arguments to [`StateActor::reserve`].
#[derive(Clone, Debug)]
pub struct ReserveRequest {
    pub ip: String,
    pub api_key: Option<String>,
    pub filename: String,
    pub size: u64,
    pub content_type: String,
}

/// Successful reservation.
#[derive(Clone, Debug)]
pub struct ReserveGrant {
    pub token: String,
    pub object_key: String,
    /// The sanitized filename the download URL must carry.
    pub filename: String,
    /// Object keys displaced by this reservation; delete them.
    pub retired: Vec<String>,
}

/// Successful claim. The token is burned once this is returned.
#[derive(Clone, Debug)]
pub struct ClaimGrant {
    pub object_key: String,
    pub filename: String,
    pub content_type: String,
    pub retired: Vec<String>,
}

/// Health counters.
#[derive(Clone, Debug)]
pub struct HealthSnapshot {
    pub hc_count: u64,
    pub pending_tokens: usize,
    pub pending_bytes: u64,
    pub retired: Vec<String>,
}

/// Single owner of all relay metadata.
pub struct StateActor {
    limits: RelayLimits,
    store: Arc<dyn StateStore>,
    state: Mutex<RelayState>,
}

impl StateActor {
    /// Load persisted state (or start fresh) and build the actor.
    pub async fn load(store: Arc<dyn StateStore>, limits: RelayLimits) -> StoreResult<Self> {
        let state = store.load().await?.unwrap_or_default();
        tracing::info!(
            tokens = state.tokens.len(),
            hc_count = state.metrics.hc_count,
            "relay state loaded"
        );
        Ok(Self {
            limits,
            store,
            state: Mutex::new(state),
        })
    }

    /// Run one serialized operation: cleanup, mutate, persist, install.
    ///
    /// On an operation error the scratch copy is discarded; cleanup effects
    /// land with the next successful operation or scheduled tick.
    async fn run<T>(
        &self,
        op: impl FnOnce(&mut RelayState, i64, &RelayLimits, &mut Vec<String>) -> OpResult<T>,
    ) -> OpResult<T> {
        let now = unix_now();
        let mut guard = self.state.lock().await;
        let mut scratch = guard.clone();
        let mut retired = scratch.cleanup(now, &self.limits);

        let out = op(&mut scratch, now, &self.limits, &mut retired)?;

        self.store
            .save(&scratch)
            .await
            .map_err(|e| OpError::Internal(e.to_string()))?;
        *guard = scratch;
        Ok(out)
    }

    /// Admit an upload and hand out a token.
    ///
    /// Two commits under one lock acquisition: admission (auth + per-IP
    /// clock) lands first and on its own, so a placement failure such as an
    /// unusable filename cannot unwind the rate-limit bookkeeping. A
    /// throwaway 404ing reserve would otherwise reset the limiter for the
    /// next real upload from the same address.
    pub async fn reserve(&self, req: ReserveRequest) -> OpResult<ReserveGrant> {
        let now = unix_now();
        let mut guard = self.state.lock().await;

        let mut scratch = guard.clone();
        scratch.admit(now, &self.limits, &req.ip, req.api_key.as_deref())?;
        self.store
            .save(&scratch)
            .await
            .map_err(|e| OpError::Internal(e.to_string()))?;
        *guard = scratch;

        let mut scratch = guard.clone();
        let mut retired = scratch.cleanup(now, &self.limits);
        let granted = scratch.place(
            now,
            &self.limits,
            &req.ip,
            &req.filename,
            req.size,
            &req.content_type,
            &mut retired,
        )?;
        self.store
            .save(&scratch)
            .await
            .map_err(|e| OpError::Internal(e.to_string()))?;
        *guard = scratch;

        Ok(ReserveGrant {
            token: granted.token,
            object_key: granted.object_key,
            filename: granted.filename,
            retired,
        })
    }

    /// Mark an upload's blob as fully written.
    pub async fn commit(&self, token: &str) -> OpResult<Vec<String>> {
        let token = token.to_string();
        self.run(move |state, _now, limits, retired| {
            state.commit(limits, &token, retired)?;
            Ok(std::mem::take(retired))
        })
        .await
    }

    /// Roll back a reservation whose blob write failed.
    pub async fn abort(&self, token: &str) -> OpResult<Vec<String>> {
        let token = token.to_string();
        self.run(move |state, _now, _limits, retired| {
            state.abort(&token, retired);
            Ok(std::mem::take(retired))
        })
        .await
    }

    /// Claim a token for download. Persisted before this returns, so a
    /// concurrent claim of the same token is guaranteed to miss.
    pub async fn claim(&self, token: &str, filename: &str) -> OpResult<ClaimGrant> {
        let token = token.to_string();
        let filename = filename.to_string();
        self.run(move |state, now, _limits, retired| {
            let claimed = state.claim(now, &token, &filename, retired)?;
            Ok(ClaimGrant {
                object_key: claimed.object_key,
                filename: claimed.filename,
                content_type: claimed.content_type,
                retired: std::mem::take(retired),
            })
        })
        .await
    }

    /// Drop a token after its download concluded.
    pub async fn finalize(&self, token: &str) -> OpResult<Vec<String>> {
        let token = token.to_string();
        self.run(move |state, _now, _limits, retired| {
            state.finalize(&token, retired);
            Ok(std::mem::take(retired))
        })
        .await
    }

    /// Collect expired/stuck entries. Returns object keys to delete.
    pub async fn cleanup(&self) -> OpResult<Vec<String>> {
        self.run(move |_state, _now, _limits, retired| Ok(std::mem::take(retired)))
            .await
    }

    /// Health counters; increments the monotonic health counter.
    pub async fn hc(&self) -> OpResult<HealthSnapshot> {
        self.run(move |state, _now, _limits, retired| {
            let (hc_count, pending_tokens, pending_bytes) = state.hc();
            Ok(HealthSnapshot {
                hc_count,
                pending_tokens,
                pending_bytes,
                retired: std::mem::take(retired),
            })
        })
        .await
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
