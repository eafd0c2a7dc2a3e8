//! Relay state document and the pure transitions over it.
//!
//! Everything here is synchronous and deterministic: callers pass the current
//! time in, and every removal reports the object keys it retired so the
//! caller can schedule blob deletion. The async shell lives in [`crate::actor`].

use crate::error::{OpError, OpResult};
use deaddrop_core::filename;
use deaddrop_core::token;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reservations older than this that never committed are collected.
pub const STUCK_RESERVED_SECS: i64 = 600;

/// Minimum retention of per-IP upload timestamps.
const LAST_UPLOAD_RETENTION_SECS: i64 = 86400;

/// Declared content types are truncated to this many bytes.
const MAX_CONTENT_TYPE_BYTES: usize = 200;

/// Lifecycle of a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    /// Blob write may still be in progress.
    Reserved,
    /// Blob is stored and downloadable.
    Ready,
    /// Download started; terminal until removal.
    Claimed,
}

/// Metadata for one in-flight or ready blob.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMeta {
    pub token: String,
    pub object_key: String,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub created_at: i64,
    /// `created_at + ttl`, or 0 for never.
    pub expires_at: i64,
    pub status: TokenStatus,
    pub uploader_ip: String,
}

/// Monotonic counters surviving restarts.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RelayMetrics {
    #[serde(rename = "hcCount")]
    pub hc_count: u64,
}

/// The complete persisted relay state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayState {
    pub tokens: HashMap<String, TokenMeta>,
    /// filename -> live token. At most one live binding per name.
    pub by_name: HashMap<String, String>,
    /// Tokens oldest-first. Mirrors `tokens` exactly.
    pub queue: Vec<String>,
    /// ip -> second of its last accepted upload.
    pub last_upload: HashMap<String, i64>,
    pub metrics: RelayMetrics,
}

/// Admission-control knobs, taken from configuration once at startup.
#[derive(Clone, Debug)]
pub struct RelayLimits {
    pub api_key: Option<String>,
    /// <= 0 disables the per-IP clock.
    pub rate_limit_sec: i64,
    /// <= 0 disables the pending cap.
    pub max_pending: i64,
    /// <= 0 disables expiry.
    pub ttl_sec: i64,
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            api_key: None,
            rate_limit_sec: 10,
            max_pending: 10,
            ttl_sec: 86400,
        }
    }
}

/// Outcome of a successful reservation.
#[derive(Clone, Debug)]
pub struct Reserved {
    pub token: String,
    pub object_key: String,
    /// The sanitized filename the download URL must carry.
    pub filename: String,
}

/// Outcome of a successful claim.
#[derive(Clone, Debug)]
pub struct Claimed {
    pub object_key: String,
    pub filename: String,
    pub content_type: String,
}

impl RelayState {
    /// Remove one token from every index. Returns its object key.
    fn remove_token(&mut self, token: &str) -> Option<String> {
        let meta = self.tokens.remove(token)?;
        if self.by_name.get(&meta.filename).map(String::as_str) == Some(token) {
            self.by_name.remove(&meta.filename);
        }
        self.queue.retain(|t| t != token);
        Some(meta.object_key)
    }

    fn ready_count(&self) -> usize {
        self.queue
            .iter()
            .filter(|t| {
                self.tokens
                    .get(*t)
                    .is_some_and(|m| m.status == TokenStatus::Ready)
            })
            .count()
    }

    /// Evict oldest `ready` tokens until the pending cap holds.
    fn enforce_cap(&mut self, limits: &RelayLimits) -> Vec<String> {
        let mut retired = Vec::new();
        if limits.max_pending <= 0 {
            return retired;
        }
        let cap = limits.max_pending as usize;
        while self.ready_count() > cap {
            let oldest = self
                .queue
                .iter()
                .find(|t| {
                    self.tokens
                        .get(*t)
                        .is_some_and(|m| m.status == TokenStatus::Ready)
                })
                .cloned();
            match oldest {
                Some(t) => {
                    if let Some(key) = self.remove_token(&t) {
                        retired.push(key);
                    }
                }
                None => break,
            }
        }
        retired
    }

    /// Collect expired and stuck entries and enforce retention bounds.
    ///
    /// Runs at the head of every operation and on the scheduler tick.
    pub fn cleanup(&mut self, now: i64, limits: &RelayLimits) -> Vec<String> {
        let mut retired = Vec::new();

        let dead: Vec<String> = self
            .queue
            .iter()
            .filter(|t| {
                self.tokens.get(*t).is_some_and(|m| {
                    (m.expires_at > 0 && m.expires_at < now)
                        || (m.status == TokenStatus::Reserved
                            && now - m.created_at > STUCK_RESERVED_SECS)
                })
            })
            .cloned()
            .collect();
        for t in dead {
            if let Some(key) = self.remove_token(&t) {
                retired.push(key);
            }
        }

        retired.extend(self.enforce_cap(limits));

        let retention = LAST_UPLOAD_RETENTION_SECS.max(limits.rate_limit_sec);
        self.last_upload.retain(|_, last| now - *last <= retention);

        retired
    }

    /// Admission half of a reservation: auth, then the per-IP clock.
    ///
    /// Once the rate check passes the clock is set; a later failure in the
    /// placement half must not unwind it, so the actor commits this step on
    /// its own.
    pub fn admit(
        &mut self,
        now: i64,
        limits: &RelayLimits,
        ip: &str,
        api_key: Option<&str>,
    ) -> OpResult<()> {
        if let Some(expected) = &limits.api_key
            && api_key != Some(expected.as_str())
        {
            return Err(OpError::Unauthorized);
        }

        if limits.rate_limit_sec > 0
            && let Some(last) = self.last_upload.get(ip)
            && now - last < limits.rate_limit_sec
        {
            return Err(OpError::TooManyRequests);
        }
        self.last_upload.insert(ip.to_string(), now);
        Ok(())
    }

    /// Placement half of a reservation: filename binding and the cap.
    ///
    /// `retired` collects object keys displaced by a filename overwrite or
    /// cap eviction.
    #[allow(clippy::too_many_arguments)]
    pub fn place(
        &mut self,
        now: i64,
        limits: &RelayLimits,
        ip: &str,
        raw_filename: &str,
        size: u64,
        content_type: &str,
        retired: &mut Vec<String>,
    ) -> OpResult<Reserved> {
        // An unusable filename is indistinguishable from an unknown path.
        let name = filename::sanitize(raw_filename).ok_or(OpError::NotFound)?;

        let tok = token::generate();
        let object_key = format!("obj/{}{}", tok, filename::extension(&name));

        if let Some(prev) = self.by_name.get(&name).cloned()
            && let Some(key) = self.remove_token(&prev)
        {
            retired.push(key);
        }

        self.tokens.insert(
            tok.clone(),
            TokenMeta {
                token: tok.clone(),
                object_key: object_key.clone(),
                filename: name.clone(),
                content_type: truncate_content_type(content_type),
                size,
                created_at: now,
                expires_at: if limits.ttl_sec > 0 {
                    now + limits.ttl_sec
                } else {
                    0
                },
                status: TokenStatus::Reserved,
                uploader_ip: ip.to_string(),
            },
        );
        self.by_name.insert(name.clone(), tok.clone());
        self.queue.push(tok.clone());

        retired.extend(self.enforce_cap(limits));

        Ok(Reserved {
            token: tok,
            object_key,
            filename: name,
        })
    }

    /// Full reservation: [`Self::admit`] then [`Self::place`].
    ///
    /// Mutations land in order, so a placement failure still leaves the
    /// admission clock set.
    #[allow(clippy::too_many_arguments)]
    pub fn reserve(
        &mut self,
        now: i64,
        limits: &RelayLimits,
        ip: &str,
        api_key: Option<&str>,
        raw_filename: &str,
        size: u64,
        content_type: &str,
        retired: &mut Vec<String>,
    ) -> OpResult<Reserved> {
        self.admit(now, limits, ip, api_key)?;
        self.place(now, limits, ip, raw_filename, size, content_type, retired)
    }

    /// Flip a reservation to `ready`. Idempotent once past `reserved`.
    pub fn commit(
        &mut self,
        limits: &RelayLimits,
        token: &str,
        retired: &mut Vec<String>,
    ) -> OpResult<()> {
        let meta = self.tokens.get_mut(token).ok_or(OpError::NotFound)?;
        if meta.status == TokenStatus::Reserved {
            meta.status = TokenStatus::Ready;
        }
        retired.extend(self.enforce_cap(limits));
        Ok(())
    }

    /// Drop a token in any state. Idempotent.
    pub fn abort(&mut self, token: &str, retired: &mut Vec<String>) {
        if let Some(key) = self.remove_token(token) {
            retired.push(key);
        }
    }

    /// The one-shot commit point: `ready` -> `claimed`.
    ///
    /// The provided filename must match the stored one exactly; a URL's token
    /// alone is not sufficient.
    pub fn claim(
        &mut self,
        now: i64,
        token: &str,
        name: &str,
        retired: &mut Vec<String>,
    ) -> OpResult<Claimed> {
        let expired = {
            let meta = self.tokens.get(token).ok_or(OpError::NotFound)?;
            if meta.status != TokenStatus::Ready || meta.filename != name {
                return Err(OpError::NotFound);
            }
            meta.expires_at > 0 && meta.expires_at <= now
        };
        if expired {
            if let Some(key) = self.remove_token(token) {
                retired.push(key);
            }
            return Err(OpError::NotFound);
        }

        let meta = self.tokens.get_mut(token).ok_or(OpError::NotFound)?;
        meta.status = TokenStatus::Claimed;
        Ok(Claimed {
            object_key: meta.object_key.clone(),
            filename: meta.filename.clone(),
            content_type: meta.content_type.clone(),
        })
    }

    /// Remove a token after its download concluded. Idempotent.
    pub fn finalize(&mut self, token: &str, retired: &mut Vec<String>) {
        if let Some(key) = self.remove_token(token) {
            retired.push(key);
        }
    }

    /// Bump the health counter and measure pending work.
    ///
    /// Claimed tokens are mid-download and excluded from the counts.
    pub fn hc(&mut self) -> (u64, usize, u64) {
        self.metrics.hc_count += 1;
        let pending: Vec<&TokenMeta> = self
            .tokens
            .values()
            .filter(|m| m.status != TokenStatus::Claimed)
            .collect();
        let bytes = pending.iter().map(|m| m.size).sum();
        (self.metrics.hc_count, pending.len(), bytes)
    }
}

fn truncate_content_type(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return "application/octet-stream".to_string();
    }
    let mut s = raw.to_string();
    if s.len() > MAX_CONTENT_TYPE_BYTES {
        let mut cut = MAX_CONTENT_TYPE_BYTES;
        while cut > 0 && !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> RelayLimits {
        RelayLimits {
            api_key: None,
            rate_limit_sec: 0,
            max_pending: 0,
            ttl_sec: 0,
        }
    }

    fn reserve_ok(state: &mut RelayState, now: i64, lim: &RelayLimits, name: &str) -> Reserved {
        let mut retired = Vec::new();
        state
            .reserve(now, lim, "10.0.0.1", None, name, 3, "text/plain", &mut retired)
            .unwrap()
    }

    #[test]
    fn reserve_commit_claim_finalize_roundtrip() {
        let mut st = RelayState::default();
        let lim = limits();
        let r = reserve_ok(&mut st, 100, &lim, "a.txt");
        assert!(r.object_key.starts_with("obj/"));
        assert!(r.object_key.ends_with(".txt"));

        let mut retired = Vec::new();
        st.commit(&lim, &r.token, &mut retired).unwrap();
        assert_eq!(st.tokens[&r.token].status, TokenStatus::Ready);

        let claimed = st.claim(101, &r.token, "a.txt", &mut retired).unwrap();
        assert_eq!(claimed.object_key, r.object_key);
        assert_eq!(claimed.content_type, "text/plain");
        assert_eq!(st.tokens[&r.token].status, TokenStatus::Claimed);

        // Second claim sees the terminal state.
        assert_eq!(
            st.claim(102, &r.token, "a.txt", &mut retired).unwrap_err(),
            OpError::NotFound
        );

        st.finalize(&r.token, &mut retired);
        assert!(st.tokens.is_empty());
        assert!(st.queue.is_empty());
        assert!(st.by_name.is_empty());
        assert_eq!(retired, vec![r.object_key]);
    }

    #[test]
    fn claim_requires_exact_filename() {
        let mut st = RelayState::default();
        let lim = limits();
        let r = reserve_ok(&mut st, 100, &lim, "a.txt");
        let mut retired = Vec::new();
        st.commit(&lim, &r.token, &mut retired).unwrap();

        assert_eq!(
            st.claim(101, &r.token, "b.txt", &mut retired).unwrap_err(),
            OpError::NotFound
        );
        // Still claimable with the right name.
        assert!(st.claim(101, &r.token, "a.txt", &mut retired).is_ok());
    }

    #[test]
    fn claim_rejects_reserved_tokens() {
        let mut st = RelayState::default();
        let lim = limits();
        let r = reserve_ok(&mut st, 100, &lim, "a.txt");
        let mut retired = Vec::new();
        assert_eq!(
            st.claim(101, &r.token, "a.txt", &mut retired).unwrap_err(),
            OpError::NotFound
        );
    }

    #[test]
    fn expired_claim_removes_token() {
        let mut st = RelayState::default();
        let lim = RelayLimits {
            ttl_sec: 5,
            ..limits()
        };
        let r = reserve_ok(&mut st, 100, &lim, "a.txt");
        let mut retired = Vec::new();
        st.commit(&lim, &r.token, &mut retired).unwrap();

        assert_eq!(
            st.claim(105, &r.token, "a.txt", &mut retired).unwrap_err(),
            OpError::NotFound
        );
        assert!(st.tokens.is_empty());
        assert_eq!(retired, vec![r.object_key]);
    }

    #[test]
    fn overwrite_evicts_prior_binding() {
        let mut st = RelayState::default();
        let lim = limits();
        let first = reserve_ok(&mut st, 100, &lim, "same.bin");
        let mut retired = Vec::new();
        st.commit(&lim, &first.token, &mut retired).unwrap();

        let second = st
            .reserve(101, &lim, "10.0.0.1", None, "same.bin", 3, "", &mut retired)
            .unwrap();
        assert_ne!(first.token, second.token);
        assert_eq!(retired, vec![first.object_key]);
        assert!(!st.tokens.contains_key(&first.token));
        assert_eq!(st.by_name["same.bin"], second.token);
        assert_eq!(st.queue.len(), 1);
    }

    #[test]
    fn rate_limit_blocks_fast_second_upload() {
        let mut st = RelayState::default();
        let lim = RelayLimits {
            rate_limit_sec: 10,
            ..limits()
        };
        let mut retired = Vec::new();
        st.reserve(100, &lim, "1.2.3.4", None, "a.txt", 1, "", &mut retired)
            .unwrap();
        assert_eq!(
            st.reserve(103, &lim, "1.2.3.4", None, "b.txt", 1, "", &mut retired)
                .unwrap_err(),
            OpError::TooManyRequests
        );
        // A different IP is unaffected.
        assert!(
            st.reserve(103, &lim, "5.6.7.8", None, "b.txt", 1, "", &mut retired)
                .is_ok()
        );
        // The same IP clears after the window.
        assert!(
            st.reserve(110, &lim, "1.2.3.4", None, "c.txt", 1, "", &mut retired)
                .is_ok()
        );
    }

    #[test]
    fn api_key_is_enforced() {
        let mut st = RelayState::default();
        let lim = RelayLimits {
            api_key: Some("sekrit".to_string()),
            ..limits()
        };
        let mut retired = Vec::new();
        assert_eq!(
            st.reserve(100, &lim, "ip", None, "a.txt", 1, "", &mut retired)
                .unwrap_err(),
            OpError::Unauthorized
        );
        assert_eq!(
            st.reserve(100, &lim, "ip", Some("wrong"), "a.txt", 1, "", &mut retired)
                .unwrap_err(),
            OpError::Unauthorized
        );
        assert!(
            st.reserve(100, &lim, "ip", Some("sekrit"), "a.txt", 1, "", &mut retired)
                .is_ok()
        );
    }

    #[test]
    fn bad_filename_is_an_opaque_miss() {
        let mut st = RelayState::default();
        let lim = limits();
        let mut retired = Vec::new();
        assert_eq!(
            st.reserve(100, &lim, "ip", None, "..", 1, "", &mut retired)
                .unwrap_err(),
            OpError::NotFound
        );
    }

    #[test]
    fn failed_placement_still_sets_the_admission_clock() {
        let mut st = RelayState::default();
        let lim = RelayLimits {
            rate_limit_sec: 10,
            ..limits()
        };
        let mut retired = Vec::new();

        // The filename sanitizes to nothing, but the rate check passed, so
        // the clock is set.
        assert_eq!(
            st.reserve(100, &lim, "1.2.3.4", None, "..", 1, "", &mut retired)
                .unwrap_err(),
            OpError::NotFound
        );
        assert_eq!(st.last_upload.get("1.2.3.4"), Some(&100));

        // A throwaway 404ing reserve must not reset the limiter.
        assert_eq!(
            st.reserve(103, &lim, "1.2.3.4", None, "real.txt", 1, "", &mut retired)
                .unwrap_err(),
            OpError::TooManyRequests
        );
    }

    #[test]
    fn cap_evicts_oldest_ready_first() {
        let mut st = RelayState::default();
        let lim = RelayLimits {
            max_pending: 2,
            ..limits()
        };
        let mut retired = Vec::new();
        let r1 = reserve_ok(&mut st, 100, &lim, "f1");
        let r2 = reserve_ok(&mut st, 101, &lim, "f2");
        let r3 = reserve_ok(&mut st, 102, &lim, "f3");
        st.commit(&lim, &r1.token, &mut retired).unwrap();
        st.commit(&lim, &r2.token, &mut retired).unwrap();
        assert!(retired.is_empty());

        st.commit(&lim, &r3.token, &mut retired).unwrap();
        assert_eq!(retired, vec![r1.object_key.clone()]);
        assert!(!st.tokens.contains_key(&r1.token));
        assert!(st.tokens.contains_key(&r2.token));
        assert!(st.tokens.contains_key(&r3.token));
    }

    #[test]
    fn cap_ignores_reserved_and_claimed() {
        let mut st = RelayState::default();
        let lim = RelayLimits {
            max_pending: 1,
            ..limits()
        };
        let mut retired: Vec<String> = Vec::new();
        let _r1 = reserve_ok(&mut st, 100, &lim, "f1");
        let _r2 = reserve_ok(&mut st, 101, &lim, "f2");
        // Two reserved tokens exceed nothing: the cap counts ready only.
        assert!(retired.is_empty());
        assert_eq!(st.tokens.len(), 2);
    }

    #[test]
    fn cleanup_expires_and_collects_stuck() {
        let mut st = RelayState::default();
        let lim = RelayLimits {
            ttl_sec: 50,
            ..limits()
        };
        let mut retired = Vec::new();
        let expired = reserve_ok(&mut st, 100, &lim, "old.txt");
        st.commit(&lim, &expired.token, &mut retired).unwrap();
        let stuck = reserve_ok(&mut st, 100, &lim, "stuck.txt");

        // Past TTL for the committed one, past the grace window for the
        // never-committed one.
        let removed = st.cleanup(100 + 601, &lim);
        assert_eq!(removed.len(), 2);
        assert!(removed.contains(&expired.object_key));
        assert!(removed.contains(&stuck.object_key));
        assert!(st.tokens.is_empty());
    }

    #[test]
    fn cleanup_drops_stale_upload_clocks() {
        let mut st = RelayState::default();
        let lim = RelayLimits {
            rate_limit_sec: 10,
            ..limits()
        };
        st.last_upload.insert("old".to_string(), 0);
        st.last_upload.insert("fresh".to_string(), 90000);
        st.cleanup(90001, &lim);
        assert!(!st.last_upload.contains_key("old"));
        assert!(st.last_upload.contains_key("fresh"));
    }

    #[test]
    fn hc_counts_non_claimed_only() {
        let mut st = RelayState::default();
        let lim = limits();
        let mut retired = Vec::new();
        let a = reserve_ok(&mut st, 100, &lim, "a.txt");
        let b = reserve_ok(&mut st, 100, &lim, "b.txt");
        st.commit(&lim, &a.token, &mut retired).unwrap();
        st.commit(&lim, &b.token, &mut retired).unwrap();
        st.claim(101, &a.token, "a.txt", &mut retired).unwrap();

        let (count, pending, bytes) = st.hc();
        assert_eq!(count, 1);
        assert_eq!(pending, 1);
        assert_eq!(bytes, 3);

        let (count, _, _) = st.hc();
        assert_eq!(count, 2);
    }

    #[test]
    fn commit_is_idempotent_and_missing_is_notfound() {
        let mut st = RelayState::default();
        let lim = limits();
        let mut retired = Vec::new();
        assert_eq!(
            st.commit(&lim, "nope", &mut retired).unwrap_err(),
            OpError::NotFound
        );
        let r = reserve_ok(&mut st, 100, &lim, "a.txt");
        st.commit(&lim, &r.token, &mut retired).unwrap();
        st.commit(&lim, &r.token, &mut retired).unwrap();
        assert_eq!(st.tokens[&r.token].status, TokenStatus::Ready);
    }

    #[test]
    fn persisted_layout_round_trips() {
        let mut st = RelayState::default();
        let lim = limits();
        let mut retired = Vec::new();
        let r = reserve_ok(&mut st, 100, &lim, "a.txt");
        st.commit(&lim, &r.token, &mut retired).unwrap();
        st.hc();

        let encoded = serde_json::to_string(&st).unwrap();
        assert!(encoded.contains("\"byName\""));
        assert!(encoded.contains("\"lastUpload\""));
        assert!(encoded.contains("\"hcCount\""));
        assert!(encoded.contains("\"objectKey\""));
        assert!(encoded.contains("\"ready\""));

        let back: RelayState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(back.tokens.len(), 1);
        assert_eq!(back.metrics.hc_count, 1);
        assert_eq!(back.tokens[&r.token].status, TokenStatus::Ready);
    }
}
