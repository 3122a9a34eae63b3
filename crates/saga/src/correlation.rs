//! Correlation table for in-flight sagas.
//!
//! One record per request id, shared by the session handlers and the oracle
//! ingress. A record is created by [`CorrelationStore::begin_locate`] and is
//! removed exactly once: by the [`PendingLocate`] or [`SettleGuard`] that owns
//! it, by [`CorrelationStore::release_session`] when its session goes away, or
//! by [`CorrelationStore::purge_stale`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{RequestId, SessionId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::services::oracle::OracleAnswer;
use crate::state::SagaPhase;

/// Errors raised by the correlation table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    #[error("Request id already in use: {0}")]
    DuplicateRequest(RequestId),

    /// No record this session may claim exists for the id.
    #[error("Unknown or expired request id: {0}")]
    UnknownRequest(RequestId),
}

/// Outcome of delivering a signal to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// This call was the first writer; the waiter will observe it.
    Delivered,
    /// Unknown, already resolved, expired, or no longer waiting.
    NotFound,
}

/// How a phase-1 wait ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    Answered(OracleAnswer),
    TimedOut,
    /// The owning session went away.
    Cancelled,
}

/// Enrichment carried from phase 1 to phase 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedSaga {
    pub display_name: String,
    pub vault_address: String,
}

#[derive(Debug)]
enum Signal {
    Answered(OracleAnswer),
    Expired,
}

#[derive(Debug)]
struct SagaRecord {
    session_id: SessionId,
    ip: String,
    phase: SagaPhase,
    since: Instant,
    signal: Option<oneshot::Sender<Signal>>,
    located: Option<LocatedSaga>,
}

/// Concurrent map from request id to saga record.
///
/// Cloning is cheap and every clone shares the same table. Lookups of a
/// missing id are a normal outcome.
#[derive(Debug, Clone, Default)]
pub struct CorrelationStore {
    records: Arc<DashMap<RequestId, SagaRecord>>,
}

impl CorrelationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a `Locating` record and returns the guard that owns it.
    pub fn begin_locate(
        &self,
        request_id: RequestId,
        session_id: SessionId,
        ip: impl Into<String>,
    ) -> Result<PendingLocate, CorrelationError> {
        let (signal, receiver) = oneshot::channel();
        match self.records.entry(request_id) {
            Entry::Occupied(_) => return Err(CorrelationError::DuplicateRequest(request_id)),
            Entry::Vacant(slot) => {
                slot.insert(SagaRecord {
                    session_id,
                    ip: ip.into(),
                    phase: SagaPhase::Locating,
                    since: Instant::now(),
                    signal: Some(signal),
                    located: None,
                });
            }
        }
        self.record_gauge();
        tracing::debug!(%request_id, %session_id, "correlation record created");

        Ok(PendingLocate {
            request_id,
            store: self.clone(),
            receiver,
            armed: true,
        })
    }

    /// Delivers an oracle answer. First writer wins.
    pub fn resolve(&self, request_id: RequestId, answer: OracleAnswer) -> ResolveOutcome {
        self.signal(request_id, Signal::Answered(answer))
    }

    /// Delivers the timeout signal. First writer wins.
    pub fn expire(&self, request_id: RequestId) -> ResolveOutcome {
        self.signal(request_id, Signal::Expired)
    }

    fn signal(&self, request_id: RequestId, signal: Signal) -> ResolveOutcome {
        let sender = self
            .records
            .get_mut(&request_id)
            .and_then(|mut record| record.signal.take());
        match sender.map(|sender| sender.send(signal).is_ok()) {
            Some(true) => ResolveOutcome::Delivered,
            _ => ResolveOutcome::NotFound,
        }
    }

    /// Claims a `Located` record for phase 2.
    ///
    /// Only the session that located the saga may claim it; any other caller
    /// sees [`CorrelationError::UnknownRequest`].
    pub fn begin_settle(
        &self,
        request_id: RequestId,
        session_id: SessionId,
    ) -> Result<SettleGuard, CorrelationError> {
        let mut record = self
            .records
            .get_mut(&request_id)
            .filter(|record| record.session_id == session_id && record.phase.can_settle())
            .ok_or(CorrelationError::UnknownRequest(request_id))?;

        let located = record
            .located
            .clone()
            .ok_or(CorrelationError::UnknownRequest(request_id))?;
        record.phase = SagaPhase::Settling;
        record.since = Instant::now();
        drop(record);

        Ok(SettleGuard {
            request_id,
            store: self.clone(),
            located,
        })
    }

    pub fn phase(&self, request_id: RequestId) -> Option<SagaPhase> {
        self.records.get(&request_id).map(|record| record.phase)
    }

    /// Subject IP of a live record.
    pub fn ip(&self, request_id: RequestId) -> Option<String> {
        self.records.get(&request_id).map(|record| record.ip.clone())
    }

    pub fn contains(&self, request_id: RequestId) -> bool {
        self.records.contains_key(&request_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drops `Located` records owned by a session that has disconnected.
    ///
    /// Records in other phases are owned by a guard and are left to it.
    pub fn release_session(&self, session_id: SessionId) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| {
            !(record.session_id == session_id && record.phase == SagaPhase::Located)
        });
        let released = before.saturating_sub(self.records.len());
        if released > 0 {
            self.record_gauge();
            tracing::info!(%session_id, released, "released located sagas of closed session");
        }
        released
    }

    /// Drops `Located` records that have waited longer than `ttl`.
    pub fn purge_stale(&self, ttl: Duration) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| {
            !(record.phase == SagaPhase::Located && record.since.elapsed() > ttl)
        });
        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            self.record_gauge();
            tracing::info!(purged, "purged stale located sagas");
        }
        purged
    }

    fn remove(&self, request_id: RequestId) -> bool {
        let removed = self.records.remove(&request_id).is_some();
        if removed {
            self.record_gauge();
            tracing::debug!(%request_id, "correlation record removed");
        }
        removed
    }

    fn record_gauge(&self) {
        metrics::gauge!("correlation_entries").set(self.records.len() as f64);
    }
}

/// Owns a `Locating` record until it is promoted or dropped.
///
/// Dropping the guard removes the record, so every exit path of the phase-1
/// wait cleans up exactly once.
#[derive(Debug)]
pub struct PendingLocate {
    request_id: RequestId,
    store: CorrelationStore,
    receiver: oneshot::Receiver<Signal>,
    armed: bool,
}

impl PendingLocate {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Waits for the first of: an oracle answer, an explicit expiry, the
    /// `deadline`, or `cancel`.
    ///
    /// When the deadline fires the guard races [`CorrelationStore::expire`]
    /// against any late answer; whichever reached the record first decides
    /// the outcome.
    pub async fn wait(&mut self, deadline: Duration, cancel: &CancellationToken) -> WaitOutcome {
        tokio::select! {
            signal = &mut self.receiver => match signal {
                Ok(Signal::Answered(answer)) => WaitOutcome::Answered(answer),
                Ok(Signal::Expired) | Err(_) => WaitOutcome::TimedOut,
            },
            _ = tokio::time::sleep(deadline) => {
                match self.store.expire(self.request_id) {
                    ResolveOutcome::Delivered => WaitOutcome::TimedOut,
                    ResolveOutcome::NotFound => match self.receiver.try_recv() {
                        Ok(Signal::Answered(answer)) => WaitOutcome::Answered(answer),
                        _ => WaitOutcome::TimedOut,
                    },
                }
            }
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
        }
    }

    /// Moves the record to `Located` and hands ownership to the table.
    ///
    /// Returns false if the record is gone.
    pub fn promote(mut self, located: LocatedSaga) -> bool {
        self.armed = false;
        match self.store.records.get_mut(&self.request_id) {
            Some(mut record) => {
                record.phase = SagaPhase::Located;
                record.since = Instant::now();
                record.signal = None;
                record.located = Some(located);
                true
            }
            None => false,
        }
    }
}

impl Drop for PendingLocate {
    fn drop(&mut self) {
        if self.armed {
            self.store.remove(self.request_id);
        }
    }
}

/// Owns a `Settling` record; dropping it removes the record.
#[derive(Debug)]
pub struct SettleGuard {
    request_id: RequestId,
    store: CorrelationStore,
    located: LocatedSaga,
}

impl SettleGuard {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn located(&self) -> &LocatedSaga {
        &self.located
    }

    /// Marks the saga `Done` before the guard removes it.
    pub fn finish(self) {
        if let Some(mut record) = self.store.records.get_mut(&self.request_id) {
            record.phase = SagaPhase::Done;
        }
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        self.store.remove(self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(request_id: RequestId) -> OracleAnswer {
        OracleAnswer {
            request_id: request_id.to_string(),
            latitude: "10.0".to_string(),
            longitude: "20.0".to_string(),
            vault_address: "vault".to_string(),
        }
    }

    fn located() -> LocatedSaga {
        LocatedSaga {
            display_name: "Somewhere".to_string(),
            vault_address: "vault".to_string(),
        }
    }

    #[tokio::test]
    async fn test_resolve_wakes_waiter() {
        let store = CorrelationStore::new();
        let id = RequestId::new();
        let mut pending = store.begin_locate(id, SessionId::new(), "1.2.3.4").unwrap();
        assert_eq!(store.phase(id), Some(SagaPhase::Locating));
        assert_eq!(store.ip(id).as_deref(), Some("1.2.3.4"));

        assert_eq!(store.resolve(id, answer(id)), ResolveOutcome::Delivered);
        let outcome = pending
            .wait(Duration::from_secs(5), &CancellationToken::new())
            .await;
        assert_eq!(outcome, WaitOutcome::Answered(answer(id)));
    }

    #[tokio::test]
    async fn test_second_resolve_is_not_found() {
        let store = CorrelationStore::new();
        let id = RequestId::new();
        let _pending = store.begin_locate(id, SessionId::new(), "1.2.3.4").unwrap();

        assert_eq!(store.resolve(id, answer(id)), ResolveOutcome::Delivered);
        assert_eq!(store.resolve(id, answer(id)), ResolveOutcome::NotFound);
        assert_eq!(store.expire(id), ResolveOutcome::NotFound);
    }

    #[test]
    fn test_resolve_unknown_is_not_found() {
        let store = CorrelationStore::new();
        let id = RequestId::new();
        assert_eq!(store.resolve(id, answer(id)), ResolveOutcome::NotFound);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let store = CorrelationStore::new();
        let id = RequestId::new();
        let _pending = store.begin_locate(id, SessionId::new(), "a").unwrap();
        let err = store.begin_locate(id, SessionId::new(), "b").unwrap_err();
        assert_eq!(err, CorrelationError::DuplicateRequest(id));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_deadline_times_out_and_removes_record() {
        let store = CorrelationStore::new();
        let id = RequestId::new();
        let mut pending = store.begin_locate(id, SessionId::new(), "1.2.3.4").unwrap();

        let outcome = pending
            .wait(Duration::from_millis(20), &CancellationToken::new())
            .await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
        // late answer after the deadline fired
        assert_eq!(store.resolve(id, answer(id)), ResolveOutcome::NotFound);

        drop(pending);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_expiry_times_out() {
        let store = CorrelationStore::new();
        let id = RequestId::new();
        let mut pending = store.begin_locate(id, SessionId::new(), "1.2.3.4").unwrap();

        assert_eq!(store.expire(id), ResolveOutcome::Delivered);
        let outcome = pending
            .wait(Duration::from_secs(5), &CancellationToken::new())
            .await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_wait() {
        let store = CorrelationStore::new();
        let id = RequestId::new();
        let mut pending = store.begin_locate(id, SessionId::new(), "1.2.3.4").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = pending.wait(Duration::from_secs(30), &cancel).await;
        assert_eq!(outcome, WaitOutcome::Cancelled);
        drop(pending);
        assert!(!store.contains(id));
    }

    #[tokio::test]
    async fn test_promote_then_settle_then_finish() {
        let store = CorrelationStore::new();
        let session = SessionId::new();
        let id = RequestId::new();

        let pending = store.begin_locate(id, session, "1.2.3.4").unwrap();
        assert!(pending.promote(located()));
        assert_eq!(store.phase(id), Some(SagaPhase::Located));

        let guard = store.begin_settle(id, session).unwrap();
        assert_eq!(guard.located(), &located());
        assert_eq!(store.phase(id), Some(SagaPhase::Settling));

        // settling is single-claim
        assert_eq!(
            store.begin_settle(id, session).unwrap_err(),
            CorrelationError::UnknownRequest(id)
        );

        guard.finish();
        assert!(store.is_empty());
    }

    #[test]
    fn test_settle_guard_drop_removes_record() {
        let store = CorrelationStore::new();
        let session = SessionId::new();
        let id = RequestId::new();
        store
            .begin_locate(id, session, "1.2.3.4")
            .unwrap()
            .promote(located());

        let guard = store.begin_settle(id, session).unwrap();
        drop(guard);
        assert!(store.is_empty());
    }

    #[test]
    fn test_settle_rejects_other_session_and_unlocated() {
        let store = CorrelationStore::new();
        let owner = SessionId::new();
        let id = RequestId::new();
        let _pending = store.begin_locate(id, owner, "1.2.3.4").unwrap();

        assert!(store.begin_settle(id, owner).is_err());
        assert!(store.begin_settle(id, SessionId::new()).is_err());
        assert!(store.begin_settle(RequestId::new(), owner).is_err());
    }

    #[test]
    fn test_release_session_only_drops_located() {
        let store = CorrelationStore::new();
        let session = SessionId::new();
        let other = SessionId::new();

        let located_id = RequestId::new();
        store
            .begin_locate(located_id, session, "a")
            .unwrap()
            .promote(located());
        let other_id = RequestId::new();
        store
            .begin_locate(other_id, other, "b")
            .unwrap()
            .promote(located());
        let locating_id = RequestId::new();
        let _pending = store.begin_locate(locating_id, session, "c").unwrap();

        assert_eq!(store.release_session(session), 1);
        assert!(!store.contains(located_id));
        assert!(store.contains(other_id));
        assert!(store.contains(locating_id));
    }

    #[tokio::test]
    async fn test_purge_stale_respects_ttl() {
        let store = CorrelationStore::new();
        let id = RequestId::new();
        store
            .begin_locate(id, SessionId::new(), "a")
            .unwrap()
            .promote(located());

        assert_eq!(store.purge_stale(Duration::from_secs(60)), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.purge_stale(Duration::from_millis(10)), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_resolvers_single_winner() {
        let store = CorrelationStore::new();
        let id = RequestId::new();
        let mut pending = store.begin_locate(id, SessionId::new(), "a").unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move { store.resolve(id, answer(id)) }));
        }
        let mut delivered = 0;
        for task in tasks {
            if task.await.unwrap() == ResolveOutcome::Delivered {
                delivered += 1;
            }
        }
        assert_eq!(delivered, 1);
        assert!(matches!(
            pending
                .wait(Duration::from_secs(1), &CancellationToken::new())
                .await,
            WaitOutcome::Answered(_)
        ));
    }
}
