//! Lease-based write locking.
//!
//! One session at a time holds the write lock on a story; everyone else
//! is driven read-only from the broadcast stream. The lock is a lease:
//! the holder renews it on a fixed interval, and the server judges
//! expiry — a failed renewal is reported but never locally revokes the
//! lock, since the server is authoritative either way.
//!
//! ```text
//! Unlocked ──open_for_write──► Pending ──ok──► Held ──close──► Unlocked
//!                                 │                ▲ keep-alive every 20s
//!                                 └──err/locked──► ReadOnly ──close──► Unlocked
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How often a held lease is renewed. The story is also re-saved on
/// this cadence by the persistence collaborator, which is what
/// re-converges replicas after a lost send.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Where this session stands with respect to one story's write lock.
#[derive(Debug, Clone, PartialEq)]
pub enum LockState {
    Unlocked,
    /// Lock request in flight.
    Pending,
    /// This session may mutate and send.
    Held {
        lock_id: String,
        /// Server-side lease expiry, when the story listing reported one.
        expiry: Option<DateTime<Utc>>,
    },
    /// Another session holds the lock; we follow the broadcast stream.
    ReadOnly,
}

#[derive(Error, Debug)]
pub enum LockServiceError {
    #[error("story {0:?} is locked by another session")]
    Locked(String),
    #[error("lock service returned status {0}")]
    Status(u16),
    #[error("session does not hold the write lock")]
    NotHolding,
    #[error("invalid lock service url")]
    BadUrl,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("undecodable story blob: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// One row of the server's story listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryListing {
    pub name: String,
    #[serde(default)]
    pub last_edit: Option<DateTime<Utc>>,
    #[serde(default)]
    pub editor: Option<String>,
    #[serde(default)]
    pub lock_expiry: Option<DateTime<Utc>>,
}

/// The external lock/story service.
///
/// Request/response with JSON bodies; the transport-level retry policy
/// is the implementation's business, not this crate's.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Acquire the write lock, returning the lease id.
    async fn open(&self, story: &str, user: &str) -> Result<String, LockServiceError>;
    /// Renew a held lease.
    async fn keepup(&self, story: &str, lock_id: &str) -> Result<(), LockServiceError>;
    /// Release a held lease.
    async fn close(&self, story: &str, lock_id: &str) -> Result<(), LockServiceError>;
    async fn rename(&self, story: &str, new_name: &str) -> Result<(), LockServiceError>;
    async fn delete(&self, story: &str) -> Result<(), LockServiceError>;
    /// Upload the serialized story under a held lease.
    async fn save(&self, story: &str, lock_id: &str, file: &[u8]) -> Result<(), LockServiceError>;
    async fn list(&self) -> Result<Vec<StoryListing>, LockServiceError>;
    /// Fetch a story's serialized blob; decoding it into stories is an
    /// external import routine's job.
    async fn fetch(&self, story: &str) -> Result<Vec<u8>, LockServiceError>;
}

/// `LockService` against the REST endpoints under `/api/stories`.
pub struct HttpLockService {
    client: reqwest::Client,
    base: reqwest::Url,
}

impl HttpLockService {
    pub fn new(base_url: &str) -> Result<Self, LockServiceError> {
        Ok(Self {
            client: reqwest::Client::new(),
            base: reqwest::Url::parse(base_url).map_err(|_| LockServiceError::BadUrl)?,
        })
    }

    /// `{base}/api/stories/...`, with segments percent-encoded.
    fn route(&self, segments: &[&str]) -> Result<reqwest::Url, LockServiceError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| LockServiceError::BadUrl)?
            .pop_if_empty()
            .extend(["api", "stories"])
            .extend(segments);
        Ok(url)
    }
}

fn check_status(status: reqwest::StatusCode, story: &str) -> Result<(), LockServiceError> {
    if status.is_success() {
        Ok(())
    } else if status == reqwest::StatusCode::CONFLICT || status == reqwest::StatusCode::LOCKED {
        Err(LockServiceError::Locked(story.to_owned()))
    } else {
        Err(LockServiceError::Status(status.as_u16()))
    }
}

#[async_trait]
impl LockService for HttpLockService {
    async fn open(&self, story: &str, user: &str) -> Result<String, LockServiceError> {
        let resp = self
            .client
            .post(self.route(&[story, "open"])?)
            .json(&json!({ "user": user }))
            .send()
            .await?;
        check_status(resp.status(), story)?;
        Ok(resp.json().await?)
    }

    async fn keepup(&self, story: &str, lock_id: &str) -> Result<(), LockServiceError> {
        let resp = self
            .client
            .post(self.route(&[story, "keepup"])?)
            .json(&json!({ "lock": lock_id }))
            .send()
            .await?;
        check_status(resp.status(), story)
    }

    async fn close(&self, story: &str, lock_id: &str) -> Result<(), LockServiceError> {
        let resp = self
            .client
            .post(self.route(&[story, "close"])?)
            .json(&json!({ "lock": lock_id }))
            .send()
            .await?;
        check_status(resp.status(), story)
    }

    async fn rename(&self, story: &str, new_name: &str) -> Result<(), LockServiceError> {
        let resp = self
            .client
            .post(self.route(&[story, "rename"])?)
            .json(&json!({ "name": new_name }))
            .send()
            .await?;
        check_status(resp.status(), story)
    }

    async fn delete(&self, story: &str) -> Result<(), LockServiceError> {
        let resp = self.client.delete(self.route(&[story])?).send().await?;
        check_status(resp.status(), story)
    }

    async fn save(&self, story: &str, lock_id: &str, file: &[u8]) -> Result<(), LockServiceError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(file);
        let resp = self
            .client
            .post(self.route(&[story, "save"])?)
            .json(&json!({ "lock": lock_id, "file": encoded }))
            .send()
            .await?;
        check_status(resp.status(), story)
    }

    async fn list(&self) -> Result<Vec<StoryListing>, LockServiceError> {
        let resp = self.client.get(self.route(&[])?).send().await?;
        check_status(resp.status(), "")?;
        Ok(resp.json().await?)
    }

    async fn fetch(&self, story: &str) -> Result<Vec<u8>, LockServiceError> {
        let resp = self.client.get(self.route(&[story])?).send().await?;
        check_status(resp.status(), story)?;
        let blob: String = resp.json().await?;
        Ok(base64::engine::general_purpose::STANDARD.decode(blob)?)
    }
}

/// Lock state for one story, owned by the session's lifecycle.
///
/// The keep-alive timer is a task owned here and torn down on
/// [`close`](LockSession::close) — it can't outlive the session.
pub struct LockSession {
    story_name: String,
    user: String,
    service: Arc<dyn LockService>,
    state: LockState,
    keepalive: Option<JoinHandle<()>>,
}

impl LockSession {
    pub fn new(
        story_name: impl Into<String>,
        user: impl Into<String>,
        service: Arc<dyn LockService>,
    ) -> Self {
        Self {
            story_name: story_name.into(),
            user: user.into(),
            service,
            state: LockState::Unlocked,
            keepalive: None,
        }
    }

    pub fn state(&self) -> &LockState {
        &self.state
    }

    /// Only a session in `Held` may have its local mutations encoded
    /// onto the wire.
    pub fn can_edit(&self) -> bool {
        matches!(self.state, LockState::Held { .. })
    }

    /// Request the write lock. On success the session is `Held` and a
    /// keep-alive task starts renewing the lease; on failure or
    /// conflict the session degrades to `ReadOnly`.
    pub async fn open_for_write(&mut self) -> &LockState {
        self.state = LockState::Pending;
        match self.service.open(&self.story_name, &self.user).await {
            Ok(lock_id) => {
                self.spawn_keepalive(lock_id.clone());
                self.state = LockState::Held {
                    lock_id,
                    expiry: None,
                };
            }
            Err(e) => {
                log::warn!(
                    "could not lock {:?} for writing, opening read-only: {e}",
                    self.story_name
                );
                self.state = LockState::ReadOnly;
            }
        }
        &self.state
    }

    /// Follow the broadcast stream without contacting the lock service.
    pub fn open_read_only(&mut self) {
        self.state = LockState::ReadOnly;
    }

    /// Record the lease expiry reported by the story listing.
    pub fn note_expiry(&mut self, when: DateTime<Utc>) {
        if let LockState::Held { expiry, .. } = &mut self.state {
            *expiry = Some(when);
        }
    }

    /// Upload the serialized story under the held lease.
    pub async fn save(&self, file: &[u8]) -> Result<(), LockServiceError> {
        match &self.state {
            LockState::Held { lock_id, .. } => {
                self.service.save(&self.story_name, lock_id, file).await
            }
            _ => Err(LockServiceError::NotHolding),
        }
    }

    /// Tear down: cancel the keep-alive task, release a held lease
    /// best-effort. From `ReadOnly` this is purely local.
    pub async fn close(&mut self) {
        if let Some(task) = self.keepalive.take() {
            task.abort();
        }
        if let LockState::Held { lock_id, .. } = &self.state {
            if let Err(e) = self.service.close(&self.story_name, lock_id).await {
                log::warn!("failed to release lock on {:?}: {e}", self.story_name);
            }
        }
        self.state = LockState::Unlocked;
    }

    fn spawn_keepalive(&mut self, lock_id: String) {
        let service = Arc::clone(&self.service);
        let story = self.story_name.clone();
        self.keepalive = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // first tick is immediate
            loop {
                ticker.tick().await;
                // Fire and forget: a failed renewal is the server's call
                // to make, not ours.
                if let Err(e) = service.keepup(&story, &lock_id).await {
                    log::warn!("keep-alive for {story:?} failed: {e}");
                }
            }
        }));
    }
}

impl Drop for LockSession {
    fn drop(&mut self) {
        if let Some(task) = self.keepalive.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted lock service for driving the state machine.
    #[derive(Default)]
    struct FakeLockService {
        refuse_open: bool,
        opens: AtomicUsize,
        keepups: AtomicUsize,
        closes: AtomicUsize,
        closed_locks: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LockService for FakeLockService {
        async fn open(&self, story: &str, _user: &str) -> Result<String, LockServiceError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.refuse_open {
                Err(LockServiceError::Locked(story.to_owned()))
            } else {
                Ok("lock-1".into())
            }
        }

        async fn keepup(&self, _story: &str, _lock_id: &str) -> Result<(), LockServiceError> {
            self.keepups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self, _story: &str, lock_id: &str) -> Result<(), LockServiceError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.closed_locks.lock().unwrap().push(lock_id.to_owned());
            Ok(())
        }

        async fn rename(&self, _: &str, _: &str) -> Result<(), LockServiceError> {
            Ok(())
        }
        async fn delete(&self, _: &str) -> Result<(), LockServiceError> {
            Ok(())
        }
        async fn save(&self, _: &str, _: &str, _: &[u8]) -> Result<(), LockServiceError> {
            Ok(())
        }
        async fn list(&self) -> Result<Vec<StoryListing>, LockServiceError> {
            Ok(Vec::new())
        }
        async fn fetch(&self, _: &str) -> Result<Vec<u8>, LockServiceError> {
            Ok(Vec::new())
        }
    }

    fn session(service: Arc<FakeLockService>) -> LockSession {
        LockSession::new("My Story", "alice", service)
    }

    #[tokio::test]
    async fn test_open_for_write_success_is_held() {
        let service = Arc::new(FakeLockService::default());
        let mut s = session(service.clone());

        assert_eq!(*s.state(), LockState::Unlocked);
        assert!(!s.can_edit());

        s.open_for_write().await;
        assert!(s.can_edit());
        match s.state() {
            LockState::Held { lock_id, .. } => assert_eq!(lock_id, "lock-1"),
            other => panic!("expected Held, got {other:?}"),
        }
        assert_eq!(service.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_for_write_conflict_degrades_to_read_only() {
        let service = Arc::new(FakeLockService {
            refuse_open: true,
            ..Default::default()
        });
        let mut s = session(service.clone());

        s.open_for_write().await;
        assert_eq!(*s.state(), LockState::ReadOnly);
        assert!(!s.can_edit());
    }

    #[tokio::test]
    async fn test_open_read_only_never_contacts_service() {
        let service = Arc::new(FakeLockService::default());
        let mut s = session(service.clone());

        s.open_read_only();
        assert_eq!(*s.state(), LockState::ReadOnly);
        assert_eq!(service.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_from_held_releases_lock() {
        let service = Arc::new(FakeLockService::default());
        let mut s = session(service.clone());

        s.open_for_write().await;
        s.close().await;

        assert_eq!(*s.state(), LockState::Unlocked);
        assert_eq!(service.closes.load(Ordering::SeqCst), 1);
        assert_eq!(*service.closed_locks.lock().unwrap(), vec!["lock-1"]);
    }

    #[tokio::test]
    async fn test_close_from_read_only_is_local_only() {
        let service = Arc::new(FakeLockService::default());
        let mut s = session(service.clone());

        s.open_read_only();
        s.close().await;

        assert_eq!(*s.state(), LockState::Unlocked);
        assert_eq!(service.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_renews_on_interval() {
        let service = Arc::new(FakeLockService::default());
        let mut s = session(service.clone());
        s.open_for_write().await;

        // Let the spawned task reach its first await.
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(service.keepups.load(Ordering::SeqCst), 0);

        tokio::time::advance(KEEPALIVE_INTERVAL + Duration::from_millis(10)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(service.keepups.load(Ordering::SeqCst), 1);

        tokio::time::advance(KEEPALIVE_INTERVAL).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(service.keepups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_keepalive() {
        let service = Arc::new(FakeLockService::default());
        let mut s = session(service.clone());
        s.open_for_write().await;
        s.close().await;

        tokio::time::advance(KEEPALIVE_INTERVAL * 3).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(service.keepups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_save_requires_held_lock() {
        let service = Arc::new(FakeLockService::default());
        let mut s = session(service.clone());

        s.open_read_only();
        assert!(matches!(
            s.save(b"story bytes").await,
            Err(LockServiceError::NotHolding)
        ));
    }

    #[tokio::test]
    async fn test_note_expiry_only_applies_when_held() {
        let service = Arc::new(FakeLockService::default());
        let mut s = session(service.clone());
        let when = Utc::now();

        s.note_expiry(when); // Unlocked: ignored
        assert_eq!(*s.state(), LockState::Unlocked);

        s.open_for_write().await;
        s.note_expiry(when);
        match s.state() {
            LockState::Held { expiry, .. } => assert_eq!(*expiry, Some(when)),
            other => panic!("expected Held, got {other:?}"),
        }
    }
}
