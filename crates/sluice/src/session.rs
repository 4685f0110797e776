//! The session table.
//!
//! A session is created by a successful `open` and owns the discovered source
//! handle until it is closed, swept for idleness, or killed by a failed read.
//! Reads borrow the source through a [`SessionLease`]; at most one lease per
//! session exists at a time.

use crate::{ChunkStream, ContainerKind, DataSource, Error, Result, Schema};
use core::fmt;
use core::str::FromStr;
use ferroid::base32::Base32UlidExt;
use ferroid::id::ULID;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Opaque session token, rendered as a 26 character Crockford base32 ULID.
///
/// The 80 random bits of the ULID make tokens unguessable in practice, and
/// the timestamp prefix keeps them roughly sortable by creation time.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(ULID);

impl SessionId {
    pub fn generate() -> Self {
        Self(ULID::now())
    }

    /// Parses a client supplied token.
    ///
    /// A token that does not decode can never name a live session, so it is
    /// reported as [`Error::SessionNotFound`].
    pub fn parse(token: &str) -> Result<Self> {
        ULID::decode(token)
            .map(Self)
            .map_err(|_| Error::SessionNotFound {
                id: token.to_owned(),
            })
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.encode().as_str())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionId")
            .field(&self.0.encode().as_str())
            .finish()
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

struct SessionEntry {
    /// `None` while a lease holds the source.
    source: Option<Box<dyn DataSource>>,
    schema: Arc<Schema>,
    last_used: Instant,
    /// Closed while checked out; torn down when the lease comes back.
    closing: bool,
    /// A read has already started a pass over the source.
    consumed: bool,
}

/// Point-in-time view of a session.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub id: SessionId,
    pub schema: Arc<Schema>,
    pub idle: Duration,
    pub busy: bool,
}

impl SessionInfo {
    pub fn container(&self) -> ContainerKind {
        self.schema.container
    }
}

/// How a lease ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Release {
    /// The read finished or never started; the source goes back.
    Clean,
    /// The read failed or was abandoned; the session dies.
    Aborted,
}

/// Thread-safe table of open sessions.
///
/// Source handles are only ever closed outside the table lock.
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("len", &self.len())
            .field("max_sessions", &self.max_sessions)
            .finish()
    }
}

impl SessionStore {
    /// Creates an empty store holding at most `max_sessions` sessions. Zero
    /// means unlimited.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Registers a discovered source under a fresh identifier.
    ///
    /// # Errors
    ///
    /// [`Error::TooManySessions`] when the store is full. The source is closed
    /// in that case.
    pub fn create(&self, mut source: Box<dyn DataSource>, schema: Schema) -> Result<SessionId> {
        let schema = Arc::new(schema);
        {
            let mut sessions = self.sessions.lock();
            if self.max_sessions == 0 || sessions.len() < self.max_sessions {
                loop {
                    let id = SessionId::generate();
                    if let Entry::Vacant(slot) = sessions.entry(id) {
                        slot.insert(SessionEntry {
                            source: Some(source),
                            schema,
                            last_used: Instant::now(),
                            closing: false,
                            consumed: false,
                        });
                        return Ok(id);
                    }
                }
            }
        }
        source.close();
        Err(Error::TooManySessions {
            limit: self.max_sessions,
        })
    }

    pub fn lookup(&self, id: &SessionId) -> Result<SessionInfo> {
        let sessions = self.sessions.lock();
        match sessions.get(id) {
            Some(entry) if !entry.closing => Ok(SessionInfo {
                id: *id,
                schema: Arc::clone(&entry.schema),
                idle: entry.last_used.elapsed(),
                busy: entry.source.is_none(),
            }),
            _ => Err(not_found(id)),
        }
    }

    /// Takes exclusive use of a session's source for one read.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionNotFound`] if the session does not exist or is being
    ///   closed.
    /// - [`Error::SessionBusy`] if another read holds the session.
    pub fn checkout(self: &Arc<Self>, id: &SessionId) -> Result<SessionLease> {
        let mut sessions = self.sessions.lock();
        let entry = match sessions.get_mut(id) {
            Some(entry) if !entry.closing => entry,
            _ => return Err(not_found(id)),
        };
        let source = entry
            .source
            .take()
            .ok_or_else(|| Error::SessionBusy { id: id.to_string() })?;
        entry.last_used = Instant::now();
        Ok(SessionLease {
            store: Arc::clone(self),
            id: *id,
            schema: Arc::clone(&entry.schema),
            source: Some(source),
            consumed: entry.consumed,
        })
    }

    /// Closes a session.
    ///
    /// An idle session is removed and its source closed immediately. A session
    /// with an active read stops accepting new reads at once and is torn down
    /// when the read ends.
    pub fn close(&self, id: &SessionId) -> Result<()> {
        let source = {
            let mut sessions = self.sessions.lock();
            match sessions.get(id).map(|e| (e.closing, e.source.is_some())) {
                None | Some((true, _)) => return Err(not_found(id)),
                Some((false, false)) => {
                    if let Some(entry) = sessions.get_mut(id) {
                        entry.closing = true;
                    }
                    None
                }
                Some((false, true)) => sessions.remove(id).and_then(|entry| entry.source),
            }
        };
        if let Some(source) = source {
            shut(id, source, "closed");
        }
        Ok(())
    }

    /// Closes every idle session that has gone unused for longer than
    /// `max_idle`. Sessions with an active read are never swept.
    ///
    /// Returns the number of sessions closed.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let expired: Vec<_> = {
            let mut sessions = self.sessions.lock();
            let ids: Vec<_> = sessions
                .iter()
                .filter(|(_, e)| e.source.is_some() && e.last_used.elapsed() > max_idle)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|entry| (id, entry)))
                .collect()
        };
        let count = expired.len();
        for (id, entry) in expired {
            if let Some(source) = entry.source {
                shut(&id, source, "expired");
            }
        }
        count
    }

    /// Closes every session. Sessions with an active read are marked and torn
    /// down when their read ends.
    ///
    /// Returns the number of sessions closed immediately.
    pub fn close_all(&self) -> usize {
        let idle: Vec<_> = {
            let mut sessions = self.sessions.lock();
            for entry in sessions.values_mut() {
                entry.closing = true;
            }
            let ids: Vec<_> = sessions
                .iter()
                .filter(|(_, e)| e.source.is_some())
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|entry| (id, entry)))
                .collect()
        };
        let count = idle.len();
        for (id, entry) in idle {
            if let Some(source) = entry.source {
                shut(&id, source, "closed on shutdown");
            }
        }
        count
    }

    /// Number of sessions, including ones marked for closing.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    fn release(
        &self,
        id: &SessionId,
        source: Box<dyn DataSource>,
        consumed: bool,
        how: Release,
    ) {
        let source = {
            let mut sessions = self.sessions.lock();
            let keep = how == Release::Clean && sessions.get(id).is_some_and(|e| !e.closing);
            match sessions.get_mut(id) {
                Some(entry) if keep => {
                    entry.source = Some(source);
                    entry.consumed |= consumed;
                    entry.last_used = Instant::now();
                    return;
                }
                _ => {
                    sessions.remove(id);
                    source
                }
            }
        };
        let reason = match how {
            Release::Clean => "closed after read",
            Release::Aborted => "read aborted",
        };
        shut(id, source, reason);
    }
}

/// Exclusive borrow of a session's source for the duration of one read.
///
/// Finish with [`release`](Self::release) to hand the source back. Dropping
/// the lease any other way treats the read as failed: the source is closed and
/// the session removed.
pub struct SessionLease {
    store: Arc<SessionStore>,
    id: SessionId,
    schema: Arc<Schema>,
    source: Option<Box<dyn DataSource>>,
    consumed: bool,
}

impl SessionLease {
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn container(&self) -> ContainerKind {
        self.schema.container
    }

    /// Starts a fresh pass over the leased source.
    ///
    /// # Errors
    ///
    /// [`Error::StreamAlreadyConsumed`] if an earlier read already took the
    /// only pass of a source that is not restartable.
    pub fn chunks(&mut self) -> Result<ChunkStream> {
        let Some(source) = self.source.as_mut() else {
            return Err(not_found(&self.id));
        };
        if self.consumed && !source.capabilities().restartable {
            return Err(Error::StreamAlreadyConsumed);
        }
        let chunks = source.chunks()?;
        self.consumed = true;
        Ok(chunks)
    }

    /// Returns the source to its session and refreshes the idle clock.
    pub fn release(mut self) {
        if let Some(source) = self.source.take() {
            self.store.release(&self.id, source, self.consumed, Release::Clean);
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(source) = self.source.take() {
            self.store.release(&self.id, source, self.consumed, Release::Aborted);
        }
    }
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("id", &self.id)
            .field("container", &self.schema.container)
            .finish_non_exhaustive()
    }
}

fn not_found(id: &SessionId) -> Error {
    Error::SessionNotFound { id: id.to_string() }
}

#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
fn shut(id: &SessionId, mut source: Box<dyn DataSource>, reason: &'static str) {
    source.close();
    #[cfg(feature = "tracing")]
    tracing::debug!(session = %id, reason, "session source closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::IterSource;
    use crate::{DataType, ScalarType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn schema() -> Schema {
        Schema {
            datashape: None,
            dtype: DataType::Scalar(ScalarType::Float64),
            shape: vec![Some(0)],
            npartitions: 0,
            container: ContainerKind::NdArray,
            metadata: serde_json::Map::new(),
        }
    }

    fn source(closes: &Arc<AtomicUsize>) -> Box<dyn DataSource> {
        let closes = Arc::clone(closes);
        Box::new(IterSource::new(schema(), Vec::new()).on_close(move || {
            closes.fetch_add(1, Ordering::SeqCst);
        }))
    }

    /// Hands out a fresh empty pass on every call, counting them.
    struct Replaying {
        passes: Arc<AtomicUsize>,
        restartable: bool,
    }

    impl DataSource for Replaying {
        fn discover(&mut self) -> Result<Schema> {
            Ok(schema())
        }

        fn chunks(&mut self) -> Result<ChunkStream> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            Ok(Box::pin(futures::stream::empty()))
        }

        fn close(&mut self) {}

        fn capabilities(&self) -> crate::Capabilities {
            crate::Capabilities {
                restartable: self.restartable,
            }
        }
    }

    #[test]
    fn ids_round_trip_through_text() {
        let id = SessionId::generate();
        let text = id.to_string();
        assert_eq!(text.len(), 26);
        assert_eq!(SessionId::parse(&text).unwrap(), id);
    }

    #[test]
    fn garbage_tokens_are_not_found() {
        assert!(matches!(
            SessionId::parse("not a session"),
            Err(Error::SessionNotFound { .. })
        ));
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let store = Arc::new(SessionStore::default());
        let id = SessionId::generate();
        assert!(matches!(store.lookup(&id), Err(Error::SessionNotFound { .. })));
        assert!(matches!(store.checkout(&id), Err(Error::SessionNotFound { .. })));
        assert!(matches!(store.close(&id), Err(Error::SessionNotFound { .. })));
    }

    #[test]
    fn second_checkout_is_busy() {
        let closes = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(SessionStore::default());
        let id = store.create(source(&closes), schema()).unwrap();

        let lease = store.checkout(&id).unwrap();
        assert!(store.lookup(&id).unwrap().busy);
        assert!(matches!(store.checkout(&id), Err(Error::SessionBusy { .. })));

        lease.release();
        assert!(!store.lookup(&id).unwrap().busy);
        store.checkout(&id).unwrap().release();
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn second_pass_needs_a_restartable_source() {
        for restartable in [false, true] {
            let passes = Arc::new(AtomicUsize::new(0));
            let store = Arc::new(SessionStore::default());
            let source = Replaying {
                passes: Arc::clone(&passes),
                restartable,
            };
            let id = store.create(Box::new(source), schema()).unwrap();

            let mut lease = store.checkout(&id).unwrap();
            lease.chunks().unwrap();
            lease.release();

            let mut lease = store.checkout(&id).unwrap();
            let second = lease.chunks();
            lease.release();
            if restartable {
                assert!(second.is_ok());
                assert_eq!(passes.load(Ordering::SeqCst), 2);
            } else {
                assert!(matches!(second, Err(Error::StreamAlreadyConsumed)));
                assert_eq!(passes.load(Ordering::SeqCst), 1);
            }
            assert_eq!(store.len(), 1);
        }
    }

    #[test]
    fn dropped_lease_kills_the_session() {
        let closes = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(SessionStore::default());
        let id = store.create(source(&closes), schema()).unwrap();

        drop(store.checkout(&id).unwrap());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(store.is_empty());
        assert!(matches!(store.checkout(&id), Err(Error::SessionNotFound { .. })));
    }

    #[test]
    fn close_while_busy_defers_until_release() {
        let closes = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(SessionStore::default());
        let id = store.create(source(&closes), schema()).unwrap();

        let lease = store.checkout(&id).unwrap();
        store.close(&id).unwrap();
        assert!(matches!(store.lookup(&id), Err(Error::SessionNotFound { .. })));
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        lease.release();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn capacity_is_enforced() {
        let closes = Arc::new(AtomicUsize::new(0));
        let store = SessionStore::new(1);
        store.create(source(&closes), schema()).unwrap();
        assert_eq!(
            store.create(source(&closes), schema()).unwrap_err(),
            Error::TooManySessions { limit: 1 }
        );
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sweep_skips_busy_sessions() {
        let closes = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(SessionStore::default());
        let idle = store.create(source(&closes), schema()).unwrap();
        let busy = store.create(source(&closes), schema()).unwrap();
        let lease = store.checkout(&busy).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.sweep_idle(Duration::from_millis(1)), 1);
        assert!(store.lookup(&idle).is_err());
        assert!(store.lookup(&busy).is_ok());
        assert_eq!(store.sweep_idle(Duration::from_secs(3600)), 0);

        lease.release();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_all_drains_the_table() {
        let closes = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(SessionStore::default());
        store.create(source(&closes), schema()).unwrap();
        let busy = store.create(source(&closes), schema()).unwrap();
        let lease = store.checkout(&busy).unwrap();

        assert_eq!(store.close_all(), 1);
        assert_eq!(store.len(), 1);
        lease.release();
        assert!(store.is_empty());
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }
}
