//! Registry of live sessions keyed by identifier.

use std::collections::HashMap;
use std::sync::Arc;

use courier_core::Identifier;
use parking_lot::RwLock;
use tracing::debug;

use crate::errors::DirectoryError;
use crate::session::Session;

/// Maps identifiers to live sessions.
///
/// Every operation takes the single lock once, so `add`, `remove`, and `find`
/// are atomic with respect to each other. `remove` marks the session dead
/// while still holding the write lock, so a concurrent `find` sees either the
/// live entry or nothing.
#[derive(Default)]
pub struct SessionDirectory {
    sessions: RwLock<HashMap<Identifier, Arc<Session>>>,
}

impl SessionDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session.
    pub fn add(&self, session: Arc<Session>) -> Result<(), DirectoryError> {
        let id = session.id();
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&id) {
            return Err(DirectoryError::DuplicateIdentifier(id));
        }
        let _ = sessions.insert(id, session);
        debug!(session_id = %id, total = sessions.len(), "session registered");
        Ok(())
    }

    /// Unregister a session and mark it dead. Absent identifiers are ignored.
    pub fn remove(&self, id: &Identifier) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(id);
        if let Some(session) = &removed {
            session.mark_dead();
            debug!(session_id = %id, total = sessions.len(), "session unregistered");
        }
        removed
    }

    /// Look up a live session.
    pub fn find(&self, id: &Identifier) -> Result<Arc<Session>, DirectoryError> {
        self.sessions
            .read()
            .get(id)
            .filter(|s| s.is_live())
            .cloned()
            .ok_or(DirectoryError::NotFound(*id))
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Snapshot of registered identifiers.
    pub fn ids(&self) -> Vec<Identifier> {
        self.sessions.read().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Outbound;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use tokio::sync::mpsc;

    fn session_with(id: Identifier) -> (Arc<Session>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(Session::new(id, tx)), rx)
    }

    #[test]
    fn add_then_find() {
        let dir = SessionDirectory::new();
        let (s, _rx) = session_with(Identifier::new());
        dir.add(s.clone()).unwrap();
        let found = dir.find(&s.id()).unwrap();
        assert!(Arc::ptr_eq(&found, &s));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn duplicate_rejected() {
        let dir = SessionDirectory::new();
        let id = Identifier::new();
        let (a, _ra) = session_with(id);
        let (b, _rb) = session_with(id);
        dir.add(a.clone()).unwrap();
        assert_matches!(dir.add(b), Err(DirectoryError::DuplicateIdentifier(dup)) if dup == id);
        // Original entry untouched.
        assert!(Arc::ptr_eq(&dir.find(&id).unwrap(), &a));
    }

    #[test]
    fn remove_then_find_is_not_found() {
        let dir = SessionDirectory::new();
        let (s, _rx) = session_with(Identifier::new());
        let id = s.id();
        dir.add(s.clone()).unwrap();
        assert!(dir.remove(&id).is_some());
        assert!(!s.is_live());
        assert_matches!(dir.find(&id), Err(DirectoryError::NotFound(_)));
        assert!(dir.remove(&id).is_none());
        assert!(dir.is_empty());
    }

    #[test]
    fn find_unknown_is_not_found() {
        let dir = SessionDirectory::new();
        assert_matches!(dir.find(&Identifier::new()), Err(DirectoryError::NotFound(_)));
    }

    #[test]
    fn dead_entry_is_not_returned() {
        let dir = SessionDirectory::new();
        let (s, _rx) = session_with(Identifier::new());
        dir.add(s.clone()).unwrap();
        s.mark_dead();
        assert_matches!(dir.find(&s.id()), Err(DirectoryError::NotFound(_)));
    }

    #[test]
    fn ids_lists_all() {
        let dir = SessionDirectory::new();
        let mut keep = Vec::new();
        for _ in 0..3 {
            let (s, rx) = session_with(Identifier::new());
            dir.add(s.clone()).unwrap();
            keep.push((s, rx));
        }
        let mut ids = dir.ids();
        ids.sort();
        let mut expected: Vec<_> = keep.iter().map(|(s, _)| s.id()).collect();
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn concurrent_add_remove_find() {
        let dir = Arc::new(SessionDirectory::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dir = dir.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let (s, _rx) = session_with(Identifier::new());
                        let id = s.id();
                        dir.add(s).unwrap();
                        assert_eq!(dir.find(&id).unwrap().id(), id);
                        let _ = dir.remove(&id);
                        assert!(dir.find(&id).is_err());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(dir.is_empty());
    }

    proptest! {
        #[test]
        fn distinct_ids_never_alias(raw in proptest::collection::hash_set(any::<u128>(), 1..32)) {
            let dir = SessionDirectory::new();
            let mut held = Vec::new();
            for r in &raw {
                let (s, rx) = session_with(Identifier::from_uuid(uuid_from(*r)));
                dir.add(s.clone()).unwrap();
                held.push((s, rx));
            }
            for (s, _) in &held {
                let found = dir.find(&s.id()).unwrap();
                prop_assert!(Arc::ptr_eq(&found, s));
                for (other, _) in &held {
                    if other.id() != s.id() {
                        prop_assert!(!Arc::ptr_eq(&found, other));
                    }
                }
            }
        }
    }

    fn uuid_from(raw: u128) -> courier_core::Uuid {
        courier_core::Uuid::from_u128(raw)
    }
}
