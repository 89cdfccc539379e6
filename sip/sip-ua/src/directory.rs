//! Session directory: the registration and the set of live calls, published as immutable
//! snapshots for readers outside the engine

use crate::AgentError;
use crate::event::{CallId, CallState, Direction, Failure, RegistrationState};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationSnapshot {
    pub state: RegistrationState,
    /// When the current binding runs out, if there is one
    pub expires_at: Option<Instant>,
    pub last_failure: Option<Failure>,
}

impl Default for RegistrationSnapshot {
    fn default() -> Self {
        Self {
            state: RegistrationState::Unregistered,
            expires_at: None,
            last_failure: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallSnapshot {
    pub id: CallId,
    pub direction: Direction,
    pub state: CallState,
    /// URI of the peer
    pub remote: String,
    pub muted: bool,
    /// Put on hold by us
    pub held: bool,
    /// Put on hold by the peer
    pub remote_held: bool,
}

/// Immutable view of the directory at one point in time
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    /// Incremented with every change
    pub version: u64,
    pub registration: RegistrationSnapshot,
    /// Live calls, ordered by their id
    pub calls: Vec<CallSnapshot>,
}

impl DirectorySnapshot {
    pub fn call(&self, id: CallId) -> Option<&CallSnapshot> {
        self.calls
            .binary_search_by_key(&id, |call| call.id)
            .ok()
            .map(|index| &self.calls[index])
    }
}

#[derive(Debug, Default)]
pub struct SessionDirectory {
    version: u64,
    registration: RegistrationSnapshot,
    calls: BTreeMap<CallId, CallSnapshot>,

    /// SIP Call-ID of every live call
    call_ids: HashMap<String, CallId>,

    published: Option<Arc<DirectorySnapshot>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn registration(&self) -> &RegistrationSnapshot {
        &self.registration
    }

    pub fn set_registration(&mut self, registration: RegistrationSnapshot) {
        if self.registration != registration {
            self.registration = registration;
            self.changed();
        }
    }

    /// Add a call, its SIP Call-ID must not be used by any other live call
    pub fn insert_call(
        &mut self,
        sip_call_id: &str,
        call: CallSnapshot,
    ) -> Result<(), AgentError> {
        if self.call_ids.contains_key(sip_call_id) || self.calls.contains_key(&call.id) {
            return Err(AgentError::DuplicateCallId(sip_call_id.into()));
        }

        self.call_ids.insert(sip_call_id.into(), call.id);
        self.calls.insert(call.id, call);
        self.changed();

        Ok(())
    }

    pub fn update_call(&mut self, call: CallSnapshot) {
        match self.calls.get_mut(&call.id) {
            Some(existing) if *existing != call => {
                *existing = call;
                self.changed();
            }
            Some(_) => {}
            None => log::warn!("{}: update of unknown call", call.id),
        }
    }

    pub fn remove_call(&mut self, id: CallId) {
        if self.calls.remove(&id).is_some() {
            self.call_ids.retain(|_, call| *call != id);
            self.changed();
        }
    }

    /// Find the live call using the SIP Call-ID
    pub fn lookup(&self, sip_call_id: &str) -> Option<CallId> {
        self.call_ids.get(sip_call_id).copied()
    }

    pub fn call(&self, id: CallId) -> Option<&CallSnapshot> {
        self.calls.get(&id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Current state as shared snapshot, only rebuilt after a change
    pub fn snapshot(&mut self) -> Arc<DirectorySnapshot> {
        if let Some(published) = &self.published {
            return published.clone();
        }

        let snapshot = Arc::new(DirectorySnapshot {
            version: self.version,
            registration: self.registration.clone(),
            calls: self.calls.values().cloned().collect(),
        });

        self.published = Some(snapshot.clone());

        snapshot
    }

    fn changed(&mut self) {
        self.version += 1;
        self.published = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::event::CallIds;

    fn call(id: CallId) -> CallSnapshot {
        CallSnapshot {
            id,
            direction: Direction::Outgoing,
            state: CallState::Calling,
            remote: "sip:bob@example.com".into(),
            muted: false,
            held: false,
            remote_held: false,
        }
    }

    #[test]
    fn call_id_uniqueness() {
        let ids = CallIds::default();
        let mut directory = SessionDirectory::new();

        directory.insert_call("abc", call(ids.next())).unwrap();

        assert!(matches!(
            directory.insert_call("abc", call(ids.next())),
            Err(AgentError::DuplicateCallId(..))
        ));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn call_id_is_released_on_removal() {
        let ids = CallIds::default();
        let mut directory = SessionDirectory::new();

        let first = ids.next();
        directory.insert_call("abc", call(first)).unwrap();
        assert_eq!(directory.lookup("abc"), Some(first));

        directory.remove_call(first);
        assert_eq!(directory.lookup("abc"), None);

        directory.insert_call("abc", call(ids.next())).unwrap();
    }

    #[test]
    fn snapshots_are_immutable_and_versioned() {
        let id = CallIds::default().next();
        let mut directory = SessionDirectory::new();

        let empty = directory.snapshot();
        directory.insert_call("abc", call(id)).unwrap();

        let one = directory.snapshot();
        assert!(empty.calls.is_empty());
        assert_eq!(one.call(id).unwrap().state, CallState::Calling);
        assert!(one.version > empty.version);

        // unchanged directory hands out the same snapshot
        assert!(Arc::ptr_eq(&one, &directory.snapshot()));

        directory.update_call(call(id));
        assert!(Arc::ptr_eq(&one, &directory.snapshot()));

        let mut established = call(id);
        established.state = CallState::Established;
        directory.update_call(established);

        assert_eq!(one.call(id).unwrap().state, CallState::Calling);
        assert_eq!(
            directory.snapshot().call(id).unwrap().state,
            CallState::Established
        );
    }
}
