//! Process-wide registry of named brokers and cores, analogous to the reference implementation's
//! `BrokerFactory`/`CoreFactory` singletons.
//!
//! A core joining a broker by name (rather than by an already-held handle) looks the broker up
//! here and clones its inbound sender to hand to [`crate::inproc::InprocTransport`] as the
//! `PARENT` route. Entries are held weakly so a dropped participant is reclaimed on the next
//! lookup or registration instead of pinning it alive for the life of the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::Lazy;
use tokio::sync::mpsc;

use cosim_runtime::ActionMessage;

/// What a named participant publishes into the directory: the inbound sender any other
/// in-process participant can clone to address it directly. Held behind an `Arc` so the
/// directory's weak reference and the owning participant's strong reference share one value.
pub struct ParticipantHandle {
    pub name: String,
    pub inbound: mpsc::UnboundedSender<ActionMessage>,
}

impl ParticipantHandle {
    pub fn new(name: impl Into<String>, inbound: mpsc::UnboundedSender<ActionMessage>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            inbound,
        })
    }
}

/// Process-wide name table. Use [`DIRECTORY`] rather than constructing one of these directly.
#[derive(Default)]
pub struct ParticipantDirectory {
    entries: Mutex<HashMap<String, Weak<ParticipantHandle>>>,
}

impl ParticipantDirectory {
    /// Publishes `handle` under its own name, evicting a same-named entry if its participant has
    /// already been dropped. Registering a name that is still alive is a caller bug (two live
    /// brokers sharing a name) but is not checked here -- the API layer that assigns names owns
    /// that uniqueness guarantee, per the identifier-uniqueness rule shared with handle names.
    pub fn register(&self, handle: Arc<ParticipantHandle>) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, weak| weak.strong_count() > 0);
        tracing::debug!(name = %handle.name, "participant registered in process directory");
        entries.insert(handle.name.clone(), Arc::downgrade(&handle));
    }

    /// Looks up a participant by name, sweeping dead entries encountered along the way.
    pub fn find(&self, name: &str) -> Option<Arc<ParticipantHandle>> {
        let mut entries = self.entries.lock().unwrap();
        let found = entries.get(name).and_then(Weak::upgrade);
        entries.retain(|_, weak| weak.strong_count() > 0);
        found
    }

    /// Forces a sweep of dead entries without performing a lookup.
    pub fn cleanup(&self) {
        self.entries.lock().unwrap().retain(|_, weak| weak.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The single process-wide directory instance.
pub static DIRECTORY: Lazy<ParticipantDirectory> = Lazy::new(ParticipantDirectory::default);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_participant_is_findable_by_name() {
        let directory = ParticipantDirectory::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = ParticipantHandle::new("root_broker", tx);
        directory.register(handle.clone());

        let found = directory.find("root_broker").expect("registered participant");
        assert_eq!(found.name, "root_broker");
    }

    #[test]
    fn dropped_participant_is_swept_on_next_lookup() {
        let directory = ParticipantDirectory::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        {
            let handle = ParticipantHandle::new("ephemeral_core", tx);
            directory.register(handle);
        }
        assert!(directory.find("ephemeral_core").is_none());
        assert!(directory.is_empty());
    }

    #[test]
    fn unknown_name_is_simply_absent() {
        let directory = ParticipantDirectory::default();
        assert!(directory.find("nobody").is_none());
    }
}
