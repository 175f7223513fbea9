/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Gateway sessions registry.
//!
//! Maps each protocol-specific [`SessionKey`] to its durable
//! [`SessionContext`]. A context is created on first contact and never
//! destroyed; a session whose transport is gone stays registered as an
//! offline session. Ownership tracks which library currently holds the
//! session; a key bound to a live connection owned by another library is a
//! duplicate.

use irongate_core::context::{SessionContext, SessionKey};
use irongate_core::types::{SessionId, Timestamp};
use std::collections::HashMap;
use tracing::{debug, info};

/// Identifier of an application library slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibraryId(pub u32);

/// Outcome of acquiring a session for a new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The key resolved to this context, now bound to the caller.
    Acquired(SessionContext),
    /// The key is bound to an active connection owned by another library.
    Duplicate,
}

/// The `SessionKey -> SessionContext` registry.
#[derive(Debug, Default)]
pub struct GatewaySessions {
    next_session_id: u64,
    contexts: HashMap<SessionKey, SessionContext>,
    /// Sessions currently bound to a live connection.
    bound: HashMap<SessionId, LibraryId>,
}

impl GatewaySessions {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_session_id: 1,
            contexts: HashMap::new(),
            bound: HashMap::new(),
        }
    }

    /// Restores a context recovered from the indexes at startup.
    pub fn restore(&mut self, key: SessionKey, context: SessionContext) {
        self.next_session_id = self.next_session_id.max(context.session_id.value() + 1);
        self.contexts.insert(key, context);
    }

    /// Resolves a key to its context, creating one on first contact, and
    /// binds it to `library`.
    ///
    /// `reset_requested` opens a new sequence index before hand-over, as a
    /// `ResetSeqNumFlag=Y` logon demands.
    pub fn acquire(
        &mut self,
        key: &SessionKey,
        library: LibraryId,
        reset_requested: bool,
        now: Timestamp,
    ) -> AcquireOutcome {
        if let Some(context) = self.contexts.get(key)
            && let Some(owner) = self.bound.get(&context.session_id)
            && *owner != library
        {
            debug!(%key, ?owner, "session already bound");
            return AcquireOutcome::Duplicate;
        }

        let next_id = &mut self.next_session_id;
        let context = self.contexts.entry(key.clone()).or_insert_with(|| {
            let id = SessionId::new(*next_id);
            *next_id += 1;
            info!(%key, session_id = id.value(), "new session context");
            SessionContext::new(id)
        });

        if reset_requested {
            context.on_sequence_reset(now);
        }

        self.bound.insert(context.session_id, library);
        AcquireOutcome::Acquired(context.clone())
    }

    /// Writes an updated context back after the connection unbinds.
    pub fn hand_back(&mut self, key: &SessionKey, context: SessionContext) {
        self.bound.remove(&context.session_id);
        self.contexts.insert(key.clone(), context);
    }

    /// Releases a binding without a context update (abrupt disconnect).
    pub fn release(&mut self, session_id: SessionId) {
        self.bound.remove(&session_id);
    }

    /// Reclaims every session owned by a timed-out library.
    ///
    /// # Returns
    /// The sessions that were reclaimed.
    pub fn reclaim_library(&mut self, library: LibraryId) -> Vec<SessionId> {
        let reclaimed: Vec<SessionId> = self
            .bound
            .iter()
            .filter(|(_, owner)| **owner == library)
            .map(|(id, _)| *id)
            .collect();
        for id in &reclaimed {
            self.bound.remove(id);
        }
        reclaimed
    }

    /// Looks up a session id by its FIX comp id pair.
    #[must_use]
    pub fn lookup_session_id(&self, local: &str, remote: &str) -> Option<SessionId> {
        self.contexts.iter().find_map(|(key, context)| match key {
            SessionKey::Fix(fix_key)
                if fix_key.target_comp_id.as_str() == local
                    && fix_key.sender_comp_id.as_str() == remote =>
            {
                Some(context.session_id)
            }
            _ => None,
        })
    }

    /// The context for a key, if one exists.
    #[must_use]
    pub fn context(&self, key: &SessionKey) -> Option<&SessionContext> {
        self.contexts.get(key)
    }

    /// Every registered session.
    #[must_use]
    pub fn all_sessions(&self) -> Vec<(SessionKey, SessionContext)> {
        self.contexts
            .iter()
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect()
    }

    /// True when the session is bound to a live connection.
    #[must_use]
    pub fn is_bound(&self, session_id: SessionId) -> bool {
        self.bound.contains_key(&session_id)
    }

    /// Forgets every context. Admin reset-session-ids path.
    pub fn reset(&mut self) {
        self.contexts.clear();
        self.bound.clear();
        self.next_session_id = 1;
        info!("session registry reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use irongate_core::context::FixSessionKey;
    use irongate_core::types::CompId;

    fn fix_key(sender: &str, target: &str) -> SessionKey {
        SessionKey::Fix(FixSessionKey::new(
            CompId::new(sender).unwrap(),
            CompId::new(target).unwrap(),
        ))
    }

    fn t() -> Timestamp {
        Timestamp::from_millis(1)
    }

    #[test]
    fn test_first_contact_creates_context() {
        let mut registry = GatewaySessions::new();
        let outcome = registry.acquire(&fix_key("INIT", "ACC"), LibraryId(1), false, t());

        let AcquireOutcome::Acquired(context) = outcome else {
            panic!("expected acquisition");
        };
        assert_eq!(context.session_id.value(), 1);
        assert_eq!(context.sequence_index.value(), 0);
        assert!(registry.is_bound(context.session_id));
    }

    #[test]
    fn test_same_key_same_context() {
        let mut registry = GatewaySessions::new();
        let key = fix_key("INIT", "ACC");

        let AcquireOutcome::Acquired(first) =
            registry.acquire(&key, LibraryId(1), false, t())
        else {
            panic!("expected acquisition");
        };
        registry.release(first.session_id);

        let AcquireOutcome::Acquired(second) =
            registry.acquire(&key, LibraryId(1), false, t())
        else {
            panic!("expected acquisition");
        };
        assert_eq!(first.session_id, second.session_id);
    }

    #[test]
    fn test_duplicate_session_detected() {
        let mut registry = GatewaySessions::new();
        let key = fix_key("INIT", "ACC");

        registry.acquire(&key, LibraryId(1), false, t());
        let outcome = registry.acquire(&key, LibraryId(2), false, t());
        assert_eq!(outcome, AcquireOutcome::Duplicate);

        // The same library may rebind.
        let outcome = registry.acquire(&key, LibraryId(1), false, t());
        assert!(matches!(outcome, AcquireOutcome::Acquired(_)));
    }

    #[test]
    fn test_reset_logon_bumps_sequence_index() {
        let mut registry = GatewaySessions::new();
        let key = fix_key("INIT", "ACC");

        let AcquireOutcome::Acquired(first) =
            registry.acquire(&key, LibraryId(1), false, t())
        else {
            panic!("expected acquisition");
        };
        registry.release(first.session_id);

        let AcquireOutcome::Acquired(second) = registry.acquire(&key, LibraryId(1), true, t())
        else {
            panic!("expected acquisition");
        };
        assert_eq!(second.sequence_index.value(), first.sequence_index.value() + 1);
    }

    #[test]
    fn test_fixp_and_fix_keys_do_not_collide() {
        let mut registry = GatewaySessions::new();
        let fix = fix_key("INIT", "ACC");
        let fixp = SessionKey::FixP { session_id: 1 };

        let AcquireOutcome::Acquired(a) = registry.acquire(&fix, LibraryId(1), false, t())
        else {
            panic!("expected acquisition");
        };
        let AcquireOutcome::Acquired(b) = registry.acquire(&fixp, LibraryId(1), false, t())
        else {
            panic!("expected acquisition");
        };
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_lookup_session_id() {
        let mut registry = GatewaySessions::new();
        registry.acquire(&fix_key("INIT", "ACC"), LibraryId(1), false, t());

        assert!(registry.lookup_session_id("ACC", "INIT").is_some());
        assert!(registry.lookup_session_id("INIT", "ACC").is_none());
        assert!(registry.lookup_session_id("ACC", "OTHER").is_none());
    }

    #[test]
    fn test_reclaim_library_frees_sessions() {
        let mut registry = GatewaySessions::new();
        let key_a = fix_key("A", "ACC");
        let key_b = fix_key("B", "ACC");
        registry.acquire(&key_a, LibraryId(1), false, t());
        registry.acquire(&key_b, LibraryId(1), false, t());

        let reclaimed = registry.reclaim_library(LibraryId(1));
        assert_eq!(reclaimed.len(), 2);

        // Another library can now take the sessions over.
        let outcome = registry.acquire(&key_a, LibraryId(2), false, t());
        assert!(matches!(outcome, AcquireOutcome::Acquired(_)));
    }

    #[test]
    fn test_hand_back_persists_context_changes() {
        let mut registry = GatewaySessions::new();
        let key = SessionKey::FixP { session_id: 9 };

        let AcquireOutcome::Acquired(mut context) =
            registry.acquire(&key, LibraryId(1), false, t())
        else {
            panic!("expected acquisition");
        };
        context.end();
        registry.hand_back(&key, context.clone());

        assert!(registry.context(&key).unwrap().ended);
        assert!(!registry.is_bound(context.session_id));
    }

    #[test]
    fn test_restore_preserves_ids() {
        let mut registry = GatewaySessions::new();
        let key = fix_key("INIT", "ACC");
        registry.restore(key.clone(), SessionContext::new(SessionId::new(17)));

        let AcquireOutcome::Acquired(context) =
            registry.acquire(&key, LibraryId(1), false, t())
        else {
            panic!("expected acquisition");
        };
        assert_eq!(context.session_id.value(), 17);

        // Fresh keys continue past the restored id.
        let AcquireOutcome::Acquired(fresh) =
            registry.acquire(&fix_key("X", "ACC"), LibraryId(1), false, t())
        else {
            panic!("expected acquisition");
        };
        assert_eq!(fresh.session_id.value(), 18);
    }
}
