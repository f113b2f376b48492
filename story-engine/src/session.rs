//! Per-run session context.
//!
//! Each run owns exactly one `SessionContext`; it is never shared between
//! concurrent runs. Sub-sessions isolate conversational state per
//! capability and are keyed deterministically, so re-entering the same
//! capability twice in one run reuses the same conversation.

use std::collections::HashMap;

use story_engine_sdk::Capability;

#[derive(Debug)]
pub struct SessionContext {
    pub user_id: String,
    pub session_id: String,
    sub_sessions: HashMap<Capability, String>,
}

impl SessionContext {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            sub_sessions: HashMap::new(),
        }
    }

    /// Sub-session id for a capability, created lazily on first use.
    ///
    /// The key is a pure function of `(session_id, capability)`.
    pub fn sub_session(&mut self, capability: Capability) -> &str {
        let session_id = &self.session_id;
        self.sub_sessions
            .entry(capability)
            .or_insert_with(|| format!("{}:{}", session_id, capability.as_str()))
    }
}
