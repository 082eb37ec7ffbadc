use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one page visit.
///
/// The session id lives for the lifetime of the page load; the user id is
/// supplied by the host application when the visitor is signed in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: Option<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), user_id)
    }

    /// Reuse an identifier from the host, e.g. a cookie that outlives reloads.
    pub fn with_id(session_id: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id,
            started_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = Session::new(None);
        let b = Session::new(None);
        assert_ne!(a.session_id, b.session_id);
        assert!(a.user_id.is_none());
    }

    #[test]
    fn with_id_keeps_supplied_identity() {
        let s = Session::with_id("abc", Some("user-7".into()));
        assert_eq!(s.session_id, "abc");
        assert_eq!(s.user_id.as_deref(), Some("user-7"));
    }
}
