use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session record stored at login and looked up by access-token id.
///
/// Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub username: String,
}

impl Session {
    /// Creates a session with a fresh random id.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            username: username.into(),
        }
    }
}

/// Verified caller identity handed over by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    /// Access-token id.
    pub id: String,
    pub username: String,
}

impl CallerIdentity {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_wire_format() {
        let session = Session {
            session_id: "s-1".into(),
            username: "alice".into(),
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"sessionId": "s-1", "username": "alice"})
        );
    }

    #[test]
    fn test_new_session_ids_are_unique() {
        let a = Session::new("alice");
        let b = Session::new("alice");
        assert_ne!(a.session_id, b.session_id);
        assert!(Uuid::parse_str(&a.session_id).is_ok());
    }
}
