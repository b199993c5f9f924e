//! Audience filter: which records may enter a peer's store at all.

use shared_types::NotificationRecord;

/// Admits records owned by the signed-in user and not restricted to a
/// different audience class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudienceFilter {
    user_id: String,
}

impl AudienceFilter {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn admits(&self, record: &NotificationRecord) -> bool {
        match record.owner_user_id.as_deref() {
            None => false,
            Some(owner) if record.is_restricted_audience() => owner == self.user_id,
            Some(_) => true,
        }
    }
}
