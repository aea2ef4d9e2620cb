//! Caller identity passed into every engine operation

use crate::cache::UserId;
use crate::remote::AccessToken;

/// Current user and the credential their remote calls are made with
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    pub token: AccessToken,
}

impl Session {
    pub fn new(user_id: impl Into<String>, token: AccessToken) -> Self {
        Self {
            user_id: UserId::new(user_id),
            token,
        }
    }
}
