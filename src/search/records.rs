//! Records returned by the session and user searches

use serde::{Deserialize, Serialize};

/// A knolx session as listed by the session search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub date_string: String,
    pub session: String,
    pub topic: String,
    pub email: String,
    pub meetup: bool,
    pub cancelled: bool,
    pub completed: bool,
    pub content_available: bool,
}

/// A portal account as listed by the user search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserRecord {
    pub email: String,
    pub active: bool,
    pub ban: bool,
    pub ban_till: String,
    pub admin: bool,
    pub super_user: bool,
    pub core_member: bool,
}
