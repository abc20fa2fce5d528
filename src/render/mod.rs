//! Row projections for search results
//!
//! Each search hit is turned into a small model describing what a listing
//! row shows: labels, status badges and which buttons are enabled. The
//! models carry no markup; front ends (the CLI table, a web view) decide
//! how to draw them.

use crate::search::{SessionRecord, UserRecord};
use serde::Serialize;
use std::fmt;

/// Meetup or regular knolx session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionKind {
    Meetup,
    Knolx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Completed,
    Cancelled,
    Pending,
}

/// What the content column offers for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ContentCell {
    /// Slides and video can be opened for this session id
    Available(String),
    NotAvailable,
    Cancelled,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRowModel {
    pub date: String,
    pub session: String,
    pub topic: String,
    pub presenter: String,
    pub kind: SessionKind,
    pub cancelled: bool,
    pub status: SessionStatus,
    pub content: ContentCell,
}

impl SessionRowModel {
    pub fn from_record(record: &SessionRecord) -> Self {
        let held = record.completed && !record.cancelled;

        let status = if held {
            SessionStatus::Completed
        } else if record.cancelled {
            SessionStatus::Cancelled
        } else {
            SessionStatus::Pending
        };

        let content = match (held, record.cancelled) {
            (true, _) if record.content_available => ContentCell::Available(record.id.clone()),
            (true, _) => ContentCell::NotAvailable,
            (false, true) => ContentCell::Cancelled,
            (false, false) => ContentCell::Pending,
        };

        Self {
            date: record.date_string.clone(),
            session: record.session.clone(),
            topic: record.topic.clone(),
            presenter: record.email.clone(),
            kind: if record.meetup {
                SessionKind::Meetup
            } else {
                SessionKind::Knolx
            },
            cancelled: record.cancelled,
            status,
            content,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ButtonState {
    Enabled,
    Disabled,
}

impl ButtonState {
    fn enabled_if(condition: bool) -> Self {
        if condition {
            ButtonState::Enabled
        } else {
            ButtonState::Disabled
        }
    }

    pub fn is_enabled(self) -> bool {
        self == ButtonState::Enabled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BanLabel {
    Banned { until: String },
    Allowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoleLabel {
    SuperUser,
    Admin,
    NormalUser,
}

impl fmt::Display for RoleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleLabel::SuperUser => f.write_str("SuperUser"),
            RoleLabel::Admin => f.write_str("Admin"),
            RoleLabel::NormalUser => f.write_str("Normal User"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRowModel {
    pub email: String,
    pub edit: ButtonState,
    pub delete: ButtonState,
    pub active: bool,
    pub ban: BanLabel,
    pub role: RoleLabel,
    pub core_member: bool,
}

impl UserRowModel {
    /// Project a user hit as seen by a viewer with or without super-user rights
    pub fn from_record(record: &UserRecord, viewer_is_super_user: bool) -> Self {
        let target_is_super = record.admin && record.super_user;
        let target_is_admin = record.admin && !record.super_user;

        let (edit, delete) = if viewer_is_super_user {
            (ButtonState::Enabled, ButtonState::enabled_if(!target_is_super))
        } else if target_is_admin {
            (ButtonState::Enabled, ButtonState::Disabled)
        } else if target_is_super {
            (ButtonState::Disabled, ButtonState::Disabled)
        } else {
            (ButtonState::Enabled, ButtonState::Enabled)
        };

        let role = if target_is_super {
            RoleLabel::SuperUser
        } else if target_is_admin {
            RoleLabel::Admin
        } else {
            RoleLabel::NormalUser
        };

        Self {
            email: record.email.clone(),
            edit,
            delete,
            active: record.active,
            ban: if record.ban {
                BanLabel::Banned {
                    until: record.ban_till.clone(),
                }
            } else {
                BanLabel::Allowed
            },
            role,
            core_member: record.core_member,
        }
    }
}
