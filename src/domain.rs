//! Closed vocabularies shared by the API, the lifecycle rules and storage.
//!
//! Values travel as strings on the wire and in the database; these enums are
//! the single place that decides which strings are legal.

use std::fmt;

use serde::{Deserialize, Deserializer};

use crate::error::{AppError, AppResult};

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $label:literal { $($variant:ident => $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $value),+
                }
            }

            pub fn parse(value: &str) -> AppResult<Self> {
                match value.trim() {
                    $($value => Ok($name::$variant),)+
                    _ => Err(AppError::BadRequest(format!(
                        concat!("invalid ", $label, " '{}'"),
                        value
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Global account role.
    Role, "role" {
        Admin => "admin",
        User => "user",
    }
);

string_enum!(
    ProjectStatus, "project status" {
        Active => "active",
        Completed => "completed",
        Archived => "archived",
    }
);

string_enum!(
    Priority, "priority" {
        Low => "low",
        Medium => "medium",
        High => "high",
        Urgent => "urgent",
    }
);

string_enum!(
    /// Board lanes, in display order.
    TaskStatus, "task status" {
        Todo => "todo",
        InProgress => "in-progress",
        InReview => "in-review",
        Completed => "completed",
    }
);

string_enum!(
    /// Project-scoped membership role, independent of the account role.
    ProjectRole, "project member role" {
        Admin => "admin",
        Member => "member",
    }
);

string_enum!(
    TeamRole, "team member role" {
        Lead => "lead",
        Member => "member",
    }
);

string_enum!(
    AuditAction, "audit action" {
        Create => "CREATE",
        Update => "UPDATE",
        Delete => "DELETE",
        Login => "LOGIN",
        Logout => "LOGOUT",
        AssignTask => "ASSIGN_TASK",
        CompleteTask => "COMPLETE_TASK",
        ChangeStatus => "CHANGE_STATUS",
        AddComment => "ADD_COMMENT",
        UploadFile => "UPLOAD_FILE",
        ChangeRole => "CHANGE_ROLE",
    }
);

string_enum!(
    AuditEntity, "audit entity" {
        User => "user",
        Project => "project",
        Task => "task",
        Team => "team",
    }
);

impl TaskStatus {
    pub fn is_completed(self) -> bool {
        self == Self::Completed
    }
}

/// Serde helper telling an absent field (`None`) apart from an explicit
/// `null` (`Some(None)`). Pair it with `#[serde(default)]`.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
