//! Role and ownership checks applied before any read or mutation.

use crate::auth::CurrentUser;
use crate::error::{AppError, AppResult};

/// Which rows a caller may read. Admins read everything, everyone else reads
/// what they own, are a member of, or are assigned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Member(String),
}

impl Scope {
    pub fn for_user(user: &CurrentUser) -> Self {
        if user.is_admin() {
            Self::All
        } else {
            Self::Member(user.id.clone())
        }
    }
}

pub fn admin_only(user: &CurrentUser) -> AppResult<()> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::admin_only())
    }
}

pub fn owner_or_admin(user: &CurrentUser, owner_id: &str) -> AppResult<()> {
    if user.is_admin() || user.id == owner_id {
        Ok(())
    } else {
        Err(AppError::Forbidden("access denied".to_string()))
    }
}

pub fn can_view_project<'a>(
    user: &CurrentUser,
    owner_id: &str,
    mut member_ids: impl Iterator<Item = &'a str>,
) -> bool {
    user.is_admin() || user.id == owner_id || member_ids.any(|member| member == user.id)
}

pub fn can_view_task(user: &CurrentUser, assigned_to: Option<&str>, project_visible: bool) -> bool {
    user.is_admin() || assigned_to == Some(user.id.as_str()) || project_visible
}

pub fn ensure_visible(visible: bool, entity: &str) -> AppResult<()> {
    if visible {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "access denied: you are not a member of this {entity}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::{can_view_project, can_view_task, owner_or_admin, Scope};
    use crate::auth::CurrentUser;
    use crate::domain::Role;

    fn user(id: &str, role: Role) -> CurrentUser {
        CurrentUser {
            id: id.to_string(),
            name: id.to_string(),
            email: format!("{id}@example.com"),
            role,
        }
    }

    #[test]
    fn scope_is_unrestricted_only_for_admins() {
        assert_eq!(Scope::for_user(&user("a", Role::Admin)), Scope::All);
        assert_eq!(
            Scope::for_user(&user("u", Role::User)),
            Scope::Member("u".to_string())
        );
    }

    #[test]
    fn project_visible_to_owner_members_and_admins() {
        let members = ["m1", "m2"];

        assert!(can_view_project(&user("owner", Role::User), "owner", members.into_iter()));
        assert!(can_view_project(&user("m2", Role::User), "owner", members.into_iter()));
        assert!(can_view_project(&user("root", Role::Admin), "owner", members.into_iter()));
        assert!(!can_view_project(&user("stranger", Role::User), "owner", members.into_iter()));
    }

    #[test]
    fn task_visible_to_assignee_even_outside_project() {
        let assignee = user("assignee", Role::User);
        assert!(can_view_task(&assignee, Some("assignee"), false));
        assert!(!can_view_task(&assignee, Some("someone-else"), false));
        assert!(can_view_task(&assignee, None, true));
    }

    #[test]
    fn owner_or_admin_rejects_other_users() {
        assert!(owner_or_admin(&user("owner", Role::User), "owner").is_ok());
        assert!(owner_or_admin(&user("root", Role::Admin), "owner").is_ok());
        assert!(owner_or_admin(&user("other", Role::User), "owner").is_err());
    }
}
