pub mod jwt;
pub mod password;

use crate::domain::Role;

/// The account a request was authenticated as, resolved fresh from storage.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
