use crate::{model::Id, util::BoundedString};
use serde::{Deserialize, Serialize};

pub const USER_HANDLE_MAX_LEN: usize = 50;

pub type UserHandle = BoundedString<1, USER_HANDLE_MAX_LEN>;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct UserMarker;

text_enum! {
    pub enum UserRole {
        User => "USER",
        Admin => "ADMIN",
    }
}

impl UserRole {
    #[must_use]
    pub fn is_admin(self) -> bool {
        self == UserRole::Admin
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct User {
    pub id: Id<UserMarker>,
    pub handle: UserHandle,
    pub role: UserRole,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct CreateUser {
    pub handle: UserHandle,
}
