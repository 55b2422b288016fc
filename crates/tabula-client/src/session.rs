// Authenticated session state, established by a successful login and passed
// by reference to the services that need it. There is deliberately no ambient
// global here: two independent sessions can coexist in one process.
use tabula_authz::Requester;
use tabula_common::UserId;

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Bearer token injected into every request body and sent once over the
    /// persistent connection immediately after connect.
    pub token: String,
    pub user_id: UserId,
    pub username: String,
    pub gm: bool,
}

impl Session {
    /// Identity view used for permission resolution.
    pub fn requester(&self) -> Requester {
        Requester {
            id: self.user_id.to_string(),
            gm: self.gm,
        }
    }
}
