use crate::domain::auth::AuthSession as DomainSession;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct Registration {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct Login {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: i64,
    pub is_admin: bool,
}

impl From<DomainSession> for AuthSession {
    fn from(session: DomainSession) -> Self {
        Self {
            user_id: session.user_id,
            token: session.token,
            expires_at: session.expires_at,
            is_admin: session.is_admin,
        }
    }
}
