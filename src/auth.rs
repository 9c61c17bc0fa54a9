use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Cleartext password gate shared by every tenant of the server.
#[derive(Debug)]
pub struct CajaAuthSource {
    password: String,
}

impl CajaAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for CajaAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(
            "password lookup for user {:?} on database {:?}",
            login.user(),
            login.database()
        );
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
