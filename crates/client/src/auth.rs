//! Authentication API client methods

use crate::client::{ApiClient, ApiRequest};
use crate::error::ClientError;
use crate::types::{LOGIN_PATH, LoginRequest, LoginResponse, UserProfile};
use tracing::info;

impl ApiClient {
    /// Log in and persist the session in the tier selected by `remember`
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        remember: bool,
    ) -> Result<UserProfile, ClientError> {
        let body = serde_json::to_value(LoginRequest { username, password })?;
        let response: LoginResponse = self
            .execute_public(ApiRequest::post(LOGIN_PATH).json(body))
            .await?;

        let session = self
            .store()
            .save(&response.token, response.refresh_token.as_deref(), remember)?;
        self.store().save_user(&response.user)?;

        info!(
            user = %response.user.id,
            role = %response.user.role,
            tier = %session.tier,
            "logged in"
        );
        Ok(response.user)
    }

    /// Forget the session in both storage tiers
    pub fn logout(&self) -> Result<(), ClientError> {
        self.store().clear()?;
        info!("logged out");
        Ok(())
    }

    /// Profile stored at login, if a user is signed in
    pub fn current_user(&self) -> Result<Option<UserProfile>, ClientError> {
        if self.store().load()?.is_none() {
            return Ok(None);
        }
        Ok(self.store().load_user()?)
    }
}
