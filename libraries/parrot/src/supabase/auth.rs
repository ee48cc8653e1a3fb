//! Password sign-in against Supabase Auth (GoTrue).

use std::cell::RefCell;

use serde_json::json;

use crate::session::{AuthError, Identity, IdentityProvider};
use crate::supabase::SupabaseConfig;

#[derive(Debug, serde::Deserialize)]
pub(crate) struct PasswordGrant {
    access_token: String,
    user: GrantUser,
}

#[derive(Debug, serde::Deserialize)]
struct GrantUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: serde_json::Value,
}

impl From<PasswordGrant> for Identity {
    /// The display name is `user_metadata.username` when set, then the e-mail, then the user id.
    fn from(grant: PasswordGrant) -> Self {
        let PasswordGrant { access_token, user } = grant;
        let name = user
            .user_metadata
            .get("username")
            .and_then(|username| username.as_str())
            .filter(|username| !username.is_empty())
            .map(str::to_string)
            .or(user.email)
            .unwrap_or_else(|| user.id.clone());
        Identity {
            name,
            user_id: Some(user.id),
            access_token: Some(access_token),
        }
    }
}

pub struct SupabaseAuth {
    client: reqwest::Client,
    config: SupabaseConfig,
    email: String,
    password: String,
    session: RefCell<Option<Identity>>,
}

impl SupabaseAuth {
    pub fn new(config: SupabaseConfig, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            email: email.into(),
            password: password.into(),
            session: RefCell::new(None),
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!(
            "{}/auth/v1/{path}",
            self.config.supabase_url.trim_end_matches('/')
        )
    }
}

impl IdentityProvider for SupabaseAuth {
    async fn current_identity(&self) -> Result<Option<Identity>, AuthError> {
        if let Some(identity) = self.session.borrow().clone() {
            return Ok(Some(identity));
        }
        if self.email.is_empty() || self.password.is_empty() {
            return Ok(None);
        }

        let response = self
            .client
            .post(self.auth_url("token?grant_type=password"))
            .header("apikey", &self.config.supabase_anon_key)
            .json(&json!({ "email": self.email, "password": self.password }))
            .send()
            .await
            .map_err(|e| AuthError::Transport(format!("{e:?}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(format!("{e:?}")))?;
        if !status.is_success() {
            return Err(AuthError::Rejected(format!("{status}: {body}")));
        }

        let grant: PasswordGrant = serde_json::from_str(&body)?;
        let identity = Identity::from(grant);
        *self.session.borrow_mut() = Some(identity.clone());
        Ok(Some(identity))
    }

    async fn sign_out(&self, identity: &Identity) -> Result<(), AuthError> {
        self.session.borrow_mut().take();

        let Some(access_token) = &identity.access_token else {
            return Ok(());
        };
        let response = self
            .client
            .post(self.auth_url("logout"))
            .header("apikey", &self.config.supabase_anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Transport(format!("{e:?}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            log::warn!("Sign-out returned {status}: {body}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_prefers_username() {
        let grant: PasswordGrant = serde_json::from_str(
            r#"{
                "access_token": "jwt",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "refresh",
                "user": {"id": "u-1", "email": "alice@example.com", "user_metadata": {"username": "alice"}}
            }"#,
        )
        .unwrap();
        let identity = Identity::from(grant);
        assert_eq!(identity.name, "alice");
        assert_eq!(identity.user_id.as_deref(), Some("u-1"));
        assert_eq!(identity.access_token.as_deref(), Some("jwt"));
    }

    #[test]
    fn test_identity_falls_back_to_email() {
        let grant: PasswordGrant = serde_json::from_str(
            r#"{"access_token": "jwt", "user": {"id": "u-1", "email": "alice@example.com", "user_metadata": {}}}"#,
        )
        .unwrap();
        assert_eq!(Identity::from(grant).name, "alice@example.com");
    }
}
