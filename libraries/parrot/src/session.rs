//! The session gate: nothing syncs until an identity provider hands us an [`Identity`].

use std::cell::{Cell, RefCell};

use crate::backend::Backend;
use crate::sync::ChatView;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// The `owner` value attached to every outgoing message.
    pub name: String,
    pub user_id: Option<String>,
    pub access_token: Option<String>,
}

impl Identity {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            user_id: None,
            access_token: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Sign-in rejected: {0}")]
    Rejected(String),

    #[error("Identity provider unreachable: {0}")]
    Transport(String),

    #[error("Malformed identity provider response")]
    Decode(#[from] serde_json::Error),
}

#[allow(async_fn_in_trait)]
pub trait IdentityProvider {
    /// The signed-in identity, or `None` if there isn't one.
    async fn current_identity(&self) -> Result<Option<Identity>, AuthError>;

    async fn sign_out(&self, identity: &Identity) -> Result<(), AuthError>;
}

/// An identity fixed up front. Used with the in-memory backend.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    name: Option<String>,
    signed_out: Cell<bool>,
}

impl StaticIdentity {
    pub fn new(name: Option<String>) -> Self {
        Self {
            name,
            signed_out: Cell::new(false),
        }
    }

    pub fn is_signed_out(&self) -> bool {
        self.signed_out.get()
    }
}

impl IdentityProvider for StaticIdentity {
    async fn current_identity(&self) -> Result<Option<Identity>, AuthError> {
        if self.signed_out.get() {
            return Ok(None);
        }
        Ok(self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(Identity::named))
    }

    async fn sign_out(&self, _identity: &Identity) -> Result<(), AuthError> {
        self.signed_out.set(true);
        Ok(())
    }
}

pub struct SessionGate<P> {
    provider: P,
    identity: RefCell<Option<Identity>>,
}

impl<P: IdentityProvider> SessionGate<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            identity: RefCell::new(None),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Ask the provider for an identity. Returns `None` while there isn't one; nothing else may run until
    /// this returns `Some`.
    pub async fn open(&self) -> Result<Option<Identity>, AuthError> {
        if let Some(identity) = self.identity.borrow().clone() {
            return Ok(Some(identity));
        }

        let identity = self
            .provider
            .current_identity()
            .await
            .inspect_err(|e| log::error!("Failed to acquire an identity: {e:?}"))?;

        if let Some(identity) = &identity {
            log::info!("Signed in as {}", identity.name);
        }
        *self.identity.borrow_mut() = identity.clone();
        Ok(identity)
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        self.identity.borrow().is_some()
    }

    /// Halt the view first, then end the session with the provider.
    pub async fn sign_out<B: Backend + 'static>(&self, view: ChatView<B>) -> Result<(), AuthError> {
        view.unmount();

        let Some(identity) = self.identity.borrow_mut().take() else {
            return Ok(());
        };
        self.provider
            .sign_out(&identity)
            .await
            .inspect_err(|e| log::error!("Failed to sign out {}: {e:?}", identity.name))?;
        log::info!("Signed out {}", identity.name);
        Ok(())
    }
}
