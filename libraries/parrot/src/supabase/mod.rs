//! A [`Backend`] for a Supabase project: PostgREST for listing and creating rows, Realtime for the
//! live-update channel, and GoTrue (in [`auth`]) for the identity.
//!
//! The table needs `owner text`, `body text` and `created_at timestamptz default now()` columns.
//! A `client_id uuid` column is optional, but without it [`crate::MergePolicy::Reconcile`] can't match echoes
//! to their optimistic copies.

pub mod auth;
mod realtime;

use futures::StreamExt;
use futures::stream::LocalBoxStream;

use crate::backend::{Backend, BackendError};
use crate::data_model::{Message, NewMessage};

pub use realtime::websocket_url;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SupabaseConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

pub struct SupabaseBackend {
    client: reqwest::Client,
    config: SupabaseConfig,
    access_token: String,
    table: String,
}

impl SupabaseBackend {
    pub fn new(
        config: SupabaseConfig,
        access_token: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            access_token: access_token.into(),
            table: table.into(),
        }
    }

    fn rest_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.supabase_url.trim_end_matches('/'),
            self.table
        )
    }
}

impl Backend for SupabaseBackend {
    async fn list_messages(&self) -> Result<Vec<Message>, BackendError> {
        let response = self
            .client
            .get(format!("{}?select=*", self.rest_url()))
            .header("apikey", &self.config.supabase_anon_key)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| BackendError::Transport(format!("{e:?}")))?;

        let body = successful_body(response).await?;
        let messages: Vec<Message> = serde_json::from_str(&body).inspect_err(|e| {
            log::error!("Failed to parse message list: {e}\nResponse body: {body}")
        })?;
        Ok(messages)
    }

    async fn create_message(&self, message: NewMessage) -> Result<Option<Message>, BackendError> {
        let response = self
            .client
            .post(self.rest_url())
            .header("apikey", &self.config.supabase_anon_key)
            .header("Prefer", "return=representation")
            .bearer_auth(&self.access_token)
            .json(&message)
            .send()
            .await
            .map_err(|e| BackendError::Transport(format!("{e:?}")))?;

        let body = successful_body(response).await?;
        // PostgREST answers inserts with an array of the inserted rows
        let stored: Vec<Message> = serde_json::from_str(&body).inspect_err(|e| {
            log::error!("Failed to parse created message: {e}\nResponse body: {body}")
        })?;
        Ok(stored.into_iter().next())
    }

    fn subscribe(&self) -> LocalBoxStream<'static, Result<Message, BackendError>> {
        let config = self.config.clone();
        let access_token = self.access_token.clone();
        let table = self.table.clone();

        futures::stream::once(async move {
            realtime::RealtimeChannel::join(&config, &access_token, &table).await
        })
        .flat_map(|joined| match joined {
            Ok(channel) => channel.into_stream().left_stream(),
            Err(e) => futures::stream::iter([Err(e)]).right_stream(),
        })
        .boxed_local()
    }
}

async fn successful_body(response: reqwest::Response) -> Result<String, BackendError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| BackendError::Transport(format!("{e:?}")))?;

    if !status.is_success() {
        return Err(BackendError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}
