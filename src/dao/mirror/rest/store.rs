use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method};
use serde::Serialize;

use crate::dao::{
    mirror::SessionMirror,
    models::{ChatEntity, PlayerEntity, SessionEntity, VoteEntity},
    storage::StorageResult,
};

use super::{
    config::RestMirrorConfig,
    error::{RestMirrorError, RestResult},
};

const SESSIONS: &str = "game_sessions";
const PLAYERS: &str = "players";
const VOTES: &str = "votes";
const CHAT_MESSAGES: &str = "chat_messages";

/// Mirror writing rows through a PostgREST-style HTTP API.
#[derive(Clone)]
pub struct RestMirror {
    client: Client,
    base_url: Arc<str>,
    api_key: Option<Arc<str>>,
    schema: Option<Arc<str>>,
}

impl RestMirror {
    /// Build the client and check the endpoint answers.
    pub async fn connect(config: RestMirrorConfig) -> RestResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| RestMirrorError::ClientBuilder { source })?;

        let mirror = Self {
            client,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            api_key: config.api_key.map(Arc::from),
            schema: config.schema.map(Arc::from),
        };

        mirror.ping().await?;
        Ok(mirror)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let mut builder = self.client.request(method.clone(), url);
        if let Some(ref key) = self.api_key {
            builder = builder.header("apikey", key.as_ref()).bearer_auth(key.as_ref());
        }
        if let Some(ref schema) = self.schema {
            let header = if method == Method::GET {
                "Accept-Profile"
            } else {
                "Content-Profile"
            };
            builder = builder.header(header, schema.as_ref());
        }
        builder
    }

    async fn ping(&self) -> RestResult<()> {
        let response = self
            .request(Method::GET, "")
            .send()
            .await
            .map_err(|source| RestMirrorError::RequestSend {
                path: "/".to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RestMirrorError::RequestStatus {
                path: "/".to_string(),
                status: response.status(),
            })
        }
    }

    /// Insert `row`, or merge it into the existing row matching `on_conflict`.
    async fn upsert<T>(&self, table: &str, on_conflict: Option<&str>, row: &T) -> RestResult<()>
    where
        T: ?Sized + Serialize,
    {
        let mut builder = self.request(Method::POST, table);
        if let Some(columns) = on_conflict {
            builder = builder
                .query(&[("on_conflict", columns)])
                .header("Prefer", "resolution=merge-duplicates,return=minimal");
        } else {
            builder = builder.header("Prefer", "return=minimal");
        }

        let response = builder
            .json(row)
            .send()
            .await
            .map_err(|source| RestMirrorError::RequestSend {
                path: table.to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RestMirrorError::RequestStatus {
                path: table.to_string(),
                status: response.status(),
            })
        }
    }
}

impl SessionMirror for RestMirror {
    fn upsert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let mirror = self.clone();
        Box::pin(async move {
            mirror
                .upsert(SESSIONS, Some("room_code"), &session)
                .await
                .map_err(Into::into)
        })
    }

    fn upsert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let mirror = self.clone();
        Box::pin(async move {
            mirror
                .upsert(PLAYERS, Some("id"), &player)
                .await
                .map_err(Into::into)
        })
    }

    fn record_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>> {
        let mirror = self.clone();
        Box::pin(async move { mirror.upsert(VOTES, None, &vote).await.map_err(Into::into) })
    }

    fn record_chat(&self, chat: ChatEntity) -> BoxFuture<'static, StorageResult<()>> {
        let mirror = self.clone();
        Box::pin(async move {
            mirror
                .upsert(CHAT_MESSAGES, None, &chat)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let mirror = self.clone();
        Box::pin(async move { mirror.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.health_check()
    }
}
