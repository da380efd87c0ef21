#[cfg(feature = "rest-mirror")]
pub mod rest;

use futures::future::BoxFuture;

use crate::dao::{
    models::{ChatEntity, PlayerEntity, SessionEntity, VoteEntity},
    storage::StorageResult,
};

/// Write-only sink mirroring room state into durable storage.
///
/// Nothing in the game ever reads back from it; the in-memory state stays
/// authoritative whether or not writes succeed.
pub trait SessionMirror: Send + Sync {
    fn upsert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn upsert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn record_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn record_chat(&self, chat: ChatEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
