/// Best-effort durable mirror of room state.
pub mod mirror;
/// Rows written to the mirror.
pub mod models;
/// Storage error types shared by mirror backends.
pub mod storage;
