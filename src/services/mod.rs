/// Connection lifecycle, room membership and fan-out.
pub mod connection_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Session phases, timers, answers and votes.
pub mod game_service;
/// Health check service.
pub mod health_service;
/// Liveness probes and stale connection eviction.
pub mod heartbeat;
/// Best-effort writes to the session mirror.
pub mod mirror_service;
/// Inbound envelope validation and routing.
pub mod protocol_service;
/// Room code allocation and read-only room views.
pub mod room_service;
/// Session mirror reconnect loop driving degraded mode.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
