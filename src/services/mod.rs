/// Reset and other secret-guarded operations.
pub mod admin_service;
/// Fan-out of server events to live connections.
pub mod broadcast;
/// Cell writes and snapshot delivery.
pub mod canvas_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Presence registration, disconnect and idle sweeping.
pub mod presence_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
