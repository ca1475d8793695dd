/// Room engine owning all rooms and connections.
pub mod dispatcher;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Room creation, lookup and export over HTTP.
pub mod room_service;
/// WebSocket connection handling service.
pub mod websocket_service;
