use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the pixel canvas backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::websocket::ws_handler,
        crate::routes::admin::reset_pixels,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::admin::ResetPixelsRequest,
            crate::dto::admin::ResetPixelsResponse,
            crate::dto::ws::RegisterUserRequest,
            crate::dto::ws::PixelUpdateRequest,
            crate::dto::ws::PixelDto,
            crate::dto::ws::UserDto,
            crate::dto::ws::PixelUpdateErrorDto,
            crate::dto::ws::ErrorDto,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "realtime", description = "WebSocket canvas session"),
        (name = "admin", description = "Administrative operations guarded by the admin secret"),
    )
)]
pub struct ApiDoc;
