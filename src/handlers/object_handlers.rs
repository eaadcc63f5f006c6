//! HTTP handler that turns every non-reserved request into a gated object
//! read. The body is streamed from the store without buffering.

use crate::{errors::AppError, models::object::StoredObject, routes::routes::AppState};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::Response,
};

/// Any method on any path: authorize, look up, stream.
pub async fn serve_object(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let object = state.gateway.open(uri.path(), &headers).await?;
    Ok(object_response(object, method == Method::HEAD))
}

/// 200 with the object's metadata headers; HEAD drops the payload stream.
fn object_response(object: StoredObject, head_only: bool) -> Response {
    let body = if head_only {
        Body::empty()
    } else {
        Body::from_stream(object.body)
    };

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    object.metadata.write_http_metadata(response.headers_mut());
    response
}
