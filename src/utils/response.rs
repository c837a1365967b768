//! Response building shared by the dispatcher and the control endpoints.

use http::{header, HeaderValue, Response, StatusCode};
use serde::Serialize;

/// Standard content types
pub mod content_type {
    pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
    pub const APPLICATION_JSON: &str = "application/json";
}

pub struct ResponseBuilder;

impl ResponseBuilder {
    pub fn success_http(body: Vec<u8>, content_type: Option<&str>) -> Response<Vec<u8>> {
        let mut builder = Response::builder().status(StatusCode::OK);

        if let Some(ct) = content_type {
            match HeaderValue::from_str(ct) {
                Ok(header_value) => {
                    builder = builder.header(header::CONTENT_TYPE, header_value);
                }
                Err(e) => {
                    log::error!("Invalid content type '{ct}': {e}");
                }
            }
        }

        builder.body(body).unwrap_or_else(|e| {
            log::error!("Failed to build success response: {e}");
            Self::error_http(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        })
    }

    /// Plain text error, the message followed by a newline.
    pub fn error_http(status: StatusCode, message: &str) -> Response<Vec<u8>> {
        let mut body = message.as_bytes().to_vec();
        body.push(b'\n');

        let mut response = Response::new(body);
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(content_type::TEXT_PLAIN),
        );
        response
            .headers_mut()
            .insert("x-content-type-options", HeaderValue::from_static("nosniff"));
        response
    }

    pub fn json<T: Serialize>(status: StatusCode, data: &T) -> Response<Vec<u8>> {
        match serde_json::to_vec(data) {
            Ok(json_body) => {
                let mut response =
                    Self::success_http(json_body, Some(content_type::APPLICATION_JSON));
                *response.status_mut() = status;
                response
            }
            Err(e) => {
                log::error!("Failed to serialize JSON response: {e}");
                Self::error_http(StatusCode::INTERNAL_SERVER_ERROR, "JSON serialization failed")
            }
        }
    }

    /// 307 Temporary Redirect to `location`.
    pub fn redirect(location: &str) -> Response<Vec<u8>> {
        match HeaderValue::from_str(location) {
            Ok(value) => {
                let mut response = Response::new(Vec::new());
                *response.status_mut() = StatusCode::TEMPORARY_REDIRECT;
                response.headers_mut().insert(header::LOCATION, value);
                response
            }
            Err(e) => {
                log::error!("Invalid redirect location '{location}': {e}");
                Self::error_http(StatusCode::INTERNAL_SERVER_ERROR, "invalid redirect")
            }
        }
    }
}
