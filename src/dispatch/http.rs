use async_trait::async_trait;
use http::{Response, StatusCode};
use pingora::{apps::http_app::ServeHttp, protocols::http::ServerSession};

use super::{ClientRequest, Dispatcher};
use crate::{
    api::TlsState,
    metrics::REQUESTS,
    utils::{request::get_request_host, response::ResponseBuilder},
};

/// Largest client body accepted by default.
pub const DEFAULT_MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// Public listener application: turns pingora sessions into dispatcher calls.
pub struct DispatchHttpApp {
    dispatcher: Dispatcher,
    max_body_bytes: usize,
}

impl DispatchHttpApp {
    pub fn new(dispatcher: Dispatcher, max_body_bytes: usize) -> Self {
        Self {
            dispatcher,
            max_body_bytes,
        }
    }

    async fn serve(&self, session: &mut ServerSession) -> Response<Vec<u8>> {
        let mut req = client_request(session);

        let routed = match self.dispatcher.route(&req).await {
            Ok(routed) => routed,
            Err(resp) => return resp,
        };

        match read_body(session, self.max_body_bytes).await {
            Ok(body) => req.body = body,
            Err(resp) => return resp,
        }

        self.dispatcher.forward(routed, req).await
    }
}

#[async_trait]
impl ServeHttp for DispatchHttpApp {
    async fn response(&self, http_session: &mut ServerSession) -> Response<Vec<u8>> {
        let resp = self.serve(http_session).await;
        REQUESTS
            .with_label_values(&[resp.status().as_str()])
            .inc();
        resp
    }
}

fn client_request(session: &ServerSession) -> ClientRequest {
    let header = session.req_header();
    let mut req = ClientRequest::new(
        header.method.clone(),
        header.uri.clone(),
        header.headers.clone(),
    );
    req.version = header.version;
    req.remote_addr = session
        .client_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();

    let ssl = session
        .digest()
        .and_then(|digest| digest.ssl_digest.as_ref());
    if let Some(ssl) = ssl {
        req.tls = Some(TlsState {
            version: ssl.version.to_string(),
            cipher_suite: ssl.cipher.to_string(),
            server_name: get_request_host(&req.uri, &req.headers)
                .unwrap_or_default()
                .to_string(),
        });
    }
    req
}

async fn read_body(
    session: &mut ServerSession,
    max_body_bytes: usize,
) -> Result<Vec<u8>, Response<Vec<u8>>> {
    let mut body = Vec::new();
    loop {
        match session.read_request_body().await {
            Ok(Some(chunk)) => {
                if !append_limited(&mut body, &chunk, max_body_bytes) {
                    return Err(ResponseBuilder::error_http(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        "request body too large",
                    ));
                }
            }
            Ok(None) => return Ok(body),
            Err(e) => {
                log::warn!("failed to read request body: {e}");
                return Err(ResponseBuilder::error_http(
                    StatusCode::BAD_REQUEST,
                    "unable to read request body",
                ));
            }
        }
    }
}

/// Appends `chunk` unless the body would grow past `max` bytes.
fn append_limited(body: &mut Vec<u8>, chunk: &[u8], max: usize) -> bool {
    if body.len() + chunk.len() > max {
        return false;
    }
    body.extend_from_slice(chunk);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_limited() {
        let mut body = Vec::new();
        assert!(append_limited(&mut body, b"hello", 8));
        assert!(append_limited(&mut body, b"!!!", 8));
        assert!(!append_limited(&mut body, b"x", 8));
        assert_eq!(body, b"hello!!!");
    }
}
