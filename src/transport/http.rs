//! JSON over HTTP implementation of the remote-call seam.
//!
//! Unary calls are `POST http://<address>/rpc/<method>` with a JSON body.
//! A non-2xx answer carrying a JSON [`Status`] becomes
//! [`RemoteError::Status`]; anything else is a transport failure. The
//! bundle subscription is `GET /rpc/bundles`, answered with a streaming
//! newline-delimited JSON body.

use std::{fmt, pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{de::DeserializeOwned, de::IgnoredAny, Serialize};

use crate::api::{
    HttpRequest, HttpResponse, RequestAuthReq, RequestAuthResp, ServiceBundle, ServiceConfig,
    Status,
};

use super::{BundleStream, Connector, RemoteError, ServiceClient};

const METHOD_UPDATE_SERVICE_CONFIG: &str = "update-service-config";
const METHOD_SERVE_HTTP: &str = "serve-http";
const METHOD_REQUEST_AUTH: &str = "request-auth";
const METHOD_BUNDLES: &str = "bundles";

/// Dials services over HTTP, sharing one connection pool.
#[derive(Clone)]
pub struct HttpConnector {
    client: Client,
    timeout: Duration,
}

impl HttpConnector {
    pub fn new(timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(transport)?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn dial(&self, address: &str) -> Result<Arc<dyn ServiceClient>, RemoteError> {
        if address.is_empty() {
            return Err(RemoteError::Transport("empty service address".to_string()));
        }
        Ok(Arc::new(HttpServiceClient {
            client: self.client.clone(),
            base: base_url(address),
            timeout: self.timeout,
        }))
    }
}

/// Client for one service address.
pub struct HttpServiceClient {
    client: Client,
    base: String,
    timeout: Duration,
}

impl HttpServiceClient {
    fn rpc_url(&self, method: &str) -> String {
        format!("{}/rpc/{method}", self.base)
    }

    async fn call<Req, Resp>(&self, method: &str, req: &Req) -> Result<Resp, RemoteError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let resp = self
            .client
            .post(self.rpc_url(method))
            .timeout(self.timeout)
            .json(req)
            .send()
            .await
            .map_err(transport)?;

        if resp.status().is_success() {
            return resp.json::<Resp>().await.map_err(transport);
        }

        let code = resp.status();
        let body = resp.bytes().await.map_err(transport)?;
        Err(status_from_body(code, &body))
    }
}

#[async_trait]
impl ServiceClient for HttpServiceClient {
    async fn update_service_config(&self, config: ServiceConfig) -> Result<(), RemoteError> {
        self.call::<_, IgnoredAny>(METHOD_UPDATE_SERVICE_CONFIG, &config)
            .await
            .map(|_| ())
    }

    async fn serve_http(&self, req: HttpRequest) -> Result<HttpResponse, RemoteError> {
        self.call(METHOD_SERVE_HTTP, &req).await
    }

    async fn request_auth(&self, req: RequestAuthReq) -> Result<RequestAuthResp, RemoteError> {
        self.call(METHOD_REQUEST_AUTH, &req).await
    }

    async fn subscribe_bundles(&self) -> Result<BundleStream, RemoteError> {
        let resp = self
            .client
            .get(self.rpc_url(METHOD_BUNDLES))
            .send()
            .await
            .map_err(transport)?;

        if !resp.status().is_success() {
            let code = resp.status();
            let body = resp.bytes().await.map_err(transport)?;
            return Err(status_from_body(code, &body));
        }

        Ok(decode_bundle_lines(resp.bytes_stream()))
    }
}

pub(crate) fn base_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", address.trim_end_matches('/'))
    }
}

fn transport<E: fmt::Display>(err: E) -> RemoteError {
    RemoteError::Transport(err.to_string())
}

fn status_from_body(code: reqwest::StatusCode, body: &[u8]) -> RemoteError {
    match serde_json::from_slice::<Status>(body) {
        Ok(status) => RemoteError::Status(status),
        Err(_) => RemoteError::Transport(format!(
            "unexpected status {code}: {}",
            String::from_utf8_lossy(body)
        )),
    }
}

type ByteStream<E> = Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>;

/// Splits a chunked body into one [`ServiceBundle`] per line.
///
/// The stream ends after the body ends or after the first read error.
pub(crate) fn decode_bundle_lines<S, E>(body: S) -> BundleStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let body: ByteStream<E> = Box::pin(body);
    futures::stream::unfold(
        (body, BytesMut::new(), false),
        |(mut body, mut buf, mut done)| async move {
            loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line = buf.split_to(pos + 1);
                    let line = &line[..pos];
                    if is_blank(line) {
                        continue;
                    }
                    return Some((parse_bundle(line), (body, buf, done)));
                }

                if done {
                    if is_blank(&buf) {
                        return None;
                    }
                    let rest = buf.split();
                    return Some((parse_bundle(&rest), (body, buf, done)));
                }

                match body.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        buf.clear();
                        done = true;
                        return Some((Err(transport(e)), (body, buf, done)));
                    }
                    None => done = true,
                }
            }
        },
    )
    .boxed()
}

fn is_blank(data: &[u8]) -> bool {
    data.iter().all(|b| b.is_ascii_whitespace())
}

fn parse_bundle(line: &[u8]) -> Result<ServiceBundle, RemoteError> {
    serde_json::from_slice(line).map_err(|e| RemoteError::Transport(format!("invalid bundle: {e}")))
}
