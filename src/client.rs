// Outbound HTTP instrumentation
// Thin wrapper around reqwest that times each completed call and buffers one
// observation with method, target host and status code
//
// Numan Thabit 2025 Nov

use crate::pipeline::Instrumentation;
use crate::route::UNKNOWN;
use reqwest::{IntoUrl, Method, Request, RequestBuilder, Response};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use url::Url;

#[derive(Clone)]
pub struct InstrumentedClient {
    http: reqwest::Client,
    instrumentation: Arc<Instrumentation>,
}

impl InstrumentedClient {
    pub fn new(http: reqwest::Client, instrumentation: Arc<Instrumentation>) -> Self {
        Self {
            http,
            instrumentation,
        }
    }

    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.http.request(method, url)
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.http.get(url)
    }

    pub async fn send(&self, builder: RequestBuilder) -> reqwest::Result<Response> {
        self.execute(builder.build()?).await
    }

    /// Only calls that produced a response are recorded; transport errors
    /// carry no status code and are returned untouched.
    pub async fn execute(&self, request: Request) -> reqwest::Result<Response> {
        let method = request.method().to_string();
        let host = host_label(request.url());
        let started = Instant::now();

        let response = match self.http.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                debug!(host = %host, error = %err, "outbound call failed before a response");
                return Err(err);
            }
        };
        self.instrumentation.record_outbound(
            &method,
            &host,
            response.status().as_u16(),
            started.elapsed(),
        );
        Ok(response)
    }
}

/// Host part of the target URL; the path would blow up cardinality.
pub fn host_label(url: &Url) -> String {
    url.host_str()
        .filter(|h| !h.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}
