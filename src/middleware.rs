// Request tracking middleware
// Opens a request ticket on arrival and closes it once the response body
// has been fully sent or dropped, then drains the buffer on the blocking
// pool so the client never waits on the sink
//
// Numan Thabit 2025 Nov

use crate::pipeline::{Instrumentation, RequestTicket};
use axum::{
    body::{Body, Bytes},
    extract::{MatchedPath, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use http_body::{Frame, SizeHint};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;

/// Use with `axum::middleware::from_fn_with_state`. Handlers can pull the
/// request's [`crate::route::RequestRoute`] out of extensions and share the
/// memoized route lookup with the metrics side.
pub async fn track_requests(
    State(instrumentation): State<Arc<Instrumentation>>,
    mut request: Request,
    next: Next,
) -> Response {
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string());
    let mut ticket = instrumentation.on_start(
        request.method().clone(),
        request.uri().path(),
        matched_path.as_deref(),
    );
    request.extensions_mut().insert(ticket.route().clone());

    let response = next.run(request).await;
    ticket.mark_responded();

    let guard = SafePointGuard {
        instrumentation,
        ticket: Some(ticket),
        status: response.status(),
    };
    response.map(|inner| {
        Body::new(SafePointBody {
            inner,
            _guard: guard,
        })
    })
}

/// Fires the safe point exactly once, when dropped.
struct SafePointGuard {
    instrumentation: Arc<Instrumentation>,
    ticket: Option<RequestTicket>,
    status: StatusCode,
}

impl Drop for SafePointGuard {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };
        self.instrumentation.complete(ticket, self.status);

        let instrumentation = self.instrumentation.clone();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || instrumentation.flush());
            }
            Err(_) => {
                instrumentation.flush();
            }
        }
    }
}

/// Response body wrapper; only exists to tie the guard's drop to the end of
/// the response.
struct SafePointBody {
    inner: Body,
    _guard: SafePointGuard,
}

impl http_body::Body for SafePointBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::route::RouteTable;
    use crate::sink::PrometheusSink;
    use axum::http::Method;

    #[test]
    fn guard_outside_runtime_flushes_inline() {
        let sink = PrometheusSink::new("app");
        let instrumentation = Arc::new(
            Instrumentation::new(&AppConfig::default(), &sink, RouteTable::new()).unwrap(),
        );
        let ticket = instrumentation.on_start(Method::GET, "/", None);
        drop(SafePointGuard {
            instrumentation: instrumentation.clone(),
            ticket: Some(ticket),
            status: StatusCode::NO_CONTENT,
        });
        assert!(instrumentation.buffer().is_empty());
        assert!(sink
            .render()
            .unwrap()
            .contains(r#"app_response_time_seconds_count{method="GET",route="unknown",status_code="204"} 1"#));
    }
}
