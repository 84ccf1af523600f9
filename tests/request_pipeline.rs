use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use deferred_prom::buffer::BufferState;
use deferred_prom::config::{AppConfig, StandardMetrics};
use deferred_prom::pipeline::Instrumentation;
use deferred_prom::server::{
    create_app, demo_routes, ServerState, HEALTH_PATH, TEXT_FORMAT, USER_PATH,
};
use deferred_prom::sink::PrometheusSink;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct Harness {
    app: Router,
    sink: Arc<PrometheusSink>,
    instrumentation: Arc<Instrumentation>,
}

fn harness(cfg: AppConfig) -> Harness {
    let sink = Arc::new(PrometheusSink::new(cfg.namespace.clone()));
    let instrumentation = Arc::new(
        Instrumentation::new(&cfg, sink.as_ref(), demo_routes()).expect("instrumentation"),
    );
    let app = create_app(
        ServerState {
            instrumentation: instrumentation.clone(),
            sink: sink.clone(),
        },
        &cfg,
    );
    Harness {
        app,
        sink,
        instrumentation,
    }
}

impl Harness {
    async fn get(&self, uri: &str) -> (StatusCode, String) {
        let response = self
            .app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    /// The safe point runs on the blocking pool once the body is gone.
    async fn settle(&self) {
        for _ in 0..400 {
            if self.instrumentation.buffer().state() == BufferState::Empty {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("buffer never drained");
    }
}

fn with_full_queries() -> AppConfig {
    AppConfig {
        collect_full_sql_query: true,
        standard_metrics: StandardMetrics {
            owner: Some("platform".into()),
            domain: Some("accounts".into()),
            system: Some("users-api".into()),
        },
        ..AppConfig::default()
    }
}

#[tokio::test]
async fn matched_request_records_route_execution_and_query() {
    let h = harness(with_full_queries());
    let (status, body) = h.get("/users/42").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(r#""route":"/users/:id""#));
    h.settle().await;

    let text = h.sink.render().unwrap();
    assert!(text.contains(
        r#"app_response_time_seconds_count{method="GET",route="/users/:id",status_code="200"} 1"#
    ));
    assert!(text.contains(
        r#"execution_count{component="UserController",domain="accounts",error="NONE",error_class="NONE",operation="show",owner="platform",system="users-api"} 1"#
    ));
    assert!(text.contains(r#"execution_latency_seconds_bucket{component="UserController""#));
    assert!(text.contains(
        r#"app_sql_query_duration_seconds_count{query="select * from users where id = ?",query_type="SELECT"} 1"#
    ));
    assert!(!text.contains("id = 42"));
}

#[tokio::test]
async fn unrouted_request_is_attributed_to_unknown() {
    let h = harness(AppConfig::default());
    let (status, _) = h.get("/no/such/page").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    h.settle().await;

    let text = h.sink.render().unwrap();
    assert!(text.contains(
        r#"app_response_time_seconds_count{method="GET",route="unknown",status_code="404"} 1"#
    ));
    assert!(text.contains(
        r#"execution_count{component="unknown",domain="",error="Not Found",error_class="404",operation="unknown",owner="",system=""} 1"#
    ));
}

#[tokio::test]
async fn repeated_requests_share_one_label_set() {
    let h = harness(with_full_queries());
    for id in [1, 2, 3] {
        h.get(&format!("/users/{id}")).await;
    }
    h.settle().await;

    let text = h.sink.render().unwrap();
    assert!(text.contains(
        r#"app_sql_query_duration_seconds_count{query="select * from users where id = ?",query_type="SELECT"} 3"#
    ));
    assert!(text.contains(
        r#"app_response_time_seconds_count{method="GET",route="/users/:id",status_code="200"} 3"#
    ));
}

#[tokio::test]
async fn exposition_route_serves_text_format_and_is_not_tracked() {
    let h = harness(AppConfig::default());
    h.get("/health").await;
    h.settle().await;

    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        TEXT_FORMAT
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains(r#"route="/health""#));
    assert!(text.contains("deferred_prom_delivered_observations_total"));
    h.settle().await;
    assert!(!h.sink.render().unwrap().contains(r#"route="/metrics""#));
}

#[tokio::test]
async fn exposition_route_can_be_disabled_or_moved() {
    let h = harness(AppConfig {
        metrics_route_enabled: false,
        ..AppConfig::default()
    });
    assert_eq!(h.get("/metrics").await.0, StatusCode::NOT_FOUND);

    let moved = harness(AppConfig {
        metrics_route_path: "internal/prom".into(),
        ..AppConfig::default()
    });
    assert_eq!(moved.get("/internal/prom").await.0, StatusCode::OK);
}

#[tokio::test]
async fn every_demo_route_is_served_and_attributed() {
    let h = harness(AppConfig::default());
    for (uri, pattern, component) in [
        ("/health", HEALTH_PATH, "HealthController"),
        ("/users/5", USER_PATH, "UserController"),
    ] {
        assert_eq!(h.get(uri).await.0, StatusCode::OK, "{uri}");
        h.settle().await;
        let text = h.sink.render().unwrap();
        assert!(
            text.contains(&format!(
                r#"app_response_time_seconds_count{{method="GET",route="{pattern}",status_code="200"}} 1"#
            )),
            "{uri}"
        );
        assert!(text.contains(&format!(r#"component="{component}""#)), "{uri}");
    }
}
