// Label composition module
// Turns raw events plus static configuration into the ordered label values
// each metric was registered with. Composition never fails; missing inputs
// degrade to placeholders so the label arity stays fixed
//
// Numan Thabit 2025 Nov

use crate::caller::UNKNOWN_CALLER;
use crate::config::{AppConfig, StandardMetrics};
use crate::event::{EventPayload, RawEvent};
use crate::normalize::QueryFingerprint;
use crate::route::{MatchedRoute, UNKNOWN};
use axum::http::StatusCode;

pub const NONE_ERROR: &str = "NONE";
pub const UNKNOWN_ERROR: &str = "Unknown error";

pub const SQL_LABELS: [&str; 2] = ["query", "query_type"];
pub const SQL_CALLER_LABEL: &str = "service_caller";
pub const OUTBOUND_LABELS: [&str; 3] = ["method", "external_endpoint", "status_code"];
pub const RESPONSE_TIME_LABELS: [&str; 3] = ["method", "route", "status_code"];
pub const EXECUTION_LABELS: [&str; 7] = [
    "owner",
    "domain",
    "system",
    "component",
    "operation",
    "error",
    "error_class",
];

/// Which registered metric a label set belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricRole {
    SqlDuration,
    OutboundDuration,
    ResponseTime,
    ExecutionCount,
    ExecutionLatency,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticLabels {
    pub owner: String,
    pub domain: String,
    pub system: String,
}

impl From<&StandardMetrics> for StaticLabels {
    fn from(standard: &StandardMetrics) -> Self {
        Self {
            owner: standard.owner.clone().unwrap_or_default(),
            domain: standard.domain.clone().unwrap_or_default(),
            system: standard.system.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LabelComposer {
    static_labels: StaticLabels,
    collect_full_query: bool,
    collect_caller: bool,
}

impl LabelComposer {
    pub fn new(
        static_labels: StaticLabels,
        collect_full_query: bool,
        collect_caller: bool,
    ) -> Self {
        Self {
            static_labels,
            collect_full_query,
            collect_caller,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            StaticLabels::from(&cfg.standard_metrics),
            cfg.collect_full_sql_query,
            cfg.collect_sql_service_caller,
        )
    }

    pub fn collects_caller(&self) -> bool {
        self.collect_caller
    }

    /// Label names in registration order for `role`.
    pub fn label_names(&self, role: MetricRole) -> Vec<&'static str> {
        match role {
            MetricRole::SqlDuration => {
                let mut names = SQL_LABELS.to_vec();
                if self.collect_caller {
                    names.push(SQL_CALLER_LABEL);
                }
                names
            }
            MetricRole::OutboundDuration => OUTBOUND_LABELS.to_vec(),
            MetricRole::ResponseTime => RESPONSE_TIME_LABELS.to_vec(),
            MetricRole::ExecutionCount | MetricRole::ExecutionLatency => EXECUTION_LABELS.to_vec(),
        }
    }

    /// Every label set an event contributes. A request completion feeds three
    /// metrics from one capture.
    pub fn compose(&self, event: &RawEvent) -> Vec<(MetricRole, Vec<String>)> {
        match &event.payload {
            EventPayload::QueryExecuted { sql, caller } => {
                vec![(MetricRole::SqlDuration, self.query(sql, caller.as_deref()))]
            }
            EventPayload::OutboundCallCompleted {
                method,
                host,
                status,
            } => vec![(
                MetricRole::OutboundDuration,
                Self::outbound(method, host, *status),
            )],
            EventPayload::RequestCompleted {
                method,
                route,
                status,
            } => {
                let execution = self.execution(route, *status);
                vec![
                    (
                        MetricRole::ResponseTime,
                        Self::response_time(method, route, *status),
                    ),
                    (MetricRole::ExecutionCount, execution.clone()),
                    (MetricRole::ExecutionLatency, execution),
                ]
            }
        }
    }

    pub fn query(&self, sql: &str, caller: Option<&str>) -> Vec<String> {
        let fp = QueryFingerprint::from_sql(sql, self.collect_full_query);
        let mut labels = vec![fp.query, fp.query_type];
        if self.collect_caller {
            labels.push(caller.unwrap_or(UNKNOWN_CALLER).to_string());
        }
        labels
    }

    pub fn outbound(method: &str, host: &str, status: u16) -> Vec<String> {
        vec![method_label(method), or_unknown(host), status.to_string()]
    }

    pub fn response_time(method: &str, route: &MatchedRoute, status: u16) -> Vec<String> {
        vec![
            method_label(method),
            or_unknown(&route.uri_pattern),
            status.to_string(),
        ]
    }

    pub fn execution(&self, route: &MatchedRoute, status: u16) -> Vec<String> {
        let (error, error_class) = error_labels(status);
        vec![
            self.static_labels.owner.clone(),
            self.static_labels.domain.clone(),
            self.static_labels.system.clone(),
            or_unknown(&route.controller),
            or_unknown(&route.operation),
            error,
            error_class,
        ]
    }
}

/// `(error, error_class)`: `NONE` for anything below 400, otherwise the
/// reason phrase and the numeric status.
pub fn error_labels(status: u16) -> (String, String) {
    if !(400..600).contains(&status) {
        return (NONE_ERROR.to_string(), NONE_ERROR.to_string());
    }
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or(UNKNOWN_ERROR);
    (reason.to_string(), status.to_string())
}

fn method_label(method: &str) -> String {
    let method = method.trim();
    if method.is_empty() {
        UNKNOWN.to_string()
    } else {
        method.to_ascii_uppercase()
    }
}

fn or_unknown(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        UNKNOWN.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::OMITTED_FINGERPRINT;
    use std::time::Duration;

    fn composer() -> LabelComposer {
        LabelComposer::new(
            StaticLabels {
                owner: "team-a".into(),
                domain: "shop".into(),
                system: "api".into(),
            },
            true,
            false,
        )
    }

    fn request(status: u16, route: MatchedRoute) -> RawEvent {
        RawEvent::new(
            Duration::from_millis(12),
            EventPayload::RequestCompleted {
                method: "get".into(),
                route,
                status,
            },
        )
    }

    #[test]
    fn unmatched_404_degrades_to_unknown() {
        let composer = LabelComposer::default();
        let labels = composer.execution(&MatchedRoute::unmatched(), 404);
        assert_eq!(
            labels,
            vec!["", "", "", "unknown", "unknown", "Not Found", "404"]
        );
    }

    #[test]
    fn success_has_no_error_labels() {
        let route = MatchedRoute::new("/users/:id", "UserController@show");
        let labels = composer().execution(&route, 200);
        assert_eq!(
            labels,
            vec!["team-a", "shop", "api", "UserController", "show", "NONE", "NONE"]
        );
    }

    #[test]
    fn server_errors_and_unmapped_codes() {
        assert_eq!(
            error_labels(503),
            ("Service Unavailable".to_string(), "503".to_string())
        );
        assert_eq!(error_labels(599), (UNKNOWN_ERROR.to_string(), "599".to_string()));
        assert_eq!(error_labels(302), (NONE_ERROR.to_string(), NONE_ERROR.to_string()));
    }

    #[test]
    fn request_event_feeds_three_metrics() {
        let route = MatchedRoute::new("/users/:id", "UserController@show");
        let composed = composer().compose(&request(201, route));
        let roles: Vec<MetricRole> = composed.iter().map(|(r, _)| *r).collect();
        assert_eq!(
            roles,
            vec![
                MetricRole::ResponseTime,
                MetricRole::ExecutionCount,
                MetricRole::ExecutionLatency
            ]
        );
        assert_eq!(composed[0].1, vec!["GET", "/users/:id", "201"]);
    }

    #[test]
    fn query_labels_follow_collection_flags() {
        let full = composer().query("SELECT * FROM t WHERE id = 5", None);
        assert_eq!(full, vec!["select * from t where id = ?", "SELECT"]);

        let omitted = LabelComposer::new(StaticLabels::default(), false, true)
            .query("update t set a = 1", None);
        assert_eq!(omitted, vec![OMITTED_FINGERPRINT, "UPDATE", UNKNOWN_CALLER]);
    }

    #[test]
    fn outbound_placeholders() {
        assert_eq!(
            LabelComposer::outbound("post", "", 502),
            vec!["POST", "unknown", "502"]
        );
    }

    #[test]
    fn arity_matches_registration_for_every_variant() {
        for caller in [false, true] {
            let composer = LabelComposer::new(StaticLabels::default(), true, caller);
            let events = vec![
                RawEvent::new(
                    Duration::ZERO,
                    EventPayload::QueryExecuted {
                        sql: String::new(),
                        caller: None,
                    },
                ),
                RawEvent::new(
                    Duration::ZERO,
                    EventPayload::QueryExecuted {
                        sql: "SELECT 1".into(),
                        caller: Some("svc::Users::find".into()),
                    },
                ),
                RawEvent::new(
                    Duration::ZERO,
                    EventPayload::OutboundCallCompleted {
                        method: String::new(),
                        host: String::new(),
                        status: 0,
                    },
                ),
                request(500, MatchedRoute::unmatched()),
                request(200, MatchedRoute::new("/", "")),
            ];
            for event in &events {
                for (role, labels) in composer.compose(event) {
                    assert_eq!(
                        labels.len(),
                        composer.label_names(role).len(),
                        "{role:?} for {event:?}"
                    );
                }
            }
        }
    }
}
