//! HTTP surface of the gateway.
//!
//! Every path that is not a control-plane route is proxied to the
//! origin, so the control routes shadow same-named origin paths by
//! design. The proxy entry runs the full mitigation pipeline per
//! request: resolve the source, check the ban table, extract features,
//! evaluate the detector, then forward or reject.

use std::time::Instant;

use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use log::warn;
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::core::{
    BackendStatus, Detector, FeatureTracker, MitigationEngine, OriginClient, ReputationStore,
    TrafficMetrics,
};
use crate::models::Config;

/// Hop-by-hop headers never forwarded to the origin
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Shared application state wired into every handler
pub struct AppState {
    pub tracker: FeatureTracker,
    pub detector: Detector,
    pub mitigation: MitigationEngine,
    pub metrics: TrafficMetrics,
    pub origin: OriginClient,
    pub started_at: Instant,
}

impl AppState {
    pub fn from_config(config: &Config) -> Self {
        let reputation = ReputationStore::load(&config.reputation);

        Self {
            tracker: FeatureTracker::new(config.tracker.max_sources),
            detector: Detector::new(),
            mitigation: MitigationEngine::new(reputation, config.mitigation.max_signatures),
            metrics: TrafficMetrics::new(),
            origin: OriginClient::new(&config.origin),
            started_at: Instant::now(),
        }
    }
}

/// Route configuration for Actix-web
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/block_ip").route(web::post().to(block_ip)))
        .service(web::resource("/unblock_ip").route(web::post().to(unblock_ip)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/metrics").route(web::get().to(metrics_snapshot)))
        .service(web::resource("/signatures").route(web::get().to(signatures)))
        .service(web::resource("/banned").route(web::get().to(banned)))
        .service(web::resource("/reputation").route(web::get().to(reputation)))
        .default_service(web::route().to(proxy));
}

/// Manual block/unblock command body
#[derive(Debug, Serialize, Deserialize)]
pub struct IpCommand {
    pub ip: Option<String>,
}

/// Manual command acknowledgement
#[derive(Debug, Serialize, Deserialize)]
struct CommandResponse {
    status: String,
    ip: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
    current_rps: f64,
    blocked_ips: usize,
    backend: BackendStatus,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignaturesResponse {
    rules: Vec<crate::core::Signature>,
}

/// Resolve the client identity for a request.
///
/// The forwarded-for header wins over the transport peer when present,
/// first hop of a comma-separated chain. The header is client-supplied
/// and spoofable; this mirrors the trust the deployment places in its
/// fronting proxy and is not a security boundary.
fn resolve_source(req: &HttpRequest) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwardable_headers(src: &actix_web::http::header::HeaderMap) -> reqwest::header::HeaderMap {
    let mut out = reqwest::header::HeaderMap::new();
    for (name, value) in src.iter() {
        let lowered = name.as_str().to_ascii_lowercase();
        if lowered == "host" || HOP_BY_HOP_HEADERS.contains(&lowered.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(name, value);
        }
    }
    out
}

/// Main proxy entry: mitigation pipeline, then pass-through
async fn proxy(req: HttpRequest, body: web::Bytes, state: web::Data<AppState>) -> HttpResponse {
    let source = resolve_source(&req);

    // Active ban: reject without another detector cycle, but keep the
    // signature tracking the source's evolving behavior.
    if state.mitigation.is_banned(&source) {
        let features = state.tracker.compute_features(&source);
        state.mitigation.record_banned_hit(&source, &features);
        state.metrics.record(0.0, true);
        counter!("gateway_blocked_total", 1);

        let offenses = state.mitigation.offense_count(&source);
        let reason = if offenses > 0 {
            format!("Blocked (offense #{offenses})")
        } else {
            "Blocked".to_string()
        };
        return HttpResponse::Forbidden().body(reason);
    }

    state.tracker.record(&source, req.path(), 200);
    let features = state.tracker.compute_features(&source);
    let verdict = state.detector.evaluate(&features);

    // Rule-level suspicion evolves the signature even before a ban.
    if verdict.via_rule {
        state.mitigation.note_suspicion(&source, &features);
    }

    state.metrics.record(features.rps, verdict.is_attack);

    if verdict.is_attack {
        let offenses = state.mitigation.register_offense(&source, &features).await;
        counter!("gateway_blocked_total", 1);
        return HttpResponse::Forbidden().body(format!("Blocked (offense #{offenses})"));
    }

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let headers = forwardable_headers(req.headers());

    match state
        .origin
        .forward(method, path_and_query, headers, body.to_vec())
        .await
    {
        Ok(origin) => {
            if origin.status >= 400 {
                state.tracker.note_error(&source);
            }
            let status = StatusCode::from_u16(origin.status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            HttpResponse::build(status).body(origin.body)
        }
        Err(e) => {
            warn!("forward to origin failed for {}: {}", source, e);
            HttpResponse::InternalServerError().body(format!("Backend error: {e}"))
        }
    }
}

/// Set an indefinite manual ban
async fn block_ip(command: web::Json<IpCommand>, state: web::Data<AppState>) -> impl Responder {
    let ip = match command.into_inner().ip {
        Some(ip) if !ip.is_empty() => ip,
        _ => {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: "ip required".to_string(),
            })
        }
    };

    state.mitigation.manual_block(&ip);
    HttpResponse::Ok().json(CommandResponse {
        status: "blocked".to_string(),
        ip,
    })
}

/// Clear the ban and offense history for a source
async fn unblock_ip(command: web::Json<IpCommand>, state: web::Data<AppState>) -> impl Responder {
    let ip = match command.into_inner().ip {
        Some(ip) if !ip.is_empty() => ip,
        _ => {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: "ip required".to_string(),
            })
        }
    };

    state.mitigation.manual_unblock(&ip).await;
    HttpResponse::Ok().json(CommandResponse {
        status: "unblocked".to_string(),
        ip,
    })
}

/// Gateway liveness plus a live origin probe
async fn health(state: web::Data<AppState>) -> impl Responder {
    let snapshot = state.metrics.snapshot();
    let backend = state.origin.probe().await;

    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        current_rps: snapshot.rps,
        blocked_ips: state.mitigation.banned_count(),
        backend,
    })
}

/// Windowed traffic snapshot
async fn metrics_snapshot(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.metrics.snapshot())
}

/// Attack signature log
async fn signatures(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(SignaturesResponse {
        rules: state.mitigation.signatures_snapshot(),
    })
}

/// Raw ban table dump for operational inspection
async fn banned(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.mitigation.banned_snapshot())
}

/// Raw reputation ledger dump for operational inspection
async fn reputation(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.mitigation.reputation_snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OriginConfig, ReputationConfig};
    use actix_web::{test, App};

    fn test_state() -> web::Data<AppState> {
        let reputation_path = std::env::temp_dir()
            .join(format!("gateway-test-{}.json", uuid::Uuid::new_v4()));
        let config = Config {
            origin: OriginConfig {
                // nothing listens on the discard port
                url: "http://127.0.0.1:9".to_string(),
                forward_timeout_secs: 1,
                probe_timeout_secs: 1,
            },
            reputation: ReputationConfig {
                path: reputation_path.to_string_lossy().into_owned(),
                write_timeout_secs: 1,
            },
            ..Config::default()
        };
        web::Data::new(AppState::from_config(&config))
    }

    #[actix_web::test]
    async fn test_health_reports_backend_down_without_origin() {
        let state = test_state();
        let app = test::init_service(App::new().app_data(state).configure(config)).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: HealthResponse = test::read_body_json(resp).await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.backend, BackendStatus::Down);
        assert_eq!(body.blocked_ips, 0);
    }

    #[actix_web::test]
    async fn test_block_command_requires_ip() {
        let state = test_state();
        let app = test::init_service(App::new().app_data(state).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/block_ip")
            .set_json(serde_json::json!({}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_manual_block_then_unblock_cycle() {
        let state = test_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        // block the source
        let req = test::TestRequest::post()
            .uri("/block_ip")
            .set_json(serde_json::json!({"ip": "10.0.0.5"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body: CommandResponse = test::read_body_json(resp).await;
        assert_eq!(body.status, "blocked");

        // its requests are rejected regardless of feature values
        let req = test::TestRequest::get()
            .uri("/anything")
            .insert_header(("X-Forwarded-For", "10.0.0.5"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        // unblock it again
        let req = test::TestRequest::post()
            .uri("/unblock_ip")
            .set_json(serde_json::json!({"ip": "10.0.0.5"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        // the quiet source is forwarded again; with no origin behind the
        // test this surfaces as the upstream-error status, not a block
        let req = test::TestRequest::get()
            .uri("/anything")
            .insert_header(("X-Forwarded-For", "10.0.0.5"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn test_flood_is_banned_with_first_tier_escalation() {
        let state = test_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let mut last_status = StatusCode::OK;
        for _ in 0..40 {
            let req = test::TestRequest::get()
                .uri("/login")
                .insert_header(("X-Forwarded-For", "10.9.9.9"))
                .to_request();
            let resp = test::call_service(&app, req).await;
            last_status = resp.status();
        }

        // the flood was cut off on or before its last request
        assert_eq!(last_status, StatusCode::FORBIDDEN);
        // a single offense on record, first escalation tier
        assert_eq!(state.mitigation.offense_count("10.9.9.9"), 1);
        let remaining = state.mitigation.banned_snapshot()["10.9.9.9"];
        assert!(remaining > 100.0 && remaining <= 120.0);
        // the signature log captured the flood
        assert!(state
            .mitigation
            .signatures_snapshot()
            .iter()
            .any(|sig| sig.source == "10.9.9.9"));
    }

    #[actix_web::test]
    async fn test_metrics_endpoint_returns_snapshot() {
        let state = test_state();
        let app = test::init_service(App::new().app_data(state).configure(config)).await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: crate::core::MetricsSnapshot = test::read_body_json(resp).await;
        assert_eq!(body.rps, 0.0);
        assert_eq!(body.attacks, 0);
    }

    #[actix_web::test]
    async fn test_banned_dump_marks_manual_bans() {
        let state = test_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        state.mitigation.manual_block("10.0.0.7");

        let req = test::TestRequest::get().uri("/banned").to_request();
        let resp = test::call_service(&app, req).await;
        let body: std::collections::HashMap<String, f64> = test::read_body_json(resp).await;
        assert_eq!(body["10.0.0.7"], -1.0);
    }

    #[actix_web::test]
    async fn test_forwarded_header_wins_over_peer_address() {
        let req = test::TestRequest::default()
            .insert_header(("X-Forwarded-For", "1.2.3.4, 5.6.7.8"))
            .peer_addr("9.8.7.6:1234".parse().unwrap())
            .to_http_request();
        assert_eq!(resolve_source(&req), "1.2.3.4");
    }

    #[actix_web::test]
    async fn test_peer_address_is_the_fallback_identity() {
        let req = test::TestRequest::default()
            .peer_addr("9.8.7.6:1234".parse().unwrap())
            .to_http_request();
        assert_eq!(resolve_source(&req), "9.8.7.6");
    }

    #[actix_web::test]
    async fn test_hop_by_hop_headers_are_stripped() {
        let req = test::TestRequest::default()
            .insert_header(("Connection", "keep-alive"))
            .insert_header(("Transfer-Encoding", "chunked"))
            .insert_header(("X-Request-Id", "abc-123"))
            .to_http_request();

        let headers = forwardable_headers(req.headers());
        assert!(headers.get("connection").is_none());
        assert!(headers.get("transfer-encoding").is_none());
        assert_eq!(headers.get("x-request-id").unwrap(), "abc-123");
    }
}
