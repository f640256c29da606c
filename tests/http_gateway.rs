use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use image::{codecs::jpeg::JpegEncoder, Rgb, RgbImage};
use physiolens_lib::{
    analysis::{AnalysisGateway, HttpTransport},
    sampler::FramePayload,
    MetricsFailurePolicy, MetricsOutcome, PatternCamera, SessionConfig, SessionController,
    SessionPhase,
};

#[derive(Clone, Default)]
struct Service {
    well_formed_uploads: Arc<AtomicUsize>,
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 80)
        .encode_image(&RgbImage::from_pixel(width, height, Rgb([0, 200, 0])))
        .unwrap();
    out
}

fn frame() -> FramePayload {
    FramePayload {
        jpeg: jpeg(32, 24),
        width: 32,
        height: 24,
        captured_at: Utc::now(),
    }
}

fn is_frame_upload(headers: &HeaderMap, body: &[u8]) -> bool {
    let multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));
    let body = String::from_utf8_lossy(body);
    multipart
        && body.contains(r#"name="file""#)
        && body.contains(r#"filename="frame.jpg""#)
        && body.contains("image/jpeg")
}

async fn graded_metrics(
    State(service): State<Service>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if is_frame_upload(&headers, &body) {
        service.well_formed_uploads.fetch_add(1, Ordering::SeqCst);
    }
    (
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"analysis": {"score": 91, "grade": "A-", "issues": [],
            "detailed_issues": {}, "angles": {"neck_angle": 7.5}, "measurements": {},
            "recommendations": ["Maintain posture"]},
           "session_stats": {"duration": "00:00:02", "average_score": 91.0},
           "posture_history": [91.0], "angle_history": {}}"#,
    )
}

async fn failing_metrics() -> impl IntoResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, "model crashed")
}

async fn overlay_frame() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/jpeg")], jpeg(40, 30))
}

async fn health() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"status": "ok", "message": "PhysioLens API is running"}"#,
    )
}

async fn serve(metrics_ok: bool) -> (String, Service) {
    let service = Service::default();
    let metrics = if metrics_ok {
        post(graded_metrics)
    } else {
        post(failing_metrics)
    };
    let app = Router::new()
        .route("/api/analyze_frame_json", metrics)
        .route("/api/analyze_frame", post(overlay_frame))
        .route("/api/health", get(health))
        .with_state(service.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/api"), service)
}

fn gateway(base_url: &str) -> AnalysisGateway {
    AnalysisGateway::new(
        Arc::new(HttpTransport::new(base_url).unwrap()),
        MetricsFailurePolicy::Fallback,
        Some(Duration::from_secs(5)),
    )
}

#[tokio::test]
async fn service_grade_survives_http_round_trip() {
    let (base_url, service) = serve(true).await;

    let outcome = gateway(&base_url).fetch_metrics(&frame()).await;
    let MetricsOutcome::Live(result) = outcome else {
        panic!("expected live result, got {outcome:?}");
    };
    assert_eq!(result.overall_score(), 91.0);
    assert_eq!(result.grade(), "A-");
    assert_eq!(result.recommendations(), ["Maintain posture".to_string()]);
    assert_eq!(result.angles().get("neck_angle"), Some(&7.5));
    assert_eq!(service.well_formed_uploads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_error_becomes_degraded_result() {
    let (base_url, _) = serve(false).await;

    match gateway(&base_url).fetch_metrics(&frame()).await {
        MetricsOutcome::Degraded { result, reason } => {
            assert_eq!(result.overall_score(), 89.0);
            assert_eq!(result.grade(), "B+");
            assert!(reason.contains("500"), "reason was {reason}");
        }
        other => panic!("expected degraded result, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_service_becomes_degraded_result() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let outcome = gateway(&format!("http://{addr}/api"))
        .fetch_metrics(&frame())
        .await;
    assert!(outcome.is_degraded());
}

#[tokio::test]
async fn overlay_body_is_decoded() {
    let (base_url, _) = serve(true).await;

    let overlay = gateway(&base_url).fetch_overlay(&frame()).await.unwrap();
    assert_eq!(overlay.dimensions(), (40, 30));
}

#[tokio::test]
async fn health_check_reports_ok() {
    let (base_url, _) = serve(true).await;

    let health = gateway(&base_url).health().await.unwrap();
    assert!(health.is_ok());
    assert_eq!(health.message.as_deref(), Some("PhysioLens API is running"));
}

#[tokio::test]
async fn session_keeps_running_on_degraded_results() {
    let (base_url, _) = serve(false).await;
    let config = SessionConfig {
        service_url: base_url,
        overlay_period_ms: 50,
        metrics_period_ms: 50,
        ..SessionConfig::default()
    };
    let controller =
        SessionController::connect(Arc::new(PatternCamera::with_warmup(Duration::ZERO)), &config)
            .unwrap();

    controller.start_device().await.unwrap();
    controller.start_analysis().await.unwrap();

    let mut current = None;
    for _ in 0..300 {
        current = controller.snapshot().await.current;
        if current.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let current = current.expect("a degraded result within three seconds");
    assert!(current.degraded_reason.unwrap().contains("500"));

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.phase, SessionPhase::Analyzing);
    assert_eq!(snapshot.stats.count, 0);

    controller.teardown().await;
    assert_eq!(controller.snapshot().await.phase, SessionPhase::Setup);
}
