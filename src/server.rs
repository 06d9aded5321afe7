use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

/// Stock results the mock backend hands out instead of real inference.
pub const MOCK_IMAGES: [&str; 5] = [
    "https://images.unsplash.com/photo-1506905925346-21bda4d32df4?w=800&h=600&fit=crop",
    "https://images.unsplash.com/photo-1441974231531-c6227db76b6e?w=800&h=600&fit=crop",
    "https://images.unsplash.com/photo-1518837695005-2083093ee35b?w=800&h=600&fit=crop",
    "https://images.unsplash.com/photo-1506905925346-21bda4d32df4?w=800&h=600&fit=crop",
    "https://images.unsplash.com/photo-1441974231531-c6227db76b6e?w=800&h=600&fit=crop",
];

#[derive(Debug, Clone)]
pub struct MockBackendConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub failure_rate: f64,
}

impl Default for MockBackendConfig {
    /// The documented reference behavior: 1–2 s latency, 20% overload.
    fn default() -> Self {
        Self {
            min_delay_ms: 1000,
            max_delay_ms: 2000,
            failure_rate: 0.2,
        }
    }
}

impl MockBackendConfig {
    /// Zero latency, zero failures. For tests.
    pub fn instant() -> Self {
        Self {
            min_delay_ms: 0,
            max_delay_ms: 0,
            failure_rate: 0.0,
        }
    }
}

pub fn router(config: MockBackendConfig) -> Router {
    Router::new()
        .route("/api/generate", post(generate))
        .with_state(config)
}

async fn generate(State(config): State<MockBackendConfig>, Json(body): Json<Value>) -> Response {
    let (Some(_), Some(prompt), Some(style)) = (
        field(&body, "imageDataUrl"),
        field(&body, "prompt"),
        field(&body, "style"),
    ) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "Missing required fields" })),
        )
            .into_response();
    };

    // Draw everything random before the await; ThreadRng is not Send.
    let (delay_ms, overloaded, image_url) = {
        let mut rng = rand::thread_rng();
        let delay_ms = if config.max_delay_ms > config.min_delay_ms {
            rng.gen_range(config.min_delay_ms..=config.max_delay_ms)
        } else {
            config.min_delay_ms
        };
        let overloaded = config.failure_rate > 0.0 && rng.gen_bool(config.failure_rate.clamp(0.0, 1.0));
        let image_url = MOCK_IMAGES[rng.gen_range(0..MOCK_IMAGES.len())];
        (delay_ms, overloaded, image_url)
    };

    tokio::time::sleep(Duration::from_millis(delay_ms)).await;

    if overloaded {
        info!("💥 Simulating overload for prompt {:?}", prompt);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "message": "Model overloaded" })),
        )
            .into_response();
    }

    info!("✅ Mock generation for prompt {:?} ({})", prompt, style);
    Json(json!({
        "id": format!("gen_{}", Uuid::new_v4().simple()),
        "imageUrl": image_url,
        "prompt": prompt,
        "style": style,
        "createdAt": Utc::now(),
    }))
    .into_response()
}

fn field<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
