use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::{
    config::Thresholds,
    corpus::ProceduralSource,
    error::TrainingError,
    model::MetricsRecord,
    predictor::{Analysis, Predictor},
    trainer::{TrainOptions, Trainer},
};

// ==========================================
// 1. 应用状态 (Shared State)
// ==========================================
// 预测器内部自带读写锁，这里只需要 Arc 共享。
pub struct AppState {
    pub predictor: Arc<Predictor>,
    pub train_options: TrainOptions,
}

// ==========================================
// 2. 数据传输对象 (DTOs)
// ==========================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_available: bool,
    pub version: &'static str,
}

/// 阈值更新请求：先按原样接收，再走 `Thresholds::new` 校验
#[derive(Deserialize)]
pub struct ThresholdsUpdate {
    pub thresh_auth: f32,
    pub thresh_syn: f32,
}

type ApiError = (StatusCode, String);

// ==========================================
// 3. 路由
// ==========================================
pub fn app(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/scan", post(scan))
        .route("/model/metrics", get(model_metrics))
        .route("/admin/train", post(train))
        .route("/admin/thresholds", get(get_thresholds).put(put_thresholds))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ==========================================
// 4. 处理函数 (Handlers)
// ==========================================

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model_available: state.predictor.is_model_available(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// 接口：上传原始图片字节并打分
///
/// 解码与特征提取是 CPU 密集型操作，放到 spawn_blocking 里执行。
async fn scan(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<Analysis>, ApiError> {
    if body.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "empty request body".to_string()));
    }
    info!(bytes = body.len(), "scan request");

    let predictor = state.predictor.clone();
    let analysis = tokio::task::spawn_blocking(move || predictor.analyze(&body))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join error: {}", e)))?;

    info!(
        probability = analysis.score.probability,
        label = %analysis.score.label,
        degraded = analysis.degraded,
        ms = analysis.processing_ms,
        "scan finished"
    );
    Ok(Json(analysis))
}

async fn model_metrics(State(state): State<Arc<AppState>>) -> Result<Json<MetricsRecord>, ApiError> {
    state
        .predictor
        .get_metrics()
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "model has not been trained yet".to_string()))
}

/// 接口：用程序化语料（以及可选的磁盘语料）重新训练并热替换模型
async fn train(State(state): State<Arc<AppState>>) -> Result<Json<MetricsRecord>, ApiError> {
    let store = state.predictor.store().clone();
    let options = state.train_options.clone();
    // 训练锁在阻塞线程里 try 获取并一直持有到落盘，第二个并发请求直接 409
    let result = tokio::task::spawn_blocking(move || {
        let mut source = ProceduralSource::new(options.seed);
        Trainer::new(options).try_train(&mut source, &store)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join error: {}", e)))?;

    result.map(Json).map_err(|e| match e {
        TrainingError::Busy => (StatusCode::CONFLICT, e.to_string()),
        e => {
            error!(error = %e, "training failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    })
}

async fn get_thresholds(State(state): State<Arc<AppState>>) -> Json<Thresholds> {
    Json(state.predictor.thresholds())
}

async fn put_thresholds(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ThresholdsUpdate>,
) -> Result<Json<Thresholds>, ApiError> {
    let thresholds = Thresholds::new(req.thresh_auth, req.thresh_syn)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    state.predictor.set_thresholds(thresholds);
    info!(auth = thresholds.auth(), syn = thresholds.syn(), "thresholds updated");
    Ok(Json(thresholds))
}
