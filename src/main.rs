use std::sync::Arc;

use authscan_core::{
    api, config::Config, corpus::ProceduralSource, error::StoreError, predictor::Predictor,
    store::ModelStore, trainer::{TrainOptions, Trainer},
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ----------------------------------------------------------------
    // 0. 加载配置 & 日志
    // ----------------------------------------------------------------
    let config = Config::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();
    info!(
        host = %config.host,
        port = config.port,
        artifacts = %config.artifacts_dir.display(),
        auth = config.thresholds.auth(),
        syn = config.thresholds.syn(),
        "configuration loaded"
    );

    // ----------------------------------------------------------------
    // 1. 模型仓库：磁盘上的产物不一致时丢弃，按需重新训练
    // ----------------------------------------------------------------
    let store = match ModelStore::open(&config.artifacts_dir) {
        Ok(store) => store,
        Err(e @ (StoreError::Inconsistent | StoreError::Serde(_))) => {
            warn!(error = %e, "ignoring unusable artifacts");
            ModelStore::new(&config.artifacts_dir)
        }
        Err(e) => return Err(e.into()),
    };
    let store = Arc::new(store);
    let train_options = TrainOptions::from_config(&config);

    if !store.is_model_available() && config.train_on_start {
        info!("no model found, training on startup");
        let store = store.clone();
        let options = train_options.clone();
        let trained = tokio::task::spawn_blocking(move || {
            let mut source = ProceduralSource::new(options.seed);
            Trainer::new(options).train(&mut source, &store)
        })
        .await?;
        if let Err(e) = trained {
            error!(error = %e, "startup training failed, serving fallback results");
        }
    }

    // ----------------------------------------------------------------
    // 2. 状态共享容器
    // ----------------------------------------------------------------
    let predictor = Predictor::new(store, config.thresholds).with_max_size(config.max_image_side);
    let shared_state = Arc::new(api::AppState {
        predictor: Arc::new(predictor),
        train_options,
    });

    // ----------------------------------------------------------------
    // 3. 启动 HTTP 服务
    // ----------------------------------------------------------------
    let app = api::app(shared_state, config.max_image_mb * 1024 * 1024);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!("API listening on http://{}", addr);
    info!("  POST /scan             : score an uploaded image");
    info!("  GET  /admin/thresholds : current decision thresholds");

    axum::serve(listener, app).await?;

    Ok(())
}
