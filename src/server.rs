// 该文件是 Lujian （路检） 项目的一部分。
// src/server.rs - HTTP 服务
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path as RoutePath, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::config::{EnvSource, ServerArgs};
use crate::detector::{ModelFamily, OnnxLoader, RoadDetector};
use crate::model::{Detection, Model};
use crate::provision::Loader;

/// 共享的服务状态
pub struct AppState<L: Loader<Key = ModelFamily> = OnnxLoader> {
  pub detector: RoadDetector<L>,
  /// 上传文件暂存目录
  pub temp_dir: PathBuf,
  /// 对外访问的基础地址，为空时绝对地址与相对地址相同
  pub public_base_url: String,
}

#[derive(Debug)]
pub enum AppError {
  BadRequest(String),
  NotFound(String),
  Internal(anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
  error: String,
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let (status, message) = match self {
      AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
      AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
      AppError::Internal(e) => {
        error!("请求处理失败: {:#}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
      }
    };
    (status, Json(ErrorBody { error: message })).into_response()
  }
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeParams {
  /// 置信度阈值
  pub conf: Option<f32>,
  /// NMS IoU 阈值
  pub iou: Option<f32>,
}

#[derive(Serialize)]
pub struct AnalyzeResponse {
  pub detections: Vec<Detection>,
  pub image_url: String,
  pub image_url_absolute: String,
}

struct Upload {
  file_name: String,
  bytes: Bytes,
}

/// 只保留最后一级文件名
fn sanitize_file_name(raw: &str) -> Option<String> {
  let name = raw.rsplit(['/', '\\']).next()?.trim();
  (!name.is_empty() && name != "." && name != "..").then(|| name.to_string())
}

async fn read_upload(multipart: &mut Multipart) -> Result<Upload, AppError> {
  while let Some(field) = multipart
    .next_field()
    .await
    .map_err(|e| AppError::BadRequest(format!("无法解析上传内容: {e}")))?
  {
    if field.name() != Some("file") {
      continue;
    }
    let file_name = field
      .file_name()
      .and_then(sanitize_file_name)
      .ok_or_else(|| AppError::BadRequest("上传的文件缺少文件名".to_string()))?;
    let bytes = field
      .bytes()
      .await
      .map_err(|e| AppError::BadRequest(format!("读取上传文件失败: {e}")))?;
    return Ok(Upload { file_name, bytes });
  }
  Err(AppError::BadRequest("缺少上传字段 'file'".to_string()))
}

/// 未配置时为空，绝对地址即为相对地址
fn base_url(configured: &str) -> &str {
  configured.trim().trim_end_matches('/')
}

async fn health() -> Json<serde_json::Value> {
  Json(serde_json::json!({ "status": "ok" }))
}

async fn analyze<L>(
  State(state): State<Arc<AppState<L>>>,
  RoutePath(family): RoutePath<String>,
  Query(params): Query<AnalyzeParams>,
  mut multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, AppError>
where
  L: Loader<Key = ModelFamily> + 'static,
  L::Handle: Model + 'static,
{
  let family = ModelFamily::from_key(&family)
    .ok_or_else(|| AppError::NotFound(format!("未知的模型类别 '{family}'")))?;
  let thresholds = state
    .detector
    .thresholds(family)
    .with_overrides(params.conf, params.iou)
    .map_err(|e| AppError::BadRequest(e.to_string()))?;

  let upload = read_upload(&mut multipart).await?;
  debug!(
    "收到 {} 请求: {} ({} 字节)",
    family,
    upload.file_name,
    upload.bytes.len()
  );

  // 每个请求独立的暂存目录，离开作用域时删除
  tokio::fs::create_dir_all(&state.temp_dir)
    .await
    .with_context(|| format!("无法创建临时目录 {}", state.temp_dir.display()))
    .map_err(AppError::Internal)?;
  let staging = tempfile::Builder::new()
    .prefix("upload-")
    .tempdir_in(&state.temp_dir)
    .context("无法创建上传暂存目录")
    .map_err(AppError::Internal)?;
  let image_path = staging.path().join(&upload.file_name);
  tokio::fs::write(&image_path, &upload.bytes)
    .await
    .context("无法保存上传文件")
    .map_err(AppError::Internal)?;

  let worker = state.clone();
  let (detections, file_name) = tokio::task::spawn_blocking(move || {
    worker
      .detector
      .detect_with(family, &image_path, thresholds)
  })
  .await
  .context("检测任务异常退出")
  .map_err(AppError::Internal)?
  .map_err(AppError::Internal)?;
  drop(staging);

  let image_url = format!("/output/{}", urlencoding::encode(&file_name));
  let image_url_absolute = format!("{}{}", base_url(&state.public_base_url), image_url);
  info!("{} 检测完成: {} 条结果", family, detections.len());

  Ok(Json(AnalyzeResponse {
    detections,
    image_url,
    image_url_absolute,
  }))
}

/// 根据来源列表构建跨域策略，`*` 表示任意来源
pub fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
  if origins.iter().any(|origin| origin == "*") {
    return Ok(
      CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any),
    );
  }

  let origins = origins
    .iter()
    .map(|origin| {
      HeaderValue::from_str(origin).with_context(|| format!("无效的跨域来源: {origin}"))
    })
    .collect::<anyhow::Result<Vec<_>>>()?;
  Ok(
    CorsLayer::new()
      .allow_origin(AllowOrigin::list(origins))
      .allow_methods(AllowMethods::mirror_request())
      .allow_headers(AllowHeaders::mirror_request())
      .allow_credentials(true),
  )
}

pub fn router<L>(state: Arc<AppState<L>>, cors: CorsLayer, max_upload_bytes: usize) -> Router
where
  L: Loader<Key = ModelFamily> + 'static,
  L::Handle: Model + 'static,
{
  let output_dir = state.detector.output_dir().to_path_buf();
  Router::new()
    .route("/health", get(health))
    .route("/healthz", get(health))
    .route("/analyze/:family", post(analyze::<L>))
    .nest_service("/output", ServeDir::new(output_dir))
    .layer(DefaultBodyLimit::max(max_upload_bytes))
    .layer(cors)
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// 组装服务状态与路由
///
/// 模型下载使用阻塞 HTTP 客户端，必须在异步运行时之外调用；返回的状态
/// 也应在运行时之外释放。
pub fn prepare(
  args: &ServerArgs,
  env: &dyn EnvSource,
) -> anyhow::Result<(Arc<AppState>, Router)> {
  std::fs::create_dir_all(&args.paths.output_dir)
    .with_context(|| format!("无法创建结果目录 {}", args.paths.output_dir.display()))?;

  let detector = RoadDetector::from_config(&args.paths, env)?;
  let state = Arc::new(AppState {
    detector,
    temp_dir: args.temp_dir.clone(),
    public_base_url: args.public_base_url.clone(),
  });
  let cors = cors_layer(&args.cors_origins())?;
  let app = router(state.clone(), cors, args.max_upload_bytes);
  Ok((state, app))
}

pub async fn serve(listener: TcpListener, app: Router) -> std::io::Result<()> {
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!("无法监听退出信号: {}", e);
    std::future::pending::<()>().await;
  }
  info!("收到退出信号，正在关闭服务");
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn upload_names_lose_their_directories() {
    assert_eq!(sanitize_file_name("photo.jpg").as_deref(), Some("photo.jpg"));
    assert_eq!(sanitize_file_name("../../etc/x.png").as_deref(), Some("x.png"));
    assert_eq!(sanitize_file_name("C:\\Users\\me\\road.jpeg").as_deref(), Some("road.jpeg"));
    assert_eq!(sanitize_file_name("dir/"), None);
    assert_eq!(sanitize_file_name(".."), None);
  }

  #[test]
  fn base_url_comes_only_from_configuration() {
    assert_eq!(base_url("https://roads.example/"), "https://roads.example");
    assert_eq!(base_url(""), "");
  }

  #[test]
  fn explicit_origins_must_be_valid_headers() {
    assert!(cors_layer(&["*".to_string()]).is_ok());
    assert!(cors_layer(&["https://a.example".to_string()]).is_ok());
    assert!(cors_layer(&["bad\norigin".to_string()]).is_err());
  }
}
