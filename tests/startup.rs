// 该文件是 Lujian （路检） 项目的一部分。
// tests/startup.rs - 服务组装测试
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

use std::collections::HashMap;
use std::path::Path;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use clap::Parser;
use tower::ServiceExt;

use lujian::config::{ServerArgs, Thresholds};
use lujian::detector::{ModelFamily, RoadDetector};
use lujian::server;

fn args(root: &Path) -> ServerArgs {
  let dir = |name: &str| root.join(name).to_string_lossy().into_owned();
  ServerArgs::parse_from([
    "lujian".to_string(),
    "--output-dir".to_string(),
    dir("output"),
    "--model-cache-dir".to_string(),
    dir("cache"),
    "--baked-model-dir".to_string(),
    dir("baked"),
    "--temp-dir".to_string(),
    dir("temp"),
    "--cors-origins".to_string(),
    "https://roads.example".to_string(),
  ])
}

fn env() -> HashMap<String, String> {
  [
    ("SIGN_CONF", "0.6"),
    ("LIGHT_MODEL_URI", "https://models.example/light_best.onnx"),
    ("GCS_ACCESS_TOKEN", "token"),
  ]
  .into_iter()
  .map(|(k, v)| (k.to_string(), v.to_string()))
  .collect()
}

#[test]
fn detector_builds_from_config() {
  let root = tempfile::tempdir().unwrap();
  let args = args(root.path());

  let detector = RoadDetector::from_config(&args.paths, &env()).unwrap();

  assert_eq!(detector.output_dir(), root.path().join("output"));
  assert_eq!(
    detector.thresholds(ModelFamily::TrafficSign),
    Thresholds::new(0.6, 0.45).unwrap()
  );
  assert_eq!(detector.thresholds(ModelFamily::Pavement), Thresholds::default());
  assert!(!detector.provisioner().is_loaded(ModelFamily::TrafficLight));
}

#[test]
fn bad_threshold_env_fails_to_build() {
  let root = tempfile::tempdir().unwrap();
  let args = args(root.path());
  let env: HashMap<String, String> = [("PAVEMENT_IOU".to_string(), "7".to_string())].into();

  assert!(RoadDetector::from_config(&args.paths, &env).is_err());
}

#[tokio::test]
async fn server_is_assembled_off_the_async_context() {
  let root = tempfile::tempdir().unwrap();
  let args = args(root.path());

  let (state, app) = tokio::task::spawn_blocking(move || server::prepare(&args, &env()))
    .await
    .unwrap()
    .unwrap();
  assert!(root.path().join("output").is_dir());

  let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
  let response = app.clone().oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  assert_eq!(&body[..], br#"{"status":"ok"}"#);

  tokio::task::spawn_blocking(move || drop((state, app)))
    .await
    .unwrap();
}
