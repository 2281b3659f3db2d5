// 该文件是 Lujian （路检） 项目的一部分。
// src/detector.rs - 各类道路设施检测入口
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
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use thiserror::Error;
use tracing::info;

use crate::artifact::{ArtifactError, ArtifactKey, ArtifactStore, HttpFetcher};
use crate::config::{ConfigError, EnvSource, PathArgs, Thresholds};
use crate::input::{self, InputError};
use crate::model::{
  Detection, InferError, LoadError, Model, ModelHandle, PavementClassifier, YoloDetector,
  select_device,
};
use crate::output::{AnnotatedImageWriter, Draw, OutputError, Style};
use crate::provision::{Loader, ProvisionError, Provisioner};

/// 模型种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
  Detector,
  Classifier,
}

/// 每类模型的静态描述
#[derive(Debug)]
pub struct FamilySpec {
  pub key: &'static str,
  pub display_name: &'static str,
  pub kind: ModelKind,
  /// 模型文件名
  pub artifact: &'static str,
  /// 下载地址所在的环境变量
  pub source_env: &'static str,
  /// 阈值环境变量前缀
  pub env_prefix: &'static str,
  /// 结果文件名后缀
  pub suffix: &'static str,
  pub style: Style,
}

static FAMILIES: [FamilySpec; 6] = [
  FamilySpec {
    key: "light",
    display_name: "交通信号灯",
    kind: ModelKind::Detector,
    artifact: "light_best.onnx",
    source_env: "LIGHT_MODEL_URI",
    env_prefix: "LIGHT",
    suffix: "light",
    style: Style::Boxes([0, 200, 0]),
  },
  FamilySpec {
    key: "sign",
    display_name: "交通标志",
    kind: ModelKind::Detector,
    artifact: "sign_best.onnx",
    source_env: "SIGN_BEST_PT_URI",
    env_prefix: "SIGN",
    suffix: "det",
    style: Style::Boxes([0, 0, 255]),
  },
  FamilySpec {
    key: "illumination",
    display_name: "照明设施",
    kind: ModelKind::Detector,
    artifact: "illumination_best.onnx",
    source_env: "ILLUMINATION_MODEL_URI",
    env_prefix: "ILLUMINATION",
    suffix: "illumination",
    style: Style::Boxes([255, 191, 0]),
  },
  FamilySpec {
    key: "sign_damage",
    display_name: "交通标志损坏",
    kind: ModelKind::Detector,
    artifact: "sign_damage_best.onnx",
    source_env: "SIGN_DAMAGE_MODEL_URI",
    env_prefix: "SIGN_DAMAGE",
    suffix: "sign_damage",
    style: Style::Boxes([255, 128, 0]),
  },
  FamilySpec {
    key: "signal_damage",
    display_name: "信号设施损坏",
    kind: ModelKind::Detector,
    artifact: "signal_damage_best.onnx",
    source_env: "SIGNAL_DAMAGE_MODEL_URI",
    env_prefix: "SIGNAL_DAMAGE",
    suffix: "signal_damage",
    style: Style::Boxes([128, 0, 128]),
  },
  FamilySpec {
    key: "pavement",
    display_name: "路面标线",
    kind: ModelKind::Classifier,
    artifact: "fastcnn_epoch_90.onnx",
    source_env: "PAVEMENT_MODEL_URI",
    env_prefix: "PAVEMENT",
    suffix: "pavement",
    style: Style::Banner,
  },
];

/// 模型类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
  TrafficLight,
  TrafficSign,
  Illumination,
  SignDamage,
  SignalDamage,
  Pavement,
}

impl ModelFamily {
  pub const ALL: [ModelFamily; 6] = [
    ModelFamily::TrafficLight,
    ModelFamily::TrafficSign,
    ModelFamily::Illumination,
    ModelFamily::SignDamage,
    ModelFamily::SignalDamage,
    ModelFamily::Pavement,
  ];

  pub fn spec(self) -> &'static FamilySpec {
    &FAMILIES[self as usize]
  }

  pub fn key(self) -> &'static str {
    self.spec().key
  }

  pub fn from_key(key: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|family| family.key() == key)
  }
}

impl fmt::Display for ModelFamily {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.key())
  }
}

#[derive(Error, Debug)]
#[error("未知的模型类别 '{0}'")]
pub struct UnknownFamily(String);

impl FromStr for ModelFamily {
  type Err = UnknownFamily;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::from_key(s).ok_or_else(|| UnknownFamily(s.to_string()))
  }
}

/// 启动时读取的单类模型配置
#[derive(Debug, Clone, PartialEq)]
pub struct FamilySettings {
  pub source_uri: Option<String>,
  pub thresholds: Thresholds,
}

/// 读取所有类别的下载地址与阈值
pub fn settings_from_env(env: &dyn EnvSource) -> Result<HashMap<ModelFamily, FamilySettings>, ConfigError> {
  ModelFamily::ALL
    .into_iter()
    .map(|family| {
      let spec = family.spec();
      let settings = FamilySettings {
        source_uri: env.var(spec.source_env),
        thresholds: Thresholds::from_env(env, spec.env_prefix)?,
      };
      Ok::<_, ConfigError>((family, settings))
    })
    .collect()
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  UnsupportedFormat,
  MissingModelSource,
  UnsupportedSourceScheme,
  ArtifactDownloadFailed,
  ModelLoadFailed,
  InferenceFailed,
}

#[derive(Error, Debug)]
pub enum DetectError {
  #[error(transparent)]
  Input(#[from] InputError),
  #[error(transparent)]
  Provision(#[from] ProvisionError),
  #[error("推理失败: {0}")]
  Inference(#[from] InferError),
  #[error("结果图像处理失败: {0}")]
  Output(#[from] OutputError),
}

impl DetectError {
  /// 归类到最具体的错误种类，模型加载失败时按其原因归类
  pub fn kind(&self) -> ErrorKind {
    match self {
      DetectError::Input(_) => ErrorKind::UnsupportedFormat,
      DetectError::Inference(_) | DetectError::Output(_) => ErrorKind::InferenceFailed,
      DetectError::Provision(ProvisionError::UnknownModel(_)) => ErrorKind::ModelLoadFailed,
      DetectError::Provision(ProvisionError::ModelLoadFailed { cause, .. }) => {
        match cause.downcast_ref::<LoadError>() {
          Some(LoadError::Artifact(e)) => artifact_kind(e),
          _ => ErrorKind::ModelLoadFailed,
        }
      }
    }
  }
}

fn artifact_kind(error: &ArtifactError) -> ErrorKind {
  match error {
    ArtifactError::MissingModelSource { .. } => ErrorKind::MissingModelSource,
    // 已配置但无法使用的地址，如缺少对象名的 gs 地址
    ArtifactError::UnsupportedSourceScheme { .. } | ArtifactError::InvalidSource { .. } => {
      ErrorKind::UnsupportedSourceScheme
    }
    ArtifactError::ArtifactDownloadFailed { .. } | ArtifactError::Io { .. } => {
      ErrorKind::ArtifactDownloadFailed
    }
  }
}

/// 定位模型文件并创建 ONNX Runtime 会话
pub struct OnnxLoader {
  store: ArtifactStore,
  sources: HashMap<ModelFamily, Option<String>>,
}

impl OnnxLoader {
  pub fn new(store: ArtifactStore, sources: HashMap<ModelFamily, Option<String>>) -> Self {
    Self { store, sources }
  }
}

impl Loader for OnnxLoader {
  type Key = ModelFamily;
  type Handle = ModelHandle;
  type Error = LoadError;

  fn load(&self, family: ModelFamily) -> Result<ModelHandle, LoadError> {
    let spec = family.spec();
    let key = ArtifactKey {
      file_name: spec.artifact,
      source_env: spec.source_env,
    };
    let source = self.sources.get(&family).and_then(|s| s.as_deref());
    let path = self.store.ensure_artifact(&key, source)?;

    let device = select_device();
    let handle = match spec.kind {
      ModelKind::Classifier => ModelHandle::Classifier(PavementClassifier::load(&path, device)?),
      ModelKind::Detector => ModelHandle::Detector(YoloDetector::load(&path, device)?),
    };
    info!("{}模型已加载，设备: {}", spec.display_name, handle.device());
    Ok(handle)
  }
}

/// 道路设施检测服务
pub struct RoadDetector<L: Loader<Key = ModelFamily> = OnnxLoader> {
  provisioner: Provisioner<L>,
  writer: AnnotatedImageWriter,
  thresholds: HashMap<ModelFamily, Thresholds>,
}

impl RoadDetector<OnnxLoader> {
  /// 按配置组装：模型仓库、下载器、字体与阈值
  pub fn from_config(paths: &PathArgs, env: &dyn EnvSource) -> anyhow::Result<Self> {
    let settings = settings_from_env(env).context("模型配置无效")?;
    let fetcher = HttpFetcher::new()
      .context("无法创建下载客户端")?
      .with_gcs_token(env.var("GCS_ACCESS_TOKEN"));
    let store = ArtifactStore::new(
      &paths.baked_model_dir,
      &paths.model_cache_dir,
      Box::new(fetcher),
    );
    let writer = AnnotatedImageWriter::new(
      &paths.output_dir,
      Draw::from_font_file(paths.label_font.as_deref()),
    );

    let sources = settings
      .iter()
      .map(|(family, s)| (*family, s.source_uri.clone()))
      .collect();
    let thresholds = settings
      .iter()
      .map(|(family, s)| (*family, s.thresholds))
      .collect();

    Ok(Self::new(OnnxLoader::new(store, sources), writer, thresholds))
  }
}

impl<L> RoadDetector<L>
where
  L: Loader<Key = ModelFamily>,
  L::Handle: Model,
{
  pub fn new(loader: L, writer: AnnotatedImageWriter, thresholds: HashMap<ModelFamily, Thresholds>) -> Self {
    Self {
      provisioner: Provisioner::new(loader, ModelFamily::ALL),
      writer,
      thresholds,
    }
  }

  pub fn provisioner(&self) -> &Provisioner<L> {
    &self.provisioner
  }

  pub fn output_dir(&self) -> &Path {
    self.writer.directory()
  }

  /// 启动时配置的阈值
  pub fn thresholds(&self, family: ModelFamily) -> Thresholds {
    self.thresholds.get(&family).copied().unwrap_or_default()
  }

  /// 使用启动时配置的阈值检测，返回结果与结果图像文件名
  pub fn detect(&self, family: ModelFamily, image_path: &Path) -> anyhow::Result<(Vec<Detection>, String)> {
    self.detect_with(family, image_path, self.thresholds(family))
  }

  pub fn detect_with(
    &self,
    family: ModelFamily,
    image_path: &Path,
    thresholds: Thresholds,
  ) -> anyhow::Result<(Vec<Detection>, String)> {
    self
      .run(family, image_path, thresholds)
      .with_context(|| format!("{}检测失败", family.spec().display_name))
  }

  fn run(
    &self,
    family: ModelFamily,
    image_path: &Path,
    thresholds: Thresholds,
  ) -> Result<(Vec<Detection>, String), DetectError> {
    let spec = family.spec();
    input::validate_format(image_path)?;
    let image = input::read_rgb_image(image_path)?;

    let model = self.provisioner.get_handle(family)?;
    let detections = model.infer(&image, thresholds)?;

    let file_name = self
      .writer
      .write(image_path, &image, &detections, spec.suffix, spec.style)?;
    info!(
      "{}: {} -> {}，共 {} 条结果",
      spec.display_name,
      image_path.display(),
      file_name,
      detections.len()
    );
    Ok((detections, file_name))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn family_table_lines_up_with_enum() {
    for family in ModelFamily::ALL {
      assert_eq!(ModelFamily::from_key(family.key()), Some(family));
      assert_eq!(family.to_string().parse::<ModelFamily>().unwrap(), family);
    }
    assert_eq!(ModelFamily::TrafficSign.spec().suffix, "det");
    assert_eq!(ModelFamily::Pavement.spec().kind, ModelKind::Classifier);
    assert!("radar".parse::<ModelFamily>().is_err());
  }

  #[test]
  fn settings_follow_family_env_names() {
    let env: HashMap<String, String> = [
      ("SIGN_BEST_PT_URI", "gs://models/sign_best.onnx"),
      ("SIGN_CONF", "0.5"),
      ("PAVEMENT_IOU", "0.3"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let settings = settings_from_env(&env).unwrap();
    let sign = &settings[&ModelFamily::TrafficSign];
    assert_eq!(sign.source_uri.as_deref(), Some("gs://models/sign_best.onnx"));
    assert_eq!(sign.thresholds.confidence, 0.5);
    assert_eq!(settings[&ModelFamily::Pavement].thresholds.iou, 0.3);
    assert_eq!(settings[&ModelFamily::TrafficLight].source_uri, None);
  }

  #[test]
  fn bad_threshold_fails_startup() {
    let env: HashMap<String, String> = [("LIGHT_CONF".to_string(), "2".to_string())].into();
    assert!(settings_from_env(&env).is_err());
  }
}
