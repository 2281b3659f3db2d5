// 该文件是 Lujian （路检） 项目的一部分。
// src/config.rs - 配置
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
use std::path::PathBuf;

use clap::{Args, Parser};
use thiserror::Error;

/// 默认置信度阈值
pub const DEFAULT_CONFIDENCE: f32 = 0.25;
/// 默认 NMS IoU 阈值
pub const DEFAULT_IOU: f32 = 0.45;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("环境变量 {key} 的值无法解析为数字: {value}")]
  InvalidNumber { key: String, value: String },
  #[error("阈值 {name} 超出范围 [0, 1]: {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
}

/// HTTP 服务参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServerArgs {
  /// 监听地址
  #[arg(long, env = "HOST", default_value = "0.0.0.0")]
  pub host: String,

  /// 监听端口
  #[arg(long, env = "PORT", default_value_t = 8000)]
  pub port: u16,

  #[command(flatten)]
  pub paths: PathArgs,

  /// 上传文件的临时目录
  #[arg(long, env = "TEMP_DIR", default_value = "temp")]
  pub temp_dir: PathBuf,

  /// 允许跨域访问的来源，逗号分隔，`*` 表示任意来源
  #[arg(long, env = "CORS_ORIGINS", default_value = "*")]
  pub cors_origins: String,

  /// 对外访问的基础地址，用于拼接结果图像的绝对地址
  #[arg(long, env = "PUBLIC_BASE_URL", default_value = "")]
  pub public_base_url: String,

  /// 上传文件大小上限（字节）
  #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 20 * 1024 * 1024)]
  pub max_upload_bytes: usize,
}

impl ServerArgs {
  pub fn cors_origins(&self) -> Vec<String> {
    parse_origins(&self.cors_origins)
  }
}

/// 模型与结果文件相关的路径
#[derive(Args, Debug, Clone)]
pub struct PathArgs {
  /// 结果图像目录
  #[arg(long, env = "OUTPUT_DIR", default_value = "output")]
  pub output_dir: PathBuf,

  /// 模型下载缓存目录
  #[arg(long, env = "MODEL_CACHE_DIR", default_value = "/tmp/models")]
  pub model_cache_dir: PathBuf,

  /// 预置模型目录，其中的模型文件优先于缓存与下载
  #[arg(long, env = "BAKED_MODEL_DIR", default_value = ".")]
  pub baked_model_dir: PathBuf,

  /// 标注文字所用的 TrueType 字体
  #[arg(long, env = "LABEL_FONT")]
  pub label_font: Option<PathBuf>,
}

fn parse_origins(raw: &str) -> Vec<String> {
  let origins: Vec<String> = raw
    .split(',')
    .map(str::trim)
    .filter(|origin| !origin.is_empty())
    .map(str::to_string)
    .collect();
  if origins.is_empty() {
    vec!["*".to_string()]
  } else {
    origins
  }
}

/// 环境变量来源
pub trait EnvSource {
  fn var(&self, key: &str) -> Option<String>;
}

/// 进程环境变量，空值视为未设置
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
  fn var(&self, key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
  }
}

impl EnvSource for HashMap<String, String> {
  fn var(&self, key: &str) -> Option<String> {
    self.get(key).filter(|value| !value.trim().is_empty()).cloned()
  }
}

/// 推理阈值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
  /// 置信度阈值
  pub confidence: f32,
  /// NMS IoU 阈值
  pub iou: f32,
}

impl Default for Thresholds {
  fn default() -> Self {
    Self {
      confidence: DEFAULT_CONFIDENCE,
      iou: DEFAULT_IOU,
    }
  }
}

impl Thresholds {
  pub fn new(confidence: f32, iou: f32) -> Result<Self, ConfigError> {
    Ok(Self {
      confidence: check_unit("confidence", confidence)?,
      iou: check_unit("iou", iou)?,
    })
  }

  /// 从 `<PREFIX>_CONF` 与 `<PREFIX>_IOU` 读取阈值
  pub fn from_env(env: &dyn EnvSource, prefix: &str) -> Result<Self, ConfigError> {
    let confidence = read_f32(env, &format!("{prefix}_CONF"))?.unwrap_or(DEFAULT_CONFIDENCE);
    let iou = read_f32(env, &format!("{prefix}_IOU"))?.unwrap_or(DEFAULT_IOU);
    Self::new(confidence, iou)
  }

  pub fn with_overrides(self, confidence: Option<f32>, iou: Option<f32>) -> Result<Self, ConfigError> {
    Self::new(
      confidence.unwrap_or(self.confidence),
      iou.unwrap_or(self.iou),
    )
  }
}

fn check_unit(name: &'static str, value: f32) -> Result<f32, ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(value)
  } else {
    Err(ConfigError::ThresholdOutOfRange { name, value })
  }
}

fn read_f32(env: &dyn EnvSource, key: &str) -> Result<Option<f32>, ConfigError> {
  env
    .var(key)
    .map(|value| {
      value
        .trim()
        .parse::<f32>()
        .map_err(|_| ConfigError::InvalidNumber {
          key: key.to_string(),
          value,
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn thresholds_default_when_unset() {
    let thresholds = Thresholds::from_env(&env(&[]), "SIGN").unwrap();
    assert_eq!(thresholds, Thresholds::default());
  }

  #[test]
  fn thresholds_read_from_prefixed_vars() {
    let vars = env(&[("LIGHT_CONF", "0.4"), ("LIGHT_IOU", " 0.6 "), ("SIGN_CONF", "0.9")]);
    let thresholds = Thresholds::from_env(&vars, "LIGHT").unwrap();
    assert_eq!(thresholds.confidence, 0.4);
    assert_eq!(thresholds.iou, 0.6);
  }

  #[test]
  fn blank_value_counts_as_unset() {
    let vars = env(&[("PAVEMENT_CONF", "  ")]);
    let thresholds = Thresholds::from_env(&vars, "PAVEMENT").unwrap();
    assert_eq!(thresholds.confidence, DEFAULT_CONFIDENCE);
  }

  #[test]
  fn invalid_threshold_is_rejected() {
    let vars = env(&[("SIGN_CONF", "high")]);
    assert!(matches!(
      Thresholds::from_env(&vars, "SIGN"),
      Err(ConfigError::InvalidNumber { .. })
    ));

    let vars = env(&[("SIGN_IOU", "1.5")]);
    assert_eq!(
      Thresholds::from_env(&vars, "SIGN"),
      Err(ConfigError::ThresholdOutOfRange {
        name: "iou",
        value: 1.5
      })
    );
  }

  #[test]
  fn overrides_replace_only_given_values() {
    let base = Thresholds::new(0.3, 0.5).unwrap();
    let merged = base.with_overrides(Some(0.6), None).unwrap();
    assert_eq!(merged, Thresholds::new(0.6, 0.5).unwrap());
    assert!(base.with_overrides(None, Some(-0.1)).is_err());
  }

  #[test]
  fn origins_split_on_commas() {
    assert_eq!(
      parse_origins("https://a.example, https://b.example,"),
      vec!["https://a.example", "https://b.example"]
    );
    assert_eq!(parse_origins(""), vec!["*"]);
  }
}
