// 该文件是 Lujian （路检） 项目的一部分。
// src/artifact.rs - 模型文件的定位、下载与缓存
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

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

mod fetch;
pub use self::fetch::{FetchError, HttpFetcher};

#[derive(Error, Debug)]
pub enum ArtifactError {
  #[error("模型文件 {artifact} 不存在，且未配置下载地址，请设置环境变量 {source_env}")]
  MissingModelSource {
    artifact: String,
    source_env: String,
  },
  #[error("不支持的下载地址方案 '{scheme}': {uri}，仅支持 http、https、gs")]
  UnsupportedSourceScheme { uri: String, scheme: String },
  /// 方案受支持但地址不完整，归入不支持的下载地址
  #[error("下载地址无效 {uri}: {reason}")]
  InvalidSource { uri: String, reason: String },
  #[error("模型下载失败 {uri}: {reason}")]
  ArtifactDownloadFailed { uri: String, reason: String },
  #[error("缓存目录 I/O 错误 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
}

impl ArtifactError {
  fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
    move |source| ArtifactError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// Cloud Storage 对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsObject {
  pub bucket: String,
  /// 已解码的对象名
  pub object: String,
}

impl FromUrlWithScheme for GcsObject {
  const SCHEME: &'static str = "gs";
}

impl FromUrl for GcsObject {
  type Error = ArtifactError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ArtifactError::UnsupportedSourceScheme {
        uri: url.to_string(),
        scheme: url.scheme().to_string(),
      });
    }

    let invalid = |reason: &str| ArtifactError::InvalidSource {
      uri: url.to_string(),
      reason: reason.to_string(),
    };

    let bucket = url
      .host_str()
      .filter(|bucket| !bucket.is_empty())
      .ok_or_else(|| invalid("缺少存储桶名称"))?;
    let object = urlencoding::decode(url.path().trim_start_matches('/'))
      .map_err(|_| invalid("对象名不是合法的 UTF-8"))?
      .into_owned();
    if object.is_empty() {
      return Err(invalid("缺少对象名"));
    }

    Ok(GcsObject {
      bucket: bucket.to_string(),
      object,
    })
  }
}

/// 模型下载来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
  Http(Url),
  Gcs(GcsObject),
}

impl FromUrl for ArtifactSource {
  type Error = ArtifactError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "http" | "https" => Ok(ArtifactSource::Http(url.clone())),
      scheme if scheme == GcsObject::SCHEME => Ok(ArtifactSource::Gcs(GcsObject::from_url(url)?)),
      scheme => Err(ArtifactError::UnsupportedSourceScheme {
        uri: url.to_string(),
        scheme: scheme.to_string(),
      }),
    }
  }
}

impl ArtifactSource {
  /// 解析下载地址；无法解析为绝对 URL 的字符串视为没有方案
  pub fn parse(uri: &str) -> Result<Self, ArtifactError> {
    let url = Url::parse(uri.trim()).map_err(|_| ArtifactError::UnsupportedSourceScheme {
      uri: uri.to_string(),
      scheme: String::new(),
    })?;
    Self::from_url(&url)
  }
}

/// 模型文件下载器
pub trait ArtifactFetcher: Send + Sync {
  /// 将来源的完整内容写入 `sink`，返回写入的字节数
  fn fetch(&self, source: &ArtifactSource, sink: &mut dyn Write) -> Result<u64, FetchError>;
}

/// 模型文件标识
#[derive(Debug, Clone, Copy)]
pub struct ArtifactKey<'a> {
  /// 文件名
  pub file_name: &'a str,
  /// 提供下载地址的环境变量名
  pub source_env: &'a str,
}

/// 模型文件仓库：预置目录优先，其次缓存目录，最后下载到缓存目录
pub struct ArtifactStore {
  baked_dir: PathBuf,
  cache_dir: PathBuf,
  fetcher: Box<dyn ArtifactFetcher>,
}

impl ArtifactStore {
  pub fn new(
    baked_dir: impl Into<PathBuf>,
    cache_dir: impl Into<PathBuf>,
    fetcher: Box<dyn ArtifactFetcher>,
  ) -> Self {
    Self {
      baked_dir: baked_dir.into(),
      cache_dir: cache_dir.into(),
      fetcher,
    }
  }

  pub fn cache_dir(&self) -> &Path {
    &self.cache_dir
  }

  /// 确保模型文件存在于本地并返回其路径
  pub fn ensure_artifact(
    &self,
    key: &ArtifactKey,
    source_uri: Option<&str>,
  ) -> Result<PathBuf, ArtifactError> {
    let baked = self.baked_dir.join(key.file_name);
    if baked.is_file() {
      debug!("使用预置模型文件: {}", baked.display());
      return Ok(baked);
    }

    std::fs::create_dir_all(&self.cache_dir).map_err(ArtifactError::io(&self.cache_dir))?;

    let cached = self.cache_dir.join(key.file_name);
    if cached.is_file() {
      debug!("使用已缓存的模型文件: {}", cached.display());
      return Ok(cached);
    }

    let uri = source_uri.ok_or_else(|| ArtifactError::MissingModelSource {
      artifact: key.file_name.to_string(),
      source_env: key.source_env.to_string(),
    })?;
    let source = ArtifactSource::parse(uri)?;

    info!("下载模型文件 {} <- {}", key.file_name, uri);
    self.download(&source, uri, &cached)?;
    info!("模型文件已保存到 {}", cached.display());

    Ok(cached)
  }

  /// 先写入缓存目录中的临时文件，完整写入后再改名为目标文件
  fn download(&self, source: &ArtifactSource, uri: &str, dest: &Path) -> Result<(), ArtifactError> {
    let failed = |reason: String| ArtifactError::ArtifactDownloadFailed {
      uri: uri.to_string(),
      reason,
    };

    let mut staging = tempfile::Builder::new()
      .prefix(".")
      .suffix(".download")
      .tempfile_in(&self.cache_dir)
      .map_err(ArtifactError::io(&self.cache_dir))?;

    let written = match self.fetcher.fetch(source, staging.as_file_mut()) {
      Ok(written) => written,
      Err(e) => {
        warn!("模型下载失败 {}: {}", uri, e);
        return Err(failed(e.to_string()));
      }
    };

    staging
      .as_file_mut()
      .flush()
      .and_then(|_| staging.as_file().sync_all())
      .map_err(|e| failed(e.to_string()))?;

    staging
      .persist(dest)
      .map_err(|e| failed(e.error.to_string()))?;

    debug!("下载完成 {}: {} 字节", uri, written);
    Ok(())
  }
}
