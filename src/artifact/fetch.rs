// 该文件是 Lujian （路检） 项目的一部分。
// src/artifact/fetch.rs - HTTP 与 Cloud Storage 下载
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
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::{ArtifactFetcher, ArtifactSource, GcsObject};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const METADATA_TIMEOUT: Duration = Duration::from_secs(2);

const GCS_API_BASE: &str = "https://storage.googleapis.com/storage/v1";
const METADATA_TOKEN_URL: &str =
  "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Error, Debug)]
pub enum FetchError {
  #[error("HTTP 请求错误: {0}")]
  Request(#[from] reqwest::Error),
  #[error("服务器返回状态 {status}: {url}")]
  Status { url: String, status: u16 },
  #[error("写入错误: {0}")]
  Io(#[from] std::io::Error),
}

#[derive(Deserialize)]
struct MetadataToken {
  access_token: String,
}

/// 基于 reqwest 阻塞客户端的下载器，须在阻塞线程中调用
pub struct HttpFetcher {
  client: Client,
  gcs_token: Option<String>,
}

impl HttpFetcher {
  pub fn new() -> Result<Self, FetchError> {
    let client = Client::builder()
      .user_agent(concat!("lujian/", env!("CARGO_PKG_VERSION")))
      .timeout(DOWNLOAD_TIMEOUT)
      .connect_timeout(CONNECT_TIMEOUT)
      .build()?;
    Ok(Self {
      client,
      gcs_token: None,
    })
  }

  /// 显式指定 Cloud Storage 访问令牌，未指定时尝试元数据服务器
  pub fn with_gcs_token(mut self, token: Option<String>) -> Self {
    self.gcs_token = token;
    self
  }

  fn gcs_url(object: &GcsObject) -> String {
    format!(
      "{}/b/{}/o/{}?alt=media",
      GCS_API_BASE,
      urlencoding::encode(&object.bucket),
      urlencoding::encode(&object.object)
    )
  }

  fn metadata_token(&self) -> Option<String> {
    let response = self
      .client
      .get(METADATA_TOKEN_URL)
      .header("Metadata-Flavor", "Google")
      .timeout(METADATA_TIMEOUT)
      .send()
      .ok()?;
    if !response.status().is_success() {
      return None;
    }
    response
      .json::<MetadataToken>()
      .ok()
      .map(|token| token.access_token)
  }

  fn download(
    &self,
    request: RequestBuilder,
    url: &str,
    sink: &mut dyn Write,
  ) -> Result<u64, FetchError> {
    let mut response = request.send()?;
    let status = response.status();
    if !status.is_success() {
      return Err(FetchError::Status {
        url: url.to_string(),
        status: status.as_u16(),
      });
    }
    let written = std::io::copy(&mut response, sink)?;
    debug!("已接收 {} 字节: {}", written, url);
    Ok(written)
  }
}

impl ArtifactFetcher for HttpFetcher {
  fn fetch(&self, source: &ArtifactSource, sink: &mut dyn Write) -> Result<u64, FetchError> {
    match source {
      ArtifactSource::Http(url) => self.download(self.client.get(url.clone()), url.as_str(), sink),
      ArtifactSource::Gcs(object) => {
        let url = Self::gcs_url(object);
        let mut request = self.client.get(&url);
        match self.gcs_token.clone().or_else(|| self.metadata_token()) {
          Some(token) => request = request.bearer_auth(token),
          None => warn!(
            "未找到 Cloud Storage 凭据，以匿名方式访问 gs://{}/{}",
            object.bucket, object.object
          ),
        }
        self.download(request, &url, sink)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn gcs_object_maps_to_json_api_url() {
    let object = GcsObject {
      bucket: "road-models".to_string(),
      object: "v2/sign best.onnx".to_string(),
    };
    assert_eq!(
      HttpFetcher::gcs_url(&object),
      "https://storage.googleapis.com/storage/v1/b/road-models/o/v2%2Fsign%20best.onnx?alt=media"
    );
  }
}
