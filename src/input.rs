// 该文件是 Lujian （路检） 项目的一部分。
// src/input.rs - 图像输入
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

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::debug;

/// 支持的图像扩展名（小写，含点号）
pub const SUPPORTED_FORMATS: [&str; 3] = [".jpg", ".jpeg", ".png"];

#[derive(Error, Debug)]
pub enum InputError {
  #[error("不支持的图像格式 '{extension}'，仅支持 .jpg、.jpeg、.png")]
  UnsupportedFormat { extension: String },
  #[error("无法打开图像 {path}: {source}")]
  Open {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无法解码图像 {path}: {source}")]
  Decode {
    path: PathBuf,
    source: image::ImageError,
  },
}

/// 返回带点号的小写扩展名，没有扩展名时返回空串
pub fn extension_of(path: &Path) -> String {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
    .unwrap_or_default()
}

/// 检查扩展名是否受支持（不区分大小写）
pub fn validate_format(path: &Path) -> Result<(), InputError> {
  let extension = extension_of(path);
  if SUPPORTED_FORMATS.contains(&extension.as_str()) {
    Ok(())
  } else {
    Err(InputError::UnsupportedFormat { extension })
  }
}

/// 读取图像并转换为 RGB
pub fn read_rgb_image(path: &Path) -> Result<RgbImage, InputError> {
  let reader = ImageReader::open(path).map_err(|source| InputError::Open {
    path: path.to_path_buf(),
    source,
  })?;
  let reader = reader.with_guessed_format().map_err(|source| InputError::Open {
    path: path.to_path_buf(),
    source,
  })?;
  let image = reader
    .decode()
    .map_err(|source| InputError::Decode {
      path: path.to_path_buf(),
      source,
    })?
    .to_rgb8();
  debug!(
    "读取图像 {}: {}x{}",
    path.display(),
    image.width(),
    image.height()
  );
  Ok(image)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn supported_extensions_pass() {
    for name in ["a.jpg", "b.jpeg", "c.png", "D.JPG", "e.Png", "dir.v2/f.JpEg"] {
      assert!(validate_format(Path::new(name)).is_ok(), "{name}");
    }
  }

  #[test]
  fn other_extensions_fail() {
    for (name, ext) in [("a.gif", ".gif"), ("b.bmp", ".bmp"), ("c.webp", ".webp"), ("noext", "")] {
      match validate_format(Path::new(name)) {
        Err(InputError::UnsupportedFormat { extension }) => assert_eq!(extension, ext),
        other => panic!("{name}: {other:?}"),
      }
    }
  }

  #[test]
  fn decodes_png_to_rgb() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pixel.png");
    image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]))
      .save(&path)
      .unwrap();

    let image = read_rgb_image(&path).unwrap();
    assert_eq!(image.dimensions(), (3, 2));
    assert_eq!(image.get_pixel(1, 1).0, [10, 20, 30]);
  }

  #[test]
  fn garbage_bytes_fail_to_decode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.jpg");
    std::fs::write(&path, b"not an image").unwrap();
    assert!(matches!(
      read_rgb_image(&path),
      Err(InputError::Decode { .. })
    ));
  }
}
