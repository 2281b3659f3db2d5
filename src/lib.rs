// 该文件是 Lujian （路检） 项目的一部分。
// src/lib.rs - 库主文件
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

//! 道路设施图像检测：交通信号灯、交通标志、照明设施、标志与信号设施损坏
//! 的目标检测，以及路面标线状况分类。
//!
//! 模型文件按需从预置目录、缓存目录或远程地址获取，首次使用时加载。

pub mod artifact;
pub mod config;
pub mod detector;
pub mod input;
pub mod model;
pub mod output;
pub mod provision;
pub mod server;

/// 由 URL 构造
pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

/// 只接受单一 URL 方案的类型
pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}
