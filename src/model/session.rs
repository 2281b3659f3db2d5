// 该文件是 Lujian （路检） 项目的一部分。
// src/model/session.rs - ONNX Runtime 会话
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

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;
use tracing::{info, warn};

use super::{Device, InferError};

/// 选择推理设备，CUDA 可用时优先
pub fn select_device() -> Device {
  match CUDAExecutionProvider::default().is_available() {
    Ok(true) => Device::Cuda,
    Ok(false) => Device::Cpu,
    Err(e) => {
      warn!("无法确认 CUDA 是否可用，使用 CPU: {}", e);
      Device::Cpu
    }
  }
}

/// 推理会话；`Session::run` 需要可变引用，每个模型独占一个锁
pub(super) struct InferSession {
  session: Mutex<Session>,
  device: Device,
}

impl InferSession {
  pub fn open(path: &Path, device: Device) -> ort::Result<Self> {
    let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    if device == Device::Cuda {
      builder = builder
        .with_execution_providers([CUDAExecutionProvider::default().build().error_on_failure()])?;
    }
    let session = builder.commit_from_file(path)?;
    info!("已打开模型 {}，设备: {}", path.display(), device);
    Ok(Self {
      session: Mutex::new(session),
      device,
    })
  }

  pub fn device(&self) -> Device {
    self.device
  }

  fn lock(&self) -> Result<MutexGuard<'_, Session>, InferError> {
    self.session.lock().map_err(|_| InferError::Poisoned)
  }

  /// 读取模型元数据中的自定义字段
  pub fn custom_metadata(&self, key: &str) -> Result<Option<String>, InferError> {
    let session = self.lock()?;
    let metadata = session.metadata()?;
    Ok(metadata.custom(key)?)
  }

  /// 单输入单输出的前向推理，返回输出形状与数据
  pub fn run(&self, input: ndarray::Array4<f32>) -> Result<(Vec<i64>, Vec<f32>), InferError> {
    let tensor = Tensor::from_array(input)?;
    let mut session = self.lock()?;
    let outputs = session.run(ort::inputs![tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
    Ok((shape.iter().copied().collect(), data.to_vec()))
  }
}

/// 解析 ultralytics 导出时写入的类别名称，如 `{0: 'stop', 1: "yield"}`
pub fn parse_class_names(raw: &str) -> BTreeMap<usize, String> {
  raw
    .trim()
    .trim_start_matches('{')
    .trim_end_matches('}')
    .split(',')
    .filter_map(|entry| {
      let (id, name) = entry.split_once(':')?;
      let id = id.trim().parse::<usize>().ok()?;
      let name = name.trim().trim_matches(|c| c == '\'' || c == '"');
      Some((id, name.to_string()))
    })
    .collect()
}

/// 解析 `imgsz` 元数据，如 `[640, 640]`
pub fn parse_input_size(raw: &str) -> Option<(u32, u32)> {
  let mut dims = raw
    .trim()
    .trim_start_matches('[')
    .trim_end_matches(']')
    .split(',')
    .map(|v| v.trim().parse::<u32>().ok());
  let height = dims.next()??;
  let width = dims.next().flatten().unwrap_or(height);
  (height > 0 && width > 0).then_some((width, height))
}
