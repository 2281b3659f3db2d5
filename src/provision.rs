// 该文件是 Lujian （路检） 项目的一部分。
// src/provision.rs - 模型的延迟加载与共享
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
use std::error::Error as StdError;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use thiserror::Error;
use tracing::{error, info};

/// 共享的加载失败原因
pub type LoadCause = Arc<dyn StdError + Send + Sync>;

#[derive(Error, Debug, Clone)]
pub enum ProvisionError {
  #[error("模型 {key} 加载失败: {cause}")]
  ModelLoadFailed { key: String, cause: LoadCause },
  #[error("未注册的模型: {0}")]
  UnknownModel(String),
}

/// 模型加载器
pub trait Loader: Send + Sync {
  type Key: Copy + Eq + Hash + fmt::Display + Send + Sync;
  type Handle: Send + Sync;
  type Error: StdError + Send + Sync + 'static;

  fn load(&self, key: Self::Key) -> Result<Self::Handle, Self::Error>;
}

#[derive(Default)]
struct LoadState {
  failures: u64,
  last_failure: Option<LoadCause>,
}

/// 单个模型的加载槽
///
/// 已加载时直接读取，不加锁；未加载时由第一个拿到锁的调用者执行加载，
/// 其余调用者在锁上等待。加载失败不会被缓存：正在等待这次加载的调用者
/// 得到同一个错误，之后到达的调用者重新加载。
pub struct ModelSlot<H> {
  ready: OnceLock<Arc<H>>,
  gate: Mutex<LoadState>,
  failures: AtomicU64,
}

impl<H> Default for ModelSlot<H> {
  fn default() -> Self {
    Self {
      ready: OnceLock::new(),
      gate: Mutex::new(LoadState::default()),
      failures: AtomicU64::new(0),
    }
  }
}

impl<H> ModelSlot<H> {
  pub fn get(&self) -> Option<Arc<H>> {
    self.ready.get().cloned()
  }

  pub fn get_or_load<E, F>(&self, key: &str, load: F) -> Result<Arc<H>, ProvisionError>
  where
    E: StdError + Send + Sync + 'static,
    F: FnOnce() -> Result<H, E>,
  {
    if let Some(handle) = self.ready.get() {
      return Ok(handle.clone());
    }

    let seen_failures = self.failures.load(Ordering::Acquire);
    let mut state = self.gate.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(handle) = self.ready.get() {
      return Ok(handle.clone());
    }
    // 等锁期间前一次加载失败了
    if state.failures > seen_failures
      && let Some(cause) = &state.last_failure
    {
      return Err(ProvisionError::ModelLoadFailed {
        key: key.to_string(),
        cause: cause.clone(),
      });
    }

    match load() {
      Ok(handle) => {
        let handle = Arc::new(handle);
        let _ = self.ready.set(handle.clone());
        Ok(handle)
      }
      Err(e) => {
        let cause: LoadCause = Arc::new(e);
        state.failures += 1;
        state.last_failure = Some(cause.clone());
        self.failures.store(state.failures, Ordering::Release);
        Err(ProvisionError::ModelLoadFailed {
          key: key.to_string(),
          cause,
        })
      }
    }
  }
}

/// 按键管理模型加载槽，槽在构造时为每个键建立
pub struct Provisioner<L: Loader> {
  loader: L,
  slots: HashMap<L::Key, ModelSlot<L::Handle>>,
}

impl<L: Loader> Provisioner<L> {
  pub fn new(loader: L, keys: impl IntoIterator<Item = L::Key>) -> Self {
    let slots = keys
      .into_iter()
      .map(|key| (key, ModelSlot::default()))
      .collect();
    Self { loader, slots }
  }

  pub fn loader(&self) -> &L {
    &self.loader
  }

  pub fn is_loaded(&self, key: L::Key) -> bool {
    self
      .slots
      .get(&key)
      .is_some_and(|slot| slot.get().is_some())
  }

  /// 返回已加载的模型，首次调用时加载
  pub fn get_handle(&self, key: L::Key) -> Result<Arc<L::Handle>, ProvisionError> {
    let slot = self
      .slots
      .get(&key)
      .ok_or_else(|| ProvisionError::UnknownModel(key.to_string()))?;

    slot.get_or_load(&key.to_string(), || {
      info!("开始加载模型: {}", key);
      let start = Instant::now();
      let result = self.loader.load(key);
      match &result {
        Ok(_) => info!("模型 {} 加载完成，用时 {:?}", key, start.elapsed()),
        Err(e) => error!("模型 {} 加载失败: {}", key, e),
      }
      result
    })
  }
}
