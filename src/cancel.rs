// 该文件是 Shanan （山南西风） 项目的一部分。
// src/cancel.rs - 协作式取消令牌
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

//! 取消请求在下一个阶段边界被消费：阶段调用图之前先检查并清除请求，
//! 若请求存在则该阶段直接失败；阶段结束时残留的请求同样被清除。
//! 正在执行的图通过 [`Interrupt`] 接收运行时自身的终止信号。

use std::sync::{
  Arc, Mutex, MutexGuard,
  atomic::{AtomicBool, Ordering},
};

use tracing::debug;

/// 运行时终止信号，例如 ONNX Runtime 的 `RunOptions`
pub trait Interrupt: Send + Sync {
  fn interrupt(&self);
  fn resume(&self);
}

#[derive(Default)]
struct CancelInner {
  requested: AtomicBool,
  attached: Mutex<Option<Arc<dyn Interrupt>>>,
}

#[derive(Clone, Default)]
pub struct CancelToken {
  inner: Arc<CancelInner>,
}

impl std::fmt::Debug for CancelToken {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CancelToken")
      .field("requested", &self.is_requested())
      .finish()
  }
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  /// 请求取消，并中断当前挂接的图执行
  pub fn cancel(&self) {
    self.inner.requested.store(true, Ordering::SeqCst);
    if let Some(interrupt) = self.attached().as_ref() {
      debug!("中断正在执行的图");
      interrupt.interrupt();
    }
  }

  pub fn is_requested(&self) -> bool {
    self.inner.requested.load(Ordering::SeqCst)
  }

  /// 消费挂起的取消请求，返回此前是否存在请求
  pub fn consume(&self) -> bool {
    self.inner.requested.swap(false, Ordering::SeqCst)
  }

  /// 在图执行期间挂接运行时终止信号，挂接前先解除上一次的终止状态
  pub fn attach(&self, interrupt: Arc<dyn Interrupt>) -> Attached<'_> {
    interrupt.resume();
    *self.attached() = Some(interrupt.clone());
    if self.is_requested() {
      interrupt.interrupt();
    }
    Attached { token: self }
  }

  fn attached(&self) -> MutexGuard<'_, Option<Arc<dyn Interrupt>>> {
    self
      .inner
      .attached
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

/// 图执行结束时解除挂接
pub struct Attached<'a> {
  token: &'a CancelToken,
}

impl Drop for Attached<'_> {
  fn drop(&mut self) {
    self.token.attached().take();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  #[derive(Default)]
  struct Counter {
    interrupts: AtomicUsize,
    resumes: AtomicUsize,
  }

  impl Interrupt for Counter {
    fn interrupt(&self) {
      self.interrupts.fetch_add(1, Ordering::SeqCst);
    }
    fn resume(&self) {
      self.resumes.fetch_add(1, Ordering::SeqCst);
    }
  }

  #[test]
  fn request_is_consumed_once() {
    let token = CancelToken::new();
    token.cancel();
    assert!(token.is_requested());
    assert!(token.consume());
    assert!(!token.consume());
  }

  #[test]
  fn clones_share_the_request() {
    let token = CancelToken::new();
    let remote = token.clone();
    std::thread::spawn(move || remote.cancel()).join().unwrap();
    assert!(token.consume());
  }

  #[test]
  fn cancel_interrupts_attached_run() {
    let token = CancelToken::new();
    let counter = Arc::new(Counter::default());
    {
      let _attached = token.attach(counter.clone());
      assert_eq!(counter.resumes.load(Ordering::SeqCst), 1);
      token.cancel();
      assert_eq!(counter.interrupts.load(Ordering::SeqCst), 1);
    }
    token.consume();
    token.cancel();
    assert_eq!(counter.interrupts.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn pending_request_interrupts_on_attach() {
    let token = CancelToken::new();
    token.cancel();
    let counter = Arc::new(Counter::default());
    let _attached = token.attach(counter.clone());
    assert_eq!(counter.interrupts.load(Ordering::SeqCst), 1);
  }
}
