// 该文件是 Shanan （山南西风） 项目的一部分。
// src/state.rs - 流水线状态机
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

use std::sync::{
  Arc,
  atomic::{AtomicU8, Ordering},
};

use thiserror::Error;

use crate::cancel::CancelToken;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Idle = 0,
  Loading = 1,
  Processing = 2,
}

impl Phase {
  fn from_u8(value: u8) -> Self {
    match value {
      1 => Phase::Loading,
      2 => Phase::Processing,
      _ => Phase::Idle,
    }
  }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("流水线正忙: {0:?}")]
pub struct BusyError(pub Phase);

/// 记录加载或处理是否在进行中，克隆后共享同一状态
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
  phase: Arc<AtomicU8>,
}

impl PipelineState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn phase(&self) -> Phase {
    Phase::from_u8(self.phase.load(Ordering::SeqCst))
  }

  pub fn is_loading(&self) -> bool {
    self.phase() == Phase::Loading
  }

  pub fn is_processing(&self) -> bool {
    self.phase() == Phase::Processing
  }

  /// 空闲时才允许释放模型资源
  pub fn can_teardown(&self) -> bool {
    self.phase() == Phase::Idle
  }

  /// 进入加载或处理阶段，守卫释放时回到空闲
  pub fn enter(&self, phase: Phase) -> Result<StageGuard, BusyError> {
    self
      .phase
      .compare_exchange(
        Phase::Idle as u8,
        phase as u8,
        Ordering::SeqCst,
        Ordering::SeqCst,
      )
      .map_err(|current| BusyError(Phase::from_u8(current)))?;
    Ok(StageGuard {
      phase: self.phase.clone(),
      cancel: None,
    })
  }
}

pub struct StageGuard {
  phase: Arc<AtomicU8>,
  cancel: Option<CancelToken>,
}

impl StageGuard {
  /// 阶段结束时一并清除残留的取消请求
  pub fn consuming(mut self, cancel: &CancelToken) -> Self {
    self.cancel = Some(cancel.clone());
    self
  }
}

impl Drop for StageGuard {
  fn drop(&mut self) {
    self.phase.store(Phase::Idle as u8, Ordering::SeqCst);
    if let Some(cancel) = self.cancel.take() {
      cancel.consume();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn guard_resets_phase_on_drop() {
    let state = PipelineState::new();
    {
      let _guard = state.enter(Phase::Loading).unwrap();
      assert!(state.is_loading());
      assert!(!state.can_teardown());
    }
    assert_eq!(state.phase(), Phase::Idle);
    assert!(state.can_teardown());
  }

  #[test]
  fn second_enter_is_rejected_while_busy() {
    let state = PipelineState::new();
    let probe = state.clone();
    let _guard = state.enter(Phase::Processing).unwrap();
    assert_eq!(
      probe.enter(Phase::Loading).err(),
      Some(BusyError(Phase::Processing))
    );
    assert!(probe.is_processing());
  }

  #[test]
  fn guard_resets_even_when_stage_fails() {
    fn failing_stage(state: &PipelineState) -> Result<(), String> {
      let _guard = state.enter(Phase::Processing).map_err(|e| e.to_string())?;
      Err("图执行失败".to_string())
    }
    let state = PipelineState::new();
    assert!(failing_stage(&state).is_err());
    assert!(state.can_teardown());
  }

  #[test]
  fn guard_consumes_leftover_cancel_request() {
    let state = PipelineState::new();
    let cancel = CancelToken::new();
    {
      let _guard = state.enter(Phase::Processing).unwrap().consuming(&cancel);
      cancel.cancel();
    }
    assert!(!cancel.is_requested());
  }
}
