// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output.rs - 输出定义
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

use crate::pipeline::Detection;

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

pub mod draw;

mod save_masks;
pub use self::save_masks::{SaveMasksError, SaveMasksOutput};

/// 一次阈值筛选的结果
#[derive(Debug, Clone)]
pub struct SegmentResult {
  pub text: String,
  pub threshold: f32,
  pub detections: Vec<Detection>,
  /// 输出子目录，阈值扫描时每个阈值各占一个
  pub name: Option<String>,
}

impl SegmentResult {
  pub fn new(text: impl Into<String>, threshold: f32, detections: Vec<Detection>) -> Self {
    Self {
      text: text.into(),
      threshold,
      detections,
      name: None,
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }
}
