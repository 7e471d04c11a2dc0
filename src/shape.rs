// 该文件是 Shanan （山南西风） 项目的一部分。
// src/shape.rs - 张量形状工具与特征金字塔形状推导
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

use std::fmt;

use thiserror::Error;
use tracing::warn;

/// 特征金字塔层数
pub const PYRAMID_LEVELS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
  #[error("形状包含动态维度: {0}")]
  Dynamic(Shape),
  #[error("维度索引越界: 形状 {shape}, 索引 {index}")]
  AxisOutOfRange { shape: Shape, index: usize },
  #[error("形状秩不符: 期望 {expected}, 实际 {actual}")]
  Rank { expected: usize, actual: usize },
  #[error("形状不一致: 期望 {expected}, 实际 {actual}")]
  Mismatch { expected: Shape, actual: Shape },
  #[error("元素数量溢出: {0}")]
  Overflow(Shape),
}

/// 有序的维度序列，负数表示动态维度
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<i64>);

impl Shape {
  pub fn new(dims: impl Into<Vec<i64>>) -> Self {
    Self(dims.into())
  }

  pub fn dims(&self) -> &[i64] {
    &self.0
  }

  pub fn rank(&self) -> usize {
    self.0.len()
  }

  pub fn dim(&self, index: usize) -> Option<i64> {
    self.0.get(index).copied()
  }

  pub fn is_static(&self) -> bool {
    self.0.iter().all(|&d| d >= 0)
  }

  /// 元素总数，标量（秩为 0）记为 1
  pub fn element_count(&self) -> Result<usize, ShapeError> {
    if !self.is_static() {
      return Err(ShapeError::Dynamic(self.clone()));
    }
    self
      .0
      .iter()
      .try_fold(1usize, |acc, &d| acc.checked_mul(d as usize))
      .ok_or_else(|| ShapeError::Overflow(self.clone()))
  }

  /// 覆盖指定维度，返回新形状
  pub fn with_dim(&self, index: usize, value: i64) -> Result<Shape, ShapeError> {
    if index >= self.rank() {
      return Err(ShapeError::AxisOutOfRange {
        shape: self.clone(),
        index,
      });
    }
    let mut dims = self.0.clone();
    dims[index] = value;
    Ok(Shape(dims))
  }

  /// 单图单会话推理，批次维度固定为 1
  pub fn pin_batch(&self) -> Result<Shape, ShapeError> {
    self.with_dim(0, 1)
  }

  /// NCHW 形状的空间尺寸 (h, w)
  pub fn spatial(&self) -> Option<(i64, i64)> {
    match self.0.as_slice() {
      [_, _, h, w] => Some((*h, *w)),
      _ => None,
    }
  }

  /// 按倍数放大 NCHW 形状的空间维度，通道数保持不变
  pub fn scale_spatial(&self, factor: i64) -> Result<Shape, ShapeError> {
    if self.rank() != 4 {
      return Err(ShapeError::Rank {
        expected: 4,
        actual: self.rank(),
      });
    }
    let mut dims = self.0.clone();
    dims[2] *= factor;
    dims[3] *= factor;
    Ok(Shape(dims))
  }

  pub fn to_usize(&self) -> Result<Vec<usize>, ShapeError> {
    if !self.is_static() {
      return Err(ShapeError::Dynamic(self.clone()));
    }
    Ok(self.0.iter().map(|&d| d as usize).collect())
  }

  pub fn require_static(self) -> Result<Shape, ShapeError> {
    if self.is_static() {
      Ok(self)
    } else {
      Err(ShapeError::Dynamic(self))
    }
  }
}

impl From<Vec<i64>> for Shape {
  fn from(dims: Vec<i64>) -> Self {
    Self(dims)
  }
}

impl From<&[i64]> for Shape {
  fn from(dims: &[i64]) -> Self {
    Self(dims.to_vec())
  }
}

impl<const N: usize> From<[i64; N]> for Shape {
  fn from(dims: [i64; N]) -> Self {
    Self(dims.to_vec())
  }
}

impl fmt::Display for Shape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, d) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      if *d < 0 {
        write!(f, "?")?;
      } else {
        write!(f, "{}", d)?;
      }
    }
    write!(f, "]")
  }
}

/// 特征金字塔形状推导规则
///
/// 模型只查询最精细层（第 3 层）的形状，其余各层由第 3 层的空间尺寸
/// 乘以对应倍数得到。若视觉图对某层声明了完整的静态形状，则以声明为准：
/// `strict` 为假时仅记录警告，为真时直接报错。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidRule {
  pub scales: [i64; PYRAMID_LEVELS],
  pub strict: bool,
}

impl Default for PyramidRule {
  fn default() -> Self {
    Self {
      scales: [4, 2, 2, 1],
      strict: false,
    }
  }
}

impl PyramidRule {
  pub fn with_scales(mut self, scales: [i64; PYRAMID_LEVELS]) -> Self {
    self.scales = scales;
    self
  }

  pub fn strict(mut self, strict: bool) -> Self {
    self.strict = strict;
    self
  }

  /// 纯算术推导：第 i 层 = 第 3 层空间尺寸 × scales[i]
  pub fn derive(&self, finest: &Shape) -> Result<[Shape; PYRAMID_LEVELS], ShapeError> {
    Ok([
      finest.scale_spatial(self.scales[0])?,
      finest.scale_spatial(self.scales[1])?,
      finest.scale_spatial(self.scales[2])?,
      finest.scale_spatial(self.scales[3])?,
    ])
  }

  /// 与模型声明的输出形状核对，`declared` 中的动态形状不参与核对
  pub fn reconcile(
    &self,
    derived: [Shape; PYRAMID_LEVELS],
    declared: &[Shape],
  ) -> Result<[Shape; PYRAMID_LEVELS], ShapeError> {
    let mut levels = derived;
    for (level, declared) in declared.iter().enumerate().take(PYRAMID_LEVELS) {
      if !declared.is_static() || *declared == levels[level] {
        continue;
      }
      if self.strict {
        return Err(ShapeError::Mismatch {
          expected: levels[level].clone(),
          actual: declared.clone(),
        });
      }
      warn!(
        "金字塔第 {} 层推导形状 {} 与模型声明 {} 不一致，采用模型声明",
        level, levels[level], declared
      );
      levels[level] = declared.clone();
    }
    Ok(levels)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn element_count_of_static_shapes() {
    assert_eq!(Shape::from([1, 3, 4, 5]).element_count(), Ok(60));
    assert_eq!(Shape::from([1, 0, 4]).element_count(), Ok(0));
    assert_eq!(Shape::new(Vec::new()).element_count(), Ok(1));
  }

  #[test]
  fn dynamic_dims_have_no_element_count() {
    let shape = Shape::from([-1, 32]);
    assert!(matches!(shape.element_count(), Err(ShapeError::Dynamic(_))));
    assert_eq!(shape.pin_batch().unwrap().element_count(), Ok(32));
  }

  #[test]
  fn with_dim_overrides_only_one_axis() {
    let shape = Shape::from([1, 32, 256]);
    assert_eq!(shape.with_dim(1, 3).unwrap(), Shape::from([1, 3, 256]));
    assert!(matches!(
      shape.with_dim(3, 1),
      Err(ShapeError::AxisOutOfRange { index: 3, .. })
    ));
  }

  #[test]
  fn display_marks_dynamic_dims() {
    assert_eq!(Shape::from([-1, 3, 8, 8]).to_string(), "[?, 3, 8, 8]");
  }

  #[test]
  fn pyramid_levels_scale_from_the_finest_level() {
    let finest = Shape::from([1, 256, 72, 72]);
    let levels = PyramidRule::default().derive(&finest).unwrap();
    assert_eq!(levels[0], Shape::from([1, 256, 288, 288]));
    assert_eq!(levels[1], Shape::from([1, 256, 144, 144]));
    assert_eq!(levels[2], Shape::from([1, 256, 144, 144]));
    assert_eq!(levels[3], finest);
  }

  #[test]
  fn pyramid_keeps_non_square_aspect() {
    let levels = PyramidRule::default()
      .derive(&Shape::from([1, 8, 3, 5]))
      .unwrap();
    assert_eq!(levels[0].spatial(), Some((12, 20)));
    assert_eq!(levels[2].spatial(), Some((6, 10)));
    assert!(levels.iter().all(|s| s.dim(1) == Some(8)));
  }

  #[test]
  fn declared_static_shape_wins_unless_strict() {
    let rule = PyramidRule::default().with_scales([4, 2, 1, 1]);
    let derived = rule.derive(&Shape::from([1, 4, 2, 2])).unwrap();
    let declared = vec![
      Shape::from([-1, -1, -1, -1]),
      Shape::from([1, 4, 4, 4]),
      Shape::from([1, 4, 4, 4]),
    ];

    let levels = rule.reconcile(derived.clone(), &declared).unwrap();
    assert_eq!(levels[0], Shape::from([1, 4, 8, 8]));
    assert_eq!(levels[2], Shape::from([1, 4, 4, 4]));

    let err = rule.strict(true).reconcile(derived, &declared).unwrap_err();
    assert!(matches!(err, ShapeError::Mismatch { .. }));
  }
}
