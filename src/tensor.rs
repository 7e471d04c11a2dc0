// 该文件是 Shanan （山南西风） 项目的一部分。
// src/tensor.rs - 图输入输出张量
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

use thiserror::Error;

use crate::shape::{Shape, ShapeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
  F32,
  I64,
  Bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  F32(Vec<f32>),
  I64(Vec<i64>),
  Bool(Vec<bool>),
}

impl TensorData {
  pub fn len(&self) -> usize {
    match self {
      TensorData::F32(v) => v.len(),
      TensorData::I64(v) => v.len(),
      TensorData::Bool(v) => v.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn element_type(&self) -> ElementType {
    match self {
      TensorData::F32(_) => ElementType::F32,
      TensorData::I64(_) => ElementType::I64,
      TensorData::Bool(_) => ElementType::Bool,
    }
  }
}

#[derive(Error, Debug)]
pub enum TensorError {
  #[error(transparent)]
  Shape(#[from] ShapeError),
  #[error("数据长度与形状不符: 形状 {shape} 需要 {expected} 个元素, 实际 {actual}")]
  Length {
    shape: Shape,
    expected: usize,
    actual: usize,
  },
  #[error("元素类型不符: 期望 {expected:?}, 实际 {actual:?}")]
  ElementType {
    expected: ElementType,
    actual: ElementType,
  },
  #[error("无法沿维度 {axis} 拼接 {left} 与 {right}")]
  Concat { axis: usize, left: Shape, right: Shape },
}

/// 带静态形状的稠密张量
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: Shape,
  data: TensorData,
}

impl Tensor {
  pub fn new(shape: Shape, data: TensorData) -> Result<Self, TensorError> {
    let expected = shape.element_count()?;
    if expected != data.len() {
      return Err(TensorError::Length {
        shape,
        expected,
        actual: data.len(),
      });
    }
    Ok(Self { shape, data })
  }

  pub fn f32(shape: impl Into<Shape>, data: Vec<f32>) -> Result<Self, TensorError> {
    Self::new(shape.into(), TensorData::F32(data))
  }

  pub fn i64(shape: impl Into<Shape>, data: Vec<i64>) -> Result<Self, TensorError> {
    Self::new(shape.into(), TensorData::I64(data))
  }

  pub fn bool(shape: impl Into<Shape>, data: Vec<bool>) -> Result<Self, TensorError> {
    Self::new(shape.into(), TensorData::Bool(data))
  }

  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn data(&self) -> &TensorData {
    &self.data
  }

  pub fn into_data(self) -> TensorData {
    self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn element_type(&self) -> ElementType {
    self.data.element_type()
  }

  /// 重新解释形状，元素数量必须一致
  pub fn reshape(self, shape: Shape) -> Result<Self, TensorError> {
    Self::new(shape, self.data)
  }

  pub fn as_f32(&self) -> Result<&[f32], TensorError> {
    match &self.data {
      TensorData::F32(v) => Ok(v),
      other => Err(self.type_error(ElementType::F32, other)),
    }
  }

  pub fn as_i64(&self) -> Result<&[i64], TensorError> {
    match &self.data {
      TensorData::I64(v) => Ok(v),
      other => Err(self.type_error(ElementType::I64, other)),
    }
  }

  pub fn as_bool(&self) -> Result<&[bool], TensorError> {
    match &self.data {
      TensorData::Bool(v) => Ok(v),
      other => Err(self.type_error(ElementType::Bool, other)),
    }
  }

  fn type_error(&self, expected: ElementType, actual: &TensorData) -> TensorError {
    TensorError::ElementType {
      expected,
      actual: actual.element_type(),
    }
  }

  /// 沿 `axis` 拼接两个张量，其余维度与元素类型必须一致
  pub fn concat(&self, other: &Tensor, axis: usize) -> Result<Tensor, TensorError> {
    let (left, right) = (self.shape.dims(), other.shape.dims());
    let compatible = left.len() == right.len()
      && axis < left.len()
      && left
        .iter()
        .zip(right)
        .enumerate()
        .all(|(i, (a, b))| i == axis || a == b);
    if !compatible {
      return Err(TensorError::Concat {
        axis,
        left: self.shape.clone(),
        right: other.shape.clone(),
      });
    }

    let outer: usize = left[..axis].iter().map(|&d| d as usize).product();
    let inner: usize = left[axis + 1..].iter().map(|&d| d as usize).product();
    let left_chunk = left[axis] as usize * inner;
    let right_chunk = right[axis] as usize * inner;
    let shape = self.shape.with_dim(axis, left[axis] + right[axis])?;

    let data = match (&self.data, &other.data) {
      (TensorData::F32(a), TensorData::F32(b)) => {
        TensorData::F32(interleave(a, b, outer, left_chunk, right_chunk))
      }
      (TensorData::I64(a), TensorData::I64(b)) => {
        TensorData::I64(interleave(a, b, outer, left_chunk, right_chunk))
      }
      (TensorData::Bool(a), TensorData::Bool(b)) => {
        TensorData::Bool(interleave(a, b, outer, left_chunk, right_chunk))
      }
      (a, b) => {
        return Err(TensorError::ElementType {
          expected: a.element_type(),
          actual: b.element_type(),
        });
      }
    };
    Tensor::new(shape, data)
  }
}

fn interleave<T: Clone>(a: &[T], b: &[T], outer: usize, a_chunk: usize, b_chunk: usize) -> Vec<T> {
  let mut out = Vec::with_capacity(a.len() + b.len());
  for o in 0..outer {
    out.extend_from_slice(&a[o * a_chunk..(o + 1) * a_chunk]);
    out.extend_from_slice(&b[o * b_chunk..(o + 1) * b_chunk]);
  }
  out
}
