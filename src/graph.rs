// 该文件是 Shanan （山南西风） 项目的一部分。
// src/graph.rs - 计算图会话接口
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

use std::{fmt, num::ParseIntError, path::Path, str::FromStr};

use thiserror::Error;

use crate::{
  cancel::CancelToken,
  shape::{Shape, ShapeError},
  tensor::{Tensor, TensorError},
};

mod onnx;
mod tokenizer;

pub use self::onnx::{OnnxBackend, OnnxGraph};
pub use self::tokenizer::HfTokenizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
  Input,
  Output,
}

impl fmt::Display for IoKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      IoKind::Input => write!(f, "输入"),
      IoKind::Output => write!(f, "输出"),
    }
  }
}

#[derive(Error, Debug)]
pub enum GraphError {
  #[error("ONNX Runtime 错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("图 {graph} 没有第 {index} 个{kind}")]
  MissingIo {
    graph: String,
    kind: IoKind,
    index: usize,
  },
  #[error("图 {graph} 的第 {index} 个{kind}不是张量")]
  NotTensor {
    graph: String,
    kind: IoKind,
    index: usize,
  },
  #[error("图 {graph} 输入数量不符: 期望 {expected}, 实际 {actual}")]
  InputCount {
    graph: String,
    expected: usize,
    actual: usize,
  },
  #[error("不支持的元素类型: {0}")]
  UnsupportedType(String),
  #[error(transparent)]
  Shape(#[from] ShapeError),
  #[error(transparent)]
  Tensor(#[from] TensorError),
  #[error("分词器错误: {0}")]
  Tokenizer(String),
  #[error("后端错误: {0}")]
  Backend(String),
}

/// 执行设备，`"cuda:<n>"` 以外的字符串一律视为 CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
  #[default]
  Cpu,
  Cuda {
    device_id: i32,
  },
}

impl Device {
  pub fn parse(selector: &str) -> Result<Self, ParseIntError> {
    match selector.strip_prefix("cuda:") {
      Some(index) => Ok(Device::Cuda {
        device_id: index.parse()?,
      }),
      None => Ok(Device::Cpu),
    }
  }
}

impl FromStr for Device {
  type Err = ParseIntError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Device::parse(s)
  }
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
      Device::Cuda { device_id } => write!(f, "cuda:{}", device_id),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
  pub threads: usize,
  pub device: Device,
}

impl Default for ExecutionOptions {
  fn default() -> Self {
    Self {
      threads: std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1),
      device: Device::Cpu,
    }
  }
}

/// 已加载的单个计算图
pub trait GraphSession {
  fn name(&self) -> &str;
  fn input_shape(&self, index: usize) -> Result<Shape, GraphError>;
  fn output_shape(&self, index: usize) -> Result<Shape, GraphError>;
  /// 输入按图声明的输入顺序绑定
  fn run(&mut self, inputs: Vec<Tensor>, cancel: &CancelToken) -> Result<Vec<Tensor>, GraphError>;
}

pub trait TextTokenizer {
  fn encode(&self, text: &str) -> Result<Vec<i64>, GraphError>;
}

/// 创建图会话与分词器
pub trait Backend {
  type Graph: GraphSession;
  type Tokenizer: TextTokenizer;

  fn load_graph(&self, path: &Path, options: &ExecutionOptions) -> Result<Self::Graph, GraphError>;
  fn load_tokenizer(&self, path: &Path) -> Result<Self::Tokenizer, GraphError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn device_selector_parsing() {
    assert_eq!(Device::parse("cpu"), Ok(Device::Cpu));
    assert_eq!(Device::parse("cuda:1"), Ok(Device::Cuda { device_id: 1 }));
    assert_eq!(Device::parse("metal"), Ok(Device::Cpu));
    assert_eq!(Device::parse("CUDA:0"), Ok(Device::Cpu));
    assert!(Device::parse("cuda:x").is_err());
    assert!(Device::parse("cuda:").is_err());
  }

  #[test]
  fn device_round_trips_through_display() {
    let device = Device::Cuda { device_id: 3 };
    assert_eq!(device.to_string().parse::<Device>(), Ok(device));
  }
}
