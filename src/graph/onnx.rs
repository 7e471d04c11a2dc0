// 该文件是 Shanan （山南西风） 项目的一部分。
// src/graph/onnx.rs - ONNX Runtime 图会话
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

use std::{path::Path, sync::Arc};

use ort::{
  session::{
    RunOptions, Session, SessionInputValue,
    builder::{GraphOptimizationLevel, SessionBuilder},
  },
  tensor::TensorElementType,
  value::{DynValue, ValueRef, ValueType},
};
use tracing::{debug, info, warn};

use crate::{
  cancel::{CancelToken, Interrupt},
  graph::{Backend, Device, ExecutionOptions, GraphError, GraphSession, HfTokenizer, IoKind},
  shape::Shape,
  tensor::{Tensor, TensorData},
};

#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxBackend;

impl OnnxBackend {
  pub fn new() -> Self {
    Self
  }
}

struct RunInterrupt(RunOptions);

impl Interrupt for RunInterrupt {
  fn interrupt(&self) {
    if let Err(e) = self.0.terminate() {
      warn!("设置运行终止标志失败: {}", e);
    }
  }

  fn resume(&self) {
    if let Err(e) = self.0.unterminate() {
      warn!("清除运行终止标志失败: {}", e);
    }
  }
}

pub struct OnnxGraph {
  name: String,
  session: Session,
  input_names: Vec<String>,
  run_options: Arc<RunInterrupt>,
}

impl Backend for OnnxBackend {
  type Graph = OnnxGraph;
  type Tokenizer = HfTokenizer;

  fn load_graph(&self, path: &Path, options: &ExecutionOptions) -> Result<OnnxGraph, GraphError> {
    let name = path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| path.display().to_string());
    info!("加载计算图: {} ({})", name, path.display());

    let builder = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(options.threads)?;
    let builder = configure_device(builder, options.device)?;
    let session = builder.commit_from_file(path)?;

    let input_names = session
      .inputs
      .iter()
      .map(|input| input.name.clone())
      .collect::<Vec<_>>();
    debug!(
      "图 {} 输入: {:?}, 输出: {:?}",
      name,
      input_names,
      session
        .outputs
        .iter()
        .map(|o| o.name.as_str())
        .collect::<Vec<_>>()
    );

    Ok(OnnxGraph {
      name,
      session,
      input_names,
      run_options: Arc::new(RunInterrupt(RunOptions::new()?)),
    })
  }

  fn load_tokenizer(&self, path: &Path) -> Result<HfTokenizer, GraphError> {
    HfTokenizer::from_file(path)
  }
}

fn configure_device(builder: SessionBuilder, device: Device) -> Result<SessionBuilder, GraphError> {
  match device {
    Device::Cpu => Ok(builder),
    Device::Cuda { device_id } => configure_cuda(builder, device_id),
  }
}

fn configure_cuda(builder: SessionBuilder, device_id: i32) -> Result<SessionBuilder, GraphError> {
  #[cfg(feature = "cuda")]
  {
    use ort::execution_providers::cuda::CUDAExecutionProvider;
    info!("启用 CUDA 执行设备: {}", device_id);
    let provider = CUDAExecutionProvider::default()
      .with_device_id(device_id)
      .build();
    Ok(builder.with_execution_providers([provider])?)
  }
  #[cfg(not(feature = "cuda"))]
  {
    let _ = builder;
    Err(GraphError::Backend(format!(
      "请求了 cuda:{} 但编译时未启用 `cuda` 特性",
      device_id
    )))
  }
}

impl OnnxGraph {
  fn value_shape(&self, kind: IoKind, index: usize, ty: &ValueType) -> Result<Shape, GraphError> {
    let ValueType::Tensor { shape, .. } = ty else {
      return Err(GraphError::NotTensor {
        graph: self.name.clone(),
        kind,
        index,
      });
    };
    Ok(Shape::new(shape.iter().copied().collect::<Vec<i64>>()))
  }

  fn missing(&self, kind: IoKind, index: usize) -> GraphError {
    GraphError::MissingIo {
      graph: self.name.clone(),
      kind,
      index,
    }
  }
}

impl GraphSession for OnnxGraph {
  fn name(&self) -> &str {
    &self.name
  }

  fn input_shape(&self, index: usize) -> Result<Shape, GraphError> {
    let input = self
      .session
      .inputs
      .get(index)
      .ok_or_else(|| self.missing(IoKind::Input, index))?;
    self.value_shape(IoKind::Input, index, &input.input_type)
  }

  fn output_shape(&self, index: usize) -> Result<Shape, GraphError> {
    let output = self
      .session
      .outputs
      .get(index)
      .ok_or_else(|| self.missing(IoKind::Output, index))?;
    self.value_shape(IoKind::Output, index, &output.output_type)
  }

  fn run(&mut self, inputs: Vec<Tensor>, cancel: &CancelToken) -> Result<Vec<Tensor>, GraphError> {
    if inputs.len() != self.input_names.len() {
      return Err(GraphError::InputCount {
        graph: self.name.clone(),
        expected: self.input_names.len(),
        actual: inputs.len(),
      });
    }

    let mut ort_inputs = Vec::with_capacity(inputs.len());
    for (name, tensor) in self.input_names.iter().zip(inputs) {
      ort_inputs.push((name.clone(), SessionInputValue::from(to_ort_value(tensor)?)));
    }

    let interrupt: Arc<dyn Interrupt> = self.run_options.clone();
    let _attached = cancel.attach(interrupt);
    debug!("执行计算图: {}", self.name);
    let outputs = self
      .session
      .run_with_options(ort_inputs, &self.run_options.0)?;

    let mut tensors = Vec::with_capacity(outputs.len());
    for (_, value) in outputs.iter() {
      tensors.push(from_ort_value(&value)?);
    }
    Ok(tensors)
  }
}

fn to_ort_value(tensor: Tensor) -> Result<DynValue, GraphError> {
  let shape = tensor.shape().to_usize()?;
  let value = match tensor.into_data() {
    TensorData::F32(data) => ort::value::Tensor::from_array((shape, data))?.into_dyn(),
    TensorData::I64(data) => ort::value::Tensor::from_array((shape, data))?.into_dyn(),
    TensorData::Bool(data) => ort::value::Tensor::from_array((shape, data))?.into_dyn(),
  };
  Ok(value)
}

fn from_ort_value(value: &ValueRef<'_>) -> Result<Tensor, GraphError> {
  let ValueType::Tensor { ty, .. } = value.dtype() else {
    return Err(GraphError::UnsupportedType("非张量输出".to_string()));
  };

  let tensor = match *ty {
    TensorElementType::Float32 => {
      let (shape, data) = value.try_extract_tensor::<f32>()?;
      Tensor::f32(Shape::new(shape.to_vec()), data.to_vec())?
    }
    TensorElementType::Int64 => {
      let (shape, data) = value.try_extract_tensor::<i64>()?;
      Tensor::i64(Shape::new(shape.to_vec()), data.to_vec())?
    }
    TensorElementType::Bool => {
      let (shape, data) = value.try_extract_tensor::<bool>()?;
      Tensor::bool(Shape::new(shape.to_vec()), data.to_vec())?
    }
    other => return Err(GraphError::UnsupportedType(format!("{:?}", other))),
  };
  Ok(tensor)
}
