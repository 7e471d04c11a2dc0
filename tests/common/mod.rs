// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/common/mod.rs - 测试用的计算图桩
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

#![allow(dead_code)]

use std::{
  path::Path,
  sync::{Arc, Mutex},
};

use image::RgbImage;
use shanan_seg::{
  CancelToken, ModelBundle,
  graph::{Backend, ExecutionOptions, GraphError, GraphSession, TextTokenizer},
  shape::Shape,
  tensor::Tensor,
};
use tempfile::TempDir;

/// 视觉输入边长
pub const INPUT_SIZE: u32 = 8;
/// 文本序列长度
pub const SEQUENCE: i64 = 6;
/// 嵌入维度
pub const EMBED: i64 = 4;
/// 特征通道数
pub const CHANNELS: i64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
  Vision,
  Text,
  Geometry,
  Decoder,
}

impl Kind {
  fn from_path(path: &Path) -> Result<Self, GraphError> {
    let stem = path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default();
    match stem.as_str() {
      "vision-encoder" => Ok(Kind::Vision),
      "text-encoder" => Ok(Kind::Text),
      "geometry-encoder" => Ok(Kind::Geometry),
      "decoder" => Ok(Kind::Decoder),
      other => Err(GraphError::Backend(format!("未知的图: {}", other))),
    }
  }
}

/// 一次图调用的记录
#[derive(Debug, Clone)]
pub struct Call {
  pub kind: Kind,
  pub inputs: Vec<Tensor>,
}

/// 解码器输出脚本，掩码固定为 2x2
#[derive(Debug, Clone)]
pub struct DecoderScript {
  pub logits: Vec<f32>,
  pub presence: f32,
  pub boxes: Vec<[f32; 4]>,
  pub masks: Vec<[f32; 4]>,
}

impl Default for DecoderScript {
  fn default() -> Self {
    Self {
      logits: vec![10.0],
      presence: 10.0,
      boxes: vec![[0.25, 0.5, 0.5, 0.25]],
      masks: vec![[1.0, -1.0, -1.0, 1.0]],
    }
  }
}

impl DecoderScript {
  /// 多个候选，框与掩码取相同的值
  pub fn with_logits(logits: Vec<f32>, presence: f32) -> Self {
    let n = logits.len();
    Self {
      logits,
      presence,
      boxes: vec![[0.1, 0.2, 0.3, 0.4]; n],
      masks: vec![[1.0, 1.0, -1.0, -1.0]; n],
    }
  }
}

/// 测试后端，克隆后共享调用记录与故障设置
#[derive(Clone, Default)]
pub struct StubBackend {
  pub calls: Arc<Mutex<Vec<Call>>>,
  pub decoder: Arc<Mutex<DecoderScript>>,
  /// 加载该类图时失败
  pub fail_load: Arc<Mutex<Option<Kind>>>,
  /// 运行该类图时失败
  pub fail_run: Arc<Mutex<Option<Kind>>>,
  /// 运行该类图时模拟另一线程请求取消，随后以运行时错误结束
  pub cancel_during: Arc<Mutex<Option<Kind>>>,
  /// 视觉图对第 0 层声明的静态形状
  pub declared_level0: Option<[i64; 4]>,
  /// 加载分词器时对该令牌请求取消，模拟加载途中收到中断
  pub cancel_on_tokenizer: Arc<Mutex<Option<CancelToken>>>,
}

impl StubBackend {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_declared_level0(mut self, shape: [i64; 4]) -> Self {
    self.declared_level0 = Some(shape);
    self
  }

  pub fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }

  pub fn count(&self, kind: Kind) -> usize {
    self.calls().iter().filter(|c| c.kind == kind).count()
  }

  /// 最近一次该类图调用的输入
  pub fn last_inputs(&self, kind: Kind) -> Option<Vec<Tensor>> {
    self
      .calls()
      .into_iter()
      .rev()
      .find(|c| c.kind == kind)
      .map(|c| c.inputs)
  }

  pub fn script(&self, script: DecoderScript) {
    *self.decoder.lock().unwrap() = script;
  }

  pub fn set_fail_load(&self, kind: Option<Kind>) {
    *self.fail_load.lock().unwrap() = kind;
  }

  pub fn set_fail_run(&self, kind: Option<Kind>) {
    *self.fail_run.lock().unwrap() = kind;
  }

  pub fn set_cancel_during(&self, kind: Option<Kind>) {
    *self.cancel_during.lock().unwrap() = kind;
  }

  pub fn cancel_while_loading_tokenizer(&self, cancel: &CancelToken) {
    *self.cancel_on_tokenizer.lock().unwrap() = Some(cancel.clone());
  }
}

pub struct StubGraph {
  kind: Kind,
  backend: StubBackend,
}

pub struct StubTokenizer;

impl TextTokenizer for StubTokenizer {
  /// 每个单词编码为它的长度
  fn encode(&self, text: &str) -> Result<Vec<i64>, GraphError> {
    Ok(text.split_whitespace().map(|w| w.len() as i64).collect())
  }
}

impl Backend for StubBackend {
  type Graph = StubGraph;
  type Tokenizer = StubTokenizer;

  fn load_graph(&self, path: &Path, _options: &ExecutionOptions) -> Result<StubGraph, GraphError> {
    let kind = Kind::from_path(path)?;
    if *self.fail_load.lock().unwrap() == Some(kind) {
      return Err(GraphError::Backend(format!("无法加载 {:?}", kind)));
    }
    Ok(StubGraph {
      kind,
      backend: self.clone(),
    })
  }

  fn load_tokenizer(&self, _path: &Path) -> Result<StubTokenizer, GraphError> {
    if let Some(cancel) = self.cancel_on_tokenizer.lock().unwrap().take() {
      cancel.cancel();
    }
    Ok(StubTokenizer)
  }
}

fn f32_tensor(len: usize, value: f32) -> Tensor {
  Tensor::f32([len as i64], vec![value; len]).unwrap()
}

impl GraphSession for StubGraph {
  fn name(&self) -> &str {
    match self.kind {
      Kind::Vision => "vision-encoder",
      Kind::Text => "text-encoder",
      Kind::Geometry => "geometry-encoder",
      Kind::Decoder => "decoder",
    }
  }

  fn input_shape(&self, index: usize) -> Result<Shape, GraphError> {
    let n = INPUT_SIZE as i64;
    match (self.kind, index) {
      (Kind::Vision, 0) => Ok(Shape::from([-1, 3, n, n])),
      (Kind::Text, 0 | 1) => Ok(Shape::from([-1, SEQUENCE])),
      (Kind::Geometry, 0) => Ok(Shape::from([-1, -1, 4])),
      (Kind::Geometry, 1) => Ok(Shape::from([-1, -1])),
      _ => Err(GraphError::Backend(format!("没有第 {} 个输入", index))),
    }
  }

  fn output_shape(&self, index: usize) -> Result<Shape, GraphError> {
    match (self.kind, index) {
      (Kind::Vision, 0) => Ok(
        self
          .backend
          .declared_level0
          .map(Shape::from)
          .unwrap_or_else(|| Shape::from([-1, CHANNELS, -1, -1])),
      ),
      (Kind::Vision, 1 | 2) => Ok(Shape::from([-1, CHANNELS, -1, -1])),
      (Kind::Vision, 3) => Ok(Shape::from([-1, CHANNELS, 2, 2])),
      (Kind::Text, 0) => Ok(Shape::from([-1, SEQUENCE, EMBED])),
      (Kind::Text, 1) => Ok(Shape::from([-1, SEQUENCE])),
      _ => Err(GraphError::Backend(format!("没有第 {} 个输出", index))),
    }
  }

  fn run(&mut self, inputs: Vec<Tensor>, cancel: &CancelToken) -> Result<Vec<Tensor>, GraphError> {
    self.backend.calls.lock().unwrap().push(Call {
      kind: self.kind,
      inputs: inputs.clone(),
    });
    if *self.backend.cancel_during.lock().unwrap() == Some(self.kind) {
      cancel.cancel();
      return Err(GraphError::Backend("运行被终止".to_string()));
    }
    if *self.backend.fail_run.lock().unwrap() == Some(self.kind) {
      return Err(GraphError::Backend("运行失败".to_string()));
    }

    let outputs = match self.kind {
      // 每层填充层号，便于核对
      Kind::Vision => vec![
        f32_tensor((CHANNELS * 8 * 8) as usize, 0.0),
        f32_tensor((CHANNELS * 4 * 4) as usize, 1.0),
        f32_tensor((CHANNELS * 4 * 4) as usize, 2.0),
        f32_tensor((CHANNELS * 2 * 2) as usize, 3.0),
      ],
      Kind::Text => {
        let validity = inputs[1].as_i64().unwrap().iter().map(|&v| v != 0).collect();
        vec![
          f32_tensor((SEQUENCE * EMBED) as usize, 1.0),
          Tensor::bool([SEQUENCE], validity).unwrap(),
        ]
      }
      Kind::Geometry => {
        let prompts = inputs[1].len() + 1;
        vec![
          f32_tensor(prompts * EMBED as usize, 2.0),
          Tensor::bool([prompts as i64], vec![true; prompts]).unwrap(),
        ]
      }
      Kind::Decoder => {
        let script = self.backend.decoder.lock().unwrap().clone();
        let c = script.logits.len() as i64;
        vec![
          Tensor::f32([1, c, 2, 2], script.masks.concat()).unwrap(),
          Tensor::f32([1, c, 4], script.boxes.concat()).unwrap(),
          Tensor::f32([1, c], script.logits).unwrap(),
          Tensor::f32([1, 1], vec![script.presence]).unwrap(),
        ]
      }
    };
    Ok(outputs)
  }
}

/// 五个资源文件齐全的临时模型目录
pub fn model_dir() -> (TempDir, ModelBundle) {
  let dir = tempfile::tempdir().unwrap();
  let bundle = ModelBundle::from_dir(dir.path());
  for (_, path) in bundle.paths() {
    std::fs::write(path, b"stub").unwrap();
  }
  (dir, bundle)
}

/// 与模型输入尺寸一致的测试图像
pub fn input_image() -> RgbImage {
  RgbImage::from_fn(INPUT_SIZE, INPUT_SIZE, |x, y| {
    image::Rgb([(x * 30) as u8, (y * 30) as u8, 128])
  })
}
