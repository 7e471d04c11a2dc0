// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 模型资源配置
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

use std::{
  num::ParseIntError,
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  graph::{Device, ExecutionOptions},
  shape::PyramidRule,
};

pub const VISION_ENCODER_FILE: &str = "vision-encoder.onnx";
pub const TEXT_ENCODER_FILE: &str = "text-encoder.onnx";
pub const GEOMETRY_ENCODER_FILE: &str = "geometry-encoder.onnx";
pub const DECODER_FILE: &str = "decoder.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("无效的设备选择: {0}")]
  Device(#[from] ParseIntError),
  #[error("无效的查询参数 {key}={value}")]
  InvalidQuery { key: String, value: String },
  #[error("路径解码失败: {0}")]
  PathDecode(String),
}

/// 一个完整模型所需的五个资源文件及执行配置
#[derive(Debug, Clone, PartialEq)]
pub struct ModelBundle {
  pub vision: PathBuf,
  pub text: PathBuf,
  pub geometry: PathBuf,
  pub decoder: PathBuf,
  pub tokenizer: PathBuf,
  pub execution: ExecutionOptions,
  pub pyramid: PyramidRule,
}

impl ModelBundle {
  pub fn new(
    vision: impl Into<PathBuf>,
    text: impl Into<PathBuf>,
    geometry: impl Into<PathBuf>,
    decoder: impl Into<PathBuf>,
    tokenizer: impl Into<PathBuf>,
  ) -> Self {
    Self {
      vision: vision.into(),
      text: text.into(),
      geometry: geometry.into(),
      decoder: decoder.into(),
      tokenizer: tokenizer.into(),
      execution: ExecutionOptions::default(),
      pyramid: PyramidRule::default(),
    }
  }

  /// 目录内使用默认文件名
  pub fn from_dir(dir: impl AsRef<Path>) -> Self {
    let dir = dir.as_ref();
    Self::new(
      dir.join(VISION_ENCODER_FILE),
      dir.join(TEXT_ENCODER_FILE),
      dir.join(GEOMETRY_ENCODER_FILE),
      dir.join(DECODER_FILE),
      dir.join(TOKENIZER_FILE),
    )
  }

  pub fn threads(mut self, threads: usize) -> Self {
    self.execution.threads = threads.max(1);
    self
  }

  pub fn device(mut self, device: Device) -> Self {
    self.execution.device = device;
    self
  }

  pub fn pyramid_rule(mut self, rule: PyramidRule) -> Self {
    self.pyramid = rule;
    self
  }

  pub fn paths(&self) -> [(&'static str, &Path); 5] {
    [
      ("视觉编码器", self.vision.as_path()),
      ("文本编码器", self.text.as_path()),
      ("几何编码器", self.geometry.as_path()),
      ("解码器", self.decoder.as_path()),
      ("分词器", self.tokenizer.as_path()),
    ]
  }

  /// 第一个不存在的资源文件
  pub fn first_missing(&self) -> Option<&Path> {
    self
      .paths()
      .into_iter()
      .find(|(_, path)| !path.is_file())
      .map(|(kind, path)| {
        error!("{}文件不存在: {}", kind, path.display());
        path
      })
  }
}

impl FromUrlWithScheme for ModelBundle {
  const SCHEME: &'static str = "sam3";
}

impl FromUrl for ModelBundle {
  type Error = ConfigError;

  /// `sam3:///<目录>?threads=8&device=cuda:0&strict_pyramid`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConfigError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: url.scheme().to_string(),
      });
    }

    let dir = urlencoding::decode(url.path()).map_err(|e| ConfigError::PathDecode(e.to_string()))?;
    let mut bundle = ModelBundle::from_dir(dir.into_owned());

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "threads" => {
          let threads = value.parse::<usize>().map_err(|_| ConfigError::InvalidQuery {
            key: key.to_string(),
            value: value.to_string(),
          })?;
          bundle = bundle.threads(threads);
        }
        "device" => bundle = bundle.device(Device::parse(&value)?),
        "strict_pyramid" => bundle.pyramid = bundle.pyramid.strict(value != "false"),
        _ => {}
      }
    }

    Ok(bundle)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bundle_from_dir_uses_default_file_names() {
    let bundle = ModelBundle::from_dir("models/sam3");
    assert_eq!(bundle.vision, PathBuf::from("models/sam3/vision-encoder.onnx"));
    assert_eq!(bundle.tokenizer, PathBuf::from("models/sam3/tokenizer.json"));
  }

  #[test]
  fn bundle_from_url_reads_query() {
    let url = Url::parse("sam3:///opt/models/sam%203?threads=2&device=cuda:1&strict_pyramid").unwrap();
    let bundle = ModelBundle::from_url(&url).unwrap();
    assert_eq!(bundle.decoder, PathBuf::from("/opt/models/sam 3/decoder.onnx"));
    assert_eq!(bundle.execution.threads, 2);
    assert_eq!(bundle.execution.device, Device::Cuda { device_id: 1 });
    assert!(bundle.pyramid.strict);
  }

  #[test]
  fn bundle_from_url_relative_dir() {
    let url = Url::parse("sam3:models").unwrap();
    let bundle = ModelBundle::from_url(&url).unwrap();
    assert_eq!(bundle.geometry, PathBuf::from("models/geometry-encoder.onnx"));
  }

  #[test]
  fn bundle_from_url_rejects_bad_input() {
    let url = Url::parse("yolo26:///models").unwrap();
    assert!(matches!(
      ModelBundle::from_url(&url),
      Err(ConfigError::SchemeMismatch { .. })
    ));

    let url = Url::parse("sam3:///models?device=cuda:abc").unwrap();
    assert!(matches!(ModelBundle::from_url(&url), Err(ConfigError::Device(_))));

    let url = Url::parse("sam3:///models?threads=many").unwrap();
    assert!(matches!(
      ModelBundle::from_url(&url),
      Err(ConfigError::InvalidQuery { .. })
    ));
  }

  #[test]
  fn first_missing_reports_absent_file() {
    let bundle = ModelBundle::from_dir("/nonexistent/shanan-seg");
    assert_eq!(bundle.first_missing(), Some(bundle.vision.as_path()));
  }
}
