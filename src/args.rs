// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::{path::PathBuf, str::FromStr};

use anyhow::Context;
use clap::Args;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl,
  cancel::CancelToken,
  config::{ConfigError, ModelBundle},
  graph::{Device, OnnxBackend},
  input::{ImageFileInput, SegmentRequest},
  pipeline::Pipeline,
};

/// 模型相关参数
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
  /// 模型目录，例如 sam3:///opt/models/sam3?threads=4&device=cuda:0
  #[arg(long, value_name = "MODEL", default_value = "sam3:sam3")]
  pub model: Url,
  /// 单独指定视觉编码器文件
  #[arg(long, value_name = "FILE")]
  pub vision_encoder: Option<PathBuf>,
  /// 单独指定文本编码器文件
  #[arg(long, value_name = "FILE")]
  pub text_encoder: Option<PathBuf>,
  /// 单独指定几何编码器文件
  #[arg(long, value_name = "FILE")]
  pub geometry_encoder: Option<PathBuf>,
  /// 单独指定解码器文件
  #[arg(long, value_name = "FILE")]
  pub decoder: Option<PathBuf>,
  /// 单独指定分词器文件
  #[arg(long, value_name = "FILE")]
  pub tokenizer: Option<PathBuf>,
  /// 执行设备: cpu 或 cuda:<n>
  #[arg(long, value_name = "DEVICE")]
  pub device: Option<Device>,
  /// 推理线程数
  #[arg(long, value_name = "COUNT")]
  pub threads: Option<usize>,
  /// 金字塔推导形状与模型声明不一致时直接报错
  #[arg(long)]
  pub strict_pyramid: bool,
}

impl ModelArgs {
  /// 命令行上的单项设置覆盖 URL 中的设置
  pub fn bundle(&self) -> Result<ModelBundle, ConfigError> {
    let mut bundle = ModelBundle::from_url(&self.model)?;
    let overrides = [
      (&mut bundle.vision, &self.vision_encoder),
      (&mut bundle.text, &self.text_encoder),
      (&mut bundle.geometry, &self.geometry_encoder),
      (&mut bundle.decoder, &self.decoder),
      (&mut bundle.tokenizer, &self.tokenizer),
    ];
    for (path, value) in overrides {
      if let Some(value) = value {
        *path = value.clone();
      }
    }
    if let Some(device) = self.device {
      bundle = bundle.device(device);
    }
    if let Some(threads) = self.threads {
      bundle = bundle.threads(threads);
    }
    if self.strict_pyramid {
      bundle.pyramid = bundle.pyramid.strict(true);
    }
    Ok(bundle)
  }

  pub fn load(&self, cancel: &CancelToken) -> anyhow::Result<Pipeline<OnnxBackend>> {
    let bundle = self.bundle()?;
    info!(
      "模型: {}，设备: {}，线程数: {}",
      self.model, bundle.execution.device, bundle.execution.threads
    );
    let mut pipeline = Pipeline::default();
    pipeline
      .load_model(&bundle, cancel)
      .context("模型加载失败")?;
    Ok(pipeline)
  }
}

/// 输入图像与提示
#[derive(Args, Debug, Clone)]
pub struct PromptArgs {
  /// 输入图像，例如 image:///data/cat.jpg
  #[arg(long, value_name = "IMAGE")]
  pub image: Url,
  /// 文本提示，可以为空
  #[arg(long, value_name = "TEXT", default_value = "")]
  pub text: String,
  /// 框提示，原图像素坐标: "x,y,w,h,label;x,y,w,h,label"
  #[arg(long, value_name = "BOXES", default_value = "")]
  pub boxes: PixelBoxes,
}

impl PromptArgs {
  pub fn request(&self) -> anyhow::Result<SegmentRequest> {
    let input = ImageFileInput::from_url(&self.image)?;
    Ok(
      SegmentRequest::from(input)
        .with_text(self.text.clone())
        .with_pixel_boxes(&self.boxes.0),
    )
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum BoxParseError {
  #[error("框提示需要 5 个字段 (x,y,w,h,label)，实际: {0:?}")]
  FieldCount(String),
  #[error("无效的框坐标: {0:?}")]
  Coordinate(String),
  #[error("无效的框标签: {0:?}")]
  Label(String),
}

/// 像素坐标的框提示列表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PixelBoxes(pub Vec<([f32; 4], i64)>);

impl FromStr for PixelBoxes {
  type Err = BoxParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut boxes = Vec::new();
    for item in s.split(';').map(str::trim).filter(|item| !item.is_empty()) {
      let fields = item.split(',').map(str::trim).collect::<Vec<_>>();
      let [x, y, w, h, label] = fields.as_slice() else {
        return Err(BoxParseError::FieldCount(item.to_string()));
      };
      let mut rect = [0.0f32; 4];
      for (slot, value) in rect.iter_mut().zip([x, y, w, h]) {
        *slot = value
          .parse()
          .map_err(|_| BoxParseError::Coordinate(value.to_string()))?;
      }
      let label = label
        .parse()
        .map_err(|_| BoxParseError::Label(label.to_string()))?;
      boxes.push((rect, label));
    }
    Ok(PixelBoxes(boxes))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(flatten)]
    model: ModelArgs,
    #[command(flatten)]
    prompt: PromptArgs,
  }

  #[test]
  fn box_list_parsing() {
    let boxes: PixelBoxes = "10,20,30,40,1; 0,0,5.5,5,0;".parse().unwrap();
    assert_eq!(
      boxes.0,
      vec![([10.0, 20.0, 30.0, 40.0], 1), ([0.0, 0.0, 5.5, 5.0], 0)]
    );
    assert_eq!("".parse::<PixelBoxes>(), Ok(PixelBoxes::default()));
  }

  #[test]
  fn box_list_errors() {
    assert!(matches!(
      "1,2,3,4".parse::<PixelBoxes>(),
      Err(BoxParseError::FieldCount(_))
    ));
    assert!(matches!(
      "1,2,x,4,1".parse::<PixelBoxes>(),
      Err(BoxParseError::Coordinate(_))
    ));
    assert!(matches!(
      "1,2,3,4,a".parse::<PixelBoxes>(),
      Err(BoxParseError::Label(_))
    ));
  }

  #[test]
  fn command_line_overrides_model_url() {
    let cli = Cli::try_parse_from([
      "shanan-seg",
      "--model",
      "sam3:///models?threads=2",
      "--decoder",
      "/other/decoder.onnx",
      "--device",
      "cuda:1",
      "--strict-pyramid",
      "--image",
      "image:///data/cat.png",
      "--boxes",
      "1,2,3,4,1",
    ])
    .unwrap();

    let bundle = cli.model.bundle().unwrap();
    assert_eq!(bundle.decoder, PathBuf::from("/other/decoder.onnx"));
    assert_eq!(bundle.vision, PathBuf::from("/models/vision-encoder.onnx"));
    assert_eq!(bundle.execution.threads, 2);
    assert_eq!(bundle.execution.device, Device::Cuda { device_id: 1 });
    assert!(bundle.pyramid.strict);
    assert_eq!(cli.prompt.text, "");
    assert_eq!(cli.prompt.boxes.0.len(), 1);
  }

  #[test]
  fn default_model_directory() {
    let cli = Cli::try_parse_from(["shanan-seg", "--image", "image:///a.png"]).unwrap();
    let bundle = cli.model.bundle().unwrap();
    assert_eq!(bundle.tokenizer, PathBuf::from("sam3/tokenizer.json"));
  }
}
