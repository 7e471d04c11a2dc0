// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 图像与提示输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{ImageSize, ImageView},
  pipeline::BoxPrompt,
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("路径解码失败: {0}")]
  PathDecode(String),
}

/// `image:///<路径>` 指定的单张图像，统一转换为 RGB
pub struct ImageFileInput {
  image: RgbImage,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: url.scheme().to_string(),
      });
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| ImageFileInputError::PathDecode(e.to_string()))?
      .into_owned();
    let image = ImageReader::open(&path)?.decode()?.to_rgb8();
    info!("读取图像: {} ({})", path, image.size());

    Ok(ImageFileInput { image })
  }
}

impl ImageFileInput {
  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}

/// 一次分割所需的全部输入：原图、文本提示与框提示
#[derive(Debug, Clone)]
pub struct SegmentRequest {
  pub image: RgbImage,
  pub text: String,
  pub boxes: Vec<BoxPrompt>,
}

impl SegmentRequest {
  pub fn new(image: RgbImage) -> Self {
    Self {
      image,
      text: String::new(),
      boxes: Vec::new(),
    }
  }

  pub fn with_text(mut self, text: impl Into<String>) -> Self {
    self.text = text.into();
    self
  }

  /// 框提示以原图像素坐标给出
  pub fn with_pixel_boxes(mut self, boxes: &[([f32; 4], i64)]) -> Self {
    let source = self.source_size();
    self.boxes = boxes
      .iter()
      .map(|&(rect, label)| BoxPrompt::from_pixels(rect, label, source))
      .collect();
    self
  }

  pub fn source_size(&self) -> ImageSize {
    self.image.size()
  }
}

impl From<ImageFileInput> for SegmentRequest {
  fn from(input: ImageFileInput) -> Self {
    SegmentRequest::new(input.into_image())
  }
}
