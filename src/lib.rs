use std::path::{Path, PathBuf};

use angle_net::AngleNet;
use dbnet::DbNet;

mod angle_net;
pub mod dbnet;
mod error;
pub mod input;
pub mod output;
mod quad;
mod result;
mod session;
pub mod util;

use image::DynamicImage;
use tracing::instrument;

pub use error::{Error, Result};
pub use quad::*;
pub use result::*;

pub use ort as runtime;

/// Model language. Only the default model file names depend on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Language {
    #[default]
    English,
    Chinese,
}

impl Language {
    fn default_det_model(self) -> &'static str {
        match self {
            Language::English => "models/en_PP-OCRv3_det_infer.onnx",
            Language::Chinese => "models/ch_PP-OCRv4_det_infer.onnx",
        }
    }

    fn default_cls_model(self) -> &'static str {
        "models/ch_ppocr_mobile_v2.0_cls_infer.onnx"
    }
}

pub struct PaddleFrogBuilder {
    threads: usize,
    lang: Language,
    det_path: Option<PathBuf>,
    cls_path: Option<PathBuf>,
    use_angle_cls: bool,
    max_side_len: u32,
    cache_path: Option<PathBuf>,
    execution_providers: Vec<ExecutionProvider>,
}

impl PaddleFrogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn lang(mut self, lang: Language) -> Self {
        self.lang = lang;
        self
    }

    pub fn det_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.det_path = Some(path.into());
        self
    }

    pub fn cls_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.cls_path = Some(path.into());
        self
    }

    pub fn use_angle_cls(mut self, use_angle_cls: bool) -> Self {
        self.use_angle_cls = use_angle_cls;
        self
    }

    /// Upper bound for the detector input side, also used for TensorRT shape profiles.
    pub fn max_side_len(mut self, max_side_len: u32) -> Self {
        self.max_side_len = max_side_len;
        self
    }

    pub fn with_engine_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    #[instrument(skip(self), level = "debug")]
    fn init_models(&mut self) -> Result<(DbNet, Option<AngleNet>)> {
        let det_path = self
            .det_path
            .take()
            .unwrap_or_else(|| self.lang.default_det_model().into());
        let cls_path = self
            .cls_path
            .take()
            .unwrap_or_else(|| self.lang.default_cls_model().into());
        let cache_path = self.cache_path.as_deref();

        let det_model = DbNet::init(
            &det_path,
            self.threads,
            self.max_side_len,
            &self.execution_providers,
            cache_path,
        )?;
        let cls_model = self
            .use_angle_cls
            .then(|| AngleNet::init(&cls_path, self.threads, &self.execution_providers, cache_path))
            .transpose()?;
        Ok((det_model, cls_model))
    }

    #[instrument(skip(self))]
    pub fn build(mut self) -> Result<PaddleFrog> {
        let (det_model, cls_model) = self.init_models()?;
        Ok(PaddleFrog {
            det_model,
            cls_model,
            max_side_len: self.max_side_len,
        })
    }
}

impl Default for PaddleFrogBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            lang: Language::English,
            det_path: None,
            cls_path: None,
            use_angle_cls: true,
            max_side_len: 960,
            cache_path: None,
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
        }
    }
}

/// Text line detector with optional angle classification.
pub struct PaddleFrog {
    det_model: DbNet,
    cls_model: Option<AngleNet>,
    max_side_len: u32,
}

impl PaddleFrog {
    #[instrument(skip(self, image))]
    pub fn detect(&self, image: &DynamicImage, options: DetectionOptions) -> Result<Vec<TextBox>> {
        let options = DetectionOptions {
            limit_side_len: if options.limit_side_len != 0 {
                options.limit_side_len.min(self.max_side_len)
            } else {
                self.max_side_len
            },
            ..options
        };
        let mut boxes = self.det_model.get_text_boxes(image, &options)?;

        if let Some(angle_net) = &self.cls_model {
            angle_net.classify_boxes(image, &mut boxes, options.most_angle)?;
            let flipped = boxes
                .iter()
                .filter_map(|it| it.angle)
                .filter(|angle| angle.is_rotated(options.cls_thresh))
                .count();
            log::debug!("{flipped} of {} lines classified as upside down", boxes.len());
        }

        Ok(boxes)
    }

    /// Detects text in a single image file or in every image of a directory.
    #[instrument(skip(self, options))]
    pub fn detect_path(
        &self,
        path: &Path,
        options: DetectionOptions,
    ) -> Result<Vec<ImageDetections>> {
        let mut results = Vec::new();
        for (image_path, image) in input::load_images(path)? {
            let boxes = self.detect(&image, options)?;
            log::info!("{image_path:?}: {} text lines", boxes.len());
            results.push(ImageDetections {
                path: image_path,
                boxes,
            });
        }
        Ok(results)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DetectionOptions {
    /// Longer side limit for the detector input; 0 uses the engine's `max_side_len`.
    pub limit_side_len: u32,
    /// Probability above which a pixel counts as text.
    pub thresh: f32,
    /// Minimum mean probability of a kept box.
    pub box_thresh: f32,
    pub unclip_ratio: f32,
    pub max_candidates: usize,
    pub use_dilation: bool,
    pub cls_thresh: f32,
    pub most_angle: bool,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            limit_side_len: 0,
            thresh: 0.3,
            box_thresh: 0.6,
            unclip_ratio: 1.5,
            max_candidates: 1000,
            use_dilation: false,
            cls_thresh: 0.9,
            most_angle: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "tensorrt")]
    TensorRT,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "tensorrt")]
    ExecutionProvider::TensorRT,
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];
