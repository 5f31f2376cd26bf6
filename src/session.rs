use std::path::{Path, PathBuf};

use ort::{ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{Error, ExecutionProvider, Result};

/// Dynamic input shapes handed to TensorRT when it builds an engine for a model.
#[derive(Debug, Clone)]
#[cfg_attr(not(feature = "tensorrt"), allow(dead_code))]
pub(crate) struct ShapeProfile {
    pub min: String,
    pub opt: String,
    pub max: String,
}

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(cache_path: &Path, profile: &ShapeProfile) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    TensorRTExecutionProvider::default()
        .with_profile_min_shapes(&profile.min)
        .with_profile_max_shapes(&profile.max)
        .with_profile_opt_shapes(&profile.opt)
        .with_engine_cache(true)
        .with_engine_cache_path(cache_path.to_string_lossy())
        .with_timing_cache(true)
        .with_builder_optimization_level(5)
        .with_detailed_build_log(true)
        .build()
}

#[cfg(feature = "cuda")]
fn setup_cuda() -> ExecutionProviderDispatch {
    use ort::CUDAExecutionProvider;

    CUDAExecutionProvider::default().build()
}

#[cfg(feature = "directml")]
fn setup_directml() -> ExecutionProviderDispatch {
    use ort::DirectMLExecutionProvider;

    DirectMLExecutionProvider::default().build()
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    use ort::CoreMLExecutionProvider;

    CoreMLExecutionProvider::default().build()
}

#[instrument(level = "debug", skip(execution_providers, profile))]
pub(crate) fn build_session(
    model_path: &Path,
    num_threads: usize,
    execution_providers: &[ExecutionProvider],
    cache_path: Option<&Path>,
    profile: &ShapeProfile,
) -> Result<Session> {
    if !model_path.is_file() {
        return Err(Error::ModelNotFound(model_path.to_path_buf()));
    }

    // DirectML can't run with memory patterns or parallel execution enabled.
    #[cfg(feature = "directml")]
    let parallel = !execution_providers.contains(&ExecutionProvider::DirectML);
    #[cfg(not(feature = "directml"))]
    let parallel = true;

    let cache_path: PathBuf = cache_path.map(Path::to_path_buf).unwrap_or_else(|| {
        model_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(".cache")
    });
    log::trace!("Engine cache for {model_path:?} is {cache_path:?} (profile {profile:?})");

    let execution_providers = execution_providers.iter().filter_map(
        |provider| -> Option<ExecutionProviderDispatch> {
            match provider {
                ExecutionProvider::Default => None,
                #[cfg(feature = "tensorrt")]
                ExecutionProvider::TensorRT => Some(setup_tensorrt(&cache_path, profile)),
                #[cfg(feature = "cuda")]
                ExecutionProvider::Cuda => Some(setup_cuda()),
                #[cfg(feature = "directml")]
                ExecutionProvider::DirectML => Some(setup_directml()),
                #[cfg(feature = "coreml")]
                ExecutionProvider::CoreML => Some(setup_coreml()),
            }
        },
    );

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_memory_pattern(parallel)?
        .with_parallel_execution(parallel)?
        .with_inter_threads(num_threads)?
        .with_intra_threads(num_threads)?
        .with_execution_providers(execution_providers)?
        .commit_from_file(model_path)?;

    log::debug!("Session inputs for {model_path:?}: {:?}", session.inputs);
    log::debug!("Session outputs for {model_path:?}: {:?}", session.outputs);

    Ok(session)
}
