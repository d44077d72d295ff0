//! Job controller: serializes jobs, drives the controls and labels, and
//! swaps models.

mod controls;
mod settings;

pub use controls::{Control, Controls};
pub use settings::{PanelSettings, StyleSizing, StyleSlot, CONTENT_SIZES, STYLE_SIZES};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::image::{ImageSource, PixelBuffer};
use crate::model::{ModelCache, ModelKind, StyleModel, TransformerModel};
use crate::pipeline::{BlendRatio, Pipeline, Progress, Stage};
use crate::tensor::{MemoryInfo, TensorStore};

use controls::RunGuard;

/// An independent UI surface with its own job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Single,
    Combine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    #[default]
    Idle,
    Running,
}

/// Result of a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome<T> {
    Completed(T),
    /// The trigger's control was disabled, so nothing ran.
    Ignored,
}

impl<T> JobOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Ignored => None,
        }
    }

    pub const fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored)
    }
}

/// The variants currently feeding both panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveModels {
    pub style: StyleModel,
    pub transformer: TransformerModel,
}

/// Writes stage labels onto the trigger control.
struct LabelProgress<'a>(&'a Control);

impl Progress for LabelProgress<'_> {
    fn stage(&self, stage: Stage) {
        self.0.set_label(stage.to_string());
    }
}

/// Marks a panel running until dropped.
struct Running<'a>(&'a Mutex<JobState>);

impl<'a> Running<'a> {
    fn enter(state: &'a Mutex<JobState>) -> Self {
        *state.lock().unwrap_or_else(PoisonError::into_inner) = JobState::Running;
        Self(state)
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = JobState::Idle;
    }
}

/// Runs stylization jobs on behalf of the UI.
///
/// At most one job or model swap runs at a time: starting one disables
/// every control that could start another, and triggers on a disabled
/// control are ignored.
pub struct JobController {
    store: TensorStore,
    cache: Arc<ModelCache>,
    active: Mutex<Option<ActiveModels>>,
    controls: Controls,
    single: Mutex<JobState>,
    combine: Mutex<JobState>,
    jobs_started: AtomicUsize,
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("active", &self.active_models())
            .field("memory", &self.memory())
            .finish_non_exhaustive()
    }
}

impl JobController {
    pub fn new(cache: Arc<ModelCache>) -> Self {
        Self {
            store: TensorStore::new(),
            cache,
            active: Mutex::new(None),
            controls: Controls::new(),
            single: Mutex::new(JobState::Idle),
            combine: Mutex::new(JobState::Idle),
            jobs_started: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn controls(&self) -> &Controls {
        &self.controls
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Live tensors held by jobs of this controller.
    #[must_use]
    pub fn memory(&self) -> MemoryInfo {
        self.store.memory()
    }

    #[must_use]
    pub fn state(&self, panel: Panel) -> JobState {
        *self
            .panel_state(panel)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of jobs that got past the trigger.
    #[must_use]
    pub fn jobs_started(&self) -> usize {
        self.jobs_started.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn active_models(&self) -> Option<ActiveModels> {
        *self.active()
    }

    const fn panel_state(&self, panel: Panel) -> &Mutex<JobState> {
        match panel {
            Panel::Single => &self.single,
            Panel::Combine => &self.combine,
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveModels>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the startup models, then enable the controls.
    ///
    /// # Errors
    ///
    /// Returns the load error; the controls then stay disabled.
    pub fn initialize(&self, style: StyleModel, transformer: TransformerModel) -> Result<()> {
        self.cache.load(style.into())?;
        self.cache.load(transformer.into())?;

        *self.active() = Some(ActiveModels { style, transformer });
        self.controls.enable_all();
        tracing::info!("Ready with {style} style and {transformer} transformer models");
        Ok(())
    }

    /// Switch the style encoder used by later jobs.
    ///
    /// # Errors
    ///
    /// Returns the load error; the previous model stays active.
    pub async fn select_style_model(&self, model: StyleModel) -> Result<JobOutcome<()>> {
        self.select(&self.controls.style_model_select, model.into(), |active| {
            active.style = model;
        })
        .await
    }

    /// Switch the transformer used by later jobs.
    ///
    /// # Errors
    ///
    /// Returns the load error; the previous model stays active.
    pub async fn select_transformer_model(
        &self,
        model: TransformerModel,
    ) -> Result<JobOutcome<()>> {
        self.select(&self.controls.transformer_model_select, model.into(), |active| {
            active.transformer = model;
        })
        .await
    }

    async fn select(
        &self,
        selector: &Control,
        kind: ModelKind,
        apply: impl FnOnce(&mut ActiveModels),
    ) -> Result<JobOutcome<()>> {
        let Some(_guard) = RunGuard::acquire(&self.controls, selector) else {
            tracing::debug!("Ignoring {} while busy", selector.name());
            return Ok(JobOutcome::Ignored);
        };

        selector.set_label(format!("Loading {kind} model"));
        tokio::task::yield_now().await;

        if let Err(err) = self.cache.load(kind) {
            tracing::warn!("Keeping previous model: {err}");
            return Err(err);
        }

        if let Some(active) = self.active().as_mut() {
            apply(active);
        }
        Ok(JobOutcome::Completed(()))
    }

    fn pipeline(&self) -> Result<Pipeline> {
        let active = self
            .active_models()
            .ok_or(Error::ModelNotLoaded { role: "style" })?;
        let encoder = self.cache.load(active.style.into())?;
        let transformer = self.cache.load(active.transformer.into())?;
        Ok(Pipeline::new(&self.store, encoder, transformer))
    }

    /// Stylize `content` with `style`, blended with the content's own style
    /// by `ratio`.
    ///
    /// # Errors
    ///
    /// Returns the first stage error. Controls are restored either way.
    pub async fn stylize(
        &self,
        content: &ImageSource,
        style: &ImageSource,
        ratio: BlendRatio,
    ) -> Result<JobOutcome<PixelBuffer>> {
        let trigger = &self.controls.style_button;
        let Some(_guard) = RunGuard::acquire(&self.controls, trigger) else {
            tracing::debug!("Ignoring stylize trigger while busy");
            return Ok(JobOutcome::Ignored);
        };
        let _running = Running::enter(&self.single);
        self.jobs_started.fetch_add(1, Ordering::SeqCst);

        let started = Instant::now();
        let result = async {
            let pipeline = self.pipeline()?;
            pipeline
                .stylize(content, style, ratio, &LabelProgress(trigger))
                .await
        }
        .await;

        finish("stylize", started, result)
    }

    /// Stylize `content` with the mix of `style_a` and `style_b`; `ratio` 0
    /// is all `style_a`.
    ///
    /// # Errors
    ///
    /// Returns the first stage error. Controls are restored either way.
    pub async fn combine(
        &self,
        content: &ImageSource,
        style_a: &ImageSource,
        style_b: &ImageSource,
        ratio: BlendRatio,
    ) -> Result<JobOutcome<PixelBuffer>> {
        let trigger = &self.controls.combine_button;
        let Some(_guard) = RunGuard::acquire(&self.controls, trigger) else {
            tracing::debug!("Ignoring combine trigger while busy");
            return Ok(JobOutcome::Ignored);
        };
        let _running = Running::enter(&self.combine);
        self.jobs_started.fetch_add(1, Ordering::SeqCst);

        let started = Instant::now();
        let result = async {
            let pipeline = self.pipeline()?;
            pipeline
                .combine(content, style_a, style_b, ratio, &LabelProgress(trigger))
                .await
        }
        .await;

        finish("combine", started, result)
    }
}

fn finish(
    job: &str,
    started: Instant,
    result: Result<PixelBuffer>,
) -> Result<JobOutcome<PixelBuffer>> {
    match result {
        Ok(pixels) => {
            tracing::info!(
                "Finished {job} job ({}x{}) in {:.2?}",
                pixels.width(),
                pixels.height(),
                started.elapsed()
            );
            Ok(JobOutcome::Completed(pixels))
        }
        Err(err) => {
            tracing::warn!("{job} job failed after {:.2?}: {err}", started.elapsed());
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        gradient_image, solid_image, FailingPredictor, MapLoader, MockEncoder, STYLE_DIMS,
    };

    fn ready(loader: MapLoader) -> JobController {
        let controller = JobController::new(Arc::new(ModelCache::new(loader)));
        controller
            .initialize(StyleModel::default(), TransformerModel::default())
            .unwrap();
        controller
    }

    #[tokio::test]
    async fn test_trigger_before_initialize_is_ignored() {
        let controller = JobController::new(Arc::new(ModelCache::new(MapLoader::complete())));
        let image = gradient_image("content", 8, 8);

        let outcome = controller
            .stylize(&image, &image, BlendRatio::ONE)
            .await
            .unwrap();

        assert!(outcome.is_ignored());
        assert_eq!(controller.jobs_started(), 0);
    }

    #[test]
    fn test_failed_initialize_keeps_controls_disabled() {
        let loader = MapLoader::complete().without(TransformerModel::Separable.into());
        let controller = JobController::new(Arc::new(ModelCache::new(loader)));

        let result = controller.initialize(StyleModel::MobileNet, TransformerModel::Separable);

        assert!(matches!(result, Err(Error::ModelLoad { .. })));
        assert!(controller.controls().all().iter().all(|c| !c.is_enabled()));
        assert!(controller.active_models().is_none());
    }

    #[tokio::test]
    async fn test_stylize_completes_and_restores_controls() {
        let controller = ready(MapLoader::complete());
        let content = gradient_image("content", 64, 48);
        let style = solid_image("style", 32, 32, [200, 100, 50]);

        let pixels = controller
            .stylize(&content, &style, BlendRatio::new(0.6).unwrap())
            .await
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!((pixels.width(), pixels.height()), (64, 48));
        assert!(controller.controls().all_enabled());
        assert_eq!(controller.controls().style_button.label(), "Stylize");
        assert_eq!(controller.state(Panel::Single), JobState::Idle);
        assert_eq!(controller.memory().num_tensors, 0);
    }

    #[tokio::test]
    async fn test_second_trigger_while_running_is_ignored() {
        let encoder = MockEncoder::new(STYLE_DIMS);
        let controller = ready(MapLoader::complete().with(StyleModel::MobileNet.into(), encoder.clone()));
        let content = gradient_image("content", 16, 16);
        let style = solid_image("style", 16, 16, [5, 5, 5]);
        let controls = controller.controls();

        let (first, second, observed) = tokio::join!(
            controller.stylize(&content, &style, BlendRatio::ONE),
            controller.combine(&content, &style, &style, BlendRatio::HALF),
            async {
                (
                    controls.style_button.label(),
                    controls.all().iter().any(|c| c.is_enabled()),
                    controller.state(Panel::Single),
                )
            }
        );

        assert!(first.unwrap().completed().is_some());
        assert!(second.unwrap().is_ignored());
        assert_eq!(
            observed,
            (
                "Generating 100D style representation".to_string(),
                false,
                JobState::Running
            )
        );
        assert_eq!(encoder.calls(), 1);
        assert_eq!(controller.jobs_started(), 1);
        assert!(controls.all_enabled());
    }

    #[tokio::test]
    async fn test_failed_job_releases_everything() {
        let loader = MapLoader::complete()
            .with(TransformerModel::Separable.into(), Arc::new(FailingPredictor));
        let controller = ready(loader);
        let content = gradient_image("content", 16, 16);

        let result = controller
            .combine(
                &content,
                &solid_image("a", 8, 8, [0, 0, 0]),
                &solid_image("b", 8, 8, [9, 9, 9]),
                BlendRatio::HALF,
            )
            .await;

        assert!(matches!(result, Err(Error::Inference { .. })));
        assert!(controller.controls().all_enabled());
        assert_eq!(controller.controls().combine_button.label(), "Combine Styles");
        assert_eq!(controller.state(Panel::Combine), JobState::Idle);
        assert_eq!(controller.memory().num_tensors, 0);
    }

    #[tokio::test]
    async fn test_failed_model_swap_keeps_previous_model() {
        let loader = MapLoader::complete().without(StyleModel::Inception.into());
        let controller = ready(loader);

        let result = controller.select_style_model(StyleModel::Inception).await;

        assert!(matches!(result, Err(Error::ModelLoad { .. })));
        assert_eq!(
            controller.active_models().map(|m| m.style),
            Some(StyleModel::MobileNet)
        );
        assert!(controller.controls().all_enabled());
        assert_eq!(
            controller.controls().style_model_select.label(),
            "Style model"
        );
    }

    #[tokio::test]
    async fn test_model_swap_changes_later_jobs() {
        let controller = ready(MapLoader::complete());

        let outcome = controller
            .select_transformer_model(TransformerModel::Original)
            .await
            .unwrap();

        assert_eq!(outcome, JobOutcome::Completed(()));
        assert_eq!(
            controller.active_models(),
            Some(ActiveModels {
                style: StyleModel::MobileNet,
                transformer: TransformerModel::Original,
            })
        );
        assert!(controller
            .cache()
            .is_loaded(TransformerModel::Original.into()));
    }
}
