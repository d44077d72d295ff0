//! Process-wide memo of loaded predictors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::Result;

use super::{ModelKind, ModelLoader, OnnxLoader, Predictor};

/// Loads each model at most once and hands out shared references to it.
///
/// Create one per process and share it by `Arc`; nothing is global.
pub struct ModelCache {
    loader: Box<dyn ModelLoader>,
    loaded: Mutex<HashMap<ModelKind, Arc<dyn Predictor>>>,
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("loaded", &self.cached_kinds())
            .finish_non_exhaustive()
    }
}

impl ModelCache {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Cache backed by ONNX files in the configured model directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the model directory cannot be created.
    pub fn from_config(config: &crate::pipeline::Config) -> Result<Self> {
        let mut loader = OnnxLoader::new(&config.model_dir)?;
        if let Some(url) = &config.model_url {
            loader = loader.with_base_url(url);
        }
        Ok(Self::new(loader))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ModelKind, Arc<dyn Predictor>>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the predictor for `kind`, loading it on first use.
    ///
    /// Failed loads are not remembered, so a later call tries again.
    ///
    /// # Errors
    ///
    /// Returns the loader's error if the model cannot be fetched or parsed.
    pub fn load(&self, kind: ModelKind) -> Result<Arc<dyn Predictor>> {
        if let Some(predictor) = self.lock().get(&kind) {
            tracing::debug!("Using cached {kind} model");
            return Ok(Arc::clone(predictor));
        }

        let predictor = self.loader.load(kind)?;
        tracing::info!("Loaded {kind} model");

        Ok(Arc::clone(self.lock().entry(kind).or_insert(predictor)))
    }

    #[must_use]
    pub fn is_loaded(&self, kind: ModelKind) -> bool {
        self.lock().contains_key(&kind)
    }

    /// Kinds loaded so far, in a stable order.
    #[must_use]
    pub fn cached_kinds(&self) -> Vec<ModelKind> {
        let mut kinds: Vec<_> = self.lock().keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StyleModel, TransformerModel};
    use crate::testing::MapLoader;

    #[test]
    fn test_load_is_memoized() {
        let loader = MapLoader::complete();
        let loads = loader.load_count();
        let cache = ModelCache::new(loader);
        let kind = ModelKind::Style(StyleModel::MobileNet);

        let first = cache.load(kind).unwrap();
        let second = cache.load(kind).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(cache.cached_kinds(), vec![kind]);
    }

    #[test]
    fn test_failed_load_is_retried() {
        let loader = MapLoader::complete().without(ModelKind::Transformer(TransformerModel::Original));
        let loads = loader.load_count();
        let cache = ModelCache::new(loader);
        let kind = ModelKind::Transformer(TransformerModel::Original);

        assert!(cache.load(kind).is_err());
        assert!(cache.load(kind).is_err());
        assert!(!cache.is_loaded(kind));
        assert_eq!(loads.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
