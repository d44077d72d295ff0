//! Tensor store and scoped release of intermediate buffers.
//!
//! Every tensor lives in a [`TensorStore`] until it is disposed. Handles are
//! plain ids, so dropping a [`Tensor`] does not free its buffer; instead work
//! runs inside [`TensorStore::tidy`], which releases everything allocated
//! during the closure except the value it returns. This keeps repeated
//! stylization jobs from growing memory without sprinkling `dispose` calls
//! through every stage.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::RgbImage;
use ndarray::{Array3, ArrayD, Axis};

use crate::error::{Error, Result};
use crate::image::{ImageSource, PixelBuffer, RGB_CHANNELS};
use crate::model::Predictor;

/// Identifier of a buffer in a [`TensorStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(u64);

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of the buffers currently held by a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Number of live tensors.
    pub num_tensors: usize,
    /// Bytes held by live tensors.
    pub num_bytes: usize,
}

#[derive(Default)]
struct StoreInner {
    next_id: u64,
    buffers: HashMap<TensorId, ArrayD<f32>>,
    /// Ids allocated in each open scope, innermost last.
    scopes: Vec<Vec<TensorId>>,
}

/// Shared owner of all tensor buffers.
///
/// Cloning the store is cheap and yields a handle to the same buffers.
#[derive(Clone, Default)]
pub struct TensorStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl fmt::Debug for TensorStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let memory = self.memory();
        f.debug_struct("TensorStore")
            .field("num_tensors", &memory.num_tensors)
            .field("num_bytes", &memory.num_bytes)
            .finish()
    }
}

impl TensorStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a buffer and return its handle.
    ///
    /// The tensor is tracked by the innermost open scope, if any.
    pub fn alloc(&self, data: ArrayD<f32>) -> Tensor {
        let mut inner = self.lock();
        let id = TensorId(inner.next_id);
        inner.next_id += 1;

        let shape = data.shape().to_vec();
        inner.buffers.insert(id, data);
        if let Some(scope) = inner.scopes.last_mut() {
            scope.push(id);
        }

        Tensor {
            id,
            shape,
            store: self.clone(),
        }
    }

    /// Convert decoded pixels into an `[height, width, 3]` float tensor with
    /// values in [0, 255].
    ///
    /// # Errors
    ///
    /// Returns an error if the pixel buffer does not match its dimensions.
    pub fn alloc_pixels(&self, image: &ImageSource) -> Result<Tensor> {
        let (width, height) = image.dimensions();
        let shape = (height as usize, width as usize, RGB_CHANNELS);
        let values = image.as_raw().iter().copied().map(f32::from).collect();

        let array = Array3::from_shape_vec(shape, values).map_err(|_| Error::ShapeMismatch {
            expected: format!("{shape:?}"),
            actual: format!("{} values", image.as_raw().len()),
        })?;

        Ok(self.alloc(array.into_dyn()))
    }

    /// Run a predictor on tensors from this store.
    ///
    /// The output is allocated in the current scope like any other tensor.
    ///
    /// # Errors
    ///
    /// Returns an error if an input is disposed or the predictor fails.
    pub fn run(&self, predictor: &dyn Predictor, inputs: &[&Tensor]) -> Result<Tensor> {
        let arrays = inputs
            .iter()
            .map(|tensor| tensor.to_array())
            .collect::<Result<Vec<_>>>()?;

        let output = predictor.predict(&arrays)?;
        Ok(self.alloc(output))
    }

    /// Release a buffer. Returns `false` if it was already released.
    pub fn dispose(&self, id: TensorId) -> bool {
        self.lock().buffers.remove(&id).is_some()
    }

    /// Whether the buffer behind `id` is still held.
    #[must_use]
    pub fn is_live(&self, id: TensorId) -> bool {
        self.lock().buffers.contains_key(&id)
    }

    /// Count live tensors and their bytes.
    #[must_use]
    pub fn memory(&self) -> MemoryInfo {
        let inner = self.lock();
        MemoryInfo {
            num_tensors: inner.buffers.len(),
            num_bytes: inner
                .buffers
                .values()
                .map(|buffer| buffer.len() * std::mem::size_of::<f32>())
                .sum(),
        }
    }

    /// Open a scope. Tensors allocated until the guard is closed are released
    /// when it closes, except those passed to [`ScopeGuard::keep`].
    #[must_use = "dropping the guard closes the scope immediately"]
    pub fn scope(&self) -> ScopeGuard {
        let mut inner = self.lock();
        inner.scopes.push(Vec::new());
        ScopeGuard {
            store: self.clone(),
            depth: inner.scopes.len(),
            closed: false,
        }
    }

    /// Run `f` in a fresh scope and keep only the tensors in its result.
    ///
    /// If `f` fails (or panics) every tensor it allocated is released.
    ///
    /// # Errors
    ///
    /// Returns whatever error `f` returns.
    pub fn tidy<T, F>(&self, f: F) -> Result<T>
    where
        T: Tracked,
        F: FnOnce() -> Result<T>,
    {
        let scope = self.scope();
        let value = f()?;
        Ok(scope.keep(value))
    }

    fn read<R>(&self, id: TensorId, f: impl FnOnce(&ArrayD<f32>) -> R) -> Result<R> {
        let inner = self.lock();
        let buffer = inner
            .buffers
            .get(&id)
            .ok_or(Error::TensorDisposed { id: id.0 })?;
        Ok(f(buffer))
    }

    fn close_scope(&self, depth: usize, keep: &[TensorId]) -> usize {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let mut released = 0;

        // A guard that outlived an inner one also closes the inner scope.
        while inner.scopes.len() >= depth {
            let Some(ids) = inner.scopes.pop() else {
                break;
            };
            for id in ids {
                if !keep.contains(&id) && inner.buffers.remove(&id).is_some() {
                    released += 1;
                }
            }
        }

        if let Some(parent) = inner.scopes.last_mut() {
            parent.extend(
                keep.iter()
                    .copied()
                    .filter(|id| inner.buffers.contains_key(id)),
            );
        }

        released
    }
}

/// Open scope on a [`TensorStore`]; closes on drop.
#[derive(Debug)]
pub struct ScopeGuard {
    store: TensorStore,
    depth: usize,
    closed: bool,
}

impl ScopeGuard {
    /// Close the scope, moving the tensors in `value` to the enclosing scope.
    pub fn keep<T: Tracked>(mut self, value: T) -> T {
        let mut ids = Vec::new();
        value.tensor_ids(&mut ids);
        self.close(&ids);
        value
    }

    fn close(&mut self, keep: &[TensorId]) {
        if self.closed {
            return;
        }
        self.closed = true;

        let released = self.store.close_scope(self.depth, keep);
        tracing::trace!(depth = self.depth, released, kept = keep.len(), "closed tensor scope");
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.close(&[]);
    }
}

/// Values that may carry tensors out of a scope.
pub trait Tracked {
    /// Append the ids of every tensor owned by `self`.
    fn tensor_ids(&self, ids: &mut Vec<TensorId>);
}

impl Tracked for () {
    fn tensor_ids(&self, _ids: &mut Vec<TensorId>) {}
}

impl Tracked for Tensor {
    fn tensor_ids(&self, ids: &mut Vec<TensorId>) {
        ids.push(self.id);
    }
}

impl Tracked for PixelBuffer {
    fn tensor_ids(&self, _ids: &mut Vec<TensorId>) {}
}

impl<T: Tracked> Tracked for Option<T> {
    fn tensor_ids(&self, ids: &mut Vec<TensorId>) {
        if let Some(value) = self {
            value.tensor_ids(ids);
        }
    }
}

impl<T: Tracked> Tracked for Vec<T> {
    fn tensor_ids(&self, ids: &mut Vec<TensorId>) {
        for value in self {
            value.tensor_ids(ids);
        }
    }
}

impl<A: Tracked, B: Tracked> Tracked for (A, B) {
    fn tensor_ids(&self, ids: &mut Vec<TensorId>) {
        self.0.tensor_ids(ids);
        self.1.tensor_ids(ids);
    }
}

/// Handle to a buffer in a [`TensorStore`].
///
/// Operations never modify a tensor; they allocate a new one.
#[derive(Debug)]
pub struct Tensor {
    id: TensorId,
    shape: Vec<usize>,
    store: TensorStore,
}

impl Tensor {
    #[must_use]
    pub const fn id(&self) -> TensorId {
        self.id
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn store(&self) -> &TensorStore {
        &self.store
    }

    /// Release the buffer. Releasing twice is a no-op.
    pub fn dispose(&self) -> bool {
        self.store.dispose(self.id)
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        !self.store.is_live(self.id)
    }

    /// Copy the buffer out of the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the tensor is disposed.
    pub fn to_array(&self) -> Result<ArrayD<f32>> {
        self.store.read(self.id, Clone::clone)
    }

    /// Copy the buffer out in row-major order.
    ///
    /// # Errors
    ///
    /// Returns an error if the tensor is disposed.
    pub fn to_vec(&self) -> Result<Vec<f32>> {
        self.store.read(self.id, |buffer| buffer.iter().copied().collect())
    }

    fn map(&self, f: impl FnOnce(&ArrayD<f32>) -> Result<ArrayD<f32>>) -> Result<Self> {
        let output = self.store.read(self.id, f)??;
        Ok(self.store.alloc(output))
    }

    /// # Errors
    ///
    /// Returns an error if the tensor is disposed.
    pub fn div_scalar(&self, divisor: f32) -> Result<Self> {
        self.map(|buffer| Ok(buffer / divisor))
    }

    /// # Errors
    ///
    /// Returns an error if the tensor is disposed.
    pub fn mul_scalar(&self, factor: f32) -> Result<Self> {
        self.map(|buffer| Ok(buffer * factor))
    }

    /// Elementwise sum; both shapes must be identical (no broadcasting).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the shapes differ, or an error if
    /// either tensor is disposed.
    pub fn add_strict(&self, other: &Self) -> Result<Self> {
        if self.shape != other.shape {
            return Err(Error::shape_mismatch(&self.shape, &other.shape));
        }

        let rhs = other.to_array()?;
        self.map(|lhs| Ok(lhs + &rhs))
    }

    /// Insert a length-1 axis at `axis`.
    ///
    /// # Errors
    ///
    /// Returns an error if `axis` is past the tensor's rank.
    pub fn expand_dims(&self, axis: usize) -> Result<Self> {
        if axis > self.shape.len() {
            return Err(Error::InvalidParameter {
                name: "axis".to_string(),
                reason: format!("{axis} is out of range for rank {}", self.shape.len()),
            });
        }
        self.map(|buffer| Ok(buffer.clone().insert_axis(Axis(axis))))
    }

    /// Remove `axis`, which must have length 1.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if `axis` is missing or longer than 1.
    pub fn squeeze_axis(&self, axis: usize) -> Result<Self> {
        if self.shape.get(axis) != Some(&1) {
            let mut expected = self.shape.clone();
            if axis < expected.len() {
                expected[axis] = 1;
            }
            return Err(Error::shape_mismatch(&expected, &self.shape));
        }
        self.map(|buffer| Ok(buffer.clone().remove_axis(Axis(axis))))
    }

    /// Convert an `[height, width, 3]` tensor with values in [0, 1] to pixels.
    ///
    /// Values are scaled by 255, rounded and clamped to [0, 255].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] for any other shape.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_pixels(&self) -> Result<PixelBuffer> {
        let &[height, width, channels] = self.shape.as_slice() else {
            return Err(Error::ShapeMismatch {
                expected: "[height, width, 3]".to_string(),
                actual: format!("{:?}", self.shape),
            });
        };
        if channels != RGB_CHANNELS {
            return Err(Error::shape_mismatch(&[height, width, RGB_CHANNELS], &self.shape));
        }

        let raw: Vec<u8> = self.store.read(self.id, |buffer| {
            buffer
                .iter()
                // Safe: clamped to [0, 255] before casting
                .map(|&value| (value * 255.0).round().clamp(0.0, 255.0) as u8)
                .collect()
        })?;

        let width = u32::try_from(width).map_err(|_| Error::shape_mismatch(&[], &self.shape))?;
        let height = u32::try_from(height).map_err(|_| Error::shape_mismatch(&[], &self.shape))?;

        RgbImage::from_raw(width, height, raw)
            .map(PixelBuffer::from_rgb)
            .ok_or_else(|| Error::shape_mismatch(&[height as usize, width as usize, 3], &self.shape))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, IxDyn};

    fn vector(store: &TensorStore, values: &[f32]) -> Tensor {
        store.alloc(arr1(values).into_dyn())
    }

    #[test]
    fn test_tidy_releases_intermediates() {
        let store = TensorStore::new();
        let input = vector(&store, &[1.0, 2.0, 3.0]);

        let output = store
            .tidy(|| {
                let doubled = input.mul_scalar(2.0)?;
                let halved = doubled.div_scalar(4.0)?;
                halved.add_strict(&input)
            })
            .unwrap();

        assert_eq!(store.memory().num_tensors, 2);
        assert_eq!(output.to_vec().unwrap(), vec![1.5, 3.0, 4.5]);
        assert!(!input.is_disposed());
    }

    #[test]
    fn test_tidy_releases_everything_on_error() {
        let store = TensorStore::new();
        let a = vector(&store, &[1.0, 2.0]);
        let b = vector(&store, &[1.0, 2.0, 3.0]);

        let result = store.tidy(|| {
            let scaled = a.mul_scalar(0.5)?;
            scaled.add_strict(&b)
        });

        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
        assert_eq!(store.memory().num_tensors, 2);
    }

    #[test]
    fn test_nested_scope_result_is_freed_once() {
        let store = TensorStore::new();
        let input = vector(&store, &[1.0, 1.0]);

        let outer = store
            .tidy(|| {
                let inner = store.tidy(|| input.mul_scalar(3.0))?;
                let unused = store.tidy(|| input.mul_scalar(5.0))?;
                assert!(!unused.is_disposed());

                // Released by the outer scope; disposing again must be harmless.
                inner.dispose();
                assert!(!inner.dispose());
                input.mul_scalar(7.0)
            })
            .unwrap();

        assert_eq!(store.memory().num_tensors, 2);
        assert_eq!(outer.to_vec().unwrap(), vec![7.0, 7.0]);
    }

    #[test]
    fn test_tuple_result_keeps_both() {
        let store = TensorStore::new();
        let input = vector(&store, &[2.0]);

        let (a, b) = store
            .tidy(|| {
                let _scratch = input.mul_scalar(10.0)?;
                Ok((input.mul_scalar(2.0)?, input.mul_scalar(3.0)?))
            })
            .unwrap();

        assert_eq!(store.memory().num_tensors, 3);
        assert_eq!(a.to_vec().unwrap(), vec![4.0]);
        assert_eq!(b.to_vec().unwrap(), vec![6.0]);
    }

    #[test]
    fn test_dropped_guard_releases_scope() {
        let store = TensorStore::new();
        {
            let _scope = store.scope();
            vector(&store, &[1.0]);
            vector(&store, &[2.0]);
            assert_eq!(store.memory().num_tensors, 2);
        }
        assert_eq!(store.memory(), MemoryInfo::default());
    }

    #[test]
    fn test_read_after_dispose_fails() {
        let store = TensorStore::new();
        let tensor = vector(&store, &[1.0]);
        assert!(tensor.dispose());

        assert!(matches!(
            tensor.to_vec(),
            Err(Error::TensorDisposed { .. })
        ));
    }

    #[test]
    fn test_expand_and_squeeze() {
        let store = TensorStore::new();
        let tensor = store.alloc(ArrayD::zeros(IxDyn(&[4, 5, 3])));

        let batched = tensor.expand_dims(0).unwrap();
        assert_eq!(batched.shape(), &[1, 4, 5, 3]);
        assert_eq!(batched.squeeze_axis(0).unwrap().shape(), &[4, 5, 3]);
        assert!(tensor.expand_dims(4).is_err());
    }

    #[test]
    fn test_squeeze_axis_keeps_other_unit_axes() {
        let store = TensorStore::new();
        let tensor = store.alloc(ArrayD::zeros(IxDyn(&[1, 1, 7, 3])));

        assert_eq!(tensor.squeeze_axis(0).unwrap().shape(), &[1, 7, 3]);
        assert!(matches!(
            tensor.squeeze_axis(2),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(tensor.squeeze_axis(4).is_err());
    }

    #[test]
    fn test_memory_counts_bytes() {
        let store = TensorStore::new();
        vector(&store, &[0.0; 25]);

        assert_eq!(
            store.memory(),
            MemoryInfo {
                num_tensors: 1,
                num_bytes: 100,
            }
        );
    }

    #[test]
    fn test_to_pixels_scales_and_clamps() {
        let store = TensorStore::new();
        let values = vec![-0.5, 0.0, 0.5, 1.0, 1.5, 0.2];
        let tensor = store.alloc(ArrayD::from_shape_vec(IxDyn(&[1, 2, 3]), values).unwrap());

        let pixels = tensor.to_pixels().unwrap();

        assert_eq!((pixels.width(), pixels.height()), (2, 1));
        assert_eq!(pixels.as_raw(), &[0, 0, 128, 255, 255, 51]);
    }

    #[test]
    fn test_to_pixels_rejects_wrong_channels() {
        let store = TensorStore::new();
        let tensor = store.alloc(ArrayD::zeros(IxDyn(&[2, 2, 4])));

        assert!(matches!(
            tensor.to_pixels(),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_from_pixels_layout() {
        let store = TensorStore::new();
        let image = ImageSource::from_rgb(
            "pixels",
            RgbImage::from_raw(2, 1, vec![1, 2, 3, 4, 5, 6]).unwrap(),
        );

        let tensor = store.alloc_pixels(&image).unwrap();

        assert_eq!(tensor.shape(), &[1, 2, 3]);
        assert_eq!(tensor.to_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
