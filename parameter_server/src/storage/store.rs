use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;
use machine_learning::params::{GradientMap, ParamArena, ParamGrad};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use rayon::prelude::*;

use crate::{
    optimization::Optimizer,
    storage::{Result, StorageErr},
};

/// The receiving end of an accumulated update.
pub trait Store {
    /// Applies an accumulated gradient to the model's parameters.
    ///
    /// # Arguments
    /// * `grads` - One entry per parameter slot, `NotApplicable` slots are left untouched.
    /// * `loss` - The accumulated loss the gradient belongs to.
    /// * `global_step` - The global step before this update.
    ///
    /// # Returns
    /// The new global step or an error if `grads` doesn't match the parameters.
    fn apply_gradients(&self, grads: &GradientMap, loss: f32, global_step: u64) -> Result<u64>;
}

/// The primary storage of the model's parameters, shared by every worker.
///
/// Every parameter slot owns its own optimizer, workers read the parameters
/// during a round and the optimizer takes the write lock once per update.
#[derive(Debug)]
pub struct ParameterStore<O: Optimizer> {
    params: RwLock<ParamArena>,
    optimizers: Box<[Mutex<O>]>,
    global_step: AtomicU64,
}

impl<O: Optimizer> ParameterStore<O> {
    /// Creates a new `ParameterStore`.
    ///
    /// # Arguments
    /// * `params` - The freshly built model parameters.
    /// * `optimizer_factory` - An `Optimizer` factory closure, called once per slot with its shape.
    ///
    /// # Returns
    /// A new `ParameterStore` instance.
    pub fn new<F>(params: ParamArena, mut optimizer_factory: F) -> Self
    where
        F: FnMut(&[usize]) -> O,
    {
        let optimizers = params
            .values()
            .map(|value| Mutex::new(optimizer_factory(value.shape())))
            .collect();

        Self {
            params: RwLock::new(params),
            optimizers,
            global_step: AtomicU64::new(0),
        }
    }

    /// Returns the amount of parameter slots.
    pub fn len(&self) -> usize {
        self.optimizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.optimizers.is_empty()
    }

    /// Returns the global step of the last applied update.
    pub fn global_step(&self) -> u64 {
        self.global_step.load(Ordering::Acquire)
    }

    /// Locks the parameters for reading, blocking while an update is being applied.
    pub fn read(&self) -> RwLockReadGuard<'_, ParamArena> {
        self.params.read()
    }

    /// Copies the current parameters out of the store.
    pub fn pull_params(&self) -> ParamArena {
        self.params.read().clone()
    }
}

impl<O: Optimizer + Send> Store for ParameterStore<O> {
    fn apply_gradients(&self, grads: &GradientMap, loss: f32, global_step: u64) -> Result<u64> {
        if grads.len() != self.optimizers.len() {
            return Err(StorageErr::SizeMismatch {
                what: "gradient map",
                got: grads.len(),
                expected: self.optimizers.len(),
            });
        }

        let mut params = self.params.write();
        let values: Vec<_> = params.values_mut().collect();

        values
            .into_par_iter()
            .zip(grads.as_slice().par_iter())
            .zip(self.optimizers.par_iter())
            .try_for_each(|((value, grad), optimizer)| match grad {
                ParamGrad::Contributed(grad) => {
                    optimizer.lock().update_params(grad.view(), value.view_mut())
                }
                ParamGrad::NotApplicable => Ok(()),
            })?;

        let new_step = global_step + 1;
        self.global_step.store(new_step, Ordering::Release);
        trace!(global_step = new_step, loss = loss; "applied gradients");
        Ok(new_step)
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::params::ParamId;
    use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, IxDyn, Zip, arr1};

    use super::*;

    struct AddOptimizer;

    impl Optimizer for AddOptimizer {
        fn update_params(&mut self, grad: ArrayViewD<f32>, params: ArrayViewMutD<f32>) -> Result<()> {
            Zip::from(params).and(&grad).for_each(|p, &g| *p += g);
            Ok(())
        }
    }

    fn create_test_store() -> (ParameterStore<AddOptimizer>, ParamId, ParamId) {
        let mut params = ParamArena::new();
        let a = params.register("a", ArrayD::zeros(IxDyn(&[3])));
        let b = params.register("b", ArrayD::ones(IxDyn(&[2, 2])));
        (ParameterStore::new(params, |_| AddOptimizer), a, b)
    }

    #[test]
    fn factory_is_called_once_per_slot() {
        let mut shape_log = Vec::new();
        let mut params = ParamArena::new();
        params.register("a", ArrayD::zeros(IxDyn(&[3])));
        params.register("b", ArrayD::zeros(IxDyn(&[2, 2])));

        let store = ParameterStore::new(params, |shape| {
            shape_log.push(shape.to_vec());
            AddOptimizer
        });

        assert_eq!(store.len(), 2);
        assert_eq!(shape_log, [vec![3], vec![2, 2]]);
    }

    #[test]
    fn not_applicable_slots_are_left_untouched() {
        let (store, a, b) = create_test_store();
        let mut grads = GradientMap::unused(2);
        grads.add(a, arr1(&[1f32, 2., 3.]).into_dyn().view()).unwrap();

        let step = store.apply_gradients(&grads, 0.5, 7).unwrap();

        assert_eq!(step, 8);
        assert_eq!(store.global_step(), 8);
        let params = store.pull_params();
        assert_eq!(*params.value(a).unwrap(), arr1(&[1f32, 2., 3.]).into_dyn());
        assert_eq!(*params.value(b).unwrap(), ArrayD::<f32>::ones(IxDyn(&[2, 2])));
    }

    #[test]
    fn mismatched_gradient_map_fails() {
        let (store, _, _) = create_test_store();
        let grads = GradientMap::unused(3);

        let err = store.apply_gradients(&grads, 0., 0).unwrap_err();
        assert!(matches!(err, StorageErr::SizeMismatch { got: 3, expected: 2, .. }));
        assert_eq!(store.global_step(), 0);
    }
}
