use ndarray::{ArrayD, ArrayViewD, Zip};

use crate::error::{MlErr, Result};

/// A stable handle to a parameter slot, assigned once when the model is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(usize);

impl ParamId {
    /// Returns the position of the slot inside its arena.
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct ParamSlot {
    name: String,
    value: ArrayD<f32>,
}

/// Owns every trainable parameter of a model, each one living in a slot
/// addressed by its `ParamId`.
#[derive(Debug, Clone, Default)]
pub struct ParamArena {
    slots: Vec<ParamSlot>,
}

impl ParamArena {
    /// Creates a new empty `ParamArena`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new parameter to the arena, stored in standard layout.
    ///
    /// # Arguments
    /// * `name` - A human readable name, used for logging.
    /// * `value` - The initial value of the parameter.
    ///
    /// # Returns
    /// The id of the new slot.
    pub fn register(&mut self, name: impl Into<String>, value: ArrayD<f32>) -> ParamId {
        let id = ParamId(self.slots.len());
        let value = if value.is_standard_layout() {
            value
        } else {
            value.as_standard_layout().into_owned()
        };

        self.slots.push(ParamSlot {
            name: name.into(),
            value,
        });
        id
    }

    /// Returns the amount of parameter slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the total amount of scalars across every slot.
    pub fn size(&self) -> usize {
        self.slots.iter().map(|slot| slot.value.len()).sum()
    }

    pub fn name(&self, id: ParamId) -> Result<&str> {
        self.slot(id).map(|slot| slot.name.as_str())
    }

    pub fn value(&self, id: ParamId) -> Result<&ArrayD<f32>> {
        self.slot(id).map(|slot| &slot.value)
    }

    pub fn value_mut(&mut self, id: ParamId) -> Result<&mut ArrayD<f32>> {
        let len = self.slots.len();
        self.slots
            .get_mut(id.0)
            .map(|slot| &mut slot.value)
            .ok_or(MlErr::UnknownParam { id: id.0, len })
    }

    /// Iterates every slot id in registration order.
    pub fn ids(&self) -> impl Iterator<Item = ParamId> + use<> {
        (0..self.slots.len()).map(ParamId)
    }

    /// Iterates every parameter value in registration order.
    pub fn values(&self) -> impl Iterator<Item = &ArrayD<f32>> {
        self.slots.iter().map(|slot| &slot.value)
    }

    /// Iterates every parameter value mutably in registration order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut ArrayD<f32>> {
        self.slots.iter_mut().map(|slot| &mut slot.value)
    }

    /// Returns one zeroed tensor per slot, shaped like the parameter.
    pub fn zeros_like(&self) -> Vec<ArrayD<f32>> {
        self.values()
            .map(|value| ArrayD::zeros(value.raw_dim()))
            .collect()
    }

    fn slot(&self, id: ParamId) -> Result<&ParamSlot> {
        self.slots.get(id.0).ok_or(MlErr::UnknownParam {
            id: id.0,
            len: self.slots.len(),
        })
    }
}

/// The gradient a single evaluation produced for one parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamGrad {
    /// The evaluation touched the parameter.
    Contributed(ArrayD<f32>),
    /// The parameter took no part in the evaluation.
    NotApplicable,
}

impl ParamGrad {
    pub fn as_contribution(&self) -> Option<&ArrayD<f32>> {
        match self {
            ParamGrad::Contributed(grad) => Some(grad),
            ParamGrad::NotApplicable => None,
        }
    }
}

/// One `ParamGrad` per slot of a `ParamArena`, indexed by `ParamId`.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientMap(Vec<ParamGrad>);

impl GradientMap {
    /// Creates a `GradientMap` where no parameter has been touched.
    ///
    /// # Arguments
    /// * `params` - The amount of parameter slots.
    pub fn unused(params: usize) -> Self {
        Self(vec![ParamGrad::NotApplicable; params])
    }

    /// Creates a `GradientMap` from already computed per slot gradients.
    pub fn from_grads(grads: Vec<ParamGrad>) -> Self {
        Self(grads)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, id: ParamId) -> Option<&ParamGrad> {
        self.0.get(id.0)
    }

    /// Returns the per slot gradients, indexed by `ParamId::index`.
    pub fn as_slice(&self) -> &[ParamGrad] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &ParamGrad)> {
        self.0.iter().enumerate().map(|(i, grad)| (ParamId(i), grad))
    }

    /// Adds `grad` into the gradient of `id`, turning a `NotApplicable` entry
    /// into a contribution.
    ///
    /// # Arguments
    /// * `id` - The parameter the gradient belongs to.
    /// * `grad` - The gradient to add.
    ///
    /// # Returns
    /// An error if `id` is out of bounds or the shapes don't match.
    pub fn add(&mut self, id: ParamId, grad: ArrayViewD<f32>) -> Result<()> {
        let len = self.0.len();
        let entry = self
            .0
            .get_mut(id.0)
            .ok_or(MlErr::UnknownParam { id: id.0, len })?;

        match entry {
            ParamGrad::Contributed(acc) => {
                if acc.shape() != grad.shape() {
                    return Err(MlErr::ShapeMismatch {
                        what: "gradient",
                        got: grad.shape().to_vec(),
                        expected: acc.shape().to_vec(),
                    });
                }

                Zip::from(acc).and(&grad).for_each(|a, &g| *a += g);
            }
            ParamGrad::NotApplicable => *entry = ParamGrad::Contributed(grad.to_owned()),
        }

        Ok(())
    }

    /// Multiplies every contributed gradient by `factor`.
    pub fn scale(&mut self, factor: f32) {
        for grad in self.0.iter_mut() {
            if let ParamGrad::Contributed(grad) = grad {
                grad.mapv_inplace(|g| g * factor);
            }
        }
    }
}

/// The outcome of evaluating one sub-batch: its loss and the gradient of that
/// loss with respect to every parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    pub grads: GradientMap,
}

impl Evaluation {
    pub fn new(loss: f32, grads: GradientMap) -> Self {
        Self { loss, grads }
    }
}
