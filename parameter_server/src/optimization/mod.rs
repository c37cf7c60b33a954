mod adam;
mod gradient_descent;
mod gradient_descent_with_momentum;
mod optimizer;

pub use adam::Adam;
pub use gradient_descent::GradientDescent;
pub use gradient_descent_with_momentum::GradientDescentWithMomentum;
pub use optimizer::Optimizer;

use machine_learning::MlErr;

use crate::storage::Result;

fn check_shape(what: &'static str, got: &[usize], expected: &[usize]) -> Result<()> {
    if got != expected {
        return Err(MlErr::ShapeMismatch {
            what,
            got: got.to_vec(),
            expected: expected.to_vec(),
        }
        .into());
    }

    Ok(())
}
