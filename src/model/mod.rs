mod block;
mod discriminator;
mod equalized;
mod generator;
mod gradient_map;
mod minibatch_stddev;
mod style;

pub use block::*;
pub use discriminator::*;
pub use equalized::*;
pub use generator::*;
pub use gradient_map::*;
pub use minibatch_stddev::*;
pub use style::*;

use crate::common::*;

pub(crate) fn leaky_relu(xs: &Tensor, leak: f64) -> Tensor {
    xs.maximum(&(xs * leak))
}
