use crate::common::*;

/// Overwrites channel 0 of a feature map with a top-to-bottom linear ramp
/// from 0 to 1, broadcast across batch and width. The overwrite replaces
/// whatever the convolution computed for that channel, so gradients with
/// respect to it are discarded; the tensor is rebuilt from the ramp and the
/// remaining channels instead of written in place.
#[derive(Debug, Clone, Copy)]
pub struct GradientMap;

impl GradientMap {
    pub fn f_forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (bsize, in_c, in_h, in_w) = xs.size4()?;
        ensure!(in_c >= 1, "feature map has no channels");

        let ramp = Tensor::linspace(0.0, 1.0, in_h, (Kind::Float, xs.device()))
            .reshape(&[1, 1, in_h, 1])
            .expand(&[bsize, 1, in_h, in_w], false);

        let ys = if in_c == 1 {
            ramp
        } else {
            Tensor::cat(&[&ramp, &xs.narrow(1, 1, in_c - 1)], 1)
        };

        Ok(ys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_overwrites_channel_zero() -> Result<()> {
        let xs = Tensor::rand(&[2, 4, 8, 5], FLOAT_CPU);
        let ys = GradientMap.f_forward(&xs)?;
        ensure!(ys.size() == xs.size(), "shape changed");

        // channel 0 is the normalized row index, independent of the input
        let expected = Tensor::linspace(0.0, 1.0, 8, FLOAT_CPU)
            .reshape(&[1, 1, 8, 1])
            .expand(&[2, 1, 8, 5], false);
        let diff = f64::from(&(&ys.narrow(1, 0, 1) - &expected).abs().max());
        ensure!(diff == 0.0, "channel 0 is not the ramp");

        // remaining channels pass through untouched
        let diff = f64::from(&(&ys.narrow(1, 1, 3) - &xs.narrow(1, 1, 3)).abs().max());
        ensure!(diff == 0.0, "other channels were modified");

        Ok(())
    }

    #[test]
    fn ramp_endpoints() -> Result<()> {
        let xs = Tensor::rand(&[1, 2, 4, 3], FLOAT_CPU);
        let ys = GradientMap.f_forward(&xs)?;

        let top = f64::from(&ys.narrow(1, 0, 1).narrow(2, 0, 1).max());
        let bottom = f64::from(&ys.narrow(1, 0, 1).narrow(2, 3, 1).min());
        ensure!(top == 0.0, "ramp does not start at 0");
        ensure!(bottom == 1.0, "ramp does not end at 1");

        Ok(())
    }
}
