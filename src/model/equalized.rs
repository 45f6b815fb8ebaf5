use crate::common::*;

/// Learnable linear map honoring the weight-equalization convention: the
/// stored weight stays at its unit-variance initialization and the He
/// constant `sqrt(2 / fan_in)` is applied multiplicatively at every
/// evaluation.
#[derive(Debug, Clone)]
pub struct EqualizedLinearInit {
    pub equalized: bool,
    pub init_bias_to_zero: bool,
}

impl Default for EqualizedLinearInit {
    fn default() -> Self {
        Self {
            equalized: true,
            init_bias_to_zero: true,
        }
    }
}

impl EqualizedLinearInit {
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_c: usize,
        out_c: usize,
    ) -> Result<EqualizedLinear> {
        ensure!(in_c > 0 && out_c > 0, "channel counts must be positive");
        let path = path.borrow();
        let Self {
            equalized,
            init_bias_to_zero,
        } = self;
        let in_c = in_c as i64;
        let out_c = out_c as i64;

        let weight = path.randn("weight", &[out_c, in_c], 0.0, 1.0);
        let bias = if init_bias_to_zero {
            path.zeros("bias", &[out_c])
        } else {
            path.randn("bias", &[out_c], 0.0, 1.0)
        };
        let scale = if equalized {
            f64::sqrt(2.0 / in_c as f64)
        } else {
            1.0
        };

        Ok(EqualizedLinear {
            weight,
            bias,
            scale,
        })
    }
}

#[derive(Debug)]
pub struct EqualizedLinear {
    weight: Tensor,
    bias: Tensor,
    scale: f64,
}

impl nn::Module for EqualizedLinear {
    fn forward(&self, xs: &Tensor) -> Tensor {
        let Self {
            ref weight,
            ref bias,
            scale,
        } = *self;
        xs.matmul(&(weight * scale).tr()) + bias
    }
}

/// Convolutional counterpart of [`EqualizedLinear`]. `transposed` selects
/// the transposed-convolution orientation; the weight layout follows it.
#[derive(Debug, Clone)]
pub struct EqualizedConv2DInit {
    pub ksize: usize,
    pub padding: i64,
    pub equalized: bool,
    pub init_bias_to_zero: bool,
    pub transposed: bool,
}

impl Default for EqualizedConv2DInit {
    fn default() -> Self {
        Self {
            ksize: 3,
            padding: 1,
            equalized: true,
            init_bias_to_zero: true,
            transposed: false,
        }
    }
}

impl EqualizedConv2DInit {
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_c: usize,
        out_c: usize,
    ) -> Result<EqualizedConv2D> {
        ensure!(in_c > 0 && out_c > 0, "channel counts must be positive");
        let path = path.borrow();
        let Self {
            ksize,
            padding,
            equalized,
            init_bias_to_zero,
            transposed,
        } = self;
        ensure!(ksize > 0, "kernel size must be positive, but got {}", ksize);
        let in_c = in_c as i64;
        let out_c = out_c as i64;
        let ksize = ksize as i64;

        let weight_shape = if transposed {
            [in_c, out_c, ksize, ksize]
        } else {
            [out_c, in_c, ksize, ksize]
        };
        let weight = path.randn("weight", &weight_shape, 0.0, 1.0);
        let bias = if init_bias_to_zero {
            path.zeros("bias", &[out_c])
        } else {
            path.randn("bias", &[out_c], 0.0, 1.0)
        };

        let fan_in = (in_c * ksize * ksize) as f64;
        let scale = if equalized { f64::sqrt(2.0 / fan_in) } else { 1.0 };

        Ok(EqualizedConv2D {
            weight,
            bias,
            scale,
            padding,
            transposed,
        })
    }
}

#[derive(Debug)]
pub struct EqualizedConv2D {
    weight: Tensor,
    bias: Tensor,
    scale: f64,
    padding: i64,
    transposed: bool,
}

impl nn::Module for EqualizedConv2D {
    fn forward(&self, xs: &Tensor) -> Tensor {
        let Self {
            ref weight,
            ref bias,
            scale,
            padding,
            transposed,
        } = *self;
        let weight = weight * scale;

        if transposed {
            xs.conv_transpose2d(
                &weight,
                Some(bias),
                &[1, 1],           // stride
                &[padding, padding],
                &[0, 0],           // output_padding
                1,                 // groups
                &[1, 1],           // dilation
            )
        } else {
            xs.conv2d(
                &weight,
                Some(bias),
                &[1, 1],           // stride
                &[padding, padding],
                &[1, 1],           // dilation
                1,                 // groups
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equalized_linear_shape() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let linear = EqualizedLinearInit::default().build(&root / "linear", 16, 8)?;
        let input = Tensor::rand(&[4, 16], FLOAT_CPU);
        let output = linear.forward(&input);
        ensure!(output.size() == vec![4, 8], "incorrect output shape");

        Ok(())
    }

    #[test]
    fn equalized_conv_keeps_spatial_size() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        for &transposed in &[false, true] {
            let conv = EqualizedConv2DInit {
                transposed,
                ..Default::default()
            }
            .build(&root / format!("conv_{}", transposed), 3, 5)?;

            let input = Tensor::rand(&[2, 3, 8, 8], FLOAT_CPU);
            let output = conv.forward(&input);
            ensure!(output.size() == vec![2, 5, 8, 8], "incorrect output shape");
        }

        Ok(())
    }

    #[test]
    fn evaluation_is_idempotent() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let conv = EqualizedConv2DInit {
            init_bias_to_zero: false,
            ..Default::default()
        }
        .build(&root / "conv", 4, 4)?;
        let input = Tensor::rand(&[2, 4, 8, 8], FLOAT_CPU);

        let first = conv.forward(&input);
        let second = conv.forward(&input);
        let diff = f64::from(&(&first - &second).abs().max());
        ensure!(diff == 0.0, "evaluation mutated hidden state");

        Ok(())
    }

    #[test]
    fn zero_bias_option() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let linear = EqualizedLinearInit::default().build(&root / "linear", 8, 8)?;
        let zeros = linear.forward(&Tensor::zeros(&[1, 8], FLOAT_CPU));
        let magnitude = f64::from(&zeros.abs().max());
        ensure!(magnitude == 0.0, "bias was not initialized to zero");

        Ok(())
    }
}
