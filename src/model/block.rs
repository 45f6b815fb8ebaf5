use super::{
    leaky_relu, EqualizedConv2D, EqualizedConv2DInit, EqualizedLinear, EqualizedLinearInit,
};
use crate::common::*;

const NORM_EPS: f64 = 1e-8;

/// Adds caller-supplied per-stage noise scaled by a learned per-channel
/// coefficient. The coefficient starts at zero so a fresh stage is
/// noise-free.
#[derive(Debug)]
pub struct NoiseInjection {
    weight: Tensor,
}

impl NoiseInjection {
    pub fn new<'a>(path: impl Borrow<nn::Path<'a>>, channels: usize) -> Self {
        let path = path.borrow();
        let weight = path.zeros("noise_weight", &[1, channels as i64, 1, 1]);
        Self { weight }
    }

    pub fn f_forward(&self, xs: &Tensor, noise: &Tensor) -> Result<Tensor> {
        let (bsize, _, in_h, in_w) = xs.size4()?;
        ensure!(
            noise.size4()? == (bsize, 1, in_h, in_w),
            "expect noise of shape {:?}, but got {:?}",
            [bsize, 1, in_h, in_w],
            noise.size()
        );
        ensure!(
            noise.device() == xs.device(),
            "noise device {:?} does not match feature device {:?}",
            noise.device(),
            xs.device()
        );

        Ok(xs + &self.weight * noise)
    }
}

/// Adaptive instance normalization: the style vector produces a per-channel
/// affine scale/shift applied to the instance-normalized feature map.
#[derive(Debug)]
pub struct AdaIn {
    linear: EqualizedLinear,
    channels: i64,
}

impl AdaIn {
    pub fn new<'a>(
        path: impl Borrow<nn::Path<'a>>,
        dim_latent: usize,
        channels: usize,
        equalized: bool,
    ) -> Result<Self> {
        let linear = EqualizedLinearInit {
            equalized,
            init_bias_to_zero: true,
        }
        .build(path, dim_latent, channels * 2)?;

        Ok(Self {
            linear,
            channels: channels as i64,
        })
    }

    pub fn f_forward(&self, xs: &Tensor, style: &Tensor) -> Result<Tensor> {
        let (bsize, in_c, _, _) = xs.size4()?;
        ensure!(
            in_c == self.channels,
            "expect {} channels, but got {}",
            self.channels,
            in_c
        );

        let mean = xs.mean_dim(&[2, 3], true, Kind::Float);
        let centered = xs - &mean;
        let var = centered.square().mean_dim(&[2, 3], true, Kind::Float);
        let normed = centered * (var + NORM_EPS).rsqrt();

        let modulation = self.linear.forward(style);
        ensure!(
            modulation.size2()? == (bsize, self.channels * 2),
            "style batch does not match feature batch"
        );
        let chunks = modulation.chunk(2, 1);
        let scale = chunks[0].reshape(&[bsize, self.channels, 1, 1]);
        let shift = chunks[1].reshape(&[bsize, self.channels, 1, 1]);

        Ok(normed * (scale + 1.0) + shift)
    }
}

/// One styled convolutional stage. With `upsample` unset this is the format
/// stage converting the auxiliary input into the scale-0 feature map; with
/// `upsample` set it doubles the spatial resolution of its input.
#[derive(Debug, Clone)]
pub struct StyledConvBlockInit {
    pub ksize: usize,
    pub padding: i64,
    pub upsample: bool,
    pub noise_injection: bool,
    pub equalized: bool,
    pub init_bias_to_zero: bool,
    pub transposed: bool,
    pub leak: f64,
}

impl Default for StyledConvBlockInit {
    fn default() -> Self {
        Self {
            ksize: 3,
            padding: 1,
            upsample: false,
            noise_injection: true,
            equalized: true,
            init_bias_to_zero: true,
            transposed: false,
            leak: 0.2,
        }
    }
}

impl StyledConvBlockInit {
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        in_c: usize,
        out_c: usize,
        dim_latent: usize,
    ) -> Result<StyledConvBlock> {
        let path = path.borrow();
        let Self {
            ksize,
            padding,
            upsample,
            noise_injection,
            equalized,
            init_bias_to_zero,
            transposed,
            leak,
        } = self;

        let conv = EqualizedConv2DInit {
            ksize,
            padding,
            equalized,
            init_bias_to_zero,
            transposed,
        }
        .build(path / "conv", in_c, out_c)?;
        let modulation = AdaIn::new(path / "adain", dim_latent, out_c, equalized)?;
        let noise = noise_injection.then(|| NoiseInjection::new(path / "noise", out_c));

        Ok(StyledConvBlock {
            conv,
            modulation,
            noise,
            upsample,
            leak,
        })
    }
}

#[derive(Debug)]
pub struct StyledConvBlock {
    conv: EqualizedConv2D,
    modulation: AdaIn,
    noise: Option<NoiseInjection>,
    upsample: bool,
    leak: f64,
}

impl StyledConvBlock {
    /// Convolution, style modulation, noise injection, nonlinearity — in
    /// that order. Noise and style are pure call-time inputs; the block
    /// retains no state between calls.
    pub fn f_forward(
        &self,
        xs: &Tensor,
        style: &Tensor,
        noise: Option<&Tensor>,
    ) -> Result<Tensor> {
        let xs = if self.upsample {
            let (_, _, in_h, in_w) = xs.size4()?;
            xs.upsample_nearest2d(&[in_h * 2, in_w * 2], None, None)
        } else {
            xs.shallow_clone()
        };

        let xs = self.conv.forward(&xs);
        let xs = self.modulation.f_forward(&xs, style)?;
        let xs = match (&self.noise, noise) {
            (Some(injection), Some(noise)) => injection.f_forward(&xs, noise)?,
            (Some(_), None) => bail!("this stage expects a noise tensor"),
            (None, _) => xs,
        };

        Ok(leaky_relu(&xs, self.leak))
    }
}

/// Stage-construction strategy for the synthesis path. Owns the shared
/// construction knobs; the growth orchestrator asks it for stages and color
/// projections instead of building them itself.
#[derive(Debug, Clone)]
pub struct StyledStageFactory {
    pub dim_latent: usize,
    pub dim_output: usize,
    pub ksize: usize,
    pub padding: i64,
    pub leak: f64,
    pub equalized: bool,
    pub init_bias_to_zero: bool,
    pub transposed: bool,
    pub noise_injection: bool,
}

impl StyledStageFactory {
    fn block_init(&self, upsample: bool) -> StyledConvBlockInit {
        StyledConvBlockInit {
            ksize: self.ksize,
            padding: self.padding,
            upsample,
            noise_injection: self.noise_injection,
            equalized: self.equalized,
            init_bias_to_zero: self.init_bias_to_zero,
            transposed: self.transposed,
            leak: self.leak,
        }
    }

    /// Entry stage: auxiliary conditioning input to the scale-0 feature map.
    pub fn format_stage<'a>(
        &self,
        path: impl Borrow<nn::Path<'a>>,
        depth: usize,
    ) -> Result<StyledConvBlock> {
        self.block_init(false)
            .build(path, self.dim_output, depth, self.dim_latent)
    }

    /// Styled stage doubling the spatial resolution.
    pub fn scale_stage<'a>(
        &self,
        path: impl Borrow<nn::Path<'a>>,
        in_depth: usize,
        out_depth: usize,
    ) -> Result<StyledConvBlock> {
        self.block_init(true)
            .build(path, in_depth, out_depth, self.dim_latent)
    }

    /// 1x1 projection from a scale's depth to the image channel count.
    pub fn color_projection<'a>(
        &self,
        path: impl Borrow<nn::Path<'a>>,
        depth: usize,
    ) -> Result<EqualizedConv2D> {
        EqualizedConv2DInit {
            ksize: 1,
            padding: 0,
            equalized: self.equalized,
            init_bias_to_zero: self.init_bias_to_zero,
            transposed: self.transposed,
        }
        .build(path, depth, self.dim_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_stage_doubles_resolution() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let block = StyledConvBlockInit {
            upsample: true,
            ..Default::default()
        }
        .build(&root / "block", 8, 16, 32)?;

        let xs = Tensor::rand(&[2, 8, 4, 4], FLOAT_CPU);
        let style = Tensor::rand(&[2, 32], FLOAT_CPU);
        let noise = Tensor::rand(&[2, 1, 8, 8], FLOAT_CPU);
        let ys = block.f_forward(&xs, &style, Some(&noise))?;
        ensure!(ys.size() == vec![2, 16, 8, 8], "incorrect output shape");

        Ok(())
    }

    #[test]
    fn format_stage_keeps_resolution() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let factory = StyledStageFactory {
            dim_latent: 32,
            dim_output: 3,
            ksize: 3,
            padding: 1,
            leak: 0.2,
            equalized: true,
            init_bias_to_zero: true,
            transposed: false,
            noise_injection: true,
        };
        let block = factory.format_stage(&root / "format", 16)?;

        let aux = Tensor::rand(&[2, 3, 4, 4], FLOAT_CPU);
        let style = Tensor::rand(&[2, 32], FLOAT_CPU);
        let noise = Tensor::rand(&[2, 1, 4, 4], FLOAT_CPU);
        let ys = block.f_forward(&aux, &style, Some(&noise))?;
        ensure!(ys.size() == vec![2, 16, 4, 4], "incorrect output shape");

        Ok(())
    }

    #[test]
    fn missing_noise_is_fatal() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let block = StyledConvBlockInit::default().build(&root / "block", 4, 4, 16)?;
        let xs = Tensor::rand(&[1, 4, 4, 4], FLOAT_CPU);
        let style = Tensor::rand(&[1, 16], FLOAT_CPU);
        ensure!(
            block.f_forward(&xs, &style, None).is_err(),
            "expect missing-noise error"
        );

        Ok(())
    }

    #[test]
    fn wrong_noise_shape_is_fatal() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let block = StyledConvBlockInit::default().build(&root / "block", 4, 4, 16)?;
        let xs = Tensor::rand(&[1, 4, 4, 4], FLOAT_CPU);
        let style = Tensor::rand(&[1, 16], FLOAT_CPU);
        let noise = Tensor::rand(&[1, 1, 8, 8], FLOAT_CPU);
        ensure!(
            block.f_forward(&xs, &style, Some(&noise)).is_err(),
            "expect shape error"
        );

        Ok(())
    }
}
