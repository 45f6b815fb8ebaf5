use super::{leaky_relu, EqualizedLinear, EqualizedLinearInit};
use crate::common::*;

const NORM_EPS: f64 = 1e-8;

/// Projects a latent batch onto the unit second-moment manifold. Guards the
/// division with an epsilon.
#[derive(Debug, Clone, Copy)]
pub struct LatentNorm;

impl nn::Module for LatentNorm {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs * (xs.square().mean_dim(&[1], true, Kind::Float) + NORM_EPS).rsqrt()
    }
}

/// Maps a raw latent vector into the style vector that modulates every
/// synthesis stage.
#[derive(Debug, Clone)]
pub struct StyleMappingNetworkInit {
    pub n_mlp: usize,
    pub normalization: bool,
    pub leak: f64,
    pub equalized: bool,
    pub init_bias_to_zero: bool,
}

impl Default for StyleMappingNetworkInit {
    fn default() -> Self {
        Self {
            n_mlp: 8,
            normalization: true,
            leak: 0.2,
            equalized: true,
            init_bias_to_zero: true,
        }
    }
}

impl StyleMappingNetworkInit {
    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        dim_latent: usize,
    ) -> Result<StyleMappingNetwork> {
        let path = path.borrow();
        let Self {
            n_mlp,
            normalization,
            leak,
            equalized,
            init_bias_to_zero,
        } = self;
        ensure!(n_mlp >= 1, "style mapping depth must be at least 1");
        ensure!(dim_latent > 0, "latent dimension must be positive");

        let layers: Vec<_> = (0..n_mlp)
            .map(|index| {
                EqualizedLinearInit {
                    equalized,
                    init_bias_to_zero,
                }
                .build(path / format!("layer{}", index), dim_latent, dim_latent)
            })
            .try_collect()?;

        Ok(StyleMappingNetwork {
            norm: normalization.then(|| LatentNorm),
            layers,
            leak,
            dim_latent: dim_latent as i64,
        })
    }
}

#[derive(Debug)]
pub struct StyleMappingNetwork {
    norm: Option<LatentNorm>,
    layers: Vec<EqualizedLinear>,
    leak: f64,
    dim_latent: i64,
}

impl StyleMappingNetwork {
    pub fn f_forward(&self, latent: &Tensor) -> Result<Tensor> {
        let (_bsize, dim) = latent.size2()?;
        ensure!(
            dim == self.dim_latent,
            "expect latent dimension {}, but got {}",
            self.dim_latent,
            dim
        );

        let xs = match &self.norm {
            Some(norm) => norm.forward(latent),
            None => latent.shallow_clone(),
        };
        let style = self
            .layers
            .iter()
            .fold(xs, |xs, layer| leaky_relu(&layer.forward(&xs), self.leak));

        Ok(style)
    }

    /// Style averaged over the batch dimension, used for controlled or
    /// interpolated generation.
    pub fn mean_style(&self, latent: &Tensor) -> Result<Tensor> {
        let style = self.f_forward(latent)?;
        Ok(style.mean_dim(&[0], true, Kind::Float))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_mapping_preserves_dimension() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let mapping = StyleMappingNetworkInit {
            n_mlp: 4,
            ..Default::default()
        }
        .build(&root / "style", 32)?;

        let latent = Tensor::rand(&[5, 32], FLOAT_CPU);
        let style = mapping.f_forward(&latent)?;
        ensure!(style.size() == vec![5, 32], "incorrect style shape");

        let mean = mapping.mean_style(&latent)?;
        ensure!(mean.size() == vec![1, 32], "incorrect mean style shape");

        Ok(())
    }

    #[test]
    fn style_mapping_rejects_wrong_dimension() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let mapping = StyleMappingNetworkInit::default().build(&root / "style", 16)?;
        let latent = Tensor::rand(&[2, 8], FLOAT_CPU);
        ensure!(mapping.f_forward(&latent).is_err(), "expect shape error");

        Ok(())
    }

    #[test]
    fn latent_norm_handles_zero_input() {
        let zeros = Tensor::zeros(&[2, 8], FLOAT_CPU);
        let normed = LatentNorm.forward(&zeros);
        let magnitude = f64::from(&normed.abs().max());
        assert!(magnitude.is_finite());
    }
}
