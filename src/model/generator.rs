use super::{
    EqualizedConv2D, GradientMap, StyleMappingNetwork, StyleMappingNetworkInit, StyledConvBlock,
    StyledStageFactory,
};
use crate::{common::*, config::OutputActivation, scale::ScaleRegistry};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct GeneratorInit {
    pub dim_latent: usize,
    pub depth_scale0: usize,
    pub size_scale0: (i64, i64),
    pub dim_output: usize,
    pub n_mlp: usize,
    pub normalization: bool,
    pub leaky_relu_leak: f64,
    pub equalized_lr: bool,
    pub init_bias_to_zero: bool,
    pub transposed: bool,
    pub noise_injection: bool,
    pub add_gradient_map: bool,
    pub generation_activation: OutputActivation,
}

impl Default for GeneratorInit {
    fn default() -> Self {
        Self {
            dim_latent: 128,
            depth_scale0: 64,
            size_scale0: (4, 4),
            dim_output: 3,
            n_mlp: 8,
            normalization: true,
            leaky_relu_leak: 0.2,
            equalized_lr: true,
            init_bias_to_zero: true,
            transposed: false,
            noise_injection: true,
            add_gradient_map: false,
            generation_activation: OutputActivation::Identity,
        }
    }
}

impl GeneratorInit {
    pub fn build(self, path: nn::Path<'_>) -> Result<Generator<'_>> {
        let Self {
            dim_latent,
            depth_scale0,
            size_scale0,
            dim_output,
            n_mlp,
            normalization,
            leaky_relu_leak,
            equalized_lr,
            init_bias_to_zero,
            transposed,
            noise_injection,
            add_gradient_map,
            generation_activation,
        } = self;
        ensure!(dim_latent > 0, "latent dimension must be positive");
        ensure!(dim_output > 0, "output dimension must be positive");

        let registry = ScaleRegistry::new(depth_scale0, size_scale0)?;
        let factory = StyledStageFactory {
            dim_latent,
            dim_output,
            ksize: 3,
            padding: 1,
            leak: leaky_relu_leak,
            equalized: equalized_lr,
            init_bias_to_zero,
            transposed,
            noise_injection,
        };

        let style = StyleMappingNetworkInit {
            n_mlp,
            normalization,
            leak: leaky_relu_leak,
            equalized: equalized_lr,
            init_bias_to_zero,
        }
        .build(&path / "style", dim_latent)?;

        let format = factory.format_stage(&path / "format", depth_scale0)?;
        let to_color = vec![factory.color_projection(&path / "to_color_0", depth_scale0)?];

        Ok(Generator {
            path,
            registry,
            factory,
            style,
            format,
            scale_stages: vec![],
            to_color,
            gradient_map: add_gradient_map.then(|| GradientMap),
            activation: generation_activation,
            dim_latent: dim_latent as i64,
            dim_output: dim_output as i64,
        })
    }
}

/// Growth orchestrator for the synthesis path. Owns the ordered stage and
/// color-projection registries; growth is strictly additive and must be
/// serialized externally with respect to in-flight forward calls.
#[derive(Debug)]
pub struct Generator<'a> {
    path: nn::Path<'a>,
    registry: ScaleRegistry,
    factory: StyledStageFactory,
    style: StyleMappingNetwork,
    format: StyledConvBlock,
    scale_stages: Vec<StyledConvBlock>,
    to_color: Vec<EqualizedConv2D>,
    gradient_map: Option<GradientMap>,
    activation: OutputActivation,
    dim_latent: i64,
    dim_output: i64,
}

impl<'a> Generator<'a> {
    /// Grows the synthesis network by one scale, doubling the output
    /// resolution. Appends exactly one scale stage and one color projection;
    /// existing stages are never touched.
    pub fn add_scale(&mut self, depth: usize) -> Result<()> {
        ensure!(depth > 0, "scale depth must be positive, but got {}", depth);

        let prev_depth = self.registry.last().depth;
        let index = self.registry.len();
        let stage = self.factory.scale_stage(
            &self.path / format!("scale_{}", index),
            prev_depth,
            depth,
        )?;
        let to_color = self
            .factory
            .color_projection(&self.path / format!("to_color_{}", index), depth)?;

        let desc = self.registry.push(depth)?;
        self.scale_stages.push(stage);
        self.to_color.push(to_color);
        debug!(
            index = desc.index,
            depth = desc.depth,
            height = desc.spatial_size.0,
            width = desc.spatial_size.1,
            "registered generator scale"
        );

        Ok(())
    }

    /// Synthesizes a batch of images at the topmost registered scale.
    ///
    /// `noise` must hold one tensor per registered scale (format stage
    /// included), each shaped `(batch, 1, h, w)` at that stage's output
    /// resolution; when omitted, noise is sampled on the latent's device.
    /// When `mean_style` is given, the computed style is interpolated toward
    /// it: `mean + style_weight * (style - mean)`.
    pub fn f_forward(
        &self,
        latent: &Tensor,
        aux_input: &Tensor,
        noise: Option<&[Tensor]>,
        mean_style: Option<&Tensor>,
        style_weight: f64,
    ) -> Result<Tensor> {
        let (bsize, _) = latent.size2()?;
        let device = latent.device();
        ensure!(
            aux_input.device() == device,
            "auxiliary input device {:?} does not match latent device {:?}",
            aux_input.device(),
            device
        );
        {
            let scale0 = self.registry.get(0).unwrap();
            let expect = (
                bsize,
                self.dim_output,
                scale0.spatial_size.0,
                scale0.spatial_size.1,
            );
            ensure!(
                aux_input.size4()? == expect,
                "expect auxiliary input of shape {:?}, but got {:?}",
                expect,
                aux_input.size()
            );
        }

        let style = self.style.f_forward(latent)?;
        let style = match mean_style {
            Some(mean) => mean + (style - mean) * style_weight,
            None => style,
        };

        // noise is call-scoped: either borrowed from the caller or sampled
        // fresh on the latent's device, never cached
        let sampled: Vec<Tensor>;
        let noise: Vec<&Tensor> = match noise {
            Some(noise) => {
                ensure!(
                    noise.len() == self.registry.len(),
                    "expect {} noise tensors (one per registered scale), but got {}",
                    self.registry.len(),
                    noise.len()
                );
                for (tensor, desc) in izip!(noise, self.registry.ascending()) {
                    ensure!(
                        tensor.device() == device,
                        "noise device {:?} does not match latent device {:?}",
                        tensor.device(),
                        device
                    );
                    let (in_h, in_w) = desc.spatial_size;
                    ensure!(
                        tensor.size4()? == (bsize, 1, in_h, in_w),
                        "expect noise of shape {:?} at scale {}, but got {:?}",
                        [bsize, 1, in_h, in_w],
                        desc.index,
                        tensor.size()
                    );
                }
                noise.iter().collect()
            }
            None => {
                sampled = self
                    .registry
                    .ascending()
                    .map(|desc| {
                        let (in_h, in_w) = desc.spatial_size;
                        Tensor::randn(&[bsize, 1, in_h, in_w], (Kind::Float, device))
                    })
                    .collect();
                sampled.iter().collect()
            }
        };

        let xs = self.format.f_forward(aux_input, &style, Some(noise[0]))?;
        let xs = self.inject_gradient_map(xs)?;

        let xs = izip!(&self.scale_stages, noise[1..].iter().copied()).try_fold(
            xs,
            |xs, (stage, noise)| -> Result<_> {
                let xs = stage.f_forward(&xs, &style, Some(noise))?;
                self.inject_gradient_map(xs)
            },
        )?;

        // the projection of the topmost registered scale
        let image = self.to_color.last().unwrap().forward(&xs);
        Ok(self.activation.apply(&image))
    }

    pub fn mean_style(&self, latent: &Tensor) -> Result<Tensor> {
        self.style.mean_style(latent)
    }

    fn inject_gradient_map(&self, xs: Tensor) -> Result<Tensor> {
        match &self.gradient_map {
            Some(map) => map.f_forward(&xs),
            None => Ok(xs),
        }
    }

    pub fn scales(&self) -> &ScaleRegistry {
        &self.registry
    }

    /// Spatial size of the generated image.
    pub fn output_size(&self) -> (i64, i64) {
        self.registry.last().spatial_size
    }
}
