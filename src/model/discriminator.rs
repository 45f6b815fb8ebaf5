use super::{
    leaky_relu, EqualizedConv2D, EqualizedConv2DInit, EqualizedLinear, EqualizedLinearInit,
    MinibatchStdDev, MinibatchStdDevInit,
};
use crate::{common::*, scale::ScaleRegistry};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DiscriminatorInit {
    pub depth_scale0: usize,
    pub size_scale0: (i64, i64),
    /// Native channel count of the image domain; doubled when
    /// `paired_input` is set.
    pub dim_input: usize,
    /// The network scores a channel-concatenated image pair (e.g. image vs.
    /// conditioning) instead of a single plain image.
    pub paired_input: bool,
    pub leaky_relu_leak: f64,
    pub equalized_lr: bool,
    pub init_bias_to_zero: bool,
    /// Append a batch stddev channel at the lowest-resolution stage. Left
    /// off by default: batch statistics are not meaningful over paired
    /// inputs.
    pub minibatch_std_dev: bool,
    pub size_decision_layer: usize,
}

impl Default for DiscriminatorInit {
    fn default() -> Self {
        Self {
            depth_scale0: 64,
            size_scale0: (4, 4),
            dim_input: 3,
            paired_input: true,
            leaky_relu_leak: 0.2,
            equalized_lr: true,
            init_bias_to_zero: true,
            minibatch_std_dev: false,
            size_decision_layer: 1,
        }
    }
}

impl DiscriminatorInit {
    pub fn build(self, path: nn::Path<'_>) -> Result<Discriminator<'_>> {
        let Self {
            depth_scale0,
            size_scale0,
            dim_input,
            paired_input,
            leaky_relu_leak,
            equalized_lr,
            init_bias_to_zero,
            minibatch_std_dev,
            size_decision_layer,
        } = self;
        ensure!(dim_input > 0, "input dimension must be positive");
        ensure!(
            size_decision_layer > 0,
            "decision layer width must be positive"
        );

        let registry = ScaleRegistry::new(depth_scale0, size_scale0)?;
        let dim_input = if paired_input { dim_input * 2 } else { dim_input };
        let factory = CriticStageFactory {
            dim_input,
            ksize: 3,
            padding: 1,
            equalized: equalized_lr,
            init_bias_to_zero,
        };

        let minibatch = minibatch_std_dev
            .then(|| MinibatchStdDevInit::default().build())
            .transpose()?;
        let entry_channels =
            depth_scale0 + minibatch.as_ref().map_or(0, MinibatchStdDev::extra_channels);

        let from_color = vec![factory.color_projection(&path / "from_color_0", depth_scale0)?];
        let entry_conv = EqualizedConv2DInit {
            equalized: equalized_lr,
            init_bias_to_zero,
            ..Default::default()
        }
        .build(&path / "entry_conv", entry_channels, depth_scale0)?;

        let flat_features = (size_scale0.0 * size_scale0.1) as usize * depth_scale0;
        let flatten_linear = EqualizedLinearInit {
            equalized: equalized_lr,
            init_bias_to_zero,
        }
        .build(&path / "flatten_linear", flat_features, depth_scale0)?;
        let decision = EqualizedLinearInit {
            equalized: equalized_lr,
            init_bias_to_zero,
        }
        .build(&path / "decision", depth_scale0, size_decision_layer)?;

        Ok(Discriminator {
            path,
            registry,
            factory,
            from_color,
            groups: vec![],
            minibatch,
            entry_conv,
            flatten_linear,
            decision,
            dim_input: dim_input as i64,
            leak: leaky_relu_leak,
        })
    }
}

/// Stage-construction strategy for the critique path.
#[derive(Debug, Clone)]
pub struct CriticStageFactory {
    pub dim_input: usize,
    pub ksize: usize,
    pub padding: i64,
    pub equalized: bool,
    pub init_bias_to_zero: bool,
}

impl CriticStageFactory {
    fn conv_init(&self) -> EqualizedConv2DInit {
        EqualizedConv2DInit {
            ksize: self.ksize,
            padding: self.padding,
            equalized: self.equalized,
            init_bias_to_zero: self.init_bias_to_zero,
            transposed: false,
        }
    }

    /// 1x1 projection from the (possibly doubled) image channels to a
    /// scale's depth.
    pub fn color_projection<'a>(
        &self,
        path: impl Borrow<nn::Path<'a>>,
        depth: usize,
    ) -> Result<EqualizedConv2D> {
        EqualizedConv2DInit {
            ksize: 1,
            padding: 0,
            ..self.conv_init()
        }
        .build(path, self.dim_input, depth)
    }

    /// Conv group consuming one scale: keeps the scale's depth, then maps
    /// down to the previous scale's depth.
    pub fn scale_group<'a>(
        &self,
        path: impl Borrow<nn::Path<'a>>,
        depth: usize,
        prev_depth: usize,
    ) -> Result<CriticGroup> {
        let path = path.borrow();
        let conv0 = self.conv_init().build(path / "conv0", depth, depth)?;
        let conv1 = self.conv_init().build(path / "conv1", depth, prev_depth)?;
        Ok(CriticGroup { conv0, conv1 })
    }
}

#[derive(Debug)]
pub struct CriticGroup {
    conv0: EqualizedConv2D,
    conv1: EqualizedConv2D,
}

impl CriticGroup {
    fn forward(&self, xs: &Tensor, leak: f64) -> Tensor {
        let xs = leaky_relu(&self.conv0.forward(xs), leak);
        leaky_relu(&self.conv1.forward(&xs), leak)
    }
}

#[derive(Debug)]
pub struct DiscriminatorOutput {
    pub score: Tensor,
    /// Penultimate feature vector, for feature-matching losses. Produced in
    /// the same pass as the score, never recomputed.
    pub feature: Option<Tensor>,
}

/// Growth orchestrator for the critique path: the structural mirror of the
/// generator. Stages are consumed in reverse registration order.
#[derive(Debug)]
pub struct Discriminator<'a> {
    path: nn::Path<'a>,
    registry: ScaleRegistry,
    factory: CriticStageFactory,
    from_color: Vec<EqualizedConv2D>,
    groups: Vec<CriticGroup>,
    minibatch: Option<MinibatchStdDev>,
    entry_conv: EqualizedConv2D,
    flatten_linear: EqualizedLinear,
    decision: EqualizedLinear,
    dim_input: i64,
    leak: f64,
}

impl<'a> Discriminator<'a> {
    /// Grows the critique network by one scale. Appends exactly one conv
    /// group and one from-color projection, mirroring the generator's
    /// growth.
    pub fn add_scale(&mut self, depth: usize) -> Result<()> {
        ensure!(depth > 0, "scale depth must be positive, but got {}", depth);

        let prev_depth = self.registry.last().depth;
        let index = self.registry.len();
        let group = self.factory.scale_group(
            &self.path / format!("scale_{}", index),
            depth,
            prev_depth,
        )?;
        let from_color = self
            .factory
            .color_projection(&self.path / format!("from_color_{}", index), depth)?;

        let desc = self.registry.push(depth)?;
        self.groups.push(group);
        self.from_color.push(from_color);
        debug!(
            index = desc.index,
            depth = desc.depth,
            height = desc.spatial_size.0,
            width = desc.spatial_size.1,
            "registered discriminator scale"
        );

        Ok(())
    }

    pub fn f_forward(&self, xs: &Tensor, get_feature: bool) -> Result<DiscriminatorOutput> {
        let top = self.registry.last();
        let (bsize, in_c, in_h, in_w) = xs.size4()?;
        ensure!(
            in_c == self.dim_input && (in_h, in_w) == top.spatial_size,
            "expect input of shape {:?}, but got {:?}",
            [bsize, self.dim_input, top.spatial_size.0, top.spatial_size.1],
            xs.size()
        );

        // from-color projection of the topmost registered scale
        let xs = leaky_relu(&self.from_color.last().unwrap().forward(xs), self.leak);

        // consume the groups in reverse registration order, downsampling to
        // the next-lower registered size after each
        let xs = izip!(self.groups.iter().rev(), self.registry.descending().skip(1)).fold(
            xs,
            |xs, (group, desc)| {
                let xs = group.forward(&xs, self.leak);
                xs.adaptive_avg_pool2d(&[desc.spatial_size.0, desc.spatial_size.1])
            },
        );

        // scale 0
        let xs = match &self.minibatch {
            Some(minibatch) => minibatch.f_forward(&xs)?,
            None => xs,
        };
        let xs = leaky_relu(&self.entry_conv.forward(&xs), self.leak);
        let xs = xs.flatten(1, -1);
        let x_lin = self.flatten_linear.forward(&xs);
        let xs = leaky_relu(&x_lin, self.leak);
        let score = self.decision.forward(&xs);

        Ok(DiscriminatorOutput {
            score,
            feature: get_feature.then(|| x_lin),
        })
    }

    pub fn scales(&self) -> &ScaleRegistry {
        &self.registry
    }

    /// Spatial size this network expects at its input.
    pub fn input_size(&self) -> (i64, i64) {
        self.registry.last().spatial_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_init() -> DiscriminatorInit {
        DiscriminatorInit {
            depth_scale0: 64,
            size_scale0: (4, 4),
            dim_input: 3,
            ..Default::default()
        }
    }

    #[test]
    fn paired_input_score_and_feature_shapes() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let mut discriminator = small_init().build(&root / "discriminator")?;
        discriminator.add_scale(64)?;
        discriminator.add_scale(64)?;
        ensure!(discriminator.input_size() == (16, 16), "incorrect input size");

        let input = Tensor::rand(&[2, 6, 16, 16], FLOAT_CPU);
        let DiscriminatorOutput { score, feature } =
            discriminator.f_forward(&input, true)?;
        ensure!(score.size() == vec![2, 1], "incorrect score shape");
        ensure!(
            feature.unwrap().size() == vec![2, 64],
            "incorrect feature shape"
        );

        Ok(())
    }

    #[test]
    fn feature_is_omitted_unless_requested() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let discriminator = small_init().build(&root / "discriminator")?;
        let input = Tensor::rand(&[2, 6, 4, 4], FLOAT_CPU);
        let output = discriminator.f_forward(&input, false)?;
        ensure!(output.feature.is_none(), "feature should be omitted");

        Ok(())
    }

    #[test]
    fn wrong_input_resolution_is_fatal() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let mut discriminator = small_init().build(&root / "discriminator")?;
        discriminator.add_scale(32)?;

        // resolution of the previous growth state is no longer accepted
        let input = Tensor::rand(&[2, 6, 4, 4], FLOAT_CPU);
        ensure!(
            discriminator.f_forward(&input, false).is_err(),
            "expect shape error"
        );

        Ok(())
    }

    #[test]
    fn minibatch_stddev_feeds_wider_entry_conv() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let discriminator = DiscriminatorInit {
            paired_input: false,
            minibatch_std_dev: true,
            ..small_init()
        }
        .build(&root / "discriminator")?;

        let input = Tensor::rand(&[4, 3, 4, 4], FLOAT_CPU);
        let output = discriminator.f_forward(&input, false)?;
        ensure!(output.score.size() == vec![4, 1], "incorrect score shape");

        Ok(())
    }

    #[test]
    fn mirrored_growth_depth_chain() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let mut discriminator = DiscriminatorInit {
            depth_scale0: 16,
            ..small_init()
        }
        .build(&root / "discriminator")?;
        discriminator.add_scale(12)?;
        discriminator.add_scale(8)?;

        // descending traversal visits the most recent depth first
        let descending: Vec<_> = discriminator
            .scales()
            .descending()
            .map(|desc| desc.depth)
            .collect();
        ensure!(descending == vec![8, 12, 16], "incorrect traversal order");

        let input = Tensor::rand(&[2, 6, 16, 16], FLOAT_CPU);
        let output = discriminator.f_forward(&input, false)?;
        ensure!(output.score.size() == vec![2, 1], "incorrect score shape");

        Ok(())
    }
}
