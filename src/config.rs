use crate::{
    common::*,
    model::{DiscriminatorInit, GeneratorInit},
};

/// Construction-time options shared by the generator/discriminator pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Dimension of the latent vector and of the style vector derived from
    /// it.
    pub dim_latent: usize,
    /// Feature depth of the lowest-resolution scale.
    pub depth_scale0: usize,
    /// Spatial size of the lowest-resolution scale.
    pub size_scale0: (i64, i64),
    /// Channel count of the image domain. 3 for color, 1 for grey levels.
    pub dim_output: usize,
    /// Force the bias of every learnable projection to zero at creation.
    pub init_bias_to_zero: bool,
    pub leaky_relu_leak: f64,
    /// Normalize the input latent vector before the style mapping layers.
    pub normalization: bool,
    /// Activation applied to the generator output image.
    pub generation_activation: OutputActivation,
    /// Initialize weights at N(0, 1) and apply He's constant at runtime.
    pub equalized_lr: bool,
    /// Depth of the style mapping network.
    pub n_mlp: usize,
    pub noise_injection: bool,
    /// Transposed-convolution orientation for the learnable projections.
    pub transposed: bool,
    /// Overwrite channel 0 of every generator feature map with a vertical
    /// ramp.
    pub add_gradient_map: bool,
    /// The critique network consumes a channel-concatenated image pair.
    pub paired_input: bool,
    /// Append a batch stddev channel before the lowest-resolution
    /// discriminator convolution.
    pub minibatch_std_dev: bool,
    /// Output width of the discriminator decision head.
    pub size_decision_layer: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dim_latent: 128,
            depth_scale0: 64,
            size_scale0: (4, 4),
            dim_output: 3,
            init_bias_to_zero: true,
            leaky_relu_leak: 0.2,
            normalization: true,
            generation_activation: OutputActivation::Identity,
            equalized_lr: true,
            n_mlp: 8,
            noise_injection: true,
            transposed: false,
            add_gradient_map: false,
            paired_input: true,
            minibatch_std_dev: false,
            size_decision_layer: 1,
        }
    }
}

impl ModelConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = json5::from_str(&fs::read_to_string(path)?)?;
        Ok(config)
    }

    pub fn generator(&self) -> GeneratorInit {
        GeneratorInit {
            dim_latent: self.dim_latent,
            depth_scale0: self.depth_scale0,
            size_scale0: self.size_scale0,
            dim_output: self.dim_output,
            n_mlp: self.n_mlp,
            normalization: self.normalization,
            leaky_relu_leak: self.leaky_relu_leak,
            equalized_lr: self.equalized_lr,
            init_bias_to_zero: self.init_bias_to_zero,
            transposed: self.transposed,
            noise_injection: self.noise_injection,
            add_gradient_map: self.add_gradient_map,
            generation_activation: self.generation_activation,
        }
    }

    pub fn discriminator(&self) -> DiscriminatorInit {
        DiscriminatorInit {
            depth_scale0: self.depth_scale0,
            size_scale0: self.size_scale0,
            dim_input: self.dim_output,
            paired_input: self.paired_input,
            leaky_relu_leak: self.leaky_relu_leak,
            equalized_lr: self.equalized_lr,
            init_bias_to_zero: self.init_bias_to_zero,
            minibatch_std_dev: self.minibatch_std_dev,
            size_decision_layer: self.size_decision_layer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputActivation {
    Identity,
    Tanh,
}

impl OutputActivation {
    pub fn apply(&self, xs: &Tensor) -> Tensor {
        match self {
            Self::Identity => xs.shallow_clone(),
            Self::Tanh => xs.tanh(),
        }
    }
}
