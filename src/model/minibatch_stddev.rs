use crate::common::*;

const VAR_EPS: f64 = 1e-8;

/// Appends one channel holding the standard deviation of feature values
/// across the batch, averaged to a single statistic per subgroup. Applied
/// exactly once, before the lowest-resolution discriminator convolution.
#[derive(Debug, Clone)]
pub struct MinibatchStdDevInit {
    /// Statistic granularity: when set and the batch size divides evenly,
    /// the batch is split into subgroups of this size; otherwise the whole
    /// batch forms one group.
    pub subgroup_size: Option<usize>,
}

impl Default for MinibatchStdDevInit {
    fn default() -> Self {
        Self {
            subgroup_size: Some(4),
        }
    }
}

impl MinibatchStdDevInit {
    pub fn build(self) -> Result<MinibatchStdDev> {
        let Self { subgroup_size } = self;
        ensure!(
            subgroup_size.into_iter().all(|size| size > 0),
            "subgroup size must be positive"
        );

        Ok(MinibatchStdDev {
            subgroup_size: subgroup_size.map(|size| size as i64),
        })
    }
}

#[derive(Debug)]
pub struct MinibatchStdDev {
    subgroup_size: Option<i64>,
}

impl MinibatchStdDev {
    pub fn f_forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (in_b, in_c, in_h, in_w) = xs.size4()?;

        let size_sub = match self.subgroup_size {
            Some(size) if in_b % size == 0 => size,
            _ => in_b,
        };
        let num_sub = in_b / size_sub;

        let stat = {
            let ys = xs.reshape(&[size_sub, num_sub, in_c, in_h, in_w]);
            let mean = ys.mean_dim(&[0], true, Kind::Float);
            let var = (ys - mean).square().mean_dim(&[0], false, Kind::Float);
            let stdev = (var + VAR_EPS).sqrt(); // [num_sub, c, h, w]
            stdev.mean_dim(&[1, 2, 3], false, Kind::Float) // [num_sub]
        };

        let stat = stat
            .reshape(&[num_sub, 1, 1, 1])
            .repeat(&[size_sub, 1, in_h, in_w]); // [b, 1, h, w]

        Ok(Tensor::cat(&[xs, &stat], 1))
    }

    /// Number of channels this layer appends.
    pub fn extra_channels(&self) -> usize {
        1
    }
}
