use crate::common::*;

/// One registered resolution of a progressively grown network. Immutable
/// once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleDescriptor {
    pub index: usize,
    pub depth: usize,
    pub spatial_size: (i64, i64),
}

/// Append-only ladder of registered scales. Each append doubles the spatial
/// size of the previous top; existing entries are never mutated, removed, or
/// reordered. The generator walks [`ScaleRegistry::ascending`], the
/// discriminator walks [`ScaleRegistry::descending`]; both sides share this
/// type so the mirror ordering lives in one place.
#[derive(Debug, Clone)]
pub struct ScaleRegistry {
    scales: Vec<ScaleDescriptor>,
}

impl ScaleRegistry {
    pub fn new(depth_scale0: usize, size_scale0: (i64, i64)) -> Result<Self> {
        ensure!(
            depth_scale0 > 0,
            "scale 0 depth must be positive, but got {}",
            depth_scale0
        );
        ensure!(
            size_scale0.0 > 0 && size_scale0.1 > 0,
            "scale 0 spatial size must be positive, but got {:?}",
            size_scale0
        );

        Ok(Self {
            scales: vec![ScaleDescriptor {
                index: 0,
                depth: depth_scale0,
                spatial_size: size_scale0,
            }],
        })
    }

    /// Registers the next scale at double the top spatial size and returns
    /// its descriptor.
    pub fn push(&mut self, depth: usize) -> Result<ScaleDescriptor> {
        ensure!(depth > 0, "scale depth must be positive, but got {}", depth);

        let top = *self.last();
        let desc = ScaleDescriptor {
            index: top.index + 1,
            depth,
            spatial_size: (top.spatial_size.0 * 2, top.spatial_size.1 * 2),
        };
        self.scales.push(desc);
        Ok(desc)
    }

    pub fn len(&self) -> usize {
        self.scales.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scales.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ScaleDescriptor> {
        self.scales.get(index)
    }

    /// The most recently registered scale. The registry is seeded with scale
    /// 0 at construction, so a top scale always exists.
    pub fn last(&self) -> &ScaleDescriptor {
        self.scales.last().unwrap()
    }

    /// Registration order: scale 0 first. The generator's stage evaluation
    /// order.
    pub fn ascending(&self) -> impl DoubleEndedIterator<Item = &ScaleDescriptor> {
        self.scales.iter()
    }

    /// Reverse registration order: most recently added scale first. The
    /// discriminator's stage consumption order.
    pub fn descending(&self) -> impl Iterator<Item = &ScaleDescriptor> {
        self.scales.iter().rev()
    }

    pub fn depths(&self) -> Vec<usize> {
        self.scales.iter().map(|desc| desc.depth).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_doubles_spatial_size() -> Result<()> {
        let mut registry = ScaleRegistry::new(64, (4, 4))?;
        registry.push(48)?;
        registry.push(32)?;

        let sizes: Vec<_> = registry
            .ascending()
            .map(|desc| desc.spatial_size)
            .collect();
        ensure!(sizes == vec![(4, 4), (8, 8), (16, 16)], "incorrect sizes");
        ensure!(registry.depths() == vec![64, 48, 32], "incorrect depths");
        ensure!(registry.last().index == 2, "incorrect top index");

        Ok(())
    }

    #[test]
    fn registry_is_order_preserving() -> Result<()> {
        let mut registry = ScaleRegistry::new(8, (4, 4))?;
        registry.push(16)?;
        registry.push(32)?;

        let ascending: Vec<_> = registry.ascending().map(|desc| desc.index).collect();
        let descending: Vec<_> = registry.descending().map(|desc| desc.index).collect();
        ensure!(ascending == vec![0, 1, 2], "incorrect ascending order");
        ensure!(descending == vec![2, 1, 0], "incorrect descending order");

        Ok(())
    }

    #[test]
    fn registry_rejects_zero_depth() {
        let mut registry = ScaleRegistry::new(8, (4, 4)).unwrap();
        assert!(registry.push(0).is_err());
        assert!(ScaleRegistry::new(0, (4, 4)).is_err());
    }
}
