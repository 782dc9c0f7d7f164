//! Per-node streaming state.

use crate::core::buffer::RasterBuffer;
use crate::core::region::Region;
use crate::core::types::ImageInfo;

/// Whether a node's buffered output can be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheValidity {
    /// Must be regenerated before use.
    #[default]
    Stale,
    /// Generated from the current inputs and parameters.
    Fresh,
}

/// State the engine keeps on each node between passes.
///
/// `requested` is overwritten on every division pass and `buffered` is
/// replaced whenever the node executes; nothing accumulates.
#[derive(Debug, Clone, Default)]
pub struct NodeState {
    /// Output information, set once per run.
    pub info: Option<ImageInfo>,
    /// Region consumers need in the current pass.
    pub requested: Option<Region>,
    /// Output held after the last execution.
    pub buffered: Option<RasterBuffer>,
    /// Request that produced `buffered`.
    pub last_request: Option<Region>,
    /// Reusability of `buffered`.
    pub validity: CacheValidity,
}

impl NodeState {
    /// Region covered by the buffered output.
    pub fn buffered_region(&self) -> Option<Region> {
        self.buffered.as_ref().map(|b| b.region())
    }

    /// Whether the buffered output is fresh and covers `requested`.
    pub fn satisfies(&self, requested: &Region) -> bool {
        self.validity == CacheValidity::Fresh
            && self
                .buffered_region()
                .is_some_and(|buffered| buffered.contains(requested))
    }

    /// Mark the buffered output as needing regeneration.
    pub fn invalidate(&mut self) {
        self.validity = CacheValidity::Stale;
    }

    /// Forget everything including output information.
    pub fn reset(&mut self) {
        *self = NodeState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_satisfies_requires_fresh_and_cover() {
        let mut state = NodeState::default();
        let requested = Region::new(0, 0, 4, 4);
        assert!(!state.satisfies(&requested));

        state.buffered = Some(RasterBuffer::new(Region::from_size(8, 8), 1));
        assert!(!state.satisfies(&requested));

        state.validity = CacheValidity::Fresh;
        assert!(state.satisfies(&requested));
        assert!(!state.satisfies(&Region::new(4, 4, 8, 8)));

        state.invalidate();
        assert!(!state.satisfies(&requested));
    }
}
