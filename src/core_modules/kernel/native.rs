//! The reference backend: gather every block into a `Block`, reduce it, scatter the
//! result back. Simple and obviously correct; the `Tuned` backend is checked
//! against it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{KernelParams, KernelVariant, PixelationAlgorithm, PixelationKernel, block_seed, validate_band};
use crate::core_modules::block::block::Block;
use crate::core_modules::pixel_buffer::RowBand;
use crate::error::KernelError;

/// Per-block gather/reduce/scatter backend.
///
/// `Random` seeds a fresh `StdRng` per block from the dispatch seed and the block's
/// grid position, so for a fixed seed the output does not depend on how the image
/// was partitioned.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeKernel;

impl PixelationKernel for NativeKernel {
    fn variant(&self) -> KernelVariant {
        KernelVariant::Native
    }

    fn apply(&self, band: &mut RowBand<'_>, params: &KernelParams) -> Result<(), KernelError> {
        validate_band(band, params)?;

        let block_size = params.block_size;
        let rows = band.rows();
        let width = band.width();
        let mut block = Block::with_capacity(block_size * block_size);

        for y in (0..rows).step_by(block_size) {
            let block_height = block_size.min(rows - y);
            let block_y = (band.start_row() + y) / block_size;

            for x in (0..width).step_by(block_size) {
                let block_width = block_size.min(width - x);

                let value = match params.algorithm {
                    PixelationAlgorithm::Average => {
                        block.gather(band, x, y, block_width, block_height);
                        block.average_pixel()
                    }
                    PixelationAlgorithm::Median => {
                        block.gather(band, x, y, block_width, block_height);
                        block.median_pixel()
                    }
                    PixelationAlgorithm::Random => {
                        let mut rng = StdRng::seed_from_u64(block_seed(params.seed, x / block_size, block_y));
                        let chosen_x = rng.gen_range(0..block_width);
                        let chosen_y = rng.gen_range(0..block_height);
                        band.pixel(x + chosen_x, y + chosen_y)
                    }
                };

                band.fill_rect(x, y, block_width, block_height, value);
            }
        }

        Ok(())
    }
}
