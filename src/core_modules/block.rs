// THEORY:
// The `Block` module represents one pixelation unit: the (possibly edge-clipped)
// `block_size x block_size` square of pixels that will be replaced by a single value.
//
// Key architectural principles:
// 1.  **Data Container**: Like `Pixel`, `Block` is a "dumb" data container. It holds a
//     flat `Vec<Pixel>` and knows how to summarise its own contents. It does not know
//     where it came from or where the result goes.
// 2.  **Reusable Scratch**: A kernel keeps one `Block` per worker and refills it with
//     `gather` for every block it visits, so the hot loop does not allocate.
// 3.  **Exact Reductions**: Sums are accumulated in `u64`, so no block size can
//     overflow, and every rounding step is half-up.

pub mod block {
    use crate::core_modules::kernel::{midpoint, rounded_mean};
    use crate::core_modules::pixel::pixel::{CHANNELS, Channel, Pixel};
    use crate::core_modules::pixel_buffer::RowBand;

    /// A "dumb" data container representing a rectangular block of pixels.
    #[derive(Debug, Default, Clone)]
    pub struct Block {
        /// The width of the block in pixels.
        pub width: usize,
        /// The height of the block in pixels.
        pub height: usize,
        /// A flattened vector containing all the `Pixel` data within this block.
        pub pixels: Vec<Pixel>,
        /// Per-channel scratch space for the median.
        channel_scratch: Vec<Channel>,
    }

    impl Block {
        pub fn with_capacity(capacity: usize) -> Self {
            Self {
                width: 0,
                height: 0,
                pixels: Vec::with_capacity(capacity),
                channel_scratch: Vec::with_capacity(capacity),
            }
        }

        /// Refills the block with the `width`x`height` rectangle of `band` whose
        /// top-left pixel is column `x`, band-local row `y`.
        pub fn gather(&mut self, band: &RowBand<'_>, x: usize, y: usize, width: usize, height: usize) {
            self.width = width;
            self.height = height;
            self.pixels.clear();
            for row in y..y + height {
                for column in x..x + width {
                    self.pixels.push(band.pixel(column, row));
                }
            }
        }

        pub fn len(&self) -> usize {
            self.pixels.len()
        }

        pub fn is_empty(&self) -> bool {
            self.pixels.is_empty()
        }

        /// Per-channel arithmetic mean, rounded half-up.
        pub fn average_pixel(&self) -> Pixel {
            let count = self.pixels.len() as u64;
            if count == 0 {
                return Pixel::default();
            }

            let mut sums = [0u64; CHANNELS];
            for pixel in &self.pixels {
                for (channel, sum) in sums.iter_mut().enumerate() {
                    *sum += pixel.channel(channel) as u64;
                }
            }

            Pixel::new(
                rounded_mean(sums[0], count),
                rounded_mean(sums[1], count),
                rounded_mean(sums[2], count),
                rounded_mean(sums[3], count),
            )
        }

        /// Per-channel median. For an even count the two middle values are averaged.
        pub fn median_pixel(&mut self) -> Pixel {
            if self.pixels.is_empty() {
                return Pixel::default();
            }

            let mut median = [0 as Channel; CHANNELS];
            for (channel, value) in median.iter_mut().enumerate() {
                self.channel_scratch.clear();
                self.channel_scratch
                    .extend(self.pixels.iter().map(|pixel| pixel.channel(channel)));
                self.channel_scratch.sort_unstable();

                let middle = self.channel_scratch.len() / 2;
                *value = if self.channel_scratch.len() % 2 == 1 {
                    self.channel_scratch[middle]
                } else {
                    midpoint(self.channel_scratch[middle - 1], self.channel_scratch[middle])
                };
            }

            Pixel::from(median)
        }
    }
}
