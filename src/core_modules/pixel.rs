// THEORY:
// The `Pixel` module is the most fundamental unit of the engine. It is a "dumb"
// data container for a single 4-channel, 8-bit-per-channel value, exactly as it
// is laid out in a `PixelBuffer` row. It knows how to come from and go back to
// raw bytes and nothing more; reductions over many pixels live in `Block`.
//
// Channel names follow the RGBA order the codec produces. The kernels never
// interpret the channels, so a BGRA store pixelates just as well.

pub mod pixel {
    pub type Byte = u8;
    pub type Channel = Byte;

    /// Number of channels in every pixel of a `PixelBuffer`.
    pub const CHANNELS: usize = 4;

    /// A "dumb" data container representing a single RGBA pixel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Pixel {
        /// The red channel value (0-255).
        pub red: Channel,
        /// The green channel value (0-255).
        pub green: Channel,
        /// The blue channel value (0-255).
        pub blue: Channel,
        /// The alpha (transparency) channel value (0-255).
        pub alpha: Channel,
    }

    impl Pixel {
        pub fn new(red: Channel, green: Channel, blue: Channel, alpha: Channel) -> Self {
            Pixel {
                red,
                green,
                blue,
                alpha,
            }
        }

        /// Reads a pixel from the first four bytes of `bytes`.
        /// Returns `None` when fewer than four bytes are available.
        pub fn from_bytes(bytes: &[Byte]) -> Option<Self> {
            match bytes {
                [red, green, blue, alpha, ..] => Some(Pixel::new(*red, *green, *blue, *alpha)),
                _ => None,
            }
        }

        /// The channel at `index` in storage order (0 = red .. 3 = alpha).
        #[inline]
        pub fn channel(&self, index: usize) -> Channel {
            match index {
                0 => self.red,
                1 => self.green,
                2 => self.blue,
                _ => self.alpha,
            }
        }

        #[inline]
        pub fn to_bytes(self) -> [Byte; CHANNELS] {
            [self.red, self.green, self.blue, self.alpha]
        }
    }

    impl From<[Byte; CHANNELS]> for Pixel {
        fn from(bytes: [Byte; CHANNELS]) -> Self {
            Pixel::new(bytes[0], bytes[1], bytes[2], bytes[3])
        }
    }

    impl From<Pixel> for [Byte; CHANNELS] {
        fn from(pixel: Pixel) -> Self {
            pixel.to_bytes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::pixel::*;

    #[test]
    fn reads_storage_order() {
        let pixel = Pixel::from_bytes(&[1, 2, 3, 4, 99]).expect("four bytes available");
        assert_eq!(pixel, Pixel::new(1, 2, 3, 4));
        assert_eq!((0..CHANNELS).map(|c| pixel.channel(c)).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(<[u8; 4]>::from(pixel), [1, 2, 3, 4]);
    }

    #[test]
    fn short_slices_are_rejected() {
        assert_eq!(Pixel::from_bytes(&[1, 2, 3]), None);
    }
}
