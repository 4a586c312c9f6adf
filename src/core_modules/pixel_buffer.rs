// THEORY:
// The `PixelBuffer` owns the raw pixel store of one image: a contiguous byte vector
// of `stride * height` (or more) bytes, 4 bytes per pixel, rows possibly padded.
//
// All mutation goes through `acquire()`, which hands out a `PixelBufferGuard`. The
// guard is the scoped lock: it holds the store's write lock for its whole lifetime
// and releases it when dropped, on every exit path including unwinding. A second
// `acquire()` while a guard is alive fails with `BufferError::Busy`.
//
// Copies (`clone`, `to_rgba_vec`) only read, so they share a read lock. Any number of
// them may run at once; they wait for an in-flight pass instead of failing, and a
// pass started while a copy is running reports `Busy`.
//
// Parallel work never takes a second lock. Instead the single guard splits its bytes
// into disjoint `RowBand`s, one per `WorkRange`, with `split_at_mut`. Each band is an
// exclusive `&mut [u8]` over whole rows, so two workers cannot alias the same row.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use crate::core_modules::partitioner::WorkRange;
use crate::core_modules::pixel::pixel::{CHANNELS, Pixel};
use crate::error::BufferError;

/// Bytes per pixel of the fixed 32-bit pixel format.
pub const BYTES_PER_PIXEL: usize = CHANNELS;

/// An image's pixel store plus its geometry.
#[derive(Debug)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    stride: usize,
    data: RwLock<Vec<u8>>,
}

impl PixelBuffer {
    /// Wraps a tightly packed RGBA store (`stride == width * 4`).
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, BufferError> {
        Self::with_stride(width, height, width as usize * BYTES_PER_PIXEL, data)
    }

    /// Wraps a store whose rows are `stride` bytes apart.
    pub fn with_stride(
        width: u32,
        height: u32,
        stride: usize,
        data: Vec<u8>,
    ) -> Result<Self, BufferError> {
        if width == 0 || height == 0 {
            return Err(BufferError::EmptyImage { width, height });
        }
        if stride < width as usize * BYTES_PER_PIXEL {
            return Err(BufferError::StrideTooSmall { width, stride });
        }
        let required = stride
            .checked_mul(height as usize)
            .ok_or(BufferError::GeometryOverflow { stride, height })?;
        if data.len() < required {
            return Err(BufferError::DataTooShort {
                required,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            data: RwLock::new(data),
        })
    }

    /// A tightly packed image with every pixel set to `pixel`.
    pub fn filled(width: u32, height: u32, pixel: Pixel) -> Result<Self, BufferError> {
        let bytes = pixel.to_bytes();
        let data = bytes
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * BYTES_PER_PIXEL)
            .collect();
        Self::from_rgba(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// The `"{width}x{height}"` label used in benchmark records.
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Locks the store for one processing pass.
    pub fn acquire(&self) -> Result<PixelBufferGuard<'_>, BufferError> {
        let data = match self.data.try_write() {
            Ok(data) => data,
            // A panic elsewhere never leaves the bytes structurally invalid.
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(BufferError::Busy),
        };
        Ok(PixelBufferGuard {
            width: self.width as usize,
            height: self.height as usize,
            stride: self.stride,
            data,
        })
    }

    /// The visible pixels as a tightly packed RGBA vector, padding stripped.
    ///
    /// Waits for an in-flight processing pass to finish.
    pub fn to_rgba_vec(&self) -> Vec<u8> {
        let data = self.read();
        let row_bytes = self.width as usize * BYTES_PER_PIXEL;
        let mut packed = Vec::with_capacity(row_bytes * self.height as usize);
        for row in data.chunks(self.stride).take(self.height as usize) {
            packed.extend_from_slice(&row[..row_bytes]);
        }
        packed
    }

    /// Consumes the buffer and returns the raw store, padding included.
    pub fn into_raw(self) -> Vec<u8> {
        self.data.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deep copy with identical geometry, including row padding. Shares the read lock
/// with other copies and waits for an in-flight processing pass.
impl Clone for PixelBuffer {
    fn clone(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            stride: self.stride,
            data: RwLock::new(self.read().clone()),
        }
    }
}

/// The exclusive, scoped handle returned by `PixelBuffer::acquire`.
pub struct PixelBufferGuard<'a> {
    width: usize,
    height: usize,
    stride: usize,
    data: RwLockWriteGuard<'a, Vec<u8>>,
}

impl<'a> PixelBufferGuard<'a> {
    /// Splits the store into one exclusive band per non-empty range.
    ///
    /// Ranges must be ordered by `start_row`, pairwise disjoint and inside the image.
    /// Empty ranges produce no band.
    pub fn bands(&mut self, ranges: &[WorkRange]) -> Result<Vec<RowBand<'_>>, BufferError> {
        let (width, height, stride) = (self.width, self.height, self.stride);
        let mut rest: &mut [u8] = &mut self.data[..];
        let mut consumed_rows = 0usize;
        let mut bands = Vec::with_capacity(ranges.len());

        for range in ranges {
            if range.is_empty() {
                continue;
            }
            if range.start_row < consumed_rows || range.end_row > height {
                return Err(BufferError::RangeOutOfBounds {
                    start_row: range.start_row,
                    end_row: range.end_row,
                });
            }

            let skip = (range.start_row - consumed_rows) * stride;
            let band_len = range.rows() * stride;
            let (_, tail) = std::mem::take(&mut rest).split_at_mut(skip);
            let (band, tail) = tail.split_at_mut(band_len);
            rest = tail;
            consumed_rows = range.end_row;

            bands.push(RowBand {
                worker_index: range.worker_index,
                start_row: range.start_row,
                end_row: range.end_row,
                width,
                image_height: height,
                stride,
                data: band,
            });
        }

        Ok(bands)
    }
}

/// A worker's exclusive view of rows `[start_row, end_row)` of an image.
///
/// Row 0 of `data` is image row `start_row`. Coordinates passed to the accessors
/// are band-local rows and image columns.
#[derive(Debug)]
pub struct RowBand<'a> {
    worker_index: usize,
    start_row: usize,
    end_row: usize,
    width: usize,
    image_height: usize,
    stride: usize,
    data: &'a mut [u8],
}

impl<'a> RowBand<'a> {
    /// Builds a band over caller-provided bytes. The bytes are not validated here;
    /// kernels check that they cover the declared rows before touching them.
    pub fn new(
        worker_index: usize,
        start_row: usize,
        end_row: usize,
        width: usize,
        image_height: usize,
        stride: usize,
        data: &'a mut [u8],
    ) -> Self {
        Self {
            worker_index,
            start_row,
            end_row,
            width,
            image_height,
            stride,
            data,
        }
    }

    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    pub fn start_row(&self) -> usize {
        self.start_row
    }

    pub fn end_row(&self) -> usize {
        self.end_row
    }

    /// Number of rows in the band.
    pub fn rows(&self) -> usize {
        self.end_row.saturating_sub(self.start_row)
    }

    /// Image width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height of the whole image, not of the band.
    pub fn image_height(&self) -> usize {
        self.image_height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn row_bytes(&self) -> usize {
        self.width * BYTES_PER_PIXEL
    }

    /// Bytes needed to hold every visible pixel of the band.
    pub fn required_len(&self) -> usize {
        match self.rows() {
            0 => 0,
            rows => (rows - 1) * self.stride + self.row_bytes(),
        }
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// Visible pixels of band-local row `y`.
    #[inline]
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + self.row_bytes()]
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let start = y * self.stride;
        let row_bytes = self.row_bytes();
        &mut self.data[start..start + row_bytes]
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> Pixel {
        let offset = y * self.stride + x * BYTES_PER_PIXEL;
        let bytes = &self.data[offset..offset + BYTES_PER_PIXEL];
        Pixel::new(bytes[0], bytes[1], bytes[2], bytes[3])
    }

    /// Writes `value` to every pixel of the `w`x`h` rectangle at (`x`, `y`).
    pub fn fill_rect(&mut self, x: usize, y: usize, w: usize, h: usize, value: Pixel) {
        let bytes = value.to_bytes();
        for row in y..y + h {
            let row = self.row_mut(row);
            for pixel in row[x * BYTES_PER_PIXEL..(x + w) * BYTES_PER_PIXEL].chunks_exact_mut(BYTES_PER_PIXEL) {
                pixel.copy_from_slice(&bytes);
            }
        }
    }
}
