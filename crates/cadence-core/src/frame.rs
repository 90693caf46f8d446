use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::RgbaImage;

/// Side length of the downsample grid used for [`Fingerprint`].
const FINGERPRINT_GRID: u32 = 8;

// ─── FramePool ────────────────────────────────────────────────────────────

/// Recycles pixel buffers between captures and tracks frames in flight.
///
/// Every [`Frame`] handed out by the pool returns its buffer when dropped,
/// so release happens exactly once on every path (processed, skipped,
/// discarded on a full buffer, or drained during shutdown).
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
    outstanding: AtomicUsize,
    next_seq: AtomicU64,
}

impl PoolInner {
    fn release(&self, buf: Vec<u8>) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        if let Ok(mut free) = self.free.lock() {
            if free.len() < self.max_idle {
                free.push(buf);
            }
        }
    }
}

impl FramePool {
    /// Create a pool that keeps at most `max_idle` spare buffers.
    pub fn new(max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                max_idle,
                outstanding: AtomicUsize::new(0),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Lease a zeroed `width` x `height` frame, reusing a spare buffer when
    /// one is available.
    pub fn acquire(&self, width: u32, height: u32) -> Frame {
        let len = (width as usize) * (height as usize) * 4;
        let recycled = self.inner.free.lock().ok().and_then(|mut f| f.pop());
        let image = match recycled {
            Some(mut buf) => {
                buf.clear();
                buf.resize(len, 0);
                RgbaImage::from_raw(width, height, buf)
                    .unwrap_or_else(|| RgbaImage::new(width, height))
            }
            None => RgbaImage::new(width, height),
        };
        self.lease(image)
    }

    /// Adopt an image produced elsewhere so that it is accounted for.
    pub fn wrap(&self, image: RgbaImage) -> Frame {
        self.lease(image)
    }

    /// Frames currently leased and not yet dropped.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Spare buffers waiting to be reused.
    pub fn idle_buffers(&self) -> usize {
        self.inner.free.lock().map(|f| f.len()).unwrap_or(0)
    }

    fn lease(&self, image: RgbaImage) -> Frame {
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        Frame {
            image,
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            pool: Arc::clone(&self.inner),
        }
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new(4)
    }
}

// ─── Frame ────────────────────────────────────────────────────────────────

/// One captured image, leased from a [`FramePool`].
pub struct Frame {
    image: RgbaImage,
    seq: u64,
    pool: Arc<PoolInner>,
}

impl Frame {
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    /// Capture order within the owning pool.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn width(&self) -> u32 {
        self.image().width()
    }

    pub fn height(&self) -> u32 {
        self.image().height()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self.image())
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        let image = std::mem::take(&mut self.image);
        self.pool.release(image.into_raw());
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("seq", &self.seq)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

// ─── Fingerprint ──────────────────────────────────────────────────────────

/// Mean luma over an 8x8 grid of cells. Two frames with equal fingerprints
/// are treated as the same scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint([u8; (FINGERPRINT_GRID * FINGERPRINT_GRID) as usize]);

impl Fingerprint {
    pub fn of(image: &RgbaImage) -> Self {
        let grid = FINGERPRINT_GRID as usize;
        let mut sums = [0u64; (FINGERPRINT_GRID * FINGERPRINT_GRID) as usize];
        let mut counts = [0u64; (FINGERPRINT_GRID * FINGERPRINT_GRID) as usize];
        let (w, h) = (image.width().max(1) as usize, image.height().max(1) as usize);

        for (x, y, px) in image.enumerate_pixels() {
            let cx = (x as usize * grid) / w;
            let cy = (y as usize * grid) / h;
            let cell = cy * grid + cx;
            let [r, g, b, _] = px.0;
            sums[cell] += (r as u64 * 299 + g as u64 * 587 + b as u64 * 114) / 1000;
            counts[cell] += 1;
        }

        let mut cells = [0u8; (FINGERPRINT_GRID * FINGERPRINT_GRID) as usize];
        for (i, cell) in cells.iter_mut().enumerate() {
            if counts[i] > 0 {
                *cell = (sums[i] / counts[i]) as u8;
            }
        }
        Fingerprint(cells)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn dropping_a_frame_releases_it_once() {
        let pool = FramePool::new(4);
        let a = pool.acquire(4, 4);
        let b = pool.acquire(4, 4);
        assert_eq!(pool.outstanding(), 2);
        drop(a);
        assert_eq!(pool.outstanding(), 1);
        assert_eq!(pool.idle_buffers(), 1);
        drop(b);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle_buffers(), 2);
    }

    #[test]
    fn recycled_buffer_comes_back_zeroed() {
        let pool = FramePool::new(1);
        let mut frame = pool.acquire(2, 2);
        frame.image_mut().put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        drop(frame);

        let frame = pool.acquire(2, 2);
        assert_eq!(pool.idle_buffers(), 0);
        assert_eq!(frame.image().get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn idle_buffers_are_capped() {
        let pool = FramePool::new(1);
        let frames: Vec<_> = (0..3).map(|_| pool.acquire(1, 1)).collect();
        drop(frames);
        assert_eq!(pool.idle_buffers(), 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn sequence_numbers_increase() {
        let pool = FramePool::default();
        let a = pool.acquire(1, 1);
        let b = pool.wrap(RgbaImage::new(1, 1));
        assert!(b.seq() > a.seq());
    }

    #[test]
    fn identical_images_share_a_fingerprint() {
        let a = RgbaImage::from_pixel(32, 32, Rgba([10, 20, 30, 255]));
        let b = a.clone();
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn changed_region_changes_fingerprint() {
        let a = RgbaImage::from_pixel(32, 32, Rgba([0, 0, 0, 255]));
        let mut b = a.clone();
        for x in 0..8 {
            for y in 0..8 {
                b.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn fingerprint_handles_tiny_frames() {
        let img = RgbaImage::from_pixel(3, 2, Rgba([200, 200, 200, 255]));
        let fp = Fingerprint::of(&img);
        assert_eq!(fp, Fingerprint::of(&img.clone()));
    }
}
