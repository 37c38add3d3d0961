// SPDX-License-Identifier: GPL-3.0-only

//! Pixel buffer arena for the recording render path
//!
//! A pool keeps up to `capacity` equally sized RGBA buffers for reuse. Each
//! recorded frame checks one out, the filtered image is rendered into it,
//! and the buffer returns to the pool when the last frame referencing it is
//! dropped. When every buffer is held elsewhere (a preview queueing frames)
//! the pool grows; only `capacity` buffers are kept once they come back.
//! Releasing the pool (on stop or abort) detaches it: outstanding buffers
//! stay valid for their holders but are freed instead of returned.

use crate::backends::camera::types::{Dimensions, Frame};
use image::{RgbaImage, imageops};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Slot index of a pooled buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle(usize);

struct PoolSlots {
    free: Vec<(PoolHandle, Vec<u8>)>,
    /// Buffers ever allocated; also the next handle
    allocated: usize,
    /// Buffers currently checked out
    outstanding: usize,
    released: bool,
}

struct PoolInner {
    dimensions: Dimensions,
    capacity: usize,
    slots: Mutex<PoolSlots>,
}

impl PoolInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, PoolSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct PixelBufferPool {
    inner: Arc<PoolInner>,
}

impl PixelBufferPool {
    pub fn new(dimensions: Dimensions, capacity: usize) -> Self {
        debug!(%dimensions, capacity, "Creating pixel buffer pool");
        Self {
            inner: Arc::new(PoolInner {
                dimensions,
                capacity,
                slots: Mutex::new(PoolSlots {
                    free: Vec::with_capacity(capacity),
                    allocated: 0,
                    outstanding: 0,
                    released: false,
                }),
            }),
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        self.inner.dimensions
    }

    /// Take a free buffer, allocating a new one when none is waiting
    ///
    /// Returns `None` only once the pool has been released.
    pub fn checkout(&self) -> Option<PooledBuffer> {
        let mut slots = self.inner.lock();
        if slots.released {
            return None;
        }
        let (handle, data) = match slots.free.pop() {
            Some(entry) => entry,
            None => {
                let handle = PoolHandle(slots.allocated);
                slots.allocated += 1;
                if slots.outstanding >= self.inner.capacity {
                    debug!(outstanding = slots.outstanding, "Pool exhausted, growing");
                }
                (handle, vec![0u8; self.inner.dimensions.rgba_len()])
            }
        };
        slots.outstanding += 1;
        Some(PooledBuffer {
            pool: Arc::clone(&self.inner),
            handle,
            data,
        })
    }

    /// Buffers that can be checked out without exceeding the capacity
    pub fn available(&self) -> usize {
        let slots = self.inner.lock();
        let idle = slots.free.len();
        idle + self.inner.capacity.saturating_sub(slots.outstanding + idle)
    }

    /// Buffers currently held outside the pool
    pub fn outstanding(&self) -> usize {
        self.inner.lock().outstanding
    }

    /// Detach the pool; later checkouts fail and returns are dropped
    pub fn release(&self) {
        let mut slots = self.inner.lock();
        slots.released = true;
        slots.free.clear();
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().released
    }

    /// Check out a buffer and render `frame` into it
    ///
    /// Frames of another size are scaled to the pool size.
    pub fn render(&self, frame: &Frame) -> Option<Frame> {
        let mut buffer = self.checkout()?;
        buffer.render(frame);
        Some(Frame::from_pooled(buffer, frame.timestamp()))
    }
}

/// A buffer checked out of a [`PixelBufferPool`]
pub struct PooledBuffer {
    pool: Arc<PoolInner>,
    handle: PoolHandle,
    data: Vec<u8>,
}

impl PooledBuffer {
    pub fn handle(&self) -> PoolHandle {
        self.handle
    }

    pub fn dimensions(&self) -> Dimensions {
        self.pool.dimensions
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy (or scale) the frame's pixels into this buffer
    pub fn render(&mut self, frame: &Frame) {
        let target = self.pool.dimensions;
        if frame.dimensions() == target {
            self.data.copy_from_slice(frame.pixels());
            return;
        }
        let scaled: RgbaImage = imageops::resize(
            &frame.to_image(),
            target.width,
            target.height,
            imageops::FilterType::Triangle,
        );
        self.data.copy_from_slice(scaled.as_raw());
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut slots = self.pool.lock();
        slots.outstanding = slots.outstanding.saturating_sub(1);
        if slots.released || slots.free.len() >= self.pool.capacity {
            return;
        }
        let data = std::mem::take(&mut self.data);
        slots.free.push((self.handle, data));
    }
}
