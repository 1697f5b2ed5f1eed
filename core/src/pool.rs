//! Scratch-buffer pooling.
//!
//! The archive reader decodes many length-prefixed strings per load. Short
//! ones go through a stack buffer; long ones borrow a [`Pooled<Vec<u8>>`]
//! held by the reader for the whole session. Releasing the buffer clears
//! its contents but keeps the allocation, so one heap buffer serves every
//! long string in a load and the release point is deterministic.
//!
//! ```
//! use tidepool_core::pool::Pooled;
//!
//! let mut scratch = Pooled::<Vec<u8>>::default();
//! assert!(scratch.is_pooled());
//!
//! let buf = scratch.activate();
//! buf.extend_from_slice(&[1, 2, 3]);
//! assert!(scratch.is_active());
//!
//! scratch.release();
//! assert!(scratch.is_pooled());
//! // The allocation survived the release.
//! assert!(scratch.activate().capacity() >= 3);
//! ```

/// Buffer types that can be emptied without giving up their allocation.
pub trait Poolable: Default {
    /// Empties the contents. Must keep allocated capacity — `Vec::clear`,
    /// not a fresh `Vec`.
    fn reset(&mut self);
}

impl<T> Poolable for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl Poolable for String {
    fn reset(&mut self) {
        self.clear();
    }
}

/// A buffer that is dormant between uses.
///
/// A dormant buffer is always empty; [`activate`](Self::activate) hands it
/// out for filling and [`release`](Self::release) empties it and puts it
/// back to rest with its capacity intact.
#[derive(Debug, Default)]
pub struct Pooled<T: Poolable> {
    buffer: T,
    active: bool,
}

impl<T: Poolable> Pooled<T> {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_pooled(&self) -> bool {
        !self.active
    }

    /// Hands the buffer out for filling. Coming from the dormant state the
    /// buffer is empty but keeps whatever capacity earlier uses grew.
    pub fn activate(&mut self) -> &mut T {
        self.active = true;
        &mut self.buffer
    }

    /// Puts the buffer back to rest: contents cleared, capacity kept.
    /// A no-op on a dormant buffer.
    pub fn release(&mut self) {
        self.buffer.reset();
        self.active = false;
    }
}
