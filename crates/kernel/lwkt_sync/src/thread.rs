use core::num::NonZero;

/// Identity of a lightweight thread.
///
/// Zero is reserved so that an unowned token can be encoded as `0`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::Display,
    derive_more::From,
)]
#[repr(transparent)]
pub struct ThreadId(NonZero<u32>);

impl From<ThreadId> for u32 {
    fn from(value: ThreadId) -> Self {
        value.0.get()
    }
}

impl ThreadId {
    #[must_use]
    pub const fn new(value: NonZero<u32>) -> Self {
        Self(value)
    }

    /// Creates a thread id from a raw value, `None` for `0`.
    #[must_use]
    pub const fn from_raw(value: u32) -> Option<Self> {
        match NonZero::new(value) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    #[must_use]
    pub const fn get(self) -> NonZero<u32> {
        self.0
    }
}
