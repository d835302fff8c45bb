use thiserror::Error;

pub type AllocResult<T> = Result<T, AllocError>;

/// Failures reported by the heap engine and the routing facade.
///
/// The pool allocator's "unhandled" outcome is not an error and is
/// expressed as `Option`/`bool` on its own surface instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Region reservation failed, or no free span can satisfy the request.
    #[error("out of memory: requested {requested} bytes, largest free span {available}")]
    OutOfMemory { requested: usize, available: usize },

    /// Zero-sized request, an address this engine never issued, or a
    /// header that failed the integrity check.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The block behind the address is already free.
    #[error("double free at 0x{0:x}")]
    DoubleFree(usize),
}
