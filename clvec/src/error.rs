use thiserror::Error;

/// Errors that can occur within clvec.
#[derive(Debug, Error)]
pub enum ClError {
    /// Error returned by a backend
    #[error("Backend {0}")]
    Backend(#[from] BackendError),
    /// All backends failed to initialize or were configured out
    #[error("No available device")]
    NoDeviceAvailable,
    /// Expression without a vector operand assigned to a nonempty array
    #[error("Expression has no vector operand to size an assignment of {len} elements, use fill for broadcasts")]
    ScalarExpression {
        /// Length of the destination
        len: usize,
    },
    /// Operand partition differs from the destination partition
    #[error("Partition mismatch on device {device}, destination holds {expected} elements, operand holds {found}")]
    PartitionMismatch {
        /// Device index in the destination queue list
        device: usize,
        /// Elements the destination holds on the device
        expected: usize,
        /// Elements the operand holds on the device
        found: usize,
    },
    /// Operand part lives on another queue than the destination part
    #[error("Queue mismatch on device {device}, operand part is not on the destination queue")]
    QueueMismatch {
        /// Device index in the destination queue list
        device: usize,
    },
    /// Element index past the end
    #[error("Index {index} out of range for array of {len} elements")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Array length
        len: usize,
    },
    /// Host range past the end
    #[error("Range {offset}..{end} out of range for array of {len} elements")]
    RangeOutOfBounds {
        /// First element of the range
        offset: usize,
        /// One past the last element
        end: usize,
        /// Array length
        len: usize,
    },
    /// User function name is not a valid identifier
    #[error("Invalid user function name {0:?}")]
    InvalidFunctionName(Box<str>),
    /// User function name reused with a different definition
    #[error("User function {0} is already defined with a different signature or body")]
    FunctionRedefined(Box<str>),
}

/// Device or driver fault.
#[derive(Debug, Error)]
#[error("{status:?}: {context}")]
pub struct BackendError {
    /// What went wrong
    pub status: ErrorStatus,
    /// Driver message
    pub context: Box<str>,
}

impl BackendError {
    pub(crate) fn new(status: ErrorStatus, context: impl Into<Box<str>>) -> BackendError {
        BackendError { status, context: context.into() }
    }
}

/// Kind of backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    /// Dynamic library was not found on the disk
    DyLibNotFound,
    /// Backend initialization failure
    Initialization,
    /// Backend deinitialization failure
    Deinitialization,
    /// Failed to enumerate devices
    DeviceEnumeration,
    /// Failed to query device for information
    DeviceQuery,
    /// Failed to allocate memory
    MemoryAllocation,
    /// Failed to copy memory to device
    MemoryCopyH2D,
    /// Failed to copy memory to host
    MemoryCopyD2H,
    /// Failed to copy memory between device buffers
    MemoryCopyD2D,
    /// Kernel argument was not correct
    IncorrectKernelArg,
    /// Failed to compile kernel
    KernelCompilation,
    /// Failed to launch kernel
    KernelLaunch,
    /// Failed to synchronize with the device
    KernelSync,
}
