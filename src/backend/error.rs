// Render errors
//
// Every fallible backend operation returns `RenderResult`. Raw `vk::Result`
// codes are translated here and never leave the backend.

use ash::vk;
use thiserror::Error;

pub type RenderResult<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    // ─────────────────────────────────────────────────────────────────────────
    // Fatal at init
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Initialization failed: {0}")]
    Initialization(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Recoverable at runtime
    // ─────────────────────────────────────────────────────────────────────────
    /// The surface changed and the swap chain must be recreated
    #[error("Swap chain is out of date")]
    SwapChainOutOfDate,

    /// A fence wait or image acquisition did not complete in time
    #[error("Timed out waiting for the GPU")]
    AcquireTimeout,

    // ─────────────────────────────────────────────────────────────────────────
    // Resource exhaustion
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Descriptor pool exhausted")]
    PoolExhausted,

    #[error("No memory type matches bits {type_bits:#b} with properties {properties:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("Out of memory during {0}")]
    OutOfMemory(&'static str),

    // ─────────────────────────────────────────────────────────────────────────
    // Contract violations
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Binding {0} is already declared in this layout")]
    DuplicateBinding(u32),

    #[error("Binding {binding} is invalid: {reason}")]
    InvalidBinding { binding: u32, reason: &'static str },

    #[error("Layout does not contain binding {0}")]
    UnknownBinding(u32),

    #[error("Binding {binding} expects {expected} descriptors, got 1")]
    DescriptorCountMismatch { binding: u32, expected: u32 },

    #[error("Binding {binding} is declared as {declared:?}, which cannot take this resource")]
    DescriptorTypeMismatch {
        binding: u32,
        declared: vk::DescriptorType,
    },

    #[error("Write of {size} bytes at offset {offset} overflows buffer of {capacity} bytes")]
    BufferOverflow {
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        capacity: vk::DeviceSize,
    },

    #[error("Buffer is not mapped")]
    NotMapped,

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Swap chain image or depth format changed during recreation")]
    FormatChanged,

    #[error("Invalid texture: {0}")]
    InvalidTexture(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Other API failures
    // ─────────────────────────────────────────────────────────────────────────
    #[error("GPU device lost")]
    DeviceLost,

    #[error("{op} failed: {result:?}")]
    Gpu { op: &'static str, result: vk::Result },
}

impl RenderError {
    /// Translate a raw API result for the named operation
    pub fn from_vk(op: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SwapChainOutOfDate,
            vk::Result::TIMEOUT | vk::Result::NOT_READY => Self::AcquireTimeout,
            vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                Self::PoolExhausted
            }
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                Self::OutOfMemory(op)
            }
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::Gpu { op, result: other },
        }
    }

    /// Errors the frame loop recovers from by skipping or recreating
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SwapChainOutOfDate | Self::AcquireTimeout)
    }
}

/// Shorthand for `map_err(|e| RenderError::from_vk(op, e))`
pub(crate) trait VkResultExt<T> {
    fn or_render(self, op: &'static str) -> RenderResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn or_render(self, op: &'static str) -> RenderResult<T> {
        self.map_err(|e| RenderError::from_vk(op, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_is_recoverable() {
        let err = RenderError::from_vk("acquire", vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(matches!(err, RenderError::SwapChainOutOfDate));
        assert!(err.is_recoverable());
    }

    #[test]
    fn pool_errors_map_to_exhaustion() {
        for code in [vk::Result::ERROR_OUT_OF_POOL_MEMORY, vk::Result::ERROR_FRAGMENTED_POOL] {
            assert!(matches!(
                RenderError::from_vk("allocate", code),
                RenderError::PoolExhausted
            ));
        }
    }

    #[test]
    fn unknown_codes_keep_operation_name() {
        let err = RenderError::from_vk("create_sampler", vk::Result::ERROR_UNKNOWN);
        assert!(err.to_string().starts_with("create_sampler failed"));
        assert!(!err.is_recoverable());
    }
}
