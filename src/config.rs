use crate::error::VmError;

/// Largest virtual address width the simulator accepts.
pub const MAX_ADDRESS_BITS: u32 = 32;

/// Geometry of the simulated machine.
///
/// A virtual address is split into a page number (the high
/// `page_address_bits` bits) and an offset within the page (the remaining
/// low bits), so pages are `2^(virtual_address_bits - page_address_bits)`
/// bytes long and each task owns `2^page_address_bits` of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfig {
    pub virtual_address_bits: u32,
    pub page_address_bits: u32,
    pub frame_count: usize,
    /// Low-water mark the clock sweep tries to restore before it gives up
    /// on clean victims.
    pub want_free: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            virtual_address_bits: 16,
            page_address_bits: 6,
            frame_count: 16,
            want_free: 1,
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<(), VmError> {
        if self.virtual_address_bits == 0 || self.virtual_address_bits > MAX_ADDRESS_BITS {
            return Err(VmError::Config(format!(
                "virtual address width must be within 1..={} bits, got {}",
                MAX_ADDRESS_BITS, self.virtual_address_bits
            )));
        }
        if self.page_address_bits >= self.virtual_address_bits {
            return Err(VmError::Config(format!(
                "page number uses {} of {} address bits, leaving no page offset",
                self.page_address_bits, self.virtual_address_bits
            )));
        }
        if self.frame_count == 0 {
            return Err(VmError::Config("frame table must not be empty".into()));
        }
        if self.want_free == 0 || self.want_free > self.frame_count {
            return Err(VmError::Config(format!(
                "wanted free frames must be within 1..={}, got {}",
                self.frame_count, self.want_free
            )));
        }
        Ok(())
    }

    pub fn page_size(&self) -> usize {
        1 << (self.virtual_address_bits - self.page_address_bits)
    }

    pub fn page_count(&self) -> usize {
        1 << self.page_address_bits
    }

    pub fn address_space_size(&self) -> u64 {
        1 << self.virtual_address_bits
    }
}
