use thiserror::Error;

use crate::container::DebugSection;

pub type Result<T> = std::result::Result<T, Error>;

/// Diagnostics (and contexts) emitted while updating debug sections in place.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to grow `{0}` to {1} bytes")]
    GrowSection(DebugSection, u64, #[source] std::io::Error),
    #[error("Failed to read back `{0}` at offset 0x{1:08x}")]
    ReadSection(DebugSection, u64, #[source] std::io::Error),
    #[error("Failed to write `{0}` at offset 0x{1:08x}")]
    WriteSection(DebugSection, u64, #[source] std::io::Error),
    #[error("Compile unit header is {0} bytes, larger than the {1} bytes reserved")]
    OversizedUnitHeader(usize, u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Write(#[from] gimli::write::Error),
}
