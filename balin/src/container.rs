use std::fmt;

use gimli::constants::{DW_LNS_advance_pc, DW_LNS_negate_stmt};
use gimli::{Endianity, RunTimeEndian, SectionId};
use tracing::trace;

use crate::abbrev::AbbrevCode;
use crate::error::{Error, Result};
use crate::{NoObjectFile, ObjectFile, RelocKind};

/// The debug sections the emitter owns inside the output binary.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum DebugSection {
    Info,
    Abbrev,
    Line,
    Aranges,
    Str,
}

impl DebugSection {
    /// Returns the corresponding `gimli::SectionId`.
    pub fn gimli_id(self) -> SectionId {
        match self {
            DebugSection::Info => SectionId::DebugInfo,
            DebugSection::Abbrev => SectionId::DebugAbbrev,
            DebugSection::Line => SectionId::DebugLine,
            DebugSection::Aranges => SectionId::DebugAranges,
            DebugSection::Str => SectionId::DebugStr,
        }
    }
}

impl fmt::Display for DebugSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.gimli_id().name())
    }
}

/// In-memory debug sections backing the wasm container, where the module is
/// assembled in a buffer and no file I/O happens.
#[derive(Default)]
pub struct MemorySections {
    info: Vec<u8>,
    abbrev: Vec<u8>,
    line: Vec<u8>,
    aranges: Vec<u8>,
    str_pool: Vec<u8>,
}

impl MemorySections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current contents of a section.
    pub fn section(&self, section: DebugSection) -> &[u8] {
        self.buf(section)
    }

    fn buf(&self, section: DebugSection) -> &Vec<u8> {
        match section {
            DebugSection::Info => &self.info,
            DebugSection::Abbrev => &self.abbrev,
            DebugSection::Line => &self.line,
            DebugSection::Aranges => &self.aranges,
            DebugSection::Str => &self.str_pool,
        }
    }

    fn buf_mut(&mut self, section: DebugSection) -> &mut Vec<u8> {
        match section {
            DebugSection::Info => &mut self.info,
            DebugSection::Abbrev => &mut self.abbrev,
            DebugSection::Line => &mut self.line,
            DebugSection::Aranges => &mut self.aranges,
            DebugSection::Str => &mut self.str_pool,
        }
    }

    fn resize(&mut self, section: DebugSection, needed: u64, allow_shrink: bool) {
        let buf = self.buf_mut(section);
        let needed = needed as usize;
        if needed > buf.len() || allow_shrink {
            buf.resize(needed, 0);
        }
    }

    fn write(&mut self, section: DebugSection, offset: u64, bufs: &[&[u8]]) {
        let buf = self.buf_mut(section);
        let mut pos = offset as usize;
        let end = pos + bufs.iter().map(|b| b.len()).sum::<usize>();
        if end > buf.len() {
            buf.resize(end, 0);
        }
        for bytes in bufs {
            buf[pos..pos + bytes.len()].copy_from_slice(bytes);
            pos += bytes.len();
        }
    }
}

/// Uniform facade over the three container formats.
///
/// The atom machinery only ever needs three operations: grow a section, write
/// a payload together with its neighboring padding, and mark a section dirty.
/// The facade knows where each format keeps its section payloads (`sh_offset`
/// for ELF, the segment `offset` for a Mach-O companion dSYM, offset zero in
/// a standalone buffer for wasm) and which filler byte keeps each section
/// well-formed; everything below that goes through the [`ObjectFile`]
/// collaborator.
pub enum Container<F> {
    /// File-backed ELF object; payloads land at `sh_offset + atom.off`.
    Elf(F),
    /// File-backed Mach-O companion dSYM; payloads land at
    /// `section.offset + atom.off`.
    MachO(F),
    /// Memory-backed wasm module.
    Wasm(MemorySections),
}

impl Container<NoObjectFile> {
    /// A memory-backed wasm container with empty sections.
    pub fn wasm() -> Self {
        Container::Wasm(MemorySections::new())
    }
}

impl<F: ObjectFile> Container<F> {
    /// Grow `section` so that at least `needed` bytes fit.
    pub fn grow_section(
        &mut self,
        section: DebugSection,
        needed: u64,
        allow_shrink: bool,
    ) -> Result<()> {
        trace!(%section, needed, allow_shrink, "grow section");
        match self {
            Container::Elf(file) | Container::MachO(file) => {
                if file.section_size(section) >= needed && !allow_shrink {
                    return Ok(());
                }
                file.grow_section(section, needed, allow_shrink)
                    .map_err(|e| Error::GrowSection(section, needed, e))
            }
            Container::Wasm(sections) => {
                sections.resize(section, needed, allow_shrink);
                Ok(())
            }
        }
    }

    /// Write `payload` at `offset` within `section`, rewriting `prev_padding`
    /// bytes of filler before it and `next_padding` bytes after it in the
    /// same gather write, so the section is well-formed DWARF after the one
    /// atomic call. `trailing_zero` appends the section's final
    /// end-of-children byte after the padding.
    pub fn write_with_padding(
        &mut self,
        section: DebugSection,
        offset: u32,
        prev_padding: u32,
        payload: &[u8],
        next_padding: u32,
        trailing_zero: bool,
    ) -> Result<()> {
        trace!(
            %section,
            offset,
            prev_padding,
            len = payload.len(),
            next_padding,
            trailing_zero,
            "write atom"
        );
        let prev = padding_bytes(section, prev_padding);
        let next = padding_bytes(section, next_padding);
        let zero = [0u8];
        let mut bufs: Vec<&[u8]> = vec![&prev, payload, &next];
        if trailing_zero {
            bufs.push(&zero);
        }
        let start = u64::from(offset - prev_padding);
        self.write_at(section, start, &bufs)?;
        self.mark_dirty(section);
        Ok(())
    }

    /// Overwrite `[offset, offset + len)` of `section` with padding. Used on
    /// the range an atom vacates when it moves, so consumers streaming the
    /// section never see stale bytes.
    pub fn write_padding(&mut self, section: DebugSection, offset: u32, len: u32) -> Result<()> {
        let fill = padding_bytes(section, len);
        self.write_at(section, offset.into(), &[&fill])
    }

    /// Write raw bytes at a section offset.
    pub fn write_all(&mut self, section: DebugSection, offset: u64, bytes: &[u8]) -> Result<()> {
        self.write_at(section, offset, &[bytes])?;
        self.mark_dirty(section);
        Ok(())
    }

    /// Patch one little/big-endian u32 slot in place.
    pub fn patch_u32(
        &mut self,
        section: DebugSection,
        offset: u64,
        value: u32,
        endian: RunTimeEndian,
    ) -> Result<()> {
        let mut buf = [0u8; 4];
        endian.write_u32(&mut buf, value);
        self.write_at(section, offset, &[&buf])
    }

    /// Read back a byte range of `section`, used when existing line programs
    /// have to shift to make room for a larger prologue.
    pub fn read_exact(&mut self, section: DebugSection, offset: u64, buf: &mut [u8]) -> Result<()> {
        match self {
            Container::Elf(file) | Container::MachO(file) => {
                let pos = file.section_pos(section) + offset;
                file.read_at(pos, buf).map_err(|e| Error::ReadSection(section, offset, e))
            }
            Container::Wasm(sections) => {
                let data = sections.buf(section);
                let start = offset as usize;
                buf.copy_from_slice(&data[start..start + buf.len()]);
                Ok(())
            }
        }
    }

    pub fn mark_dirty(&mut self, section: DebugSection) {
        match self {
            Container::Elf(file) | Container::MachO(file) => file.mark_dirty(section),
            Container::Wasm(_) => {}
        }
    }

    /// Hand an expression-location relocation to the collaborator, to be
    /// patched during container-level symbol resolution.
    pub fn add_exprloc_reloc(&mut self, kind: RelocKind, symbol: u32, section_offset: u64) {
        trace!(?kind, symbol, section_offset, "exprloc reloc");
        match self {
            Container::Elf(file) | Container::MachO(file) => {
                file.add_exprloc_reloc(kind, symbol, section_offset)
            }
            Container::Wasm(_) => {}
        }
    }

    fn write_at(&mut self, section: DebugSection, offset: u64, bufs: &[&[u8]]) -> Result<()> {
        match self {
            Container::Elf(file) | Container::MachO(file) => {
                let pos = file.section_pos(section) + offset;
                file.write_at(pos, bufs).map_err(|e| Error::WriteSection(section, offset, e))
            }
            Container::Wasm(sections) => {
                sections.write(section, offset, bufs);
                Ok(())
            }
        }
    }
}

/// Three bytes that advance the line-program PC by zero: an `advance_pc`
/// opcode with a two-byte ULEB128 zero operand.
const LINE_NOP3: [u8; 3] = [DW_LNS_advance_pc.0, 0x80, 0x00];

/// Builds `len` filler bytes for a section.
///
/// `.debug_line` gaps are filled with `negate_stmt` pairs, which cancel out;
/// an odd count starts with the three-byte `advance_pc 0` so the pairing
/// works out. `.debug_info` gaps are filled with attribute-less
/// `unspecified_type` DIEs so a reader advancing by abbreviation code skips
/// them. Other sections are rewritten wholesale and use plain zeros.
fn padding_bytes(section: DebugSection, len: u32) -> Vec<u8> {
    let mut len = len as usize;
    match section {
        DebugSection::Line => {
            let mut fill = Vec::with_capacity(len);
            if len % 2 != 0 {
                assert!(len >= 3, "one line-program byte cannot hold a no-op");
                fill.extend_from_slice(&LINE_NOP3);
                len -= 3;
            }
            fill.resize(fill.len() + len, DW_LNS_negate_stmt.0);
            fill
        }
        DebugSection::Info => vec![AbbrevCode::Pad1 as u8; len],
        _ => vec![0; len],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_padding_cancels_out() {
        let even = padding_bytes(DebugSection::Line, 6);
        assert_eq!(even, vec![DW_LNS_negate_stmt.0; 6]);

        let odd = padding_bytes(DebugSection::Line, 7);
        assert_eq!(&odd[..3], &LINE_NOP3);
        assert_eq!(&odd[3..], &[DW_LNS_negate_stmt.0; 4]);
        // negate_stmt toggles is_stmt; an even count leaves it unchanged.
        assert_eq!(odd[3..].len() % 2, 0);
    }

    #[test]
    fn info_padding_is_unspecified_type_dies() {
        assert_eq!(padding_bytes(DebugSection::Info, 3), vec![AbbrevCode::Pad1 as u8; 3]);
    }

    #[test]
    fn memory_write_with_padding_is_one_well_formed_range() {
        let mut container = Container::wasm();
        container.grow_section(DebugSection::Info, 16, false).unwrap();
        container
            .write_with_padding(DebugSection::Info, 4, 2, &[0xAB, 0xCD], 3, true)
            .unwrap();
        let Container::Wasm(sections) = &container else { unreachable!() };
        let info = sections.section(DebugSection::Info);
        let pad = AbbrevCode::Pad1 as u8;
        assert_eq!(&info[2..12], &[pad, pad, 0xAB, 0xCD, pad, pad, pad, 0, 0, 0]);
    }
}
