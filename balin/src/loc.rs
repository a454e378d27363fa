use gimli::constants::*;
use gimli::write::{EndianVec, Writer};
use gimli::RunTimeEndian;

use crate::decl::ExprlocReloc;
use crate::error::Result;
use crate::util::uleb128_len;
use crate::{PtrWidth, RelocKind};

/// The wasm location kind selector for a function local; gimli only defines
/// the `DW_OP_WASM_location` opcode itself.
const DW_OP_WASM_LOCAL: u8 = 0x00;

/// Where codegen left a value, as handed to the emitter for parameter and
/// variable DIEs.
#[derive(Clone, Copy, Debug)]
pub enum Location {
    /// A machine register, by DWARF register number.
    Register(u32),
    /// A frame-relative slot: byte offset from the given frame-pointer
    /// register.
    FrameOffset { reg: u32, offset: i64 },
    /// A wasm function local.
    WasmLocal(u32),
    /// An absolute memory address belonging to a linker symbol; the address
    /// bytes receive a direct-load relocation so the container can repatch
    /// them when the symbol moves.
    Memory { addr: u64, is_ptr: bool, symbol: u32 },
    /// An address only the linker knows; emitted as zero and patched through
    /// a direct- or GOT-load relocation against the symbol.
    LinkerLoad { symbol: u32, is_ptr: bool },
    /// A compile-time constant.
    Immediate { value: u64, signed: bool },
    /// The value is uninitialized; materialized as an implicit value of
    /// repeated 0xaa bytes.
    Undef,
    /// The value has no runtime representation.
    None,
    Nop,
}

/// Appends one `DW_FORM_exprloc` payload (ULEB128 length followed by the
/// expression bytes) to `buf`, recording container-level relocations in
/// `relocs`.
///
/// `ty_size` is the ABI size of the described value, needed for the
/// undefined-value form.
pub(crate) fn write_exprloc(
    buf: &mut EndianVec<RunTimeEndian>,
    relocs: &mut Vec<ExprlocReloc>,
    ptr_width: PtrWidth,
    loc: Location,
    ty_size: u64,
) -> Result<()> {
    match loc {
        Location::Register(reg) => {
            if reg < 32 {
                buf.write_u8(1)?;
                buf.write_u8(DW_OP_reg0.0 + reg as u8)?;
            } else {
                buf.write_u8((1 + uleb128_len(reg.into())) as u8)?;
                buf.write_u8(DW_OP_regx.0)?;
                buf.write_uleb128(reg.into())?;
            }
        }
        Location::FrameOffset { reg, offset } => {
            // Length is not knowable up front; write the ops first and patch
            // the length byte once they are in place.
            let fixup = buf.len();
            buf.write_u8(0)?;
            if reg < 32 {
                buf.write_u8(DW_OP_breg0.0 + reg as u8)?;
            } else {
                buf.write_u8(DW_OP_bregx.0)?;
                buf.write_uleb128(reg.into())?;
            }
            buf.write_sleb128(offset)?;
            patch_len(buf, fixup)?;
        }
        Location::WasmLocal(index) => {
            buf.write_u8((2 + uleb128_len(index.into())) as u8)?;
            buf.write_u8(DW_OP_WASM_location.0)?;
            buf.write_u8(DW_OP_WASM_LOCAL)?;
            buf.write_uleb128(index.into())?;
        }
        Location::Memory { addr, is_ptr, symbol } => {
            write_addr_expr(buf, relocs, ptr_width, addr, is_ptr, RelocKind::DirectLoad, symbol)?;
        }
        Location::LinkerLoad { symbol, is_ptr } => {
            let kind = if is_ptr { RelocKind::GotLoad } else { RelocKind::DirectLoad };
            write_addr_expr(buf, relocs, ptr_width, 0, is_ptr, kind, symbol)?;
        }
        Location::Immediate { value, signed } => {
            let fixup = buf.len();
            buf.write_u8(0)?;
            if signed {
                buf.write_u8(DW_OP_consts.0)?;
                buf.write_sleb128(value as i64)?;
            } else {
                buf.write_u8(DW_OP_constu.0)?;
                buf.write_uleb128(value)?;
            }
            buf.write_u8(DW_OP_stack_value.0)?;
            patch_len(buf, fixup)?;
        }
        Location::Undef => {
            // The value is undefined; stuff a recognizable bit pattern of the
            // right width.
            let total = 1 + uleb128_len(ty_size) + ty_size as usize;
            buf.write_uleb128(total as u64)?;
            buf.write_u8(DW_OP_implicit_value.0)?;
            buf.write_uleb128(ty_size)?;
            for _ in 0..ty_size {
                buf.write_u8(0xaa)?;
            }
        }
        Location::None => {
            buf.write_u8(2)?;
            buf.write_u8(DW_OP_lit0.0)?;
            buf.write_u8(DW_OP_stack_value.0)?;
        }
        Location::Nop => {
            buf.write_u8(1)?;
            buf.write_u8(DW_OP_nop.0)?;
        }
    }
    Ok(())
}

fn write_addr_expr(
    buf: &mut EndianVec<RunTimeEndian>,
    relocs: &mut Vec<ExprlocReloc>,
    ptr_width: PtrWidth,
    addr: u64,
    is_ptr: bool,
    kind: RelocKind,
    symbol: u32,
) -> Result<()> {
    let ptr_bytes = ptr_width.bytes();
    buf.write_u8(1 + ptr_bytes + u8::from(is_ptr))?;
    buf.write_u8(DW_OP_addr.0)?;
    relocs.push(ExprlocReloc {
        kind,
        symbol,
        offset: buf.len().try_into().expect("debug info buffer larger than u32"),
    });
    match ptr_width {
        PtrWidth::P32 => buf.write_u32(addr as u32)?,
        PtrWidth::P64 => buf.write_u64(addr)?,
    }
    if is_ptr {
        buf.write_u8(DW_OP_deref.0)?;
    }
    Ok(())
}

fn patch_len(buf: &mut EndianVec<RunTimeEndian>, fixup: usize) -> Result<()> {
    let len = buf.len() - fixup - 1;
    debug_assert!(len < 0x80, "expression length needs a multi-byte ULEB128");
    buf.write_u8_at(fixup, len as u8)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gimli::RunTimeEndian;

    fn emit(loc: Location, ty_size: u64) -> (Vec<u8>, Vec<ExprlocReloc>) {
        let mut buf = EndianVec::new(RunTimeEndian::Little);
        let mut relocs = Vec::new();
        write_exprloc(&mut buf, &mut relocs, PtrWidth::P64, loc, ty_size).unwrap();
        (buf.take(), relocs)
    }

    #[test]
    fn low_registers_use_the_compact_opcode() {
        let (bytes, relocs) = emit(Location::Register(5), 8);
        assert_eq!(bytes, [1, DW_OP_reg0.0 + 5]);
        assert!(relocs.is_empty());
    }

    #[test]
    fn high_registers_fall_back_to_regx() {
        let (bytes, _) = emit(Location::Register(33), 8);
        assert_eq!(bytes, [2, DW_OP_regx.0, 33]);
    }

    #[test]
    fn frame_offsets_are_breg_plus_sleb() {
        let (bytes, _) = emit(Location::FrameOffset { reg: 6, offset: -24 }, 8);
        assert_eq!(bytes, [2, DW_OP_breg0.0 + 6, 0x68]);
    }

    #[test]
    fn wasm_locals_use_the_vendor_opcode() {
        let (bytes, _) = emit(Location::WasmLocal(3), 4);
        assert_eq!(bytes, [3, DW_OP_WASM_location.0, DW_OP_WASM_LOCAL, 3]);
    }

    #[test]
    fn memory_records_a_direct_load_on_the_addr_bytes() {
        let (bytes, relocs) = emit(Location::Memory { addr: 0x1122, is_ptr: false, symbol: 9 }, 8);
        assert_eq!(bytes[0], 9);
        assert_eq!(bytes[1], DW_OP_addr.0);
        assert_eq!(&bytes[2..10], &0x1122u64.to_le_bytes());
        assert_eq!(relocs.len(), 1);
        assert!(matches!(relocs[0].kind, RelocKind::DirectLoad));
        assert_eq!(relocs[0].symbol, 9);
        assert_eq!(relocs[0].offset, 2);
    }

    #[test]
    fn pointer_linker_loads_go_through_the_got_and_deref() {
        let (bytes, relocs) = emit(Location::LinkerLoad { symbol: 4, is_ptr: true }, 8);
        assert_eq!(bytes[0], 10);
        assert_eq!(*bytes.last().unwrap(), DW_OP_deref.0);
        assert!(matches!(relocs[0].kind, RelocKind::GotLoad));
    }

    #[test]
    fn immediates_backpatch_their_length() {
        let (bytes, _) = emit(Location::Immediate { value: 300, signed: false }, 8);
        assert_eq!(bytes[0] as usize, bytes.len() - 1);
        assert_eq!(bytes[1], DW_OP_constu.0);
        assert_eq!(*bytes.last().unwrap(), DW_OP_stack_value.0);

        let (signed, _) = emit(Location::Immediate { value: -2i64 as u64, signed: true }, 8);
        assert_eq!(signed, [3, DW_OP_consts.0, 0x7e, DW_OP_stack_value.0]);
    }

    #[test]
    fn undef_is_a_poisoned_implicit_value() {
        let (bytes, _) = emit(Location::Undef, 4);
        assert_eq!(bytes, [6, DW_OP_implicit_value.0, 4, 0xaa, 0xaa, 0xaa, 0xaa]);
    }

    #[test]
    fn trivial_forms() {
        assert_eq!(emit(Location::None, 0).0, [2, DW_OP_lit0.0, DW_OP_stack_value.0]);
        assert_eq!(emit(Location::Nop, 0).0, [1, DW_OP_nop.0]);
    }
}
