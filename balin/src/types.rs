//! Translation of frontend types into `.debug_info` DIEs.
//!
//! Every function here appends one complete DIE (children and terminator
//! included) to the declaration's `dbg_info` fragment. References to other
//! types are four-byte placeholders queued as relocations; the interning in
//! [`DeclState::add_type_reloc_global`] guarantees each distinct type gets
//! exactly one DIE per declaration.

use gimli::constants::*;
use gimli::write::Writer;
use tracing::{debug, trace};

use crate::abbrev::AbbrevCode;
use crate::atom::AtomIndex;
use crate::decl::DeclState;
use crate::error::Result;
use crate::frontend::{Frontend, TypeIndex, TypeShape};

impl DeclState {
    /// Append the DIE for `ty` to the `.debug_info` fragment owned by `atom`.
    pub(crate) fn add_type_die(
        &mut self,
        frontend: &impl Frontend,
        atom: AtomIndex,
        ty: TypeIndex,
    ) -> Result<()> {
        match frontend.type_shape(ty) {
            TypeShape::Void => {
                self.dbg_info.write_u8(AbbrevCode::Pad1 as u8)?;
            }
            TypeShape::NoReturn => {
                unreachable!("no value of a noreturn type can need a location");
            }
            TypeShape::Bool => {
                self.write_base_type(frontend, ty, DW_ATE_boolean, 1)?;
            }
            TypeShape::Int { signed } => {
                let encoding = if signed { DW_ATE_signed } else { DW_ATE_unsigned };
                self.write_base_type(frontend, ty, encoding, frontend.type_abi_size(ty))?;
            }
            TypeShape::PtrLikeOptional => {
                self.write_base_type(frontend, ty, DW_ATE_address, frontend.type_abi_size(ty))?;
            }
            TypeShape::Optional { payload } => {
                // Non-pointer optionals are structs: { maybe: bool, val: T }.
                let abi_size = frontend.type_abi_size(ty);
                self.dbg_info.write_u8(AbbrevCode::StructType as u8)?;
                self.dbg_info.write_uleb128(abi_size)?;
                self.write_name(frontend, ty)?;

                self.dbg_info.write_u8(AbbrevCode::StructMember as u8)?;
                self.dbg_info.write(b"maybe\0")?;
                self.write_type_ref(frontend.bool_type())?;
                self.dbg_info.write_uleb128(0)?;

                self.dbg_info.write_u8(AbbrevCode::StructMember as u8)?;
                self.dbg_info.write(b"val\0")?;
                self.write_type_ref(payload)?;
                self.dbg_info.write_uleb128(abi_size - frontend.type_abi_size(payload))?;

                self.dbg_info.write_u8(0)?;
            }
            TypeShape::Slice { ptr } => {
                // Slices are structs: { ptr: [*]T, len: usize }.
                self.dbg_info.write_u8(AbbrevCode::StructType as u8)?;
                self.dbg_info.write_uleb128(frontend.type_abi_size(ty))?;
                self.write_name(frontend, ty)?;

                self.dbg_info.write_u8(AbbrevCode::StructMember as u8)?;
                self.dbg_info.write(b"ptr\0")?;
                self.write_type_ref(ptr)?;
                self.dbg_info.write_uleb128(0)?;

                self.dbg_info.write_u8(AbbrevCode::StructMember as u8)?;
                self.dbg_info.write(b"len\0")?;
                self.write_type_ref(frontend.usize_type())?;
                self.dbg_info.write_uleb128(frontend.type_abi_size(ptr))?;

                self.dbg_info.write_u8(0)?;
            }
            TypeShape::Pointer { child } => {
                self.dbg_info.write_u8(AbbrevCode::PtrType as u8)?;
                self.write_type_ref(child)?;
            }
            TypeShape::Array { elem, len } => {
                self.dbg_info.write_u8(AbbrevCode::ArrayType as u8)?;
                self.write_name(frontend, ty)?;
                self.write_type_ref(elem)?;

                self.dbg_info.write_u8(AbbrevCode::ArrayDim as u8)?;
                self.write_type_ref(frontend.usize_type())?;
                self.dbg_info.write_uleb128(len)?;

                self.dbg_info.write_u8(0)?;
            }
            TypeShape::Struct { fields } => {
                self.dbg_info.write_u8(AbbrevCode::StructType as u8)?;
                self.dbg_info.write_uleb128(frontend.type_abi_size(ty))?;
                self.write_name(frontend, ty)?;

                for (index, field) in fields.iter().enumerate() {
                    if !field.has_runtime_bits {
                        continue;
                    }
                    self.dbg_info.write_u8(AbbrevCode::StructMember as u8)?;
                    match &field.name {
                        Some(name) => self.dbg_info.write(name.as_bytes())?,
                        // Tuple fields are named by position.
                        None => self.dbg_info.write(index.to_string().as_bytes())?,
                    }
                    self.dbg_info.write_u8(0)?;
                    self.write_type_ref(field.ty)?;
                    self.dbg_info.write_uleb128(field.offset)?;
                }

                self.dbg_info.write_u8(0)?;
            }
            TypeShape::Enum { variants } => {
                self.dbg_info.write_u8(AbbrevCode::EnumType as u8)?;
                self.dbg_info.write_uleb128(frontend.type_abi_size(ty))?;
                self.write_name(frontend, ty)?;

                for (index, variant) in variants.iter().enumerate() {
                    self.dbg_info.write_u8(AbbrevCode::EnumVariant as u8)?;
                    self.dbg_info.write(variant.name.as_bytes())?;
                    self.dbg_info.write_u8(0)?;
                    // Without explicit values the tags number sequentially.
                    self.dbg_info.write_u64(variant.value.unwrap_or(index as u64))?;
                }

                self.dbg_info.write_u8(0)?;
            }
            TypeShape::Union { layout, tag, fields } => {
                let is_tagged = tag.is_some();
                let (payload_off, tag_off) = if layout.tag_align >= layout.payload_align {
                    (layout.tag_size, 0)
                } else {
                    (0, layout.payload_size)
                };

                if is_tagged {
                    // Tagged unions become an outer struct wrapping the bare
                    // payload union and the tag enum.
                    self.dbg_info.write_u8(AbbrevCode::StructType as u8)?;
                    self.dbg_info.write_uleb128(layout.abi_size)?;
                    self.write_name(frontend, ty)?;

                    self.dbg_info.write_u8(AbbrevCode::StructMember as u8)?;
                    self.dbg_info.write(b"payload\0")?;
                    // The payload union DIE starts right after this member:
                    // four reference bytes plus one data_member_location byte.
                    let offset = self.dbg_info.len() as u32;
                    self.add_type_reloc_local(atom, offset, 5);
                    self.dbg_info.write(&[0; 4])?;
                    debug_assert!(payload_off < 0x80);
                    self.dbg_info.write_uleb128(payload_off)?;
                }

                self.dbg_info.write_u8(AbbrevCode::UnionType as u8)?;
                self.dbg_info.write_uleb128(layout.payload_size)?;
                if is_tagged {
                    self.dbg_info.write(b"AnonUnion\0")?;
                } else {
                    self.write_name(frontend, ty)?;
                }

                for field in &fields {
                    if !field.has_runtime_bits {
                        continue;
                    }
                    self.dbg_info.write_u8(AbbrevCode::StructMember as u8)?;
                    self.dbg_info.write(field.name.as_bytes())?;
                    self.dbg_info.write_u8(0)?;
                    self.write_type_ref(field.ty)?;
                    self.dbg_info.write_uleb128(0)?;
                }
                self.dbg_info.write_u8(0)?;

                if let Some(tag_ty) = tag {
                    self.dbg_info.write_u8(AbbrevCode::StructMember as u8)?;
                    self.dbg_info.write(b"tag\0")?;
                    self.write_type_ref(tag_ty)?;
                    self.dbg_info.write_uleb128(tag_off)?;

                    self.dbg_info.write_u8(0)?;
                }
            }
            TypeShape::ErrorSet => {
                // Error sets all resolve to the module-wide error enum, which
                // only exists once every declaration has contributed its
                // errors; commit transfers their relocations to the flush
                // queue instead of asking for a DIE here.
                unreachable!("error set DIEs are materialized at flush time");
            }
            TypeShape::ErrorUnion { error_set, payload } => {
                let payload_align = frontend.type_abi_alignment(payload);
                let error_align = frontend.type_abi_alignment(frontend.anyerror_type());
                let error_size = frontend.type_abi_size(frontend.anyerror_type());
                // The higher-aligned half sits at offset zero.
                let (payload_off, error_off) = if error_align > payload_align {
                    (error_size, 0)
                } else {
                    (0, frontend.type_abi_size(payload))
                };

                self.dbg_info.write_u8(AbbrevCode::StructType as u8)?;
                self.dbg_info.write_uleb128(frontend.type_abi_size(ty))?;
                self.write_name(frontend, ty)?;

                if frontend.type_has_runtime_bits(payload) {
                    self.dbg_info.write_u8(AbbrevCode::StructMember as u8)?;
                    self.dbg_info.write(b"value\0")?;
                    self.write_type_ref(payload)?;
                    self.dbg_info.write_uleb128(payload_off)?;
                }

                self.dbg_info.write_u8(AbbrevCode::StructMember as u8)?;
                self.dbg_info.write(b"err\0")?;
                self.write_type_ref(error_set)?;
                self.dbg_info.write_uleb128(error_off)?;

                self.dbg_info.write_u8(0)?;
            }
            TypeShape::PackedStruct => {
                // Bit-level member layout has no DWARF 4 story here yet; an
                // empty struct at least keeps the size right.
                trace!(name = %frontend.type_name(ty), "packed struct emitted without members");
                self.dbg_info.write_u8(AbbrevCode::StructType as u8)?;
                self.dbg_info.write_uleb128(frontend.type_abi_size(ty))?;
                self.write_name(frontend, ty)?;
                self.dbg_info.write_u8(0)?;
            }
            TypeShape::Opaque => {
                debug!(name = %frontend.type_name(ty), "no DIE translation for type, emitting placeholder");
                self.dbg_info.write_u8(AbbrevCode::Pad1 as u8)?;
            }
        }
        Ok(())
    }

    fn write_base_type(
        &mut self,
        frontend: &impl Frontend,
        ty: TypeIndex,
        encoding: DwAte,
        byte_size: u64,
    ) -> Result<()> {
        self.dbg_info.write_u8(AbbrevCode::BaseType as u8)?;
        self.dbg_info.write_u8(encoding.0)?;
        self.dbg_info.write_uleb128(byte_size)?;
        self.write_name(frontend, ty)?;
        Ok(())
    }

    fn write_name(&mut self, frontend: &impl Frontend, ty: TypeIndex) -> Result<()> {
        let name = frontend.type_name(ty);
        debug_assert!(!name.as_bytes().contains(&0));
        self.dbg_info.write(name.as_bytes())?;
        self.dbg_info.write_u8(0)?;
        Ok(())
    }
}
