use gimli::constants::*;
use gimli::write::{EndianVec, Writer};
use gimli::RunTimeEndian;

use crate::error::Result;

/// Abbreviation codes for every DIE schema the emitter produces.
///
/// The numeric code of each entry is its position in this declaration order,
/// starting at one, and doubles as the first byte of every DIE atom. The
/// whole `.debug_abbrev` section is a single static table keyed by these
/// codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub(crate) enum AbbrevCode {
    CompileUnit = 1,
    Subprogram,
    SubprogramRetVoid,
    BaseType,
    PtrType,
    StructType,
    StructMember,
    EnumType,
    EnumVariant,
    UnionType,
    /// An `unspecified_type` DIE with no attributes: both the placeholder for
    /// untranslatable types and the one-byte padding filler for
    /// `.debug_info` gaps.
    Pad1,
    Parameter,
    Variable,
    ArrayType,
    ArrayDim,
}

struct AbbrevDecl {
    code: AbbrevCode,
    tag: DwTag,
    has_children: bool,
    attrs: &'static [(DwAt, DwForm)],
}

const ABBREV_TABLE: &[AbbrevDecl] = &[
    AbbrevDecl {
        code: AbbrevCode::CompileUnit,
        tag: DW_TAG_compile_unit,
        has_children: true,
        attrs: &[
            (DW_AT_stmt_list, DW_FORM_sec_offset),
            (DW_AT_low_pc, DW_FORM_addr),
            (DW_AT_high_pc, DW_FORM_addr),
            (DW_AT_name, DW_FORM_strp),
            (DW_AT_comp_dir, DW_FORM_strp),
            (DW_AT_producer, DW_FORM_strp),
            (DW_AT_language, DW_FORM_data2),
        ],
    },
    AbbrevDecl {
        code: AbbrevCode::Subprogram,
        tag: DW_TAG_subprogram,
        has_children: true,
        attrs: &[
            (DW_AT_low_pc, DW_FORM_addr),
            (DW_AT_high_pc, DW_FORM_data4),
            (DW_AT_type, DW_FORM_ref4),
            (DW_AT_name, DW_FORM_string),
        ],
    },
    AbbrevDecl {
        code: AbbrevCode::SubprogramRetVoid,
        tag: DW_TAG_subprogram,
        has_children: true,
        attrs: &[
            (DW_AT_low_pc, DW_FORM_addr),
            (DW_AT_high_pc, DW_FORM_data4),
            (DW_AT_name, DW_FORM_string),
        ],
    },
    AbbrevDecl {
        code: AbbrevCode::BaseType,
        tag: DW_TAG_base_type,
        has_children: false,
        attrs: &[
            (DW_AT_encoding, DW_FORM_data1),
            (DW_AT_byte_size, DW_FORM_udata),
            (DW_AT_name, DW_FORM_string),
        ],
    },
    AbbrevDecl {
        code: AbbrevCode::PtrType,
        tag: DW_TAG_pointer_type,
        has_children: false,
        attrs: &[(DW_AT_type, DW_FORM_ref4)],
    },
    AbbrevDecl {
        code: AbbrevCode::StructType,
        tag: DW_TAG_structure_type,
        has_children: true,
        attrs: &[(DW_AT_byte_size, DW_FORM_udata), (DW_AT_name, DW_FORM_string)],
    },
    AbbrevDecl {
        code: AbbrevCode::StructMember,
        tag: DW_TAG_member,
        has_children: false,
        attrs: &[
            (DW_AT_name, DW_FORM_string),
            (DW_AT_type, DW_FORM_ref4),
            (DW_AT_data_member_location, DW_FORM_udata),
        ],
    },
    AbbrevDecl {
        code: AbbrevCode::EnumType,
        tag: DW_TAG_enumeration_type,
        has_children: true,
        attrs: &[(DW_AT_byte_size, DW_FORM_udata), (DW_AT_name, DW_FORM_string)],
    },
    AbbrevDecl {
        code: AbbrevCode::EnumVariant,
        tag: DW_TAG_enumerator,
        has_children: false,
        attrs: &[(DW_AT_name, DW_FORM_string), (DW_AT_const_value, DW_FORM_data8)],
    },
    AbbrevDecl {
        code: AbbrevCode::UnionType,
        tag: DW_TAG_union_type,
        has_children: true,
        attrs: &[(DW_AT_byte_size, DW_FORM_udata), (DW_AT_name, DW_FORM_string)],
    },
    AbbrevDecl {
        code: AbbrevCode::Pad1,
        tag: DW_TAG_unspecified_type,
        has_children: false,
        attrs: &[],
    },
    AbbrevDecl {
        code: AbbrevCode::Parameter,
        tag: DW_TAG_formal_parameter,
        has_children: false,
        attrs: &[
            (DW_AT_location, DW_FORM_exprloc),
            (DW_AT_type, DW_FORM_ref4),
            (DW_AT_name, DW_FORM_string),
        ],
    },
    AbbrevDecl {
        code: AbbrevCode::Variable,
        tag: DW_TAG_variable,
        has_children: false,
        attrs: &[
            (DW_AT_location, DW_FORM_exprloc),
            (DW_AT_type, DW_FORM_ref4),
            (DW_AT_name, DW_FORM_string),
        ],
    },
    AbbrevDecl {
        code: AbbrevCode::ArrayType,
        tag: DW_TAG_array_type,
        has_children: true,
        attrs: &[(DW_AT_name, DW_FORM_string), (DW_AT_type, DW_FORM_ref4)],
    },
    AbbrevDecl {
        code: AbbrevCode::ArrayDim,
        tag: DW_TAG_subrange_type,
        has_children: false,
        attrs: &[(DW_AT_type, DW_FORM_ref4), (DW_AT_count, DW_FORM_udata)],
    },
];

/// Renders the static `.debug_abbrev` table. The section is written once per
/// module, at offset zero.
pub(crate) fn section_bytes(endian: RunTimeEndian) -> Result<Vec<u8>> {
    let mut buf = EndianVec::new(endian);
    for decl in ABBREV_TABLE {
        buf.write_uleb128(decl.code as u64)?;
        buf.write_uleb128(decl.tag.0.into())?;
        buf.write_u8(if decl.has_children { DW_CHILDREN_yes.0 } else { DW_CHILDREN_no.0 })?;
        for (at, form) in decl.attrs {
            buf.write_uleb128(at.0.into())?;
            buf.write_uleb128(form.0.into())?;
        }
        // End of this abbreviation declaration.
        buf.write_u8(0)?;
        buf.write_u8(0)?;
    }
    // End of the abbreviations for this unit.
    buf.write_u8(0)?;
    Ok(buf.take())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_declaration_order() {
        for (position, decl) in ABBREV_TABLE.iter().enumerate() {
            assert_eq!(decl.code as usize, position + 1);
        }
    }

    #[test]
    fn table_parses_with_a_conformant_reader() {
        let bytes = section_bytes(RunTimeEndian::Little).unwrap();
        let debug_abbrev = gimli::DebugAbbrev::new(&bytes, gimli::LittleEndian);
        let abbrevs = debug_abbrev
            .abbreviations(gimli::DebugAbbrevOffset(0))
            .expect("table must parse");

        let cu = abbrevs.get(AbbrevCode::CompileUnit as u64).unwrap();
        assert_eq!(cu.tag(), DW_TAG_compile_unit);
        assert!(cu.has_children());
        assert_eq!(cu.attributes().len(), 7);

        let pad1 = abbrevs.get(AbbrevCode::Pad1 as u64).unwrap();
        assert_eq!(pad1.tag(), DW_TAG_unspecified_type);
        assert!(!pad1.has_children());
        assert!(pad1.attributes().is_empty());

        let subprogram = abbrevs.get(AbbrevCode::Subprogram as u64).unwrap();
        assert_eq!(subprogram.attributes()[0].name(), DW_AT_low_pc);
        assert_eq!(subprogram.attributes()[0].form(), DW_FORM_addr);
    }
}
