use gimli::constants::*;
use gimli::write::{EndianVec, Writer};
use gimli::RunTimeEndian;
use hashbrown::HashMap;
use tracing::trace;

use crate::atom::AtomIndex;
use crate::error::Result;
use crate::frontend::{Frontend, TypeIndex};
use crate::loc::{write_exprloc, Location};
use crate::{PtrWidth, RelocKind};

/// One per-declaration type-interning slot: the first reference to a type
/// reserves an entry here, and the type's DIE is appended at commit time at
/// the recorded offset within the owning atom.
#[derive(Clone, Debug)]
pub(crate) struct AbbrevEntry {
    pub(crate) ty: TypeIndex,
    pub(crate) atom: AtomIndex,
    /// Offset of the DIE within the atom; assigned while the commit drains
    /// the table.
    pub(crate) offset: u32,
}

/// A deferred four-byte patch inside `.debug_info`.
///
/// `target: None` is a reference relative to the owning atom itself;
/// `target: Some(i)` references the DIE of abbrev-table entry `i`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AbbrevReloc {
    pub(crate) target: Option<u32>,
    pub(crate) atom: AtomIndex,
    pub(crate) offset: u32,
    pub(crate) addend: u32,
}

/// A deferred pointer-sized patch inside a `DW_FORM_exprloc` payload,
/// resolved by the container against a linker symbol.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ExprlocReloc {
    pub(crate) kind: RelocKind,
    pub(crate) symbol: u32,
    /// Offset of the slot within the declaration's `.debug_info` fragment.
    pub(crate) offset: u32,
}

/// Scratch state for one declaration update, created by
/// [`Dwarf::init_decl_state`](crate::Dwarf::init_decl_state) and consumed by
/// [`Dwarf::commit_decl_state`](crate::Dwarf::commit_decl_state).
///
/// Codegen appends line-program opcodes and parameter/variable DIEs through
/// the methods here while it lays down machine code; all cross-references are
/// queued as relocations because no atom offset is known until commit.
pub struct DeclState {
    pub(crate) di_atom: AtomIndex,
    pub(crate) src_fn: Option<AtomIndex>,
    pub(crate) dbg_line: EndianVec<RunTimeEndian>,
    pub(crate) dbg_info: EndianVec<RunTimeEndian>,
    pub(crate) abbrev_table: Vec<AbbrevEntry>,
    abbrev_resolver: HashMap<TypeIndex, u32>,
    pub(crate) abbrev_relocs: Vec<AbbrevReloc>,
    pub(crate) exprloc_relocs: Vec<ExprlocReloc>,
    ptr_width: PtrWidth,
}

impl DeclState {
    pub(crate) fn new(endian: RunTimeEndian, ptr_width: PtrWidth, di_atom: AtomIndex) -> Self {
        Self {
            di_atom,
            src_fn: None,
            dbg_line: EndianVec::new(endian),
            dbg_info: EndianVec::new(endian),
            abbrev_table: Vec::new(),
            abbrev_resolver: HashMap::new(),
            abbrev_relocs: Vec::new(),
            exprloc_relocs: Vec::new(),
            ptr_width,
        }
    }

    /// Queue a four-byte reference at `offset` to the DIE of type `ty`,
    /// interning the type in this declaration's abbrev table on first use.
    pub(crate) fn add_type_reloc_global(&mut self, atom: AtomIndex, ty: TypeIndex, offset: u32) {
        let target = match self.abbrev_resolver.get(&ty) {
            Some(index) => *index,
            None => {
                let index = self.abbrev_table.len() as u32;
                self.abbrev_table.push(AbbrevEntry { ty, atom, offset: 0 });
                self.abbrev_resolver.insert(ty, index);
                trace!(?ty, index, "interned type");
                index
            }
        };
        self.abbrev_relocs.push(AbbrevReloc { target: Some(target), atom, offset, addend: 0 });
    }

    /// Queue a four-byte reference at `offset` to a position `addend` bytes
    /// past the slot, within the same atom. Used for DIEs emitted inline at a
    /// known relative position, like a tagged union's payload type.
    pub(crate) fn add_type_reloc_local(&mut self, atom: AtomIndex, offset: u32, addend: u32) {
        self.abbrev_relocs.push(AbbrevReloc { target: None, atom, offset, addend });
    }

    /// Reserve a four-byte `DW_FORM_ref4` slot referencing `ty` at the
    /// current end of the `.debug_info` fragment.
    pub(crate) fn write_type_ref(&mut self, ty: TypeIndex) -> Result<()> {
        let offset = self.dbg_info.len() as u32;
        self.add_type_reloc_global(self.di_atom, ty, offset);
        self.dbg_info.write(&[0; 4])?;
        Ok(())
    }

    /// Advance the line-program position by `delta_pc` machine bytes and
    /// `delta_line` source lines, emitting a row.
    pub fn advance_pc_and_line(&mut self, delta_line: i64, delta_pc: u64) -> Result<()> {
        // TODO: fold small advances into DWARF special opcodes instead of
        // spending up to eleven bytes per row.
        self.dbg_line.write_u8(DW_LNS_advance_pc.0)?;
        self.dbg_line.write_uleb128(delta_pc)?;
        if delta_line != 0 {
            self.dbg_line.write_u8(DW_LNS_advance_line.0)?;
            self.dbg_line.write_sleb128(delta_line)?;
        }
        self.dbg_line.write_u8(DW_LNS_copy.0)?;
        Ok(())
    }

    /// Mark the current position as the end of the function prologue.
    pub fn set_prologue_end(&mut self) -> Result<()> {
        self.dbg_line.write_u8(DW_LNS_set_prologue_end.0)?;
        Ok(())
    }

    /// Mark the current position as the beginning of the function epilogue.
    pub fn set_epilogue_begin(&mut self) -> Result<()> {
        self.dbg_line.write_u8(DW_LNS_set_epilogue_begin.0)?;
        Ok(())
    }

    /// Append a formal-parameter DIE for one function argument.
    pub fn gen_arg_dbg_info(
        &mut self,
        frontend: &impl Frontend,
        name: &str,
        ty: TypeIndex,
        loc: Location,
    ) -> Result<()> {
        self.gen_local(frontend, crate::abbrev::AbbrevCode::Parameter, name, ty, loc)
    }

    /// Append a variable DIE for one function-local variable.
    pub fn gen_var_dbg_info(
        &mut self,
        frontend: &impl Frontend,
        name: &str,
        ty: TypeIndex,
        loc: Location,
    ) -> Result<()> {
        self.gen_local(frontend, crate::abbrev::AbbrevCode::Variable, name, ty, loc)
    }

    fn gen_local(
        &mut self,
        frontend: &impl Frontend,
        code: crate::abbrev::AbbrevCode,
        name: &str,
        ty: TypeIndex,
        loc: Location,
    ) -> Result<()> {
        debug_assert!(self.src_fn.is_some(), "locals belong to function declarations");
        self.dbg_info.write_u8(code as u8)?;
        write_exprloc(
            &mut self.dbg_info,
            &mut self.exprloc_relocs,
            self.ptr_width,
            loc,
            frontend.type_abi_size(ty),
        )?;
        self.write_type_ref(ty)?;
        self.dbg_info.write(name.as_bytes())?;
        self.dbg_info.write_u8(0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomPool;
    use crate::frontend::DeclIndex;

    fn state() -> DeclState {
        let mut pool = AtomPool::new();
        let atom = pool.get_or_create_for_decl(DeclIndex(0));
        DeclState::new(RunTimeEndian::Little, PtrWidth::P64, atom)
    }

    #[test]
    fn types_are_interned_once_per_declaration() {
        let mut state = state();
        let atom = state.di_atom;
        state.add_type_reloc_global(atom, TypeIndex(7), 0);
        state.add_type_reloc_global(atom, TypeIndex(7), 10);
        state.add_type_reloc_global(atom, TypeIndex(9), 20);

        assert_eq!(state.abbrev_table.len(), 2);
        assert_eq!(state.abbrev_relocs.len(), 3);
        assert_eq!(state.abbrev_relocs[0].target, Some(0));
        assert_eq!(state.abbrev_relocs[1].target, Some(0));
        assert_eq!(state.abbrev_relocs[2].target, Some(1));
    }

    #[test]
    fn line_rows_skip_zero_line_deltas() {
        let mut state1 = state();
        state1.advance_pc_and_line(0, 4).unwrap();
        assert_eq!(
            state1.dbg_line.slice(),
            [DW_LNS_advance_pc.0, 4, DW_LNS_copy.0]
        );

        let mut state2 = state();
        state2.advance_pc_and_line(-1, 4).unwrap();
        assert_eq!(
            state2.dbg_line.slice(),
            [DW_LNS_advance_pc.0, 4, DW_LNS_advance_line.0, 0x7f, DW_LNS_copy.0]
        );
    }
}
