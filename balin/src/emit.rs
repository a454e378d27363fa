use std::fs;

use gimli::constants::*;
use gimli::write::{EndianVec, Writer};
use gimli::RunTimeEndian;
use indexmap::IndexSet;
use tracing::{debug, error, trace};

use crate::abbrev::{self, AbbrevCode};
use crate::atom::{pad_to_ideal, AtomIndex, AtomPool, Placement};
use crate::container::{Container, DebugSection};
use crate::decl::{AbbrevReloc, DeclState};
use crate::error::{Error, Result};
use crate::frontend::{DeclIndex, Frontend, SourceFile, TypeShape};
use crate::strings::{StrOffset, StringTable};
use crate::util::write_uleb128_fixed4;
use crate::{ObjectFile, PtrWidth};

/// Offset of the `set_address` operand within a function's line-program
/// fragment: past the extended-opcode introducer, its length, and the opcode.
const DBG_LINE_VADDR_RELOC_INDEX: usize = 3;

/// Offset of the `low_pc` value within a subprogram DIE: right after the
/// abbreviation code.
const DBG_INFO_LOW_PC_RELOC_INDEX: usize = 1;

/// Offset of the address operand within a global's variable DIE: past the
/// abbreviation code, the expression length, and `DW_OP_addr`.
const DBG_INFO_DECL_ADDR_RELOC_INDEX: usize = 3;

/// Space reserved at the start of `.debug_info` for the compile-unit header
/// and DIE.
const DBG_INFO_HEADER_BYTES: u32 = 120;

/// Operand counts of the twelve standard line-number opcodes.
const STANDARD_OPCODE_LENGTHS: [u8; 12] = [0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1];

/// Target and module facts fixed for the lifetime of the emitter.
pub struct DwarfConfig {
    pub endian: RunTimeEndian,
    pub ptr_width: PtrWidth,
    /// Module name, referenced by the compile unit via `DW_FORM_strp`.
    pub module_name: String,
    /// Compilation directory for the compile unit.
    pub comp_dir: String,
    /// Producer string recorded in the compile unit.
    pub producer: String,
}

/// The incremental DWARF emitter.
///
/// One `Dwarf` lives as long as the compilation it serves. It owns all
/// cross-declaration state: the two atom lanes, the string pool, the source
/// file table, and the queue of relocations that can only resolve once the
/// module-wide error set is final. All file access goes through a
/// [`Container`]; the emitter never opens anything itself.
pub struct Dwarf {
    endian: RunTimeEndian,
    ptr_width: PtrWidth,
    strtab: StringTable,
    module_name: StrOffset,
    comp_dir: StrOffset,
    producer: StrOffset,
    /// `.debug_info` DIE atoms, one per declaration.
    di_atoms: AtomPool,
    /// `.debug_line` sub-programs, one per function.
    src_fns: AtomPool,
    /// Source files any declaration contributed, in insertion order. File
    /// indices in line programs are one-based positions in this set.
    files: IndexSet<SourceFile>,
    /// References to error-set DIEs, deferred until `flush_module`
    /// materializes the module-wide error enum.
    global_abbrev_relocs: Vec<AbbrevReloc>,
    debug_line_header_dirty: bool,
}

impl Dwarf {
    pub fn new(config: DwarfConfig) -> Dwarf {
        let mut strtab = StringTable::new();
        let module_name = strtab.get_or_insert(config.module_name.as_bytes());
        let comp_dir = strtab.get_or_insert(config.comp_dir.as_bytes());
        let producer = strtab.get_or_insert(config.producer.as_bytes());
        Dwarf {
            endian: config.endian,
            ptr_width: config.ptr_width,
            strtab,
            module_name,
            comp_dir,
            producer,
            di_atoms: AtomPool::new(),
            src_fns: AtomPool::new(),
            files: IndexSet::new(),
            global_abbrev_relocs: Vec::new(),
            debug_line_header_dirty: false,
        }
    }

    /// Begin a declaration update. Codegen emits types, locals and line rows
    /// through the returned state; nothing touches the sections until
    /// [`commit_decl_state`](Self::commit_decl_state).
    #[tracing::instrument(level = "trace", skip(self, frontend))]
    pub fn init_decl_state(
        &mut self,
        frontend: &impl Frontend,
        decl: DeclIndex,
    ) -> Result<DeclState> {
        let di_atom = self.di_atoms.get_or_create_for_decl(decl);
        let mut state = DeclState::new(self.endian, self.ptr_width, di_atom);

        let Some(func) = frontend.decl_fn(decl) else {
            self.init_global_decl(frontend, decl, &mut state)?;
            return Ok(state);
        };
        state.src_fn = Some(self.src_fns.get_or_create_for_decl(decl));

        // Line-program prologue for this function. The address operand and
        // the line/file operands sit at fixed offsets so they can be patched
        // without rewriting the fragment.
        let file_index = self.add_source_file(&frontend.decl_file(decl));
        let line = frontend.decl_src_line(decl) + func.lbrace_line;
        let ptr_bytes = self.ptr_width.bytes();
        let mut fixed = [0u8; 4];

        state.dbg_line.write(&[0, ptr_bytes + 1, DW_LNE_set_address.0])?;
        debug_assert_eq!(state.dbg_line.len(), DBG_LINE_VADDR_RELOC_INDEX);
        state.dbg_line.write(&[0u8; 8][..ptr_bytes as usize])?;
        state.dbg_line.write_u8(DW_LNS_advance_line.0)?;
        debug_assert_eq!(state.dbg_line.len(), self.reloc_dbg_line_off());
        write_uleb128_fixed4(&mut fixed, line);
        state.dbg_line.write(&fixed)?;
        state.dbg_line.write_u8(DW_LNS_set_file.0)?;
        write_uleb128_fixed4(&mut fixed, file_index);
        state.dbg_line.write(&fixed)?;
        // A first row for the opening brace; codegen takes over from here.
        state.dbg_line.write_u8(DW_LNS_copy.0)?;

        // Subprogram DIE. Low and high PC are placeholders patched at commit.
        let ret_has_bits = frontend.type_has_runtime_bits(func.return_type);
        let code =
            if ret_has_bits { AbbrevCode::Subprogram } else { AbbrevCode::SubprogramRetVoid };
        state.dbg_info.write_u8(code as u8)?;
        debug_assert_eq!(state.dbg_info.len(), DBG_INFO_LOW_PC_RELOC_INDEX);
        state.dbg_info.write(&[0u8; 8][..ptr_bytes as usize])?;
        state.dbg_info.write_u32(0)?;
        if ret_has_bits {
            state.write_type_ref(func.return_type)?;
        }
        let name = frontend.decl_name(decl);
        state.dbg_info.write(name.as_bytes())?;
        state.dbg_info.write_u8(0)?;

        Ok(state)
    }

    /// Non-function declarations get a module-scope variable DIE. Its address
    /// expression carries a placeholder operand at a fixed offset, patched at
    /// commit the same way a subprogram's PC range is.
    fn init_global_decl(
        &mut self,
        frontend: &impl Frontend,
        decl: DeclIndex,
        state: &mut DeclState,
    ) -> Result<()> {
        let ty = frontend.decl_type(decl);
        if !frontend.type_has_runtime_bits(ty) {
            trace!(?decl, "global carries no runtime bits, no debug info emitted");
            return Ok(());
        }
        let ptr_bytes = self.ptr_width.bytes();
        state.dbg_info.write_u8(AbbrevCode::Variable as u8)?;
        // DW_AT_location: an address expression with a placeholder operand.
        state.dbg_info.write_u8(1 + ptr_bytes)?;
        state.dbg_info.write_u8(DW_OP_addr.0)?;
        debug_assert_eq!(state.dbg_info.len(), DBG_INFO_DECL_ADDR_RELOC_INDEX);
        state.dbg_info.write(&[0u8; 8][..ptr_bytes as usize])?;
        state.write_type_ref(ty)?;
        let name = frontend.decl_name(decl);
        state.dbg_info.write(name.as_bytes())?;
        state.dbg_info.write_u8(0)?;
        Ok(())
    }

    /// Finish a declaration update: place the atoms, resolve every local
    /// relocation against the now-known offsets, and write the payloads with
    /// their neighboring padding.
    #[tracing::instrument(level = "trace", skip(self, frontend, container, state))]
    pub fn commit_decl_state<F: ObjectFile>(
        &mut self,
        frontend: &impl Frontend,
        container: &mut Container<F>,
        decl: DeclIndex,
        sym_addr: u64,
        sym_size: u64,
        mut state: DeclState,
    ) -> Result<()> {
        if let Some(src_fn_index) = state.src_fn {
            // Patch the values codegen could not know: the line program's
            // start address and the subprogram's PC range.
            match self.ptr_width {
                PtrWidth::P32 => {
                    state.dbg_line.write_u32_at(DBG_LINE_VADDR_RELOC_INDEX, sym_addr as u32)?;
                    state.dbg_info.write_u32_at(DBG_INFO_LOW_PC_RELOC_INDEX, sym_addr as u32)?;
                }
                PtrWidth::P64 => {
                    state.dbg_line.write_u64_at(DBG_LINE_VADDR_RELOC_INDEX, sym_addr)?;
                    state.dbg_info.write_u64_at(DBG_INFO_LOW_PC_RELOC_INDEX, sym_addr)?;
                }
            }
            state.dbg_info.write_u32_at(self.reloc_dbg_info_high_pc(), sym_size as u32)?;

            // The program is complete; close the sequence.
            state.dbg_line.write(&[0, 1, DW_LNE_end_sequence.0])?;

            let len = state.dbg_line.len() as u32;
            let placement = self.src_fns.place(src_fn_index, len, self.dbg_line_header_bytes());
            write_atom_payload(
                container,
                &self.src_fns,
                DebugSection::Line,
                src_fn_index,
                placement,
                state.dbg_line.slice(),
                false,
            )?;
            if self.debug_line_header_dirty {
                container.mark_dirty(DebugSection::Line);
            }
        } else if state.dbg_info.len() != 0 {
            // A global: patch the address operand of its variable DIE now
            // that the symbol is placed.
            match self.ptr_width {
                PtrWidth::P32 => {
                    state.dbg_info.write_u32_at(DBG_INFO_DECL_ADDR_RELOC_INDEX, sym_addr as u32)?;
                }
                PtrWidth::P64 => {
                    state.dbg_info.write_u64_at(DBG_INFO_DECL_ADDR_RELOC_INDEX, sym_addr)?;
                }
            }
        }

        if state.dbg_info.len() == 0 {
            return Ok(());
        }

        // Terminate the subprogram's children (a global's variable DIE has
        // none), then append the DIE of every type this declaration interned.
        // A type DIE may reference further types, so the table can grow while
        // it drains.
        if state.src_fn.is_some() {
            state.dbg_info.write_u8(0)?;
        }
        let mut index = 0;
        while index < state.abbrev_table.len() {
            let entry = state.abbrev_table[index].clone();
            if matches!(frontend.type_shape(entry.ty), TypeShape::ErrorSet) {
                index += 1;
                continue;
            }
            state.abbrev_table[index].offset = state.dbg_info.len() as u32;
            state.add_type_die(frontend, entry.atom, entry.ty)?;
            index += 1;
        }

        let di_atom_index = state.di_atom;
        let placement =
            self.di_atoms.place(di_atom_index, state.dbg_info.len() as u32, DBG_INFO_HEADER_BYTES);

        // Offsets are final; resolve the relocations. Error-set references
        // move to the module-wide queue, everything else patches in place.
        for reloc in &state.abbrev_relocs {
            match reloc.target {
                Some(target) => {
                    let entry = &state.abbrev_table[target as usize];
                    if matches!(frontend.type_shape(entry.ty), TypeShape::ErrorSet) {
                        self.global_abbrev_relocs.push(AbbrevReloc {
                            target: None,
                            atom: reloc.atom,
                            offset: reloc.offset,
                            addend: reloc.addend,
                        });
                    } else {
                        let target_atom = self.di_atoms.get(entry.atom);
                        state.dbg_info.write_u32_at(
                            reloc.offset as usize,
                            target_atom.off + entry.offset + reloc.addend,
                        )?;
                    }
                }
                None => {
                    let atom = self.di_atoms.get(reloc.atom);
                    state.dbg_info.write_u32_at(
                        reloc.offset as usize,
                        atom.off + reloc.offset + reloc.addend,
                    )?;
                }
            }
        }

        // Expression locations are patched by the container's symbol
        // resolution; hand them over in section-relative terms.
        let di_off = self.di_atoms.get(di_atom_index).off;
        for reloc in &state.exprloc_relocs {
            container.add_exprloc_reloc(reloc.kind, reloc.symbol, u64::from(di_off + reloc.offset));
        }

        write_atom_payload(
            container,
            &self.di_atoms,
            DebugSection::Info,
            di_atom_index,
            placement,
            state.dbg_info.slice(),
            true,
        )
    }

    /// Re-patch only the line operand of a function whose source moved but
    /// whose code did not change. The fixed-width slot makes this a four-byte
    /// write.
    pub fn update_decl_line_number<F: ObjectFile>(
        &mut self,
        frontend: &impl Frontend,
        container: &mut Container<F>,
        decl: DeclIndex,
    ) -> Result<()> {
        let Some(index) = self.src_fns.for_decl(decl) else { return Ok(()) };
        let atom = self.src_fns.get(index);
        if atom.len == 0 {
            // Never committed; the next commit will carry the line anyway.
            return Ok(());
        }
        let func = frontend.decl_fn(decl).expect("line updates only apply to functions");
        let line = frontend.decl_src_line(decl) + func.lbrace_line;
        trace!(?decl, line, "update line number");

        let mut fixed = [0u8; 4];
        write_uleb128_fixed4(&mut fixed, line);
        let offset = u64::from(atom.off) + self.reloc_dbg_line_off() as u64;
        container.write_all(DebugSection::Line, offset, &fixed)
    }

    /// Release both atoms of a deleted declaration. The vacated ranges keep
    /// their old (well-formed) contents and become reclaimable padding.
    pub fn free_decl(&mut self, decl: DeclIndex) {
        self.di_atoms.free(decl);
        self.src_fns.free(decl);
    }

    /// Resolve everything that had to wait for the end of compilation: the
    /// module-wide error enum and all references to it, plus the string pool.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn flush_module<F: ObjectFile>(
        &mut self,
        frontend: &impl Frontend,
        container: &mut Container<F>,
    ) -> Result<()> {
        if !self.global_abbrev_relocs.is_empty() {
            // Only now is the set of error names complete, so only now can
            // the enum DIE every error-set reference points at be emitted.
            let mut buf = EndianVec::new(self.endian);
            buf.write_u8(AbbrevCode::EnumType as u8)?;
            buf.write_uleb128(frontend.type_abi_size(frontend.anyerror_type()))?;
            buf.write(b"anyerror\0")?;
            buf.write_u8(AbbrevCode::EnumVariant as u8)?;
            buf.write(b"(no error)\0")?;
            buf.write_u64(0)?;
            for name in frontend.error_names() {
                buf.write_u8(AbbrevCode::EnumVariant as u8)?;
                buf.write(name.as_bytes())?;
                buf.write_u8(0)?;
                buf.write_u64(frontend.error_value(&name))?;
            }
            buf.write_u8(0)?;

            let atom_index = self.di_atoms.create();
            let placement =
                self.di_atoms.place(atom_index, buf.len() as u32, DBG_INFO_HEADER_BYTES);
            write_atom_payload(
                container,
                &self.di_atoms,
                DebugSection::Info,
                atom_index,
                placement,
                buf.slice(),
                true,
            )?;

            let target_off = self.di_atoms.get(atom_index).off;
            debug!(
                relocs = self.global_abbrev_relocs.len(),
                target_off, "patching deferred error set references"
            );
            while let Some(reloc) = self.global_abbrev_relocs.pop() {
                let src = self.di_atoms.get(reloc.atom);
                if src.len == 0 {
                    error!(?reloc, "deferred relocation against an empty atom, leaving the slot zeroed");
                    continue;
                }
                container.patch_u32(
                    DebugSection::Info,
                    u64::from(src.off + reloc.offset),
                    target_off + reloc.addend,
                    self.endian,
                )?;
            }
        }

        if self.strtab.take_dirty() {
            let bytes = self.strtab.bytes();
            container.grow_section(DebugSection::Str, bytes.len() as u64, false)?;
            container.write_all(DebugSection::Str, 0, bytes)?;
        }
        Ok(())
    }

    /// Write the static abbreviation table. Only needs to happen once per
    /// module, before the first flush.
    pub fn write_dbg_abbrev<F: ObjectFile>(&mut self, container: &mut Container<F>) -> Result<()> {
        let bytes = abbrev::section_bytes(self.endian)?;
        container.grow_section(DebugSection::Abbrev, bytes.len() as u64, true)?;
        container.write_all(DebugSection::Abbrev, 0, &bytes)
    }

    /// Rewrite the `.debug_info` compile-unit header and DIE. Idempotent
    /// until the next commit changes the section's extent.
    pub fn write_dbg_info_header<F: ObjectFile>(
        &mut self,
        container: &mut Container<F>,
        low_pc: u64,
        high_pc: u64,
    ) -> Result<()> {
        let mut buf = EndianVec::new(self.endian);
        buf.write_u32(0)?; // unit_length, patched below
        buf.write_u16(4)?; // DWARF version
        buf.write_u32(0)?; // .debug_abbrev offset
        buf.write_u8(self.ptr_width.bytes())?; // address_size

        buf.write_u8(AbbrevCode::CompileUnit as u8)?;
        buf.write_u32(0)?; // DW_AT_stmt_list
        self.write_addr(&mut buf, low_pc)?;
        self.write_addr(&mut buf, high_pc)?;
        buf.write_u32(self.module_name.0)?;
        buf.write_u32(self.comp_dir.0)?;
        buf.write_u32(self.producer.0)?;
        buf.write_u16(DW_LANG_C99.0)?;

        let header_len = buf.len() as u32;
        if header_len > DBG_INFO_HEADER_BYTES {
            return Err(Error::OversizedUnitHeader(buf.len(), DBG_INFO_HEADER_BYTES));
        }

        match self.di_atoms.first() {
            Some(first_index) => {
                let first_off = self.di_atoms.get(first_index).off;
                // The section ends one terminating zero after the last atom.
                let end = self.di_atoms.end().expect("lane with a first atom has an end") + 1;
                buf.write_u32_at(0, end - 4)?;
                container.grow_section(DebugSection::Info, end.into(), false)?;
                container.write_all(DebugSection::Info, 0, buf.slice())?;
                container.write_padding(DebugSection::Info, header_len, first_off - header_len)?;
            }
            None => {
                // Empty module: the compile unit closes immediately.
                buf.write_u8(0)?;
                let end = buf.len() as u32;
                buf.write_u32_at(0, end - 4)?;
                container.grow_section(DebugSection::Info, end.into(), true)?;
                container.write_all(DebugSection::Info, 0, buf.slice())?;
            }
        }
        Ok(())
    }

    /// Rewrite `.debug_aranges`: one (address, size) tuple for the module and
    /// the terminating sentinel.
    pub fn write_dbg_aranges<F: ObjectFile>(
        &mut self,
        container: &mut Container<F>,
        addr: u64,
        size: u64,
    ) -> Result<()> {
        let mut buf = EndianVec::new(self.endian);
        buf.write_u32(0)?; // unit_length, patched below
        buf.write_u16(2)?; // .debug_aranges version
        buf.write_u32(0)?; // .debug_info offset
        buf.write_u8(self.ptr_width.bytes())?; // address_size
        buf.write_u8(0)?; // segment_selector_size

        // Tuples are aligned to twice the address size.
        let tuple_align = 2 * self.ptr_width.bytes() as usize;
        while buf.len() % tuple_align != 0 {
            buf.write_u8(0)?;
        }
        self.write_addr(&mut buf, addr)?;
        self.write_addr(&mut buf, size)?;
        // Terminating sentinel.
        self.write_addr(&mut buf, 0)?;
        self.write_addr(&mut buf, 0)?;

        let len = buf.len();
        buf.write_u32_at(0, len as u32 - 4)?;
        container.grow_section(DebugSection::Aranges, len as u64, true)?;
        container.write_all(DebugSection::Aranges, 0, buf.slice())
    }

    /// Rewrite the `.debug_line` prologue, regenerating the directory and
    /// file tables. If the prologue no longer fits in front of the first line
    /// program, every program shifts up to make room.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn write_dbg_line_header<F: ObjectFile>(
        &mut self,
        container: &mut Container<F>,
    ) -> Result<()> {
        let mut buf = EndianVec::new(self.endian);
        self.render_line_header(&mut buf)?;

        match self.src_fns.first() {
            Some(first_index) => {
                let first_off = self.src_fns.get(first_index).off;
                let header_len = buf.len() as u32;
                // A one-byte gap cannot hold a line-program no-op, so it
                // forces a shift just like an overflow does.
                if header_len > first_off || first_off - header_len == 1 {
                    let new_off = pad_to_ideal(buf.len() as u32);
                    let delta = new_off - first_off;
                    let end = self.src_fns.end().expect("lane with a first atom has an end");
                    let mut program = vec![0u8; (end - first_off) as usize];
                    container.grow_section(DebugSection::Line, (end + delta).into(), false)?;
                    container.read_exact(DebugSection::Line, first_off.into(), &mut program)?;
                    container.write_all(DebugSection::Line, new_off.into(), &program)?;
                    self.src_fns.shift(delta);
                    debug!(delta, "line programs shifted to fit a larger prologue");
                }

                let first_off = self.src_fns.get(first_index).off;
                let end = self.src_fns.end().expect("lane with a first atom has an end");
                buf.write_u32_at(0, end - 4)?;
                container.grow_section(DebugSection::Line, end.into(), false)?;
                container.write_all(DebugSection::Line, 0, buf.slice())?;
                container.write_padding(
                    DebugSection::Line,
                    buf.len() as u32,
                    first_off - buf.len() as u32,
                )?;
            }
            None => {
                let len = buf.len() as u32;
                buf.write_u32_at(0, len - 4)?;
                container.grow_section(DebugSection::Line, len.into(), true)?;
                container.write_all(DebugSection::Line, 0, buf.slice())?;
            }
        }
        self.debug_line_header_dirty = false;
        Ok(())
    }

    fn render_line_header(&self, buf: &mut EndianVec<RunTimeEndian>) -> Result<()> {
        buf.write_u32(0)?; // unit_length, patched by the caller
        buf.write_u16(4)?; // line-number program version
        buf.write_u32(0)?; // header_length, patched below
        let header_length_end = buf.len();
        buf.write_u8(1)?; // minimum_instruction_length
        buf.write_u8(1)?; // maximum_operations_per_instruction
        buf.write_u8(1)?; // default_is_stmt
        buf.write_u8(1)?; // line_base
        buf.write_u8(1)?; // line_range
        buf.write_u8(DW_LNS_set_isa.0 + 1)?; // opcode_base
        buf.write(&STANDARD_OPCODE_LENGTHS)?;

        let (dirs, files) = self.line_tables();
        for dir in &dirs {
            buf.write(dir.as_bytes())?;
            buf.write_u8(0)?;
        }
        buf.write_u8(0)?;
        for (basename, dir_index) in &files {
            buf.write(basename.as_bytes())?;
            buf.write_u8(0)?;
            buf.write_uleb128(*dir_index as u64)?;
            buf.write_uleb128(0)?; // mtime
            buf.write_uleb128(0)?; // length
        }
        buf.write_u8(0)?;

        let header_length = buf.len() - header_length_end;
        buf.write_u32_at(6, header_length as u32)?;
        Ok(())
    }

    /// The directory and file tables in their current shape: directories
    /// deduplicated in first-use order, both one-indexed.
    fn line_tables(&self) -> (Vec<String>, Vec<(String, usize)>) {
        let mut dirs: IndexSet<&std::path::Path> = IndexSet::new();
        let mut files = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let (dir_index, _) = dirs.insert_full(file.directory.as_path());
            files.push((file.basename.clone(), dir_index + 1));
        }
        (dirs.iter().map(|dir| dir.to_string_lossy().into_owned()).collect(), files)
    }

    /// Registers a declaration's source file, returning its one-based index
    /// in the file table.
    fn add_source_file(&mut self, file: &SourceFile) -> u32 {
        let directory =
            fs::canonicalize(&file.directory).unwrap_or_else(|_| file.directory.clone());
        let (index, inserted) =
            self.files.insert_full(SourceFile { directory, basename: file.basename.clone() });
        if inserted {
            self.debug_line_header_dirty = true;
            trace!(file = %file.basename, "new source file, line prologue must be rewritten");
        }
        (index + 1) as u32
    }

    /// Current size of the line-program prologue; the first atom of the lane
    /// is placed past it.
    fn dbg_line_header_bytes(&self) -> u32 {
        let mut buf = EndianVec::new(self.endian);
        self.render_line_header(&mut buf).expect("in-memory write cannot fail");
        buf.len() as u32
    }

    fn write_addr(&self, buf: &mut EndianVec<RunTimeEndian>, value: u64) -> Result<()> {
        match self.ptr_width {
            PtrWidth::P32 => buf.write_u32(value as u32)?,
            PtrWidth::P64 => buf.write_u64(value)?,
        }
        Ok(())
    }

    fn reloc_dbg_line_off(&self) -> usize {
        DBG_LINE_VADDR_RELOC_INDEX + self.ptr_width.bytes() as usize + 1
    }

    fn reloc_dbg_info_high_pc(&self) -> usize {
        DBG_INFO_LOW_PC_RELOC_INDEX + self.ptr_width.bytes() as usize
    }
}

/// Write a freshly placed atom's payload through the container, together with
/// the padding that keeps its neighborhood well-formed. `terminate_section`
/// marks lanes that carry a section-closing zero byte after the last atom.
fn write_atom_payload<F: ObjectFile>(
    container: &mut Container<F>,
    pool: &AtomPool,
    section: DebugSection,
    index: AtomIndex,
    placement: Placement,
    bytes: &[u8],
    terminate_section: bool,
) -> Result<()> {
    let end = pool.end().expect("atom was just placed");
    let needed = u64::from(end) + u64::from(terminate_section);
    container.grow_section(section, needed, false)?;

    if let Placement::Moved { old_off, pad_len } = placement {
        container.write_padding(section, old_off, pad_len)?;
    }

    let atom = pool.get(index);
    let prev_padding = match atom.prev {
        Some(prev_index) => {
            let prev = pool.get(prev_index);
            atom.off - (prev.off + prev.len)
        }
        None => 0,
    };
    let next_padding = match atom.next {
        Some(next_index) => pool.get(next_index).off - (atom.off + atom.len),
        None => 0,
    };
    let trailing_zero = terminate_section && atom.next.is_none();
    container.write_with_padding(section, atom.off, prev_padding, bytes, next_padding, trailing_zero)
}
