//! Demo driver for the `balin` emitter: runs a synthetic two-function module
//! through the incremental pipeline and wraps the resulting debug sections in
//! a relocatable ELF object, so the output can be inspected with the usual
//! tools (`readelf --debug-dump`, `llvm-dwarfdump`).

use std::borrow::Cow;
use std::io;
use std::path::PathBuf;

use balin::{
    Container, DebugSection, DeclIndex, Dwarf, DwarfConfig, FnDebugInfo, Frontend, Location,
    PtrWidth, RunTimeEndian, SourceFile, TypeIndex, TypeShape,
};
use object::write::Object;
use object::{Architecture, BinaryFormat, Endianness, SectionKind};
use structopt::StructOpt;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};
use tracing_tree::HierarchicalLayer;

#[derive(Debug, Error)]
enum Error {
    #[error("Failed to emit output object")]
    EmitOutputObject(#[source] object::write::Error),
    #[error("Failed to write output object `{1}`")]
    WriteOutputFile(#[source] io::Error, String),

    #[error(transparent)]
    Balin(#[from] balin::Error),
}

#[derive(Debug, StructOpt)]
#[structopt(name = "balin", about = "emit a sample object with incremental dwarf")]
struct Opt {
    /// Specify path to write the object file to
    #[structopt(short = "o", long = "output", parse(from_os_str), default_value = "demo.o")]
    output: PathBuf,
}

/// A miniature frontend: a few base types, two functions, and one global,
/// enough to exercise type interning, locals, globals, and the line program.
struct DemoFrontend;

const VOID: TypeIndex = TypeIndex(0);
const BOOL: TypeIndex = TypeIndex(1);
const USIZE: TypeIndex = TypeIndex(2);
const U32: TypeIndex = TypeIndex(3);
const ANYERROR: TypeIndex = TypeIndex(4);

const MAIN: DeclIndex = DeclIndex(0);
const CHECK: DeclIndex = DeclIndex(1);
const COUNTER: DeclIndex = DeclIndex(2);

impl Frontend for DemoFrontend {
    fn type_shape(&self, ty: TypeIndex) -> TypeShape {
        match ty {
            VOID => TypeShape::Void,
            BOOL => TypeShape::Bool,
            USIZE | U32 => TypeShape::Int { signed: false },
            ANYERROR => TypeShape::ErrorSet,
            _ => TypeShape::Opaque,
        }
    }

    fn type_name(&self, ty: TypeIndex) -> Cow<'_, str> {
        Cow::Borrowed(match ty {
            VOID => "void",
            BOOL => "bool",
            USIZE => "usize",
            U32 => "u32",
            ANYERROR => "anyerror",
            _ => "anyopaque",
        })
    }

    fn type_abi_size(&self, ty: TypeIndex) -> u64 {
        match ty {
            VOID => 0,
            BOOL => 1,
            USIZE => 8,
            U32 => 4,
            ANYERROR => 2,
            _ => 0,
        }
    }

    fn type_abi_alignment(&self, ty: TypeIndex) -> u32 {
        self.type_abi_size(ty).max(1) as u32
    }

    fn type_has_runtime_bits(&self, ty: TypeIndex) -> bool {
        self.type_abi_size(ty) > 0
    }

    fn bool_type(&self) -> TypeIndex {
        BOOL
    }

    fn usize_type(&self) -> TypeIndex {
        USIZE
    }

    fn anyerror_type(&self) -> TypeIndex {
        ANYERROR
    }

    fn error_names(&self) -> Vec<Cow<'_, str>> {
        vec![Cow::Borrowed("OutOfMemory"), Cow::Borrowed("InvalidInput")]
    }

    fn error_value(&self, name: &str) -> u64 {
        match name {
            "OutOfMemory" => 1,
            "InvalidInput" => 2,
            _ => 0,
        }
    }

    fn decl_name(&self, decl: DeclIndex) -> Cow<'_, str> {
        Cow::Borrowed(match decl {
            MAIN => "demo.main",
            CHECK => "demo.check",
            _ => "demo.counter",
        })
    }

    fn decl_src_line(&self, decl: DeclIndex) -> u32 {
        match decl {
            MAIN => 2,
            CHECK => 9,
            _ => 1,
        }
    }

    fn decl_file(&self, _decl: DeclIndex) -> SourceFile {
        SourceFile { directory: PathBuf::from("/src/demo"), basename: "demo.x".to_string() }
    }

    fn decl_fn(&self, decl: DeclIndex) -> Option<FnDebugInfo> {
        match decl {
            MAIN => Some(FnDebugInfo { lbrace_line: 0, rbrace_line: 4, return_type: VOID }),
            CHECK => Some(FnDebugInfo { lbrace_line: 0, rbrace_line: 2, return_type: BOOL }),
            _ => None,
        }
    }

    fn decl_type(&self, decl: DeclIndex) -> TypeIndex {
        if decl == COUNTER {
            U32
        } else {
            VOID
        }
    }
}

/// Emit one function: prologue, a few rows walking to the closing brace, a
/// couple of locals.
fn emit_function(
    dwarf: &mut Dwarf,
    container: &mut Container<balin::NoObjectFile>,
    frontend: &DemoFrontend,
    decl: DeclIndex,
    addr: u64,
    size: u64,
) -> Result<(), Error> {
    let func = frontend.decl_fn(decl).expect("demo declarations are functions");
    let mut state = dwarf.init_decl_state(frontend, decl)?;
    state.set_prologue_end()?;

    let rows = u64::from(func.rbrace_line).max(1);
    for _ in 0..rows {
        state.advance_pc_and_line(1, size / rows)?;
    }
    state.set_epilogue_begin()?;

    state.gen_arg_dbg_info(frontend, "n", U32, Location::Register(5))?;
    state.gen_var_dbg_info(frontend, "count", USIZE, Location::FrameOffset { reg: 6, offset: -16 })?;
    state.gen_var_dbg_info(frontend, "err", ANYERROR, Location::Register(0))?;

    dwarf.commit_decl_state(frontend, container, decl, addr, size, state)?;
    Ok(())
}

fn main() -> Result<(), Error> {
    let subscriber = Registry::default().with(EnvFilter::from_env("BALIN_LOG")).with(
        HierarchicalLayer::default()
            .with_writer(io::stderr)
            .with_indent_lines(true)
            .with_targets(true)
            .with_indent_amount(2),
    );
    tracing::subscriber::set_global_default(subscriber).expect("failed to set subscriber");

    let opt = Opt::from_args();
    debug!(?opt);

    let frontend = DemoFrontend;
    let mut dwarf = Dwarf::new(DwarfConfig {
        endian: target_endian(),
        ptr_width: PtrWidth::P64,
        module_name: "demo".to_string(),
        comp_dir: "/src/demo".to_string(),
        producer: concat!("balin ", env!("CARGO_PKG_VERSION")).to_string(),
    });
    let mut container = Container::wasm();

    emit_function(&mut dwarf, &mut container, &frontend, MAIN, 0x1000, 64)?;
    emit_function(&mut dwarf, &mut container, &frontend, CHECK, 0x1080, 32)?;
    // A module-scope global: no line program, just a variable DIE whose
    // address is patched at commit.
    let state = dwarf.init_decl_state(&frontend, COUNTER)?;
    dwarf.commit_decl_state(&frontend, &mut container, COUNTER, 0x2000, 4, state)?;
    // Re-run one update the way an incremental edit would; the sections must
    // come out byte-identical.
    emit_function(&mut dwarf, &mut container, &frontend, MAIN, 0x1000, 64)?;

    dwarf.write_dbg_abbrev(&mut container)?;
    dwarf.flush_module(&frontend, &mut container)?;
    dwarf.write_dbg_info_header(&mut container, 0x1000, 0x10a0)?;
    dwarf.write_dbg_aranges(&mut container, 0x1000, 0xa0)?;
    dwarf.write_dbg_line_header(&mut container)?;

    let Container::Wasm(sections) = container else { unreachable!() };
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    for section in [
        DebugSection::Info,
        DebugSection::Abbrev,
        DebugSection::Line,
        DebugSection::Aranges,
        DebugSection::Str,
    ] {
        let id = obj.add_section(
            Vec::new(),
            section.gimli_id().name().as_bytes().to_vec(),
            SectionKind::Debug,
        );
        obj.append_section_data(id, sections.section(section), 1);
    }

    let bytes = obj.write().map_err(Error::EmitOutputObject)?;
    std::fs::write(&opt.output, bytes)
        .map_err(|e| Error::WriteOutputFile(e, opt.output.display().to_string()))?;
    Ok(())
}

fn target_endian() -> RunTimeEndian {
    if cfg!(target_endian = "big") {
        RunTimeEndian::Big
    } else {
        RunTimeEndian::Little
    }
}
