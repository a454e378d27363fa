use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;

/// New-type'd intern-pool index identifying a frontend type.
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub struct TypeIndex(pub u32);

impl fmt::Debug for TypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeIndex({:#x})", self.0)
    }
}

/// New-type'd index identifying a frontend declaration.
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub struct DeclIndex(pub u32);

impl fmt::Debug for DeclIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeclIndex({:#x})", self.0)
    }
}

/// The source file a declaration lives in: an absolute directory plus the
/// file's basename. Directory and basename are stored separately because the
/// `.debug_line` prologue tables index them separately.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SourceFile {
    pub directory: PathBuf,
    pub basename: String,
}

/// Function-specific declaration facts needed for the subprogram DIE and the
/// line-number program.
#[derive(Clone, Copy, Debug)]
pub struct FnDebugInfo {
    /// Line offset of the opening brace relative to the declaration line.
    pub lbrace_line: u32,
    /// Line offset of the closing brace relative to the declaration line.
    pub rbrace_line: u32,
    pub return_type: TypeIndex,
}

/// A struct field as the frontend lays it out.
#[derive(Clone, Debug)]
pub struct StructField {
    /// `None` for tuple fields, which are named by their decimal index.
    pub name: Option<String>,
    pub ty: TypeIndex,
    /// Byte offset of the field within the struct.
    pub offset: u64,
    pub has_runtime_bits: bool,
}

#[derive(Clone, Debug)]
pub struct EnumVariant {
    pub name: String,
    /// `None` when the frontend assigned no explicit value; such variants are
    /// numbered sequentially from zero.
    pub value: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct UnionField {
    pub name: String,
    pub ty: TypeIndex,
    pub has_runtime_bits: bool,
}

/// ABI layout of a union as computed by the frontend.
#[derive(Clone, Copy, Debug)]
pub struct UnionLayout {
    pub abi_size: u64,
    pub payload_size: u64,
    pub payload_align: u32,
    pub tag_size: u64,
    pub tag_align: u32,
}

/// Categorical description of a type, with the child type indices the DIE
/// translation needs. Sizes, alignments and names are queried separately.
#[derive(Clone, Debug)]
pub enum TypeShape {
    Void,
    /// A type with no values. Never materialized as a DIE; describing a
    /// value of this type is a frontend bug.
    NoReturn,
    Bool,
    Int { signed: bool },
    /// An optional whose payload is a pointer; represented as a bare address.
    PtrLikeOptional,
    Optional { payload: TypeIndex },
    Pointer { child: TypeIndex },
    /// A pointer-plus-length pair; `ptr` is the intern index of the thin
    /// pointer half.
    Slice { ptr: TypeIndex },
    Array { elem: TypeIndex, len: u64 },
    Struct { fields: Vec<StructField> },
    Enum { variants: Vec<EnumVariant> },
    /// `tag: None` describes an untagged union.
    Union { layout: UnionLayout, tag: Option<TypeIndex>, fields: Vec<UnionField> },
    /// All error-set references resolve to the module-wide error enum, which
    /// is materialized during `flush_module`.
    ErrorSet,
    ErrorUnion { error_set: TypeIndex, payload: TypeIndex },
    PackedStruct,
    /// A category without a DIE translation yet; emitted as an
    /// `unspecified_type` placeholder.
    Opaque,
}

/// `Frontend` is expected to be implemented by users of `balin`, exposing the
/// compiler's type and declaration tables to the emitter without the emitter
/// caching any of it beyond a single declaration update.
pub trait Frontend {
    /// Describe the shape of a type for DIE translation.
    fn type_shape(&self, ty: TypeIndex) -> TypeShape;

    /// Human-readable (fully qualified where applicable) name of a type.
    fn type_name(&self, ty: TypeIndex) -> Cow<'_, str>;

    fn type_abi_size(&self, ty: TypeIndex) -> u64;

    fn type_abi_alignment(&self, ty: TypeIndex) -> u32;

    /// Whether values of the type occupy bits at runtime. Fields and members
    /// of types without runtime bits are omitted from composite DIEs.
    fn type_has_runtime_bits(&self, ty: TypeIndex) -> bool;

    /// The well-known `bool` type, referenced by optional wrappers.
    fn bool_type(&self) -> TypeIndex;

    /// The well-known pointer-sized integer type, referenced by slice length
    /// fields and array dimensions.
    fn usize_type(&self) -> TypeIndex;

    /// The type carrying the ABI size of the module-wide error set.
    fn anyerror_type(&self) -> TypeIndex;

    /// Names of every error in the module-wide error set.
    fn error_names(&self) -> Vec<Cow<'_, str>>;

    /// The numeric value assigned to a member of the module-wide error set.
    fn error_value(&self, name: &str) -> u64;

    /// Fully qualified name of a declaration.
    fn decl_name(&self, decl: DeclIndex) -> Cow<'_, str>;

    /// Zero-based source line of the declaration.
    fn decl_src_line(&self, decl: DeclIndex) -> u32;

    fn decl_file(&self, decl: DeclIndex) -> SourceFile;

    /// Returns `Some` when the declaration is a function body.
    fn decl_fn(&self, decl: DeclIndex) -> Option<FnDebugInfo>;

    /// The value type of a non-function declaration.
    fn decl_type(&self, decl: DeclIndex) -> TypeIndex;
}
