//! Typed symbol queries over a loaded PDB.
//!
//! A [`Module`] owns one parsed PDB and materialises the records the query
//! surface needs: the type stream as a light node graph and the global
//! symbol table as owned records. Queries hand out [`Symbol`] values — a sum
//! type over the symbol taxonomy — and projecting a symbol to the wrong
//! variant fails with [`PdbError::BadCast`].

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use log::debug;
use pdb::{FallibleIterator, PrimitiveKind, TypeData, TypeIndex};

pub use pdb::Variant;

use crate::provider::{PdbError, Prov};

/// The flavour of a user-defined type.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum UdtKind {
    Struct,
    Class,
    Union,
    Interface,
}

/// Calling conventions, after the CodeView numbering.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Convention {
    NearC,
    NearPascal,
    NearFast,
    NearStd,
    NearSys,
    Thiscall,
    ClrCall,
    Unknown,
}

impl Convention {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0x00 => Self::NearC,
            0x02 => Self::NearPascal,
            0x04 => Self::NearFast,
            0x07 => Self::NearStd,
            0x09 => Self::NearSys,
            0x0B => Self::Thiscall,
            0x16 => Self::ClrCall,
            _ => Self::Unknown,
        }
    }
}

enum TypeNode {
    Primitive {
        kind: PrimitiveKind,
    },
    Pointer {
        underlying: TypeIndex,
    },
    Modifier {
        underlying: TypeIndex,
    },
    Array {
        element: TypeIndex,
        dimensions: Vec<u32>,
    },
    Procedure {
        return_type: Option<TypeIndex>,
        argument_list: Option<TypeIndex>,
        raw_convention: u8,
    },
    ArgumentList {
        arguments: Vec<TypeIndex>,
    },
    Udt {
        kind: UdtKind,
        name: String,
        size: u64,
        fields: Option<TypeIndex>,
    },
    Enumeration {
        name: String,
        underlying: TypeIndex,
        fields: Option<TypeIndex>,
    },
    FieldList {
        fields: Vec<FieldNode>,
        continuation: Option<TypeIndex>,
    },
    Bitfield {
        underlying: TypeIndex,
        position: u8,
        length: u8,
    },
}

enum FieldNode {
    Member {
        name: String,
        type_index: TypeIndex,
        offset: u64,
    },
    StaticMember {
        name: String,
        type_index: TypeIndex,
    },
    BaseClass {
        base: TypeIndex,
        offset: u32,
    },
    Enumerate {
        name: String,
        value: Variant,
    },
}

struct ProcedureRecord {
    name: String,
    type_index: TypeIndex,
    rva: u32,
}

struct DataRecord {
    name: String,
    type_index: TypeIndex,
    rva: u32,
}

struct ConstantRecord {
    name: String,
    value: Variant,
}

struct PublicRecord {
    name: String,
    rva: u32,
    function: bool,
}

/// A module loaded for symbol queries: one PDB plus an optional load base
/// the addresses are rebased against.
pub struct Module {
    base: u64,
    types: BTreeMap<TypeIndex, TypeNode>,
    procedures: Vec<ProcedureRecord>,
    data: Vec<DataRecord>,
    constants: Vec<ConstantRecord>,
    publics: Vec<PublicRecord>,
}

impl Module {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, PdbError> {
        Self::with_base(path, 0, 0)
    }

    /// Load a PDB and rebase symbol addresses onto `base`.
    pub fn with_base<P: AsRef<Path>>(path: P, base: u64, _size: u32) -> Result<Self, PdbError> {
        Prov::uid()?;

        let file = File::open(path.as_ref())?;
        let mut pdb = pdb::PDB::open(file)?;

        let address_map = pdb.address_map().ok();
        let to_rva = |offset: pdb::PdbInternalSectionOffset| -> u32 {
            address_map
                .as_ref()
                .and_then(|map| offset.to_rva(map))
                .map(|rva| rva.0)
                .unwrap_or(0)
        };

        let mut types = BTreeMap::new();
        let type_information = pdb.type_information()?;
        let mut type_iter = type_information.iter();
        while let Some(item) = type_iter.next()? {
            let index = item.index();
            let parsed = match item.parse() {
                Ok(data) => data,
                Err(_) => continue,
            };

            let node = match parsed {
                TypeData::Primitive(primitive) => TypeNode::Primitive {
                    kind: primitive.kind,
                },
                TypeData::Pointer(pointer) => TypeNode::Pointer {
                    underlying: pointer.underlying_type,
                },
                TypeData::Modifier(modifier) => TypeNode::Modifier {
                    underlying: modifier.underlying_type,
                },
                TypeData::Array(array) => TypeNode::Array {
                    element: array.element_type,
                    dimensions: array.dimensions,
                },
                TypeData::Procedure(procedure) => TypeNode::Procedure {
                    return_type: procedure.return_type,
                    argument_list: Some(procedure.argument_list),
                    raw_convention: procedure.attributes.calling_convention(),
                },
                TypeData::ArgumentList(list) => TypeNode::ArgumentList {
                    arguments: list.arguments,
                },
                TypeData::Class(class) => TypeNode::Udt {
                    kind: match class.kind {
                        pdb::ClassKind::Class => UdtKind::Class,
                        pdb::ClassKind::Struct => UdtKind::Struct,
                        pdb::ClassKind::Interface => UdtKind::Interface,
                    },
                    name: class.name.to_string().into_owned(),
                    size: class.size as u64,
                    fields: class.fields,
                },
                TypeData::Union(union) => TypeNode::Udt {
                    kind: UdtKind::Union,
                    name: union.name.to_string().into_owned(),
                    size: union.size as u64,
                    fields: Some(union.fields),
                },
                TypeData::Enumeration(enumeration) => TypeNode::Enumeration {
                    name: enumeration.name.to_string().into_owned(),
                    underlying: enumeration.underlying_type,
                    fields: Some(enumeration.fields),
                },
                TypeData::FieldList(list) => {
                    let mut fields = Vec::with_capacity(list.fields.len());
                    for field in list.fields {
                        match field {
                            TypeData::Member(member) => fields.push(FieldNode::Member {
                                name: member.name.to_string().into_owned(),
                                type_index: member.field_type,
                                offset: member.offset as u64,
                            }),
                            TypeData::StaticMember(member) => {
                                fields.push(FieldNode::StaticMember {
                                    name: member.name.to_string().into_owned(),
                                    type_index: member.field_type,
                                })
                            }
                            TypeData::BaseClass(base_class) => fields.push(FieldNode::BaseClass {
                                base: base_class.base_class,
                                offset: base_class.offset as u32,
                            }),
                            TypeData::Enumerate(enumerate) => fields.push(FieldNode::Enumerate {
                                name: enumerate.name.to_string().into_owned(),
                                value: enumerate.value,
                            }),
                            _ => {}
                        }
                    }
                    TypeNode::FieldList {
                        fields,
                        continuation: list.continuation,
                    }
                }
                TypeData::Bitfield(bitfield) => TypeNode::Bitfield {
                    underlying: bitfield.underlying_type,
                    position: bitfield.position,
                    length: bitfield.length,
                },
                _ => continue,
            };

            types.insert(index, node);
        }

        let mut procedures = Vec::new();
        let mut data = Vec::new();
        let mut constants = Vec::new();
        let mut publics = Vec::new();

        let symbol_table = pdb.global_symbols()?;
        let mut symbols = symbol_table.iter();
        while let Some(symbol) = symbols.next()? {
            match symbol.parse() {
                Ok(pdb::SymbolData::Procedure(proc)) => procedures.push(ProcedureRecord {
                    name: proc.name.to_string().into_owned(),
                    type_index: proc.type_index,
                    rva: to_rva(proc.offset),
                }),
                Ok(pdb::SymbolData::Data(record)) => data.push(DataRecord {
                    name: record.name.to_string().into_owned(),
                    type_index: record.type_index,
                    rva: to_rva(record.offset),
                }),
                Ok(pdb::SymbolData::Constant(constant)) => constants.push(ConstantRecord {
                    name: constant.name.to_string().into_owned(),
                    value: constant.value,
                }),
                Ok(pdb::SymbolData::Public(public)) => publics.push(PublicRecord {
                    name: public.name.to_string().into_owned(),
                    rva: to_rva(public.offset),
                    function: public.function,
                }),
                _ => {}
            }
        }

        debug!(
            "module loaded: {} types, {} procedures, {} data, {} publics",
            types.len(),
            procedures.len(),
            data.len(),
            publics.len()
        );

        Ok(Self {
            base,
            types,
            procedures,
            data,
            constants,
            publics,
        })
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    fn node(&self, index: TypeIndex) -> Option<&TypeNode> {
        self.types.get(&index)
    }

    // modifiers are transparent for naming, sizing and classification
    fn resolve(&self, index: TypeIndex) -> Option<(TypeIndex, &TypeNode)> {
        let mut current = index;
        for _ in 0..8 {
            match self.node(current)? {
                TypeNode::Modifier { underlying } => current = *underlying,
                node => return Some((current, node)),
            }
        }
        None
    }

    fn type_name(&self, index: TypeIndex) -> String {
        match self.resolve(index) {
            Some((_, TypeNode::Primitive { kind })) => primitive_name(*kind).to_string(),
            Some((_, TypeNode::Pointer { underlying })) => {
                let mut name = self.type_name(*underlying);
                name.push('*');
                name
            }
            Some((_, TypeNode::Array { element, .. })) => {
                let element_name = self.type_name(*element);
                let count = self.array_count(index);
                format!("{}[{}]", element_name, count)
            }
            Some((_, TypeNode::Udt { name, .. })) => name.clone(),
            Some((_, TypeNode::Enumeration { name, .. })) => name.clone(),
            Some((_, TypeNode::Bitfield { underlying, .. })) => self.type_name(*underlying),
            Some((_, TypeNode::Procedure { .. })) => "function".to_string(),
            _ => String::new(),
        }
    }

    fn type_size(&self, index: TypeIndex) -> u64 {
        match self.resolve(index) {
            Some((_, TypeNode::Primitive { kind })) => primitive_size(*kind),
            Some((_, TypeNode::Pointer { .. })) => POINTER_SIZE,
            Some((_, TypeNode::Array { dimensions, .. })) => {
                dimensions.last().copied().unwrap_or(0) as u64
            }
            Some((_, TypeNode::Udt { size, .. })) => *size,
            Some((_, TypeNode::Enumeration { underlying, .. })) => self.type_size(*underlying),
            Some((_, TypeNode::Bitfield { underlying, .. })) => self.type_size(*underlying),
            _ => 0,
        }
    }

    fn array_count(&self, index: TypeIndex) -> u64 {
        let (element, total_bytes) = match self.resolve(index) {
            Some((_, TypeNode::Array {
                element,
                dimensions,
            })) => (
                *element,
                dimensions.last().copied().unwrap_or(0) as u64,
            ),
            _ => return 0,
        };

        let element_size = self.type_size(element);
        if element_size == 0 {
            return 0;
        }
        total_bytes / element_size
    }

    /// Turn a type index into its symbol, if the type stream has it.
    fn type_symbol(&self, index: TypeIndex) -> Option<Symbol<'_>> {
        let (resolved, node) = self.resolve(index)?;

        Some(match node {
            TypeNode::Primitive { kind } => Symbol::Base(BaseSymbol {
                name: primitive_name(*kind),
                size: primitive_size(*kind),
            }),
            TypeNode::Pointer { underlying } => Symbol::Pointer(PointerSymbol {
                module: self,
                underlying: *underlying,
            }),
            TypeNode::Array { .. } => Symbol::Array(ArraySymbol {
                module: self,
                index: resolved,
            }),
            TypeNode::Procedure { .. } => Symbol::Function(FunctionSymbol {
                module: self,
                name: String::new(),
                rva: 0,
                type_index: resolved,
            }),
            TypeNode::Udt { .. } => Symbol::Udt(UdtSymbol {
                module: self,
                index: resolved,
            }),
            TypeNode::Enumeration { .. } => Symbol::Enum(EnumSymbol {
                module: self,
                index: resolved,
            }),
            _ => return None,
        })
    }

    /// Expand a field list (following continuations) into child symbols.
    fn field_symbols(&self, fields: Option<TypeIndex>) -> Vec<Symbol<'_>> {
        let mut out = Vec::new();
        let mut next = fields;

        while let Some(index) = next {
            let (fields, continuation) = match self.node(index) {
                Some(TypeNode::FieldList {
                    fields,
                    continuation,
                }) => (fields, *continuation),
                _ => break,
            };

            for field in fields {
                match field {
                    FieldNode::Member {
                        name,
                        type_index,
                        offset,
                    } => out.push(Symbol::Member(MemberSymbol {
                        module: self,
                        name: name.clone(),
                        type_index: *type_index,
                        offset: *offset,
                    })),
                    FieldNode::StaticMember { name, type_index } => {
                        out.push(Symbol::StaticMember(StaticMemberSymbol {
                            module: self,
                            name: name.clone(),
                            type_index: *type_index,
                            address: None,
                        }))
                    }
                    FieldNode::BaseClass { base, offset } => {
                        out.push(Symbol::BaseClass(BaseClassSymbol {
                            module: self,
                            base: *base,
                            offset: *offset,
                        }))
                    }
                    FieldNode::Enumerate { name, value } => {
                        out.push(Symbol::Constant(ConstantSymbol {
                            name: name.clone(),
                            value: *value,
                        }))
                    }
                }
            }

            next = continuation;
        }

        out
    }

    /// Find a symbol by name: user-defined types and enums first, then
    /// procedures, data, constants and public symbols.
    pub fn find(&self, name: &str) -> Result<Symbol<'_>, PdbError> {
        Prov::uid()?;

        // prefer type definitions over forward references
        let mut fallback = None;
        for (&index, node) in &self.types {
            match node {
                TypeNode::Udt {
                    name: type_name,
                    fields,
                    ..
                } if type_name.as_str() == name => {
                    if fields.is_some() {
                        return Ok(Symbol::Udt(UdtSymbol {
                            module: self,
                            index,
                        }));
                    }
                    fallback.get_or_insert(Symbol::Udt(UdtSymbol {
                        module: self,
                        index,
                    }));
                }
                TypeNode::Enumeration {
                    name: type_name, ..
                } if type_name.as_str() == name => {
                    return Ok(Symbol::Enum(EnumSymbol {
                        module: self,
                        index,
                    }));
                }
                _ => {}
            }
        }
        if let Some(symbol) = fallback {
            return Ok(symbol);
        }

        if let Some(proc) = self.procedures.iter().find(|p| p.name == name) {
            return Ok(Symbol::Function(FunctionSymbol {
                module: self,
                name: proc.name.clone(),
                rva: proc.rva,
                type_index: proc.type_index,
            }));
        }

        if let Some(record) = self.data.iter().find(|d| d.name == name) {
            return Ok(Symbol::StaticMember(StaticMemberSymbol {
                module: self,
                name: record.name.clone(),
                type_index: record.type_index,
                address: Some(self.base + record.rva as u64),
            }));
        }

        if let Some(constant) = self.constants.iter().find(|c| c.name == name) {
            return Ok(Symbol::Constant(ConstantSymbol {
                name: constant.name.clone(),
                value: constant.value,
            }));
        }

        if let Some(public) = self.publics.iter().find(|p| p.name == name) {
            return Ok(Symbol::Public(PublicSymbol {
                name: public.name.clone(),
                address: self.base + public.rva as u64,
                function: public.function,
            }));
        }

        Err(PdbError::SymbolNotFound(name.to_string()))
    }
}

const POINTER_SIZE: u64 = 8;

fn primitive_name(kind: PrimitiveKind) -> &'static str {
    match kind {
        PrimitiveKind::Void => "void",
        PrimitiveKind::Char | PrimitiveKind::RChar => "char",
        PrimitiveKind::UChar => "unsigned char",
        PrimitiveKind::WChar => "wchar_t",
        PrimitiveKind::RChar16 => "char16_t",
        PrimitiveKind::RChar32 => "char32_t",
        PrimitiveKind::I8 => "__int8",
        PrimitiveKind::U8 => "unsigned __int8",
        PrimitiveKind::Short | PrimitiveKind::I16 => "short",
        PrimitiveKind::UShort | PrimitiveKind::U16 => "unsigned short",
        PrimitiveKind::Long => "long",
        PrimitiveKind::ULong => "unsigned long",
        PrimitiveKind::I32 => "int",
        PrimitiveKind::U32 => "unsigned int",
        PrimitiveKind::Quad | PrimitiveKind::I64 => "__int64",
        PrimitiveKind::UQuad | PrimitiveKind::U64 => "unsigned __int64",
        PrimitiveKind::F32 => "float",
        PrimitiveKind::F64 => "double",
        PrimitiveKind::Bool8 => "bool",
        PrimitiveKind::HRESULT => "HRESULT",
        _ => "<unknown>",
    }
}

fn primitive_size(kind: PrimitiveKind) -> u64 {
    match kind {
        PrimitiveKind::Void => 0,
        PrimitiveKind::Char
        | PrimitiveKind::RChar
        | PrimitiveKind::UChar
        | PrimitiveKind::I8
        | PrimitiveKind::U8
        | PrimitiveKind::Bool8 => 1,
        PrimitiveKind::WChar
        | PrimitiveKind::RChar16
        | PrimitiveKind::Short
        | PrimitiveKind::UShort
        | PrimitiveKind::I16
        | PrimitiveKind::U16 => 2,
        PrimitiveKind::RChar32
        | PrimitiveKind::Long
        | PrimitiveKind::ULong
        | PrimitiveKind::I32
        | PrimitiveKind::U32
        | PrimitiveKind::F32
        | PrimitiveKind::HRESULT => 4,
        PrimitiveKind::Quad
        | PrimitiveKind::UQuad
        | PrimitiveKind::I64
        | PrimitiveKind::U64
        | PrimitiveKind::F64 => 8,
        _ => 0,
    }
}

/// One symbol, tagged with its variant.
pub enum Symbol<'m> {
    Base(BaseSymbol),
    Pointer(PointerSymbol<'m>),
    Array(ArraySymbol<'m>),
    Function(FunctionSymbol<'m>),
    FunctionArg(FunctionArgSymbol<'m>),
    Udt(UdtSymbol<'m>),
    Enum(EnumSymbol<'m>),
    BaseClass(BaseClassSymbol<'m>),
    StaticMember(StaticMemberSymbol<'m>),
    Member(MemberSymbol<'m>),
    Constant(ConstantSymbol),
    Public(PublicSymbol),
}

macro_rules! project {
    ($fn_name:ident, $variant:ident, $ty:ty) => {
        pub fn $fn_name(&self) -> Result<&$ty, PdbError> {
            match self {
                Self::$variant(inner) => Ok(inner),
                _ => Err(PdbError::BadCast(format!(
                    "symbol is not {}",
                    stringify!($variant)
                ))),
            }
        }
    };
}

impl<'m> Symbol<'m> {
    pub fn name(&self) -> String {
        match self {
            Self::Base(s) => s.name().to_string(),
            Self::Pointer(s) => s.name(),
            Self::Array(s) => s.name(),
            Self::Function(s) => s.name().to_string(),
            Self::FunctionArg(s) => s.name(),
            Self::Udt(s) => s.name(),
            Self::Enum(s) => s.name(),
            Self::BaseClass(s) => s.name(),
            Self::StaticMember(s) => s.name().to_string(),
            Self::Member(s) => s.name().to_string(),
            Self::Constant(s) => s.name().to_string(),
            Self::Public(s) => s.name().to_string(),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::Base(s) => s.size(),
            Self::Pointer(s) => s.size(),
            Self::Array(s) => s.size(),
            Self::Udt(s) => s.size(),
            Self::Enum(s) => s.size(),
            Self::BaseClass(s) => s.type_size(),
            Self::StaticMember(s) => s.type_size(),
            Self::Member(s) => s.type_size(),
            Self::FunctionArg(s) => s.type_size(),
            _ => 0,
        }
    }

    project!(as_base, Base, BaseSymbol);
    project!(as_pointer, Pointer, PointerSymbol<'m>);
    project!(as_array, Array, ArraySymbol<'m>);
    project!(as_function, Function, FunctionSymbol<'m>);
    project!(as_function_arg, FunctionArg, FunctionArgSymbol<'m>);
    project!(as_udt, Udt, UdtSymbol<'m>);
    project!(as_enum, Enum, EnumSymbol<'m>);
    project!(as_base_class, BaseClass, BaseClassSymbol<'m>);
    project!(as_static_member, StaticMember, StaticMemberSymbol<'m>);
    project!(as_member, Member, MemberSymbol<'m>);
    project!(as_constant, Constant, ConstantSymbol);
    project!(as_public, Public, PublicSymbol);
}

/// A base (primitive) type.
pub struct BaseSymbol {
    name: &'static str,
    size: u64,
}

impl BaseSymbol {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// A pointer type.
pub struct PointerSymbol<'m> {
    module: &'m Module,
    underlying: TypeIndex,
}

impl<'m> PointerSymbol<'m> {
    pub fn name(&self) -> String {
        let mut name = self.module.type_name(self.underlying);
        name.push('*');
        name
    }

    pub fn size(&self) -> u64 {
        POINTER_SIZE
    }

    pub fn points_to(&self) -> Option<Symbol<'m>> {
        self.module.type_symbol(self.underlying)
    }
}

/// An array type.
pub struct ArraySymbol<'m> {
    module: &'m Module,
    index: TypeIndex,
}

impl<'m> ArraySymbol<'m> {
    pub fn name(&self) -> String {
        self.module.type_name(self.index)
    }

    pub fn size(&self) -> u64 {
        self.module.type_size(self.index)
    }

    pub fn count(&self) -> u64 {
        self.module.array_count(self.index)
    }

    pub fn element_type(&self) -> Option<Symbol<'m>> {
        match self.module.node(self.index) {
            Some(TypeNode::Array { element, .. }) => self.module.type_symbol(*element),
            _ => None,
        }
    }
}

/// A function with an address and a signature.
pub struct FunctionSymbol<'m> {
    module: &'m Module,
    name: String,
    rva: u32,
    type_index: TypeIndex,
}

impl<'m> FunctionSymbol<'m> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u64 {
        self.module.base + self.rva as u64
    }

    pub fn convention(&self) -> Convention {
        match self.module.resolve(self.type_index) {
            Some((_, TypeNode::Procedure { raw_convention, .. })) => {
                Convention::from_u8(*raw_convention)
            }
            _ => Convention::Unknown,
        }
    }

    pub fn return_type(&self) -> Option<Symbol<'m>> {
        match self.module.resolve(self.type_index) {
            Some((_, TypeNode::Procedure { return_type, .. })) => {
                self.module.type_symbol((*return_type)?)
            }
            _ => None,
        }
    }

    /// The argument types, in declaration order. Argument names live in the
    /// per-module streams, so the signature carries types only.
    pub fn args(&self) -> Vec<FunctionArgSymbol<'m>> {
        let argument_list = match self.module.resolve(self.type_index) {
            Some((_, TypeNode::Procedure { argument_list, .. })) => *argument_list,
            _ => None,
        };

        let arguments = match argument_list.and_then(|index| self.module.node(index)) {
            Some(TypeNode::ArgumentList { arguments }) => arguments,
            _ => return Vec::new(),
        };

        arguments
            .iter()
            .map(|&type_index| FunctionArgSymbol {
                module: self.module,
                type_index,
            })
            .collect()
    }

    pub fn children(&self) -> Vec<Symbol<'m>> {
        self.args().into_iter().map(Symbol::FunctionArg).collect()
    }
}

/// One argument of a function signature.
pub struct FunctionArgSymbol<'m> {
    module: &'m Module,
    type_index: TypeIndex,
}

impl<'m> FunctionArgSymbol<'m> {
    pub fn name(&self) -> String {
        self.module.type_name(self.type_index)
    }

    pub fn type_size(&self) -> u64 {
        self.module.type_size(self.type_index)
    }

    pub fn arg_type(&self) -> Option<Symbol<'m>> {
        self.module.type_symbol(self.type_index)
    }
}

/// A struct, class, union or interface.
pub struct UdtSymbol<'m> {
    module: &'m Module,
    index: TypeIndex,
}

impl<'m> UdtSymbol<'m> {
    fn fields(&self) -> Option<TypeIndex> {
        match self.module.node(self.index) {
            Some(TypeNode::Udt { fields, .. }) => *fields,
            _ => None,
        }
    }

    pub fn name(&self) -> String {
        self.module.type_name(self.index)
    }

    pub fn size(&self) -> u64 {
        self.module.type_size(self.index)
    }

    pub fn kind(&self) -> UdtKind {
        match self.module.node(self.index) {
            Some(TypeNode::Udt { kind, .. }) => *kind,
            _ => UdtKind::Struct,
        }
    }

    /// Members, static members and base classes, in declaration order.
    pub fn children(&self) -> Vec<Symbol<'m>> {
        self.module.field_symbols(self.fields())
    }

    /// Find a direct child by name.
    pub fn find(&self, name: &str) -> Result<Symbol<'m>, PdbError> {
        self.children()
            .into_iter()
            .find(|child| child.name() == name)
            .ok_or_else(|| PdbError::SymbolNotFound(name.to_string()))
    }
}

/// An enumeration and its enumerators.
pub struct EnumSymbol<'m> {
    module: &'m Module,
    index: TypeIndex,
}

impl<'m> EnumSymbol<'m> {
    pub fn name(&self) -> String {
        self.module.type_name(self.index)
    }

    pub fn size(&self) -> u64 {
        self.module.type_size(self.index)
    }

    pub fn underlying_type(&self) -> Option<Symbol<'m>> {
        match self.module.node(self.index) {
            Some(TypeNode::Enumeration { underlying, .. }) => self.module.type_symbol(*underlying),
            _ => None,
        }
    }

    /// The enumerators, as constants.
    pub fn children(&self) -> Vec<Symbol<'m>> {
        match self.module.node(self.index) {
            Some(TypeNode::Enumeration { fields, .. }) => self.module.field_symbols(*fields),
            _ => Vec::new(),
        }
    }
}

/// A base-class reference inside a UDT.
pub struct BaseClassSymbol<'m> {
    module: &'m Module,
    base: TypeIndex,
    offset: u32,
}

impl<'m> BaseClassSymbol<'m> {
    pub fn name(&self) -> String {
        self.module.type_name(self.base)
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn type_size(&self) -> u64 {
        self.module.type_size(self.base)
    }

    pub fn base_type(&self) -> Option<Symbol<'m>> {
        self.module.type_symbol(self.base)
    }
}

/// Static data: a static member or global variable.
pub struct StaticMemberSymbol<'m> {
    module: &'m Module,
    name: String,
    type_index: TypeIndex,
    address: Option<u64>,
}

impl<'m> StaticMemberSymbol<'m> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Option<u64> {
        self.address
    }

    pub fn type_size(&self) -> u64 {
        self.module.type_size(self.type_index)
    }

    pub fn member_type(&self) -> Option<Symbol<'m>> {
        self.module.type_symbol(self.type_index)
    }
}

/// An instance member of a UDT.
pub struct MemberSymbol<'m> {
    module: &'m Module,
    name: String,
    type_index: TypeIndex,
    offset: u64,
}

impl<'m> MemberSymbol<'m> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn type_size(&self) -> u64 {
        self.module.type_size(self.type_index)
    }

    /// Bit position and width, for bitfield members.
    pub fn bitfield(&self) -> Option<(u8, u8)> {
        match self.module.node(self.type_index) {
            Some(TypeNode::Bitfield {
                position, length, ..
            }) => Some((*position, *length)),
            _ => None,
        }
    }

    pub fn member_type(&self) -> Option<Symbol<'m>> {
        // a bitfield member's interesting type is the underlying one
        match self.module.node(self.type_index) {
            Some(TypeNode::Bitfield { underlying, .. }) => self.module.type_symbol(*underlying),
            _ => self.module.type_symbol(self.type_index),
        }
    }
}

/// A named constant with its value.
pub struct ConstantSymbol {
    name: String,
    value: Variant,
}

impl ConstantSymbol {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Variant {
        self.value
    }
}

/// A public symbol: a mangled name and an address.
pub struct PublicSymbol {
    name: String,
    address: u64,
    function: bool,
}

impl PublicSymbol {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn is_function(&self) -> bool {
        self.function
    }
}

// These exercise the type graph directly over the node map; the load/find
// path against a real PDB lives with the crate-level tests.
#[cfg(test)]
mod tests {
    use super::*;

    const T_INT: TypeIndex = TypeIndex(0x1000);
    const T_PTR: TypeIndex = TypeIndex(0x1001);
    const T_BITS: TypeIndex = TypeIndex(0x1002);
    const T_ARRAY: TypeIndex = TypeIndex(0x1003);
    const T_HEADER: TypeIndex = TypeIndex(0x1004);
    const T_FIELDS: TypeIndex = TypeIndex(0x1005);
    const T_CONTEXT: TypeIndex = TypeIndex(0x1006);
    const T_ENUMERATORS: TypeIndex = TypeIndex(0x1007);
    const T_MODE: TypeIndex = TypeIndex(0x1008);
    const T_ARGS: TypeIndex = TypeIndex(0x1009);
    const T_PROC: TypeIndex = TypeIndex(0x100A);
    const T_CONST_INT: TypeIndex = TypeIndex(0x100B);

    fn test_module() -> Module {
        let mut types = BTreeMap::new();
        types.insert(
            T_INT,
            TypeNode::Primitive {
                kind: PrimitiveKind::I32,
            },
        );
        types.insert(T_PTR, TypeNode::Pointer { underlying: T_INT });
        types.insert(
            T_BITS,
            TypeNode::Bitfield {
                underlying: T_INT,
                position: 3,
                length: 5,
            },
        );
        types.insert(
            T_ARRAY,
            TypeNode::Array {
                element: T_INT,
                dimensions: vec![16],
            },
        );
        types.insert(
            T_HEADER,
            TypeNode::Udt {
                kind: UdtKind::Struct,
                name: "Header".to_string(),
                size: 8,
                fields: None,
            },
        );
        types.insert(
            T_FIELDS,
            TypeNode::FieldList {
                fields: vec![
                    FieldNode::BaseClass {
                        base: T_HEADER,
                        offset: 0,
                    },
                    FieldNode::Member {
                        name: "value".to_string(),
                        type_index: T_INT,
                        offset: 8,
                    },
                    FieldNode::Member {
                        name: "flags".to_string(),
                        type_index: T_BITS,
                        offset: 12,
                    },
                    FieldNode::StaticMember {
                        name: "instances".to_string(),
                        type_index: T_INT,
                    },
                ],
                continuation: None,
            },
        );
        types.insert(
            T_CONTEXT,
            TypeNode::Udt {
                kind: UdtKind::Struct,
                name: "Context".to_string(),
                size: 24,
                fields: Some(T_FIELDS),
            },
        );
        types.insert(
            T_ENUMERATORS,
            TypeNode::FieldList {
                fields: vec![
                    FieldNode::Enumerate {
                        name: "Off".to_string(),
                        value: Variant::U16(0),
                    },
                    FieldNode::Enumerate {
                        name: "On".to_string(),
                        value: Variant::U16(1),
                    },
                ],
                continuation: None,
            },
        );
        types.insert(
            T_MODE,
            TypeNode::Enumeration {
                name: "Mode".to_string(),
                underlying: T_INT,
                fields: Some(T_ENUMERATORS),
            },
        );
        types.insert(
            T_ARGS,
            TypeNode::ArgumentList {
                arguments: vec![T_INT, T_PTR],
            },
        );
        types.insert(
            T_PROC,
            TypeNode::Procedure {
                return_type: Some(T_INT),
                argument_list: Some(T_ARGS),
                raw_convention: 0x0B,
            },
        );
        types.insert(T_CONST_INT, TypeNode::Modifier { underlying: T_INT });

        Module {
            base: 0,
            types,
            procedures: Vec::new(),
            data: Vec::new(),
            constants: Vec::new(),
            publics: Vec::new(),
        }
    }

    #[test]
    fn test_primitive_pointer_and_modifier() {
        let module = test_module();

        let int_type = module.type_symbol(T_INT).unwrap();
        assert_eq!(int_type.name(), "int");
        assert_eq!(int_type.size(), 4);
        assert!(int_type.as_base().is_ok());
        assert!(matches!(int_type.as_udt(), Err(PdbError::BadCast(_))));

        let pointer = module.type_symbol(T_PTR).unwrap();
        let pointer = pointer.as_pointer().unwrap();
        assert_eq!(pointer.name(), "int*");
        assert_eq!(pointer.size(), 8);
        assert!(pointer.points_to().unwrap().as_base().is_ok());

        // modifiers are transparent
        let const_int = module.type_symbol(T_CONST_INT).unwrap();
        assert_eq!(const_int.name(), "int");
        assert!(const_int.as_base().is_ok());
    }

    #[test]
    fn test_array_symbol() {
        let module = test_module();

        let array = module.type_symbol(T_ARRAY).unwrap();
        assert_eq!(array.name(), "int[4]");
        assert_eq!(array.size(), 16);

        let array = array.as_array().unwrap();
        assert_eq!(array.count(), 4);
        assert!(array.element_type().unwrap().as_base().is_ok());
    }

    #[test]
    fn test_udt_children() {
        let module = test_module();

        let context = module.type_symbol(T_CONTEXT).unwrap();
        let udt = context.as_udt().unwrap();
        assert_eq!(udt.name(), "Context");
        assert_eq!(udt.kind(), UdtKind::Struct);
        assert_eq!(udt.size(), 24);

        let children = udt.children();
        assert_eq!(children.len(), 4);

        let header = children[0].as_base_class().unwrap();
        assert_eq!(header.name(), "Header");
        assert_eq!(header.offset(), 0);
        assert_eq!(header.type_size(), 8);
        assert!(header.base_type().unwrap().as_udt().is_ok());

        let value = udt.find("value").unwrap();
        let value = value.as_member().unwrap();
        assert_eq!(value.offset(), 8);
        assert_eq!(value.type_size(), 4);
        assert!(value.bitfield().is_none());

        let flags = udt.find("flags").unwrap();
        let flags = flags.as_member().unwrap();
        assert_eq!(flags.bitfield(), Some((3, 5)));
        assert!(flags.member_type().unwrap().as_base().is_ok());

        let instances = udt.find("instances").unwrap();
        let instances = instances.as_static_member().unwrap();
        assert_eq!(instances.address(), None);
        assert_eq!(instances.type_size(), 4);

        assert!(matches!(
            udt.find("missing"),
            Err(PdbError::SymbolNotFound(_))
        ));
    }

    #[test]
    fn test_enum_symbol() {
        let module = test_module();

        let mode = module.type_symbol(T_MODE).unwrap();
        assert!(matches!(mode.as_function(), Err(PdbError::BadCast(_))));

        let mode = mode.as_enum().unwrap();
        assert_eq!(mode.name(), "Mode");
        assert_eq!(mode.size(), 4);
        assert!(mode.underlying_type().unwrap().as_base().is_ok());

        let enumerators = mode.children();
        assert_eq!(enumerators.len(), 2);

        let on = enumerators[1].as_constant().unwrap();
        assert_eq!(on.name(), "On");
        assert!(matches!(on.value(), Variant::U16(1)));
    }

    #[test]
    fn test_function_signature() {
        let module = test_module();

        let signature = module.type_symbol(T_PROC).unwrap();
        let signature = signature.as_function().unwrap();
        assert_eq!(signature.convention(), Convention::Thiscall);
        assert!(signature.return_type().unwrap().as_base().is_ok());

        let args = signature.args();
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].name(), "int");
        assert_eq!(args[1].name(), "int*");
        assert_eq!(args[0].type_size(), 4);

        let children = signature.children();
        assert_eq!(children.len(), 2);
        assert!(children[0].as_function_arg().is_ok());
    }
}
