//! Builds a [`Module`] from a PE image.
//!
//! Loading walks the CLI header, the metadata root and its streams, then the Module,
//! Assembly, TypeDef, MethodDef and NestedClass tables. Every CIL method body is decoded
//! eagerly, with call targets and string literals resolved by [`MetadataResolver`].

use std::collections::HashSet;

use log::debug;

use crate::{
    assembly::TokenResolver,
    file::File,
    metadata::{
        cor20header::{Cor20Header, COR20_HEADER_SIZE},
        method::{MethodBody, MethodImplCodeType, MethodModifiers},
        root::Root,
        streams::{Strings, UserStrings},
        tables::{
            AssemblyRaw, MemberRefRaw, MethodDefRaw, MethodSpecRaw, ModuleRaw, NestedClassRaw,
            TableId, TablesHeader, TypeDefRaw,
        },
        token::Token,
    },
    module::{AssemblyIdentity, MethodDef, Module, TypeDef},
    Error::NotSupported,
    Result,
};

/// Where the CLI header and the metadata live inside an image.
pub(crate) struct MetadataLayout {
    /// File offset of the CLI header
    pub cor20_offset: usize,
    /// The CLI header
    pub cor20: Cor20Header,
    /// File offset of the metadata root
    pub metadata_offset: usize,
    /// The metadata root
    pub root: Root,
}

impl MetadataLayout {
    /// Locate the metadata of `file`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a header is invalid, or
    /// [`crate::Error::NotSupported`] for uncompressed (`#-`) table streams.
    pub fn locate(file: &File) -> Result<MetadataLayout> {
        let (clr_rva, clr_size) = file.clr()?;
        if clr_size < COR20_HEADER_SIZE {
            return Err(malformed_error!("CLR runtime header directory too small - {}", clr_size));
        }

        let cor20_offset = file.rva_to_offset(clr_rva)?;
        let cor20 = Cor20Header::read(file.data_slice(cor20_offset, COR20_HEADER_SIZE)?)?;

        let metadata_offset = file.rva_to_offset(cor20.meta_data_rva as usize)?;
        let root = Root::read(file.data_slice(metadata_offset, cor20.meta_data_size as usize)?)?;

        if root.stream("#-").is_some() {
            return Err(NotSupported);
        }

        Ok(MetadataLayout {
            cor20_offset,
            cor20,
            metadata_offset,
            root,
        })
    }

    /// Returns the bytes of the stream called `name`, if present.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the stream exceeds the metadata block.
    pub fn stream<'a>(&self, file: &'a File, name: &str) -> Result<Option<&'a [u8]>> {
        let Some(header) = self.root.stream(name) else {
            return Ok(None);
        };

        if header.offset as usize + header.size as usize > self.cor20.meta_data_size as usize {
            return Err(out_of_bounds_error!());
        }

        let data = file.data_slice(
            self.metadata_offset + header.offset as usize,
            header.size as usize,
        )?;
        Ok(Some(data))
    }

    /// Returns the bytes of a stream that must be present.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the stream is missing.
    pub fn required_stream<'a>(&self, file: &'a File, name: &str) -> Result<&'a [u8]> {
        self.stream(file, name)?
            .ok_or_else(|| malformed_error!("Metadata has no {} stream", name))
    }
}

/// Resolves instruction operand tokens against the metadata of one image.
pub(crate) struct MetadataResolver<'a> {
    tables: &'a TablesHeader<'a>,
    strings: &'a Strings<'a>,
    user_strings: Option<&'a UserStrings<'a>>,
}

impl TokenResolver for MetadataResolver<'_> {
    fn method_name(&self, token: Token) -> Result<String> {
        let name = match token.table() {
            Token::METHOD_DEF => self.tables.get::<MethodDefRaw>(token.row())?.name,
            Token::MEMBER_REF => self.tables.get::<MemberRefRaw>(token.row())?.name,
            Token::METHOD_SPEC => {
                let spec = self.tables.get::<MethodSpecRaw>(token.row())?;
                if spec.method.token.table() == Token::METHOD_SPEC {
                    return Err(malformed_error!("MethodSpec {} refers to a MethodSpec", token));
                }
                return self.method_name(spec.method.token);
            }
            _ => return Err(malformed_error!("Token {} is not a method", token)),
        };

        Ok(self.strings.get(name as usize)?.to_string())
    }

    fn user_string(&self, token: Token) -> Result<String> {
        match self.user_strings {
            Some(heap) if token.table() == Token::USER_STRING => heap.get(token.row() as usize),
            Some(_) => Err(malformed_error!("Token {} is not a string literal", token)),
            None => Err(malformed_error!("String literal {} without a #US heap", token)),
        }
    }
}

/// Build a [`Module`] from `file`.
pub(crate) fn load(file: File) -> Result<Module> {
    let layout = MetadataLayout::locate(&file)?;
    debug!(
        "Metadata version {} at offset {:#x}, {} streams",
        layout.root.version,
        layout.metadata_offset,
        layout.root.stream_headers.len()
    );

    let tables = TablesHeader::from(layout.required_stream(&file, "#~")?)?;
    let strings = Strings::from(layout.required_stream(&file, "#Strings")?)?;
    let user_strings = match layout.stream(&file, "#US")? {
        Some(data) => Some(UserStrings::from(data)?),
        None => None,
    };

    let resolver = MetadataResolver {
        tables: &tables,
        strings: &strings,
        user_strings: user_strings.as_ref(),
    };

    let name = match tables.rows(TableId::Module) {
        0 => String::new(),
        _ => strings.get(tables.get::<ModuleRaw>(1)?.name as usize)?.to_string(),
    };

    let assembly = match tables.rows(TableId::Assembly) {
        0 => None,
        _ => {
            let row = tables.get::<AssemblyRaw>(1)?;
            #[allow(clippy::cast_possible_truncation)]
            Some(AssemblyIdentity {
                name: strings.get(row.name as usize)?.to_string(),
                version: (
                    row.major_version as u16,
                    row.minor_version as u16,
                    row.build_number as u16,
                    row.revision_number as u16,
                ),
            })
        }
    };

    let nested: HashSet<u32> = tables
        .iter::<NestedClassRaw>()
        .map(|row| row.map(|row| row.nested_class))
        .collect::<Result<_>>()?;

    let type_rows = tables
        .iter::<TypeDefRaw>()
        .collect::<Result<Vec<TypeDefRaw>>>()?;
    let method_count = tables.rows(TableId::MethodDef);

    let mut types = Vec::with_capacity(type_rows.len());
    let mut body_count = 0_usize;
    for (index, row) in type_rows.iter().enumerate() {
        // Methods run up to the next type's list, or to the end of the table
        let first = row.method_list.max(1);
        let end = type_rows
            .get(index + 1)
            .map_or(method_count + 1, |next| next.method_list)
            .min(method_count + 1);

        let mut methods = Vec::new();
        for rid in first..end {
            let method = load_method(&file, &tables, &strings, &resolver, rid)?;
            if method.body().is_some() {
                body_count += 1;
            }
            methods.push(method);
        }

        types.push(TypeDef {
            token: Token::from_parts(Token::TYPE_DEF, row.rid),
            namespace: strings.get(row.type_namespace as usize)?.to_string(),
            name: strings.get(row.type_name as usize)?.to_string(),
            is_nested: nested.contains(&row.rid),
            methods,
        });
    }

    debug!(
        "Loaded '{}': {} types, {} methods, {} bodies",
        name,
        types.len(),
        method_count,
        body_count
    );

    Ok(Module {
        name,
        assembly,
        types,
        image: Some(file),
    })
}

fn load_method(
    file: &File,
    tables: &TablesHeader,
    strings: &Strings,
    resolver: &MetadataResolver,
    rid: u32,
) -> Result<MethodDef> {
    let row = tables.get::<MethodDefRaw>(rid)?;
    let name = strings.get(row.name as usize)?.to_string();

    let modifiers = MethodModifiers::from_method_flags(row.flags);
    let has_il_body = row.rva != 0
        && MethodImplCodeType::from_impl_flags(row.impl_flags) == MethodImplCodeType::IL
        && !modifiers.intersects(MethodModifiers::ABSTRACT | MethodModifiers::PINVOKE_IMPL);

    let body = if has_il_body {
        let offset = file.rva_to_offset(row.rva as usize)?;
        let data = file.data_slice(offset, file.data().len().saturating_sub(offset))?;
        let body = MethodBody::read(data, resolver).map_err(|error| {
            malformed_error!("Method {} (rid {}) has an invalid body - {}", name, rid, error)
        })?;
        Some(body)
    } else {
        None
    };

    let mut method = MethodDef::new(Token::from_parts(Token::METHOD_DEF, rid), name, body);
    method.flags = row.flags;
    method.impl_flags = row.impl_flags;
    method.rva = row.rva;
    Ok(method)
}
