use bitflags::bitflags;

/// Mask for the code type bits of `MethodImplAttributes`
pub const METHOD_IMPL_CODE_TYPE_MASK: u32 = 0x0003;

bitflags! {
    #[derive(PartialEq, Eq, Debug, Clone, Copy)]
    /// Code type of a method implementation
    pub struct MethodImplCodeType: u32 {
        /// Method implementation is CIL
        const IL = 0x0000;
        /// Method implementation is native
        const NATIVE = 0x0001;
        /// Reserved
        const OPTIL = 0x0002;
        /// Method implementation is provided by the runtime
        const RUNTIME = 0x0003;
    }
}

impl MethodImplCodeType {
    /// Extract the code type from raw `ImplFlags`.
    #[must_use]
    pub fn from_impl_flags(flags: u32) -> Self {
        Self::from_bits_truncate(flags & METHOD_IMPL_CODE_TYPE_MASK)
    }
}

bitflags! {
    #[derive(PartialEq, Eq, Debug, Clone, Copy)]
    /// Method attributes that decide whether a method carries a CIL body
    pub struct MethodModifiers: u32 {
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Implementation is forwarded through PInvoke
        const PINVOKE_IMPL = 0x2000;
    }
}

impl MethodModifiers {
    /// Extract the modifiers from raw method `Flags`.
    #[must_use]
    pub fn from_method_flags(flags: u32) -> Self {
        Self::from_bits_truncate(flags)
    }
}

bitflags! {
    #[derive(PartialEq, Eq, Debug, Clone, Copy)]
    /// Method body header flags
    pub struct MethodBodyFlags: u16 {
        /// Tiny method header format
        const TINY_FORMAT = 0x2;
        /// Fat method header format
        const FAT_FORMAT = 0x3;
        /// More data sections follow the code
        const MORE_SECTS = 0x8;
        /// Call the default constructor on all local variables
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    #[derive(PartialEq, Eq, Debug, Clone, Copy)]
    /// Method data section flags
    pub struct SectionFlags: u8 {
        /// Exception handling data
        const EHTABLE = 0x1;
        /// Reserved, must be 0
        const OPT_ILTABLE = 0x2;
        /// Data section uses the fat format
        const FAT_FORMAT = 0x40;
        /// Another data section follows
        const MORE_SECTS = 0x80;
    }
}
