//! Packed object and component headers.
//!
//! Every serialized object starts with a single `u32` header that carries
//! the type tag, the format version the payload was written with, and the
//! flags steering reference resolution:
//!
//! ```text
//! bits  0..=19  type tag (20 bits)
//! bit   20      is_reference   — payload participates in identity tracking
//! bit   21      is_null        — no payload follows
//! bit   22      is_back_reference — payload is a varint object id only
//! bit   23      is_extended    — a type-argument name string follows
//! bits 24..=31  version (8 bits)
//! ```
//!
//! Components inside an entity record use a compact form with no flags:
//! a 24-bit tag in the low bits and the version in the high byte.

use super::error::ArchiveError;

/// A registered type's numeric identity in the archive format.
///
/// Tags are stable across builds and versions; they are assigned by hand
/// at registration and never derived from type names or layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(pub u32);

impl TypeTag {
    /// Largest tag representable in a full object header.
    pub const MAX: u32 = 0x000F_FFFF;
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#08x}", self.0)
    }
}

/// Largest tag representable in a compact component header.
pub const COMPONENT_TAG_MAX: u32 = 0x00FF_FFFF;

/// Largest component version. 254 and 255 are reserved so a compact header
/// can never be confused with the all-ones pattern.
pub const COMPONENT_VERSION_MAX: u8 = 253;

const TAG_MASK: u32 = 0x000F_FFFF;
const FLAG_REFERENCE: u32 = 1 << 20;
const FLAG_NULL: u32 = 1 << 21;
const FLAG_BACK_REFERENCE: u32 = 1 << 22;
const FLAG_EXTENDED: u32 = 1 << 23;
const VERSION_SHIFT: u32 = 24;

/// Decoded form of the full object header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub tag: TypeTag,
    pub version: u16,
    pub is_reference: bool,
    pub is_null: bool,
    pub is_back_reference: bool,
    pub is_extended: bool,
}

impl ObjectHeader {
    /// Packs the header into its `u32` wire form.
    ///
    /// Writing is strict: a tag above [`TypeTag::MAX`] or a version outside
    /// `1..=255` is a protocol error, never silently truncated.
    pub fn pack(&self) -> Result<u32, ArchiveError> {
        if self.tag.0 > TypeTag::MAX {
            return Err(ArchiveError::Protocol(format!(
                "type tag {} exceeds the 20-bit header field",
                self.tag
            )));
        }
        if self.version == 0 || self.version > 255 {
            return Err(ArchiveError::Protocol(format!(
                "version {} for tag {} is outside the writable range 1..=255",
                self.version, self.tag
            )));
        }
        let mut raw = self.tag.0 & TAG_MASK;
        if self.is_reference {
            raw |= FLAG_REFERENCE;
        }
        if self.is_null {
            raw |= FLAG_NULL;
        }
        if self.is_back_reference {
            raw |= FLAG_BACK_REFERENCE;
        }
        if self.is_extended {
            raw |= FLAG_EXTENDED;
        }
        raw |= (self.version as u32) << VERSION_SHIFT;
        Ok(raw)
    }

    /// Decodes a header from its wire form. Every bit pattern decodes;
    /// validation (known tag, readable version, flag combinations) happens
    /// against the registry afterwards.
    pub fn unpack(raw: u32) -> Self {
        Self {
            tag: TypeTag(raw & TAG_MASK),
            version: ((raw >> VERSION_SHIFT) & 0xFF) as u16,
            is_reference: raw & FLAG_REFERENCE != 0,
            is_null: raw & FLAG_NULL != 0,
            is_back_reference: raw & FLAG_BACK_REFERENCE != 0,
            is_extended: raw & FLAG_EXTENDED != 0,
        }
    }
}

/// Packs a compact component header: 24-bit tag, version in the top byte.
pub fn pack_component_header(tag: u32, version: u8) -> Result<u32, ArchiveError> {
    if tag > COMPONENT_TAG_MAX {
        return Err(ArchiveError::Protocol(format!(
            "component tag {tag:#08x} exceeds the 24-bit header field"
        )));
    }
    if version == 0 || version > COMPONENT_VERSION_MAX {
        return Err(ArchiveError::Protocol(format!(
            "component version {version} for tag {tag:#08x} is outside 1..={COMPONENT_VERSION_MAX}"
        )));
    }
    Ok((tag & COMPONENT_TAG_MAX) | ((version as u32) << VERSION_SHIFT))
}

/// Splits a compact component header into `(tag, version)`.
pub fn unpack_component_header(raw: u32) -> (u32, u8) {
    (raw & COMPONENT_TAG_MAX, (raw >> VERSION_SHIFT) as u8)
}
