//! Method and Assembly Identifiers
//!
//! Host-issued handles are wrapped in distinct types so a method handle can
//! never be passed where an assembly ordinal is expected.

use std::fmt;

/// Opaque per-method handle issued by the host runtime
///
/// Zero is reserved as the empty-slot sentinel of [`IdentifierSet`](super::IdentifierSet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u64);

impl MethodId {
    /// Wrap a raw host handle
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw handle
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether this is the reserved sentinel value
    #[inline]
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Load-order number assigned to an assembly by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssemblyOrdinal(u32);

impl AssemblyOrdinal {
    /// Create a new ordinal
    #[inline]
    #[must_use]
    pub const fn new(ordinal: u32) -> Self {
        Self(ordinal)
    }

    /// Get the inner value
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for AssemblyOrdinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A jitted or inlined method together with its declaring assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodRecord {
    /// Declaring assembly
    pub assembly: AssemblyOrdinal,
    /// Method handle
    pub method: MethodId,
}

impl MethodRecord {
    /// Create a new record
    #[must_use]
    pub const fn new(method: MethodId, assembly: AssemblyOrdinal) -> Self {
        Self { assembly, method }
    }
}

/// A loaded assembly as reported by the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyInfo {
    /// Ordinal that method records refer to
    pub ordinal: AssemblyOrdinal,
    /// Display name
    pub name: String,
    /// Major, minor, build, revision
    pub version: [u16; 4],
    /// File version, if the adapter could read it
    pub file_version: Option<String>,
    /// Path the assembly was loaded from
    pub path: Option<String>,
}

impl AssemblyInfo {
    /// Create assembly info without file metadata
    #[must_use]
    pub fn new(ordinal: AssemblyOrdinal, name: impl Into<String>, version: [u16; 4]) -> Self {
        Self {
            ordinal,
            name: name.into(),
            version,
            file_version: None,
            path: None,
        }
    }

    /// Attach the file version
    #[must_use]
    pub fn with_file_version(mut self, file_version: impl Into<String>) -> Self {
        self.file_version = Some(file_version.into());
        self
    }

    /// Attach the load path
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Dotted four-part version
    #[must_use]
    pub fn version_string(&self) -> String {
        let [major, minor, build, revision] = self.version;
        format!("{major}.{minor}.{build}.{revision}")
    }
}
