use std::fmt;

use hashbrown::HashMap;

/// New-type'd offset into the `.debug_str` section, suitable for
/// `DW_FORM_strp` fields.
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub(crate) struct StrOffset(pub(crate) u32);

impl fmt::Debug for StrOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StrOffset({:#x})", self.0)
    }
}

/// Accumulates the `.debug_str` section.
///
/// Offsets handed out by `get_or_insert` are stable for the lifetime of the
/// emitter, so `DW_FORM_strp` fields written into `.debug_info` never need
/// revisiting when the pool grows. The pool only ever appends; the whole
/// section is rewritten through the container whenever the dirty bit is set.
pub(crate) struct StringTable {
    data: Vec<u8>,
    strings: HashMap<Vec<u8>, StrOffset>,
    dirty: bool,
}

impl StringTable {
    pub(crate) fn new() -> Self {
        Self { data: Vec::new(), strings: HashMap::new(), dirty: false }
    }

    /// Insert a string into the pool and return its offset. If the string is
    /// already in the pool, returns the existing offset.
    pub(crate) fn get_or_insert(&mut self, bytes: &[u8]) -> StrOffset {
        debug_assert!(!bytes.contains(&0));
        if let Some(offset) = self.strings.get(bytes) {
            return *offset;
        }

        // Keep track of the offset for this string, the next declaration may
        // reference it too.
        let offset = StrOffset(self.data.len().try_into().expect("string pool larger than u32"));
        self.strings.insert(bytes.into(), offset);

        self.data.extend_from_slice(bytes);
        self.data.push(0);
        self.dirty = true;

        offset
    }

    /// Returns the accumulated `.debug_str` contents.
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns whether the pool grew since the last call, clearing the flag.
    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduplicates_by_content() {
        let mut table = StringTable::new();
        let a = table.get_or_insert(b"anyerror");
        let b = table.get_or_insert(b"usize");
        let c = table.get_or_insert(b"anyerror");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(table.bytes(), b"anyerror\0usize\0");
    }

    #[test]
    fn offsets_point_at_nul_terminated_strings() {
        let mut table = StringTable::new();
        table.get_or_insert(b"main");
        let off = table.get_or_insert(b"entry").0 as usize;
        let bytes = table.bytes();
        let end = off + bytes[off..].iter().position(|&b| b == 0).unwrap();
        assert_eq!(&bytes[off..end], b"entry");
    }

    #[test]
    fn dirty_flag_tracks_growth() {
        let mut table = StringTable::new();
        assert!(!table.take_dirty());
        table.get_or_insert(b"f");
        assert!(table.take_dirty());
        table.get_or_insert(b"f");
        assert!(!table.take_dirty());
    }
}
