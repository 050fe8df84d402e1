use std::fmt;

/// Page protection value, using the Windows `PAGE_*` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Protection(pub u32);

impl Protection {
    pub const NOACCESS: Self = Self(0x01);
    pub const READONLY: Self = Self(0x02);
    pub const READWRITE: Self = Self(0x04);
    pub const WRITECOPY: Self = Self(0x08);
    pub const EXECUTE: Self = Self(0x10);
    pub const EXECUTE_READ: Self = Self(0x20);
    pub const EXECUTE_READWRITE: Self = Self(0x40);
    pub const EXECUTE_WRITECOPY: Self = Self(0x80);

    /// Touching a guard page raises an exception, so it is neither readable
    /// nor writable until the guard is cleared.
    pub const GUARD: u32 = 0x100;

    /// Modifier bits (guard, nocache, writecombine) outside the access value.
    const MODIFIERS: u32 = Self::GUARD | 0x200 | 0x400;

    pub fn raw(self) -> u32 {
        self.0
    }

    fn access(self) -> u32 {
        self.0 & !Self::MODIFIERS
    }

    pub fn is_guarded(self) -> bool {
        self.0 & Self::GUARD != 0
    }

    pub fn is_readable(self) -> bool {
        !self.is_guarded()
            && matches!(
                Self(self.access()),
                Self::READONLY
                    | Self::READWRITE
                    | Self::WRITECOPY
                    | Self::EXECUTE_READ
                    | Self::EXECUTE_READWRITE
                    | Self::EXECUTE_WRITECOPY
            )
    }

    pub fn is_writable(self) -> bool {
        !self.is_guarded()
            && matches!(
                Self(self.access()),
                Self::READWRITE
                    | Self::WRITECOPY
                    | Self::EXECUTE_READWRITE
                    | Self::EXECUTE_WRITECOPY
            )
    }

    pub fn is_executable(self) -> bool {
        matches!(
            Self(self.access()),
            Self::EXECUTE | Self::EXECUTE_READ | Self::EXECUTE_READWRITE | Self::EXECUTE_WRITECOPY
        )
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match Self(self.access()) {
            Self::NOACCESS => "---",
            Self::READONLY => "r--",
            Self::READWRITE => "rw-",
            Self::WRITECOPY => "rc-",
            Self::EXECUTE => "--x",
            Self::EXECUTE_READ => "r-x",
            Self::EXECUTE_READWRITE => "rwx",
            Self::EXECUTE_WRITECOPY => "rcx",
            _ => return write!(f, "{:#x}", self.0),
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_predicates() {
        assert!(Protection::EXECUTE_READ.is_readable());
        assert!(Protection::EXECUTE_READ.is_executable());
        assert!(!Protection::EXECUTE_READ.is_writable());

        assert!(Protection::EXECUTE_READWRITE.is_writable());
        assert!(!Protection::NOACCESS.is_readable());
        assert!(!Protection::EXECUTE.is_readable());
    }

    #[test]
    fn test_guard_page_is_not_accessible() {
        let guarded = Protection(Protection::READWRITE.raw() | Protection::GUARD);
        assert!(guarded.is_guarded());
        assert!(!guarded.is_readable());
        assert!(!guarded.is_writable());
        assert_eq!(guarded.to_string(), "rw-");
    }

    #[test]
    fn test_other_modifiers_are_ignored() {
        let nocache = Protection(Protection::EXECUTE_READ.raw() | 0x200);
        assert!(!nocache.is_guarded());
        assert!(nocache.is_readable());
        assert!(nocache.is_executable());
    }
}
