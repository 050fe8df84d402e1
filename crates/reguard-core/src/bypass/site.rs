use serde::Serialize;
use strum::Display;

use crate::scan::PatternSpec;

/// One logical check to neutralize, with every known way of finding it.
#[derive(Debug, Clone)]
pub struct CheckSite {
    pub name: String,
    /// Tried in order; the first that yields an address wins.
    pub locators: Vec<Locator>,
    pub action: SiteAction,
}

impl CheckSite {
    pub fn new(name: &str, locators: Vec<Locator>, action: SiteAction) -> Self {
        Self {
            name: name.to_string(),
            locators,
            action,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Locator {
    /// `match + offset`.
    Pattern(PatternSpec),
    /// Start of the function around `match + offset`.
    FunctionOf(PatternSpec),
    /// Target of the rel32 operand at `match + offset`.
    CallTarget(PatternSpec),
    /// Start of the first function that uses a 32-bit constant.
    ConstantUsers(u32),
    /// Nearest `pattern` match within `window` bytes before `anchor`.
    ReverseFrom {
        anchor: PatternSpec,
        window: usize,
        pattern: PatternSpec,
    },
    /// Nearest conditional branch decoded backward from `anchor`.
    BranchBehind(PatternSpec),
}

impl Locator {
    pub fn patterns(&self) -> Vec<&PatternSpec> {
        match self {
            Locator::Pattern(spec)
            | Locator::FunctionOf(spec)
            | Locator::CallTarget(spec)
            | Locator::BranchBehind(spec) => vec![spec],
            Locator::ReverseFrom {
                anchor, pattern, ..
            } => vec![anchor, pattern],
            Locator::ConstantUsers(_) => Vec::new(),
        }
    }

    /// Same kind of lookup driven by another pattern. Used for user-supplied
    /// candidates, which only make sense for single-pattern locators.
    pub fn with_pattern(&self, spec: PatternSpec) -> Locator {
        match self {
            Locator::FunctionOf(_) => Locator::FunctionOf(spec),
            Locator::CallTarget(_) => Locator::CallTarget(spec),
            Locator::BranchBehind(_) => Locator::BranchBehind(spec),
            _ => Locator::Pattern(spec),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteAction {
    Write(Vec<i16>),
    /// Turn the conditional branch at the site into an unconditional jump to
    /// its taken target.
    ForceJump,
}

/// Patch a reflected method found by type and name hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodPatch {
    pub type_hash: u32,
    pub method_hash: u64,
    /// Patch the target of the first `call` in the method instead of the
    /// method itself.
    pub through_call: bool,
}

impl MethodPatch {
    pub fn entry(type_hash: u32, method_hash: u64) -> Self {
        Self {
            type_hash,
            method_hash,
            through_call: false,
        }
    }

    pub fn first_call(type_hash: u32, method_hash: u64) -> Self {
        Self {
            type_hash,
            method_hash,
            through_call: true,
        }
    }

    pub fn name(&self) -> String {
        format!("method {:08x}:{:016x}", self.type_hash, self.method_hash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum SiteStatus {
    NotScanned,
    Scanning,
    /// Located, and every patch for it applied.
    Patched,
    /// Located, but at least one of its patches could not be applied.
    PartiallyPatched,
    NotFound,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteReport {
    pub name: String,
    pub status: SiteStatus,
    /// Addresses located, patched or not.
    pub matches: usize,
    pub patched: Vec<u64>,
    pub errors: Vec<String>,
}

impl SiteReport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: SiteStatus::NotScanned,
            matches: 0,
            patched: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Settle the status once scanning is over.
    pub fn finish(&mut self) {
        self.status = if self.matches == 0 {
            SiteStatus::NotFound
        } else if self.errors.is_empty() && !self.patched.is_empty() {
            SiteStatus::Patched
        } else {
            SiteStatus::PartiallyPatched
        };
    }
}
