/// A loaded module (executable or DLL) in the host process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub path: String,
    pub base: u64,
    pub size: u64,
}

impl ModuleInfo {
    pub fn end(&self) -> u64 {
        self.base + self.size
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }
}

/// Module boundary queries provided by the host environment.
pub trait ModuleQuery {
    /// The executable the process was started from.
    fn main_module(&self) -> Option<ModuleInfo>;

    fn module_by_name(&self, name: &str) -> Option<ModuleInfo>;

    /// Resolve a module handle (its load address) to its boundaries.
    fn module_by_handle(&self, handle: u64) -> Option<ModuleInfo>;

    fn module_containing(&self, address: u64) -> Option<ModuleInfo>;
}
