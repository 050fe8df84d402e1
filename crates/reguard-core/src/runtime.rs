//! Host engine services used by the bypass.
//!
//! The game's managed runtime (type database, singletons, per-frame
//! application entries) is owned by the host. Handles are raw pointer values
//! the host hands out; zero never appears, absence is `None`.

/// Opaque handle to a host runtime object.
pub type Handle = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    /// Name hash as computed by the host.
    pub hash: u64,
    /// Native entry point, if the method was compiled.
    pub entry: Option<u64>,
}

pub trait TypeDatabase {
    /// Type definition by hashed full name.
    fn find_type(&self, fqn_hash: u32) -> Option<Handle>;

    fn methods(&self, ty: Handle) -> Vec<MethodInfo>;

    /// Type of a managed object. `None` when the object header, its type info
    /// or its class info is missing.
    fn object_type(&self, object: Handle) -> Option<Handle>;

    fn find_field(&self, ty: Handle, name: &str) -> Option<Handle>;

    /// Raw field bytes. `bypass_accessor` reads the backing storage directly
    /// instead of going through a property accessor.
    fn read_field(&self, object: Handle, field: Handle, len: usize, bypass_accessor: bool) -> Option<Vec<u8>>;

    /// Returns whether the write happened.
    fn write_field(&self, object: Handle, field: Handle, bytes: &[u8], bypass_accessor: bool) -> bool;

    fn find_method_by_hash(&self, ty: Handle, hash: u64) -> Option<MethodInfo> {
        self.methods(ty).into_iter().find(|m| m.hash == hash)
    }
}

pub trait SingletonLocator {
    /// Live instance of a managed singleton, or `None` outside of gameplay.
    fn managed_singleton(&self, name: &str) -> Option<Handle>;
}

pub trait ApplicationEntries {
    /// Stop the host from running a per-frame application entry.
    fn ignore_application_entry(&self, hash: u64);
}

/// Everything the bypass needs from the host.
pub trait Runtime: TypeDatabase + SingletonLocator + ApplicationEntries {}

impl<T: TypeDatabase + SingletonLocator + ApplicationEntries> Runtime for T {}
