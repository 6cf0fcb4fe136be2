//! The datatype registry
//!
//! Every test runs once per selected datatype. The registry holds the MPI handle of each type
//! together with an independent description of its memory layout, so buffers can be filled and
//! checked without asking MPI how the type looks. At registration both views are compared, which
//! doubles as a check of the library's `MPI_Type_get_extent` and `MPI_Type_size`.
//!
//! Registered, in order: the predefined fixed-width integer and floating point types, a
//! duplicate of `MPI_INT32_T` made with `MPI_Type_dup`, one of each vector-like constructor and
//! three struct types, one of them with a negative lower bound.

use std::os::raw::c_int;

use mpi::ffi;
use mpi::ffi::MPI_Datatype;
use mpi::Address;

use crate::check;
use crate::error::{Error, Result};
use crate::mask::class_mask;

pub mod buffer;
mod derived;
pub mod scalar;

pub use self::buffer::{Element, Layout, TypedBuffer};
pub use self::scalar::{Scalar, ValueMode};

/// Maximum number of registered datatypes
pub const MAX_TYPES: usize = 32;

class_mask! {
    /// Classification of a registered datatype
    pub struct TypeClass {
        /// `MPI_INT8_T`, `MPI_UINT8_T`
        const STD_CHAR = 0, "Std_C_Char";
        /// The wider fixed-width integers
        const STD_INT = 1, "Std_C_Int";
        /// `MPI_FLOAT`, `MPI_DOUBLE`
        const STD_FLOAT = 2, "Std_C_Float";
        /// Contiguous, vector and indexed constructors
        const DERIVED = 3, "Derived";
        /// Struct constructors
        const STRUCT = 4, "Struct";
        /// Made with `MPI_Type_dup`
        const DUP = 5, "Dup";
    }
}

impl TypeClass {
    /// All predefined types
    pub const PREDEFINED: TypeClass = TypeClass(
        TypeClass::STD_CHAR.bits() | TypeClass::STD_INT.bits() | TypeClass::STD_FLOAT.bits(),
    );
}

/// An MPI datatype handle, freed on drop unless it is predefined.
pub enum TypeHandle {
    Predefined(MPI_Datatype),
    Derived(MPI_Datatype),
}

impl TypeHandle {
    pub fn as_raw(&self) -> MPI_Datatype {
        match self {
            TypeHandle::Predefined(raw) | TypeHandle::Derived(raw) => *raw,
        }
    }
}

impl Drop for TypeHandle {
    fn drop(&mut self) {
        if let TypeHandle::Derived(raw) = self {
            unsafe {
                ffi::MPI_Type_free(raw);
            }
        }
    }
}

// Datatype handles are process-wide and immutable once committed.
unsafe impl Send for TypeHandle {}
unsafe impl Sync for TypeHandle {}

/// A registered datatype.
pub struct TypeDescriptor {
    name: String,
    class: TypeClass,
    handle: TypeHandle,
    layout: Layout,
}

impl TypeDescriptor {
    /// Describe a datatype without asking MPI about it.
    pub fn new(
        name: impl Into<String>,
        class: TypeClass,
        handle: TypeHandle,
        layout: Layout,
    ) -> TypeDescriptor {
        TypeDescriptor {
            name: name.into(),
            class,
            handle,
            layout,
        }
    }

    /// A predefined scalar type, classified by its kind.
    pub fn predefined(scalar: Scalar) -> TypeDescriptor {
        let class = match scalar {
            Scalar::Int8 | Scalar::UInt8 => TypeClass::STD_CHAR,
            Scalar::Float | Scalar::Double => TypeClass::STD_FLOAT,
            _ => TypeClass::STD_INT,
        };
        TypeDescriptor::new(
            scalar.mpi_name(),
            class,
            TypeHandle::Predefined(scalar.as_raw()),
            Layout::scalar(scalar),
        )
    }

    /// Compare the layout against what MPI reports for the handle.
    pub fn verify(&self) -> Result<()> {
        let mut lb: Address = 0;
        let mut extent: Address = 0;
        check!(ffi::MPI_Type_get_extent(self.as_raw(), &mut lb, &mut extent))?;
        self.expect("lower bound", self.layout.lower_bound() as i64, lb as i64)?;
        self.expect("extent", self.layout.extent() as i64, extent as i64)?;

        let mut size: c_int = 0;
        check!(ffi::MPI_Type_size(self.as_raw(), &mut size))?;
        self.expect("size", self.layout.data_size() as i64, size as i64)
    }

    fn expect(&self, what: &'static str, expected: i64, actual: i64) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Error::TypeLayout {
                name: self.name.clone(),
                what,
                expected,
                actual,
            })
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> TypeClass {
        self.class
    }

    pub fn as_raw(&self) -> MPI_Datatype {
        self.handle.as_raw()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn lower_bound(&self) -> isize {
        self.layout.lower_bound()
    }

    pub fn upper_bound(&self) -> isize {
        self.layout.upper_bound()
    }

    /// `upper_bound - lower_bound`
    pub fn extent(&self) -> isize {
        self.layout.extent()
    }

    /// Bytes of data per instance
    pub fn data_size(&self) -> usize {
        self.layout.data_size()
    }

    /// Number of scalars per instance
    pub fn element_count(&self) -> usize {
        self.layout.elements().len()
    }
}

/// The table of datatypes every test is combined with.
#[derive(Default)]
pub struct TypeRegistry {
    types: Vec<TypeDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> TypeRegistry {
        TypeRegistry::default()
    }

    /// Construct, commit and verify the standard set of datatypes.
    ///
    /// Must be called after MPI is initialized. Purely local, no collective calls.
    pub fn standard() -> Result<TypeRegistry> {
        let mut registry = TypeRegistry::new();
        for scalar in [
            Scalar::Int8,
            Scalar::UInt8,
            Scalar::Int16,
            Scalar::UInt16,
            Scalar::Int32,
            Scalar::UInt32,
            Scalar::Int64,
            Scalar::UInt64,
            Scalar::Float,
            Scalar::Double,
        ] {
            registry.register(TypeDescriptor::predefined(scalar))?;
        }
        for descriptor in derived::standard_derived()? {
            registry.register(descriptor)?;
        }
        for descriptor in &registry.types {
            descriptor.verify()?;
        }
        tracing::debug!(count = registry.count(), "datatype registry ready");
        Ok(registry)
    }

    /// Append a datatype, returning its id.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Result<usize> {
        if self.types.len() >= MAX_TYPES {
            return Err(Error::Capacity {
                table: "datatype registry",
                capacity: MAX_TYPES,
            });
        }
        self.types.push(descriptor);
        Ok(self.types.len() - 1)
    }

    pub fn count(&self) -> usize {
        self.types.len()
    }

    pub fn get(&self, id: usize) -> Result<&TypeDescriptor> {
        self.types.get(id).ok_or(Error::InvalidId {
            registry: "datatype",
            id,
            count: self.types.len(),
        })
    }

    pub fn extent(&self, id: usize) -> Result<isize> {
        self.get(id).map(TypeDescriptor::extent)
    }

    pub fn class(&self, id: usize) -> Result<TypeClass> {
        self.get(id).map(TypeDescriptor::class)
    }

    pub fn name(&self, id: usize) -> Result<&str> {
        self.get(id).map(TypeDescriptor::name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_classes() {
        assert_eq!(TypeDescriptor::predefined(Scalar::UInt8).class(), TypeClass::STD_CHAR);
        assert_eq!(TypeDescriptor::predefined(Scalar::Int64).class(), TypeClass::STD_INT);
        assert_eq!(TypeDescriptor::predefined(Scalar::Float).class(), TypeClass::STD_FLOAT);
        assert!(TypeClass::PREDEFINED.contains(TypeClass::STD_FLOAT));
        assert!(!TypeClass::PREDEFINED.contains(TypeClass::STRUCT));
    }

    #[test]
    fn extent_is_upper_minus_lower() {
        let descriptor = TypeDescriptor::predefined(Scalar::Double);
        assert_eq!(descriptor.extent(), descriptor.upper_bound() - descriptor.lower_bound());
        assert_eq!(descriptor.extent(), 8);
        assert_eq!(descriptor.element_count(), 1);
    }

    #[test]
    fn lookups_check_ids() {
        let mut registry = TypeRegistry::new();
        let id = registry.register(TypeDescriptor::predefined(Scalar::Int32)).unwrap();
        assert_eq!(registry.name(id).unwrap(), "MPI_INT32_T");
        assert_eq!(registry.extent(id).unwrap(), 4);
        assert!(matches!(registry.get(1), Err(Error::InvalidId { id: 1, count: 1, .. })));
    }

    #[test]
    fn registry_capacity_is_fatal() {
        let mut registry = TypeRegistry::new();
        for _ in 0..MAX_TYPES {
            registry.register(TypeDescriptor::predefined(Scalar::Int8)).unwrap();
        }
        assert!(matches!(
            registry.register(TypeDescriptor::predefined(Scalar::Int8)),
            Err(Error::Capacity { .. })
        ));
    }
}
