//! Elemental values inside datatypes
//!
//! Every registered datatype, however it is composed, bottoms out in a list of scalars of these
//! kinds. Writing and comparing values happens per scalar, which is what lets struct types with
//! padding and vector types with holes be checked byte-exactly.

use mpi::ffi;
use mpi::ffi::MPI_Datatype;

/// How `set_value` chooses the stored value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueMode {
    /// All-zero bytes
    Zero,
    /// The largest representable value
    Max,
    /// The smallest representable value (most negative finite value for floats)
    Min,
    /// The given value, clamped to the representable range
    Value,
}

/// A predefined elemental type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scalar {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
}

macro_rules! scalar_dispatch {
    ($scalar:expr, $t:ident => $body:expr) => {
        match $scalar {
            Scalar::Int8 => { type $t = i8; $body }
            Scalar::UInt8 => { type $t = u8; $body }
            Scalar::Int16 => { type $t = i16; $body }
            Scalar::UInt16 => { type $t = u16; $body }
            Scalar::Int32 => { type $t = i32; $body }
            Scalar::UInt32 => { type $t = u32; $body }
            Scalar::Int64 => { type $t = i64; $body }
            Scalar::UInt64 => { type $t = u64; $body }
            Scalar::Float => { type $t = f32; $body }
            Scalar::Double => { type $t = f64; $body }
        }
    };
}

impl Scalar {
    /// Size in bytes
    pub fn size(self) -> usize {
        scalar_dispatch!(self, T => std::mem::size_of::<T>())
    }

    pub fn is_float(self) -> bool {
        matches!(self, Scalar::Float | Scalar::Double)
    }

    /// Name of the corresponding predefined MPI datatype
    pub fn mpi_name(self) -> &'static str {
        match self {
            Scalar::Int8 => "MPI_INT8_T",
            Scalar::UInt8 => "MPI_UINT8_T",
            Scalar::Int16 => "MPI_INT16_T",
            Scalar::UInt16 => "MPI_UINT16_T",
            Scalar::Int32 => "MPI_INT32_T",
            Scalar::UInt32 => "MPI_UINT32_T",
            Scalar::Int64 => "MPI_INT64_T",
            Scalar::UInt64 => "MPI_UINT64_T",
            Scalar::Float => "MPI_FLOAT",
            Scalar::Double => "MPI_DOUBLE",
        }
    }

    /// The predefined MPI datatype handle
    pub fn as_raw(self) -> MPI_Datatype {
        unsafe {
            match self {
                Scalar::Int8 => ffi::RSMPI_INT8_T,
                Scalar::UInt8 => ffi::RSMPI_UINT8_T,
                Scalar::Int16 => ffi::RSMPI_INT16_T,
                Scalar::UInt16 => ffi::RSMPI_UINT16_T,
                Scalar::Int32 => ffi::RSMPI_INT32_T,
                Scalar::UInt32 => ffi::RSMPI_UINT32_T,
                Scalar::Int64 => ffi::RSMPI_INT64_T,
                Scalar::UInt64 => ffi::RSMPI_UINT64_T,
                Scalar::Float => ffi::RSMPI_FLOAT,
                Scalar::Double => ffi::RSMPI_DOUBLE,
            }
        }
    }

    /// Store a value into the first `size()` bytes of `out`.
    ///
    /// `Value` clamps to the representable range. A floating point zero is stored as all-zero
    /// bytes, the same as `Zero`, so `-0.0` never shows up as a spurious mismatch.
    pub fn write(self, out: &mut [u8], mode: ValueMode, value: i64) {
        let out = &mut out[..self.size()];
        match mode {
            ValueMode::Zero => out.fill(0),
            ValueMode::Max => {
                scalar_dispatch!(self, T => out.copy_from_slice(&T::MAX.to_ne_bytes()))
            }
            ValueMode::Min => {
                scalar_dispatch!(self, T => out.copy_from_slice(&T::MIN.to_ne_bytes()))
            }
            ValueMode::Value if value == 0 => out.fill(0),
            ValueMode::Value => {
                if self.is_float() {
                    scalar_dispatch!(self, T => {
                        let v = (value as f64).clamp(T::MIN as f64, T::MAX as f64) as T;
                        out.copy_from_slice(&v.to_ne_bytes());
                    })
                } else {
                    scalar_dispatch!(self, T => {
                        let v = (value as i128).clamp(T::MIN as i128, T::MAX as i128) as T;
                        out.copy_from_slice(&v.to_ne_bytes());
                    })
                }
            }
        }
    }

    /// Store the sum of `values`, each first clamped the way `Value` stores it.
    ///
    /// The sum is taken in the scalar's own type, so integer sums wrap on overflow the way
    /// `MPI_SUM` does.
    pub fn write_sum(self, out: &mut [u8], values: impl IntoIterator<Item = i64>) {
        let out = &mut out[..self.size()];
        if self.is_float() {
            scalar_dispatch!(self, T => {
                let sum = values.into_iter().fold(0 as T, |acc, value| {
                    acc + (value as f64).clamp(T::MIN as f64, T::MAX as f64) as T
                });
                out.copy_from_slice(&sum.to_ne_bytes());
            })
        } else {
            scalar_dispatch!(self, T => {
                let sum: i128 = values
                    .into_iter()
                    .map(|value| (value as i128).clamp(T::MIN as i128, T::MAX as i128))
                    .sum();
                // truncation is two's complement wrap-around
                out.copy_from_slice(&(sum as T).to_ne_bytes());
            })
        }
    }

    /// Read a scalar back as `f64`, for mismatch reports.
    pub fn read_lossy(self, bytes: &[u8]) -> f64 {
        scalar_dispatch!(self, T => {
            let mut raw = [0u8; std::mem::size_of::<T>()];
            raw.copy_from_slice(&bytes[..std::mem::size_of::<T>()]);
            T::from_ne_bytes(raw) as f64
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(scalar: Scalar, mode: ValueMode, value: i64) -> Vec<u8> {
        let mut buf = vec![0xa5; 8];
        scalar.write(&mut buf, mode, value);
        buf.truncate(scalar.size());
        buf
    }

    #[test]
    fn sizes() {
        assert_eq!(Scalar::Int8.size(), 1);
        assert_eq!(Scalar::UInt16.size(), 2);
        assert_eq!(Scalar::Float.size(), 4);
        assert_eq!(Scalar::UInt64.size(), 8);
    }

    #[test]
    fn value_clamps_to_max() {
        assert_eq!(
            stored(Scalar::Int8, ValueMode::Value, 300),
            stored(Scalar::Int8, ValueMode::Max, 0)
        );
        assert_eq!(
            stored(Scalar::UInt16, ValueMode::Value, i64::MAX),
            stored(Scalar::UInt16, ValueMode::Max, 0)
        );
    }

    #[test]
    fn value_clamps_to_min() {
        assert_eq!(
            stored(Scalar::Int16, ValueMode::Value, -100_000),
            stored(Scalar::Int16, ValueMode::Min, 0)
        );
        assert_eq!(
            stored(Scalar::UInt32, ValueMode::Value, -1),
            stored(Scalar::UInt32, ValueMode::Min, 0)
        );
    }

    #[test]
    fn float_zero_is_zero_bytes() {
        assert_eq!(stored(Scalar::Double, ValueMode::Value, 0), vec![0; 8]);
        assert_eq!(stored(Scalar::Float, ValueMode::Zero, 17), vec![0; 4]);
    }

    #[test]
    fn values_round_trip() {
        assert_eq!(Scalar::Int32.read_lossy(&stored(Scalar::Int32, ValueMode::Value, -42)), -42.0);
        assert_eq!(Scalar::Double.read_lossy(&stored(Scalar::Double, ValueMode::Value, 12)), 12.0);
        assert_eq!(
            Scalar::Float.read_lossy(&stored(Scalar::Float, ValueMode::Min, 0)),
            f32::MIN as f64
        );
    }

    #[test]
    fn sums_wrap_in_the_scalar_type() {
        let sum = |scalar: Scalar, values: &[i64]| {
            let mut buf = vec![0xa5; 8];
            scalar.write_sum(&mut buf, values.iter().copied());
            scalar.read_lossy(&buf)
        };
        assert_eq!(sum(Scalar::Int8, &[100, 100]), -56.0);
        // 300 is stored as 127 before it is added
        assert_eq!(sum(Scalar::Int8, &[300, 1]), -128.0);
        assert_eq!(sum(Scalar::UInt8, &[-5, 3]), 3.0);
        assert_eq!(sum(Scalar::UInt16, &[40_000, 40_000]), 14_464.0);
        assert_eq!(sum(Scalar::Int64, &[i64::MAX, 1]), i64::MIN as f64);
        assert_eq!(sum(Scalar::Float, &[1, 2, 3]), 6.0);
        assert_eq!(sum(Scalar::Double, &[]), 0.0);
    }

    #[test]
    fn write_leaves_trailing_bytes() {
        let mut buf = vec![0xa5; 4];
        Scalar::Int16.write(&mut buf, ValueMode::Value, 1);
        assert_eq!(&buf[2..], &[0xa5, 0xa5]);
    }
}
