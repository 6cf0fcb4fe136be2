//! Construction of the registry's derived datatypes

use std::os::raw::c_int;

use memoffset::offset_of;
use mpi::ffi;
use mpi::ffi::MPI_Datatype;
use mpi::{Address, Count};

use super::{Element, Layout, Scalar, TypeClass, TypeDescriptor, TypeHandle};
use crate::check;
use crate::error::Result;

#[repr(C)]
struct IntDouble {
    i: i32,
    d: f64,
}

#[repr(C)]
struct Mixed {
    c: i8,
    s: i16,
    i: i32,
    l: i64,
    f: f32,
    d: f64,
    uc: u8,
}

#[repr(C)]
struct Shifted {
    s: i16,
    l: i64,
    f: f32,
}

fn commit(mut raw: MPI_Datatype) -> Result<TypeHandle> {
    check!(ffi::MPI_Type_commit(&mut raw))?;
    Ok(TypeHandle::Derived(raw))
}

fn contiguous(count: usize, scalar: Scalar) -> Result<TypeDescriptor> {
    let mut raw: MPI_Datatype = scalar.as_raw();
    check!(ffi::MPI_Type_contiguous(count as Count, scalar.as_raw(), &mut raw))?;
    Ok(TypeDescriptor::new(
        format!("MPI_Type_contiguous({count}, {})", scalar.mpi_name()),
        TypeClass::DERIVED,
        commit(raw)?,
        Layout::contiguous(count, scalar),
    ))
}

fn vector(
    count: usize,
    blocklength: usize,
    stride: usize,
    scalar: Scalar,
) -> Result<TypeDescriptor> {
    let mut raw: MPI_Datatype = scalar.as_raw();
    check!(ffi::MPI_Type_vector(
        count as Count,
        blocklength as Count,
        stride as Count,
        scalar.as_raw(),
        &mut raw
    ))?;
    Ok(TypeDescriptor::new(
        format!("MPI_Type_vector({count}, {blocklength}, {stride}, {})", scalar.mpi_name()),
        TypeClass::DERIVED,
        commit(raw)?,
        Layout::vector(count, blocklength, stride, scalar),
    ))
}

fn hvector(
    count: usize,
    blocklength: usize,
    stride: isize,
    scalar: Scalar,
) -> Result<TypeDescriptor> {
    let mut raw: MPI_Datatype = scalar.as_raw();
    check!(ffi::MPI_Type_create_hvector(
        count as Count,
        blocklength as Count,
        stride as Address,
        scalar.as_raw(),
        &mut raw
    ))?;
    Ok(TypeDescriptor::new(
        format!("MPI_Type_create_hvector({count}, {blocklength}, {stride}, {})", scalar.mpi_name()),
        TypeClass::DERIVED,
        commit(raw)?,
        Layout::hvector(count, blocklength, stride, scalar),
    ))
}

fn indexed(
    blocklengths: &[usize],
    displacements: &[usize],
    scalar: Scalar,
) -> Result<TypeDescriptor> {
    let lens: Vec<c_int> = blocklengths.iter().map(|&l| l as c_int).collect();
    let disps: Vec<c_int> = displacements.iter().map(|&d| d as c_int).collect();
    let mut raw: MPI_Datatype = scalar.as_raw();
    check!(ffi::MPI_Type_indexed(
        lens.len() as Count,
        lens.as_ptr(),
        disps.as_ptr(),
        scalar.as_raw(),
        &mut raw
    ))?;
    Ok(TypeDescriptor::new(
        format!("MPI_Type_indexed({blocklengths:?}, {displacements:?}, {})", scalar.mpi_name()),
        TypeClass::DERIVED,
        commit(raw)?,
        Layout::indexed(blocklengths, displacements, scalar),
    ))
}

fn hindexed(
    blocklengths: &[usize],
    displacements: &[isize],
    scalar: Scalar,
) -> Result<TypeDescriptor> {
    let lens: Vec<c_int> = blocklengths.iter().map(|&l| l as c_int).collect();
    let disps: Vec<Address> = displacements.iter().map(|&d| d as Address).collect();
    let mut raw: MPI_Datatype = scalar.as_raw();
    check!(ffi::MPI_Type_create_hindexed(
        lens.len() as Count,
        lens.as_ptr(),
        disps.as_ptr(),
        scalar.as_raw(),
        &mut raw
    ))?;
    Ok(TypeDescriptor::new(
        format!(
            "MPI_Type_create_hindexed({blocklengths:?}, {displacements:?}, {})",
            scalar.mpi_name()
        ),
        TypeClass::DERIVED,
        commit(raw)?,
        Layout::hindexed(blocklengths, displacements, scalar),
    ))
}

/// A struct of single scalars at the given offsets, resized to an explicit lower bound and
/// extent so the result does not depend on the library's alignment padding.
fn structure(
    name: &str,
    fields: &[(Scalar, isize)],
    lower_bound: isize,
    extent: isize,
) -> Result<TypeDescriptor> {
    let lens = vec![1 as c_int; fields.len()];
    let disps: Vec<Address> = fields.iter().map(|&(_, offset)| offset as Address).collect();
    let types: Vec<MPI_Datatype> = fields.iter().map(|&(scalar, _)| scalar.as_raw()).collect();

    let mut plain: MPI_Datatype = unsafe { ffi::RSMPI_DATATYPE_NULL };
    check!(ffi::MPI_Type_create_struct(
        fields.len() as Count,
        lens.as_ptr(),
        disps.as_ptr(),
        types.as_ptr(),
        &mut plain
    ))?;
    let mut resized: MPI_Datatype = unsafe { ffi::RSMPI_DATATYPE_NULL };
    let created = check!(ffi::MPI_Type_create_resized(
        plain,
        lower_bound as Address,
        extent as Address,
        &mut resized
    ));
    check!(ffi::MPI_Type_free(&mut plain))?;
    created?;

    let layout = Layout::new(
        fields.iter().map(|&(scalar, offset)| Element { scalar, offset }),
        lower_bound,
        lower_bound + extent,
    );
    Ok(TypeDescriptor::new(name, TypeClass::STRUCT, commit(resized)?, layout))
}

fn duplicate(scalar: Scalar) -> Result<TypeDescriptor> {
    let mut raw: MPI_Datatype = scalar.as_raw();
    check!(ffi::MPI_Type_dup(scalar.as_raw(), &mut raw))?;
    Ok(TypeDescriptor::new(
        format!("MPI_Type_dup({})", scalar.mpi_name()),
        TypeClass::DUP,
        TypeHandle::Derived(raw),
        Layout::scalar(scalar),
    ))
}

pub(super) fn standard_derived() -> Result<Vec<TypeDescriptor>> {
    let int_double = [
        (Scalar::Int32, offset_of!(IntDouble, i) as isize),
        (Scalar::Double, offset_of!(IntDouble, d) as isize),
    ];
    let mixed = [
        (Scalar::Int8, offset_of!(Mixed, c) as isize),
        (Scalar::Int16, offset_of!(Mixed, s) as isize),
        (Scalar::Int32, offset_of!(Mixed, i) as isize),
        (Scalar::Int64, offset_of!(Mixed, l) as isize),
        (Scalar::Float, offset_of!(Mixed, f) as isize),
        (Scalar::Double, offset_of!(Mixed, d) as isize),
        (Scalar::UInt8, offset_of!(Mixed, uc) as isize),
    ];
    // Origin at the `l` field, so the leading `s` sits at a negative displacement.
    let base = offset_of!(Shifted, l) as isize;
    let shifted = [
        (Scalar::Int16, offset_of!(Shifted, s) as isize - base),
        (Scalar::Int64, 0),
        (Scalar::Float, offset_of!(Shifted, f) as isize - base),
    ];

    Ok(vec![
        duplicate(Scalar::Int32)?,
        contiguous(3, Scalar::Int32)?,
        vector(2, 1, 2, Scalar::Int32)?,
        hvector(2, 1, 16, Scalar::Double)?,
        indexed(&[1, 2], &[0, 3], Scalar::Int32)?,
        hindexed(&[2, 1], &[0, 16], Scalar::Int32)?,
        structure(
            "MPI_Type_create_struct(int32, double)",
            &int_double,
            0,
            std::mem::size_of::<IntDouble>() as isize,
        )?,
        structure(
            "MPI_Type_create_struct(mixed)",
            &mixed,
            0,
            std::mem::size_of::<Mixed>() as isize,
        )?,
        structure(
            "MPI_Type_create_struct(mixed, negative lb)",
            &shifted,
            -base,
            std::mem::size_of::<Shifted>() as isize,
        )?,
    ])
}
