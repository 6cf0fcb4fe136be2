//! Owned buffers of registered datatypes

use std::ops::Range;
use std::os::raw::c_void;

use smallvec::SmallVec;

use super::scalar::{Scalar, ValueMode};
use super::TypeDescriptor;
use crate::config::ReportLevel;
use crate::error::Result;
use crate::output::Reporter;

/// A scalar at a byte offset from the datatype's origin.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub scalar: Scalar,
    pub offset: isize,
}

/// Where the scalars of one datatype instance live, relative to its origin.
///
/// `lower_bound` and `upper_bound` follow MPI's definition, so `upper_bound - lower_bound` is
/// the extent and consecutive instances in a buffer are one extent apart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    elements: SmallVec<[Element; 8]>,
    lower_bound: isize,
    upper_bound: isize,
}

impl Layout {
    pub fn new(
        elements: impl IntoIterator<Item = Element>,
        lower_bound: isize,
        upper_bound: isize,
    ) -> Layout {
        let layout = Layout {
            elements: elements.into_iter().collect(),
            lower_bound,
            upper_bound,
        };
        debug_assert!(layout.extent() > 0);
        debug_assert!(layout.elements.iter().all(|e| {
            e.offset >= lower_bound && e.offset + e.scalar.size() as isize <= upper_bound
        }));
        layout
    }

    /// A single predefined scalar
    pub fn scalar(scalar: Scalar) -> Layout {
        Layout::new([Element { scalar, offset: 0 }], 0, scalar.size() as isize)
    }

    /// `count` back-to-back copies of `scalar`, `MPI_Type_contiguous`
    pub fn contiguous(count: usize, scalar: Scalar) -> Layout {
        Layout::vector(1, count, count, scalar)
    }

    /// `MPI_Type_vector`, stride counted in elements
    pub fn vector(count: usize, blocklength: usize, stride: usize, scalar: Scalar) -> Layout {
        Layout::hvector(count, blocklength, (stride * scalar.size()) as isize, scalar)
    }

    /// `MPI_Type_create_hvector`, stride counted in bytes
    pub fn hvector(count: usize, blocklength: usize, stride: isize, scalar: Scalar) -> Layout {
        let size = scalar.size() as isize;
        let elements = (0..count).flat_map(|block| {
            (0..blocklength).map(move |i| Element {
                scalar,
                offset: block as isize * stride + i as isize * size,
            })
        });
        let upper_bound = (count as isize - 1) * stride + blocklength as isize * size;
        Layout::new(elements, 0, upper_bound)
    }

    /// `MPI_Type_create_hindexed`, displacements counted in bytes
    pub fn hindexed(blocklengths: &[usize], displacements: &[isize], scalar: Scalar) -> Layout {
        let size = scalar.size() as isize;
        let elements: SmallVec<[Element; 8]> = blocklengths
            .iter()
            .zip(displacements)
            .flat_map(|(&len, &disp)| {
                (0..len).map(move |i| Element {
                    scalar,
                    offset: disp + i as isize * size,
                })
            })
            .collect();
        let lower_bound = elements.iter().map(|e| e.offset).min().unwrap_or(0);
        let upper_bound = elements.iter().map(|e| e.offset + size).max().unwrap_or(size);
        Layout::new(elements, lower_bound, upper_bound)
    }

    /// `MPI_Type_indexed`, displacements counted in elements
    pub fn indexed(blocklengths: &[usize], displacements: &[usize], scalar: Scalar) -> Layout {
        let bytes: SmallVec<[isize; 8]> = displacements
            .iter()
            .map(|&d| (d * scalar.size()) as isize)
            .collect();
        Layout::hindexed(blocklengths, &bytes, scalar)
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn lower_bound(&self) -> isize {
        self.lower_bound
    }

    pub fn upper_bound(&self) -> isize {
        self.upper_bound
    }

    pub fn extent(&self) -> isize {
        self.upper_bound - self.lower_bound
    }

    /// Bytes of actual data in one instance, what `MPI_Type_size` reports
    pub fn data_size(&self) -> usize {
        self.elements.iter().map(|e| e.scalar.size()).sum()
    }
}

/// A zero-initialized buffer holding `count` instances of a datatype.
///
/// The storage is laid out so that the address MPI sees for instance 0 (`as_ptr`) can be
/// combined with a negative lower bound without stepping outside the allocation. One spare
/// extent is allocated behind the data. Dropping the buffer releases it.
pub struct TypedBuffer {
    bytes: Vec<u8>,
    origin: usize,
    count: usize,
    layout: Layout,
}

impl TypedBuffer {
    /// Allocate `count` instances of `datatype`.
    pub fn alloc(datatype: &TypeDescriptor, count: usize) -> TypedBuffer {
        TypedBuffer::with_layout(datatype.layout().clone(), count)
    }

    pub fn with_layout(layout: Layout, count: usize) -> TypedBuffer {
        let extent = layout.extent() as usize;
        let origin = (-layout.lower_bound()).max(0) as usize;
        let len = origin + layout.lower_bound().max(0) as usize + (count + 1) * extent;
        TypedBuffer {
            bytes: vec![0; len],
            origin,
            count,
            layout,
        }
    }

    /// Number of datatype instances
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Address of instance 0, for passing to MPI
    pub fn as_ptr(&self) -> *const c_void {
        self.bytes[self.origin..].as_ptr() as *const c_void
    }

    /// Address of instance 0, for passing to MPI as a receive buffer
    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        self.bytes[self.origin..].as_mut_ptr() as *mut c_void
    }

    /// Start of the whole allocation, used as the base of RMA windows
    pub fn storage_mut_ptr(&mut self) -> *mut c_void {
        self.bytes.as_mut_ptr() as *mut c_void
    }

    /// Size of the whole allocation in bytes
    pub fn storage_len(&self) -> usize {
        self.bytes.len()
    }

    /// Byte offset of instance 0 from the start of the allocation
    pub fn origin(&self) -> usize {
        self.origin
    }

    fn scalar_range(&self, index: usize, element: &Element) -> Range<usize> {
        assert!(index < self.count, "index {index} out of {} instances", self.count);
        let start = self.origin as isize + index as isize * self.layout.extent() + element.offset;
        let start = start as usize;
        start..start + element.scalar.size()
    }

    /// Set every scalar of instance `index`.
    pub fn set_value(&mut self, index: usize, mode: ValueMode, value: i64) {
        for i in 0..self.layout.elements.len() {
            let element = self.layout.elements[i];
            let range = self.scalar_range(index, &element);
            element.scalar.write(&mut self.bytes[range], mode, value);
        }
    }

    /// Set every scalar of instance `index` to the sum of `values`, see `Scalar::write_sum`.
    pub fn set_sum(&mut self, index: usize, values: &[i64]) {
        for i in 0..self.layout.elements.len() {
            let element = self.layout.elements[i];
            let range = self.scalar_range(index, &element);
            element.scalar.write_sum(&mut self.bytes[range], values.iter().copied());
        }
    }

    /// Data bytes of instance `index`, holes and padding left out.
    pub fn value_bytes(&self, index: usize) -> Vec<u8> {
        self.layout
            .elements
            .iter()
            .flat_map(|e| self.bytes[self.scalar_range(index, e)].iter().copied())
            .collect()
    }

    /// The scalars of instance `index` as numbers, comma separated.
    pub fn decoded(&self, index: usize) -> String {
        self.layout
            .elements
            .iter()
            .map(|e| e.scalar.read_lossy(&self.bytes[self.scalar_range(index, e)]).to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Whether instance `index` equals instance `other_index` of `other`.
    ///
    /// Both buffers must be of the same datatype.
    pub fn value_eq(&self, index: usize, other: &TypedBuffer, other_index: usize) -> bool {
        debug_assert_eq!(self.layout, other.layout);
        self.layout.elements.iter().all(|e| {
            let theirs = &other.bytes[other.scalar_range(other_index, e)];
            &self.bytes[self.scalar_range(index, e)] == theirs
        })
    }

    /// Fill instances `block * n .. (block + 1) * n` with the standard pattern of `rank`:
    /// the type's minimum at local index 0, its maximum at 1, and `rank + i` from 2 on.
    pub fn set_standard_block(&mut self, block: usize, n: usize, rank: i32) {
        for i in 0..n {
            let index = block * n + i;
            match i {
                0 => self.set_value(index, ValueMode::Min, 0),
                1 => self.set_value(index, ValueMode::Max, 0),
                _ => self.set_value(index, ValueMode::Value, rank as i64 + i as i64),
            }
        }
    }

    /// The standard pattern of `rank` over the whole buffer.
    pub fn set_standard_array(&mut self, rank: i32) {
        self.set_standard_block(0, self.count, rank);
    }

    /// Fill every instance `i` with `f(i)`.
    pub fn set_values(&mut self, f: impl Fn(usize) -> i64) {
        for i in 0..self.count {
            self.set_value(i, ValueMode::Value, f(i));
        }
    }

    /// Compare every instance against `expected`, returning the number of mismatches.
    ///
    /// Mismatching instances are hex dumped at report level `Full`.
    pub fn check_against(&self, expected: &TypedBuffer, reporter: &Reporter) -> Result<usize> {
        self.check_block_against(0, expected, reporter)
    }

    fn check_block_against(
        &self,
        block: usize,
        expected: &TypedBuffer,
        reporter: &Reporter,
    ) -> Result<usize> {
        let n = expected.count;
        let dump = reporter.wants(ReportLevel::Full);
        let mut errors = 0;
        for i in 0..n {
            let index = block * n + i;
            if self.value_eq(index, expected, i) {
                continue;
            }
            errors += 1;
            if dump {
                reporter.full(format_args!(
                    "index {index}: expected {}, received {}",
                    expected.decoded(i),
                    self.decoded(index)
                ))?;
                reporter.hex_dump(&format!("index {index} expected"), &expected.value_bytes(i))?;
                reporter.hex_dump(&format!("index {index} received"), &self.value_bytes(index))?;
            }
        }
        Ok(errors)
    }

    /// Check instances `block * n .. (block + 1) * n` against the standard pattern of `rank`.
    pub fn check_standard_block(
        &self,
        block: usize,
        n: usize,
        rank: i32,
        reporter: &Reporter,
    ) -> Result<usize> {
        let mut expected = TypedBuffer::with_layout(self.layout.clone(), n);
        expected.set_standard_array(rank);
        self.check_block_against(block, &expected, reporter)
    }

    /// Check the whole buffer against the standard pattern of `rank`.
    pub fn check_standard_array(&self, rank: i32, reporter: &Reporter) -> Result<usize> {
        self.check_standard_block(0, self.count, rank, reporter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReportLevel;
    use crate::output::tests::Capture;

    fn quiet() -> Reporter {
        Reporter::silent(ReportLevel::Summary)
    }

    fn negative_struct() -> Layout {
        Layout::new(
            [
                Element { scalar: Scalar::Int16, offset: -8 },
                Element { scalar: Scalar::Int64, offset: 0 },
                Element { scalar: Scalar::Float, offset: 8 },
            ],
            -8,
            16,
        )
    }

    #[test]
    fn derived_layouts() {
        let v = Layout::vector(2, 1, 2, Scalar::Int32);
        assert_eq!(v.extent(), 12);
        assert_eq!(v.data_size(), 8);
        assert_eq!(v.elements()[1].offset, 8);

        let idx = Layout::indexed(&[1, 2], &[0, 3], Scalar::Int32);
        let offsets: Vec<_> = idx.elements().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0, 12, 16]);
        assert_eq!(idx.extent(), 20);

        assert_eq!(Layout::contiguous(3, Scalar::Double).extent(), 24);
    }

    #[test]
    fn negative_lower_bound_stays_inside_allocation() {
        let mut buf = TypedBuffer::with_layout(negative_struct(), 4);
        assert_eq!(buf.origin(), 8);
        assert!(buf.storage_len() >= buf.origin() + 4 * 24);
        for i in 0..4 {
            buf.set_value(i, ValueMode::Max, 0);
        }
        // the spare extent behind the data stays untouched
        assert!(buf.bytes[8 + 4 * 24 - 8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn standard_array_round_trip() {
        let layouts = [
            Layout::scalar(Scalar::Int32),
            Layout::vector(2, 1, 2, Scalar::Double),
            negative_struct(),
        ];
        for layout in layouts {
            let mut buf = TypedBuffer::with_layout(layout, 10);
            buf.set_standard_array(3);
            assert_eq!(buf.check_standard_array(3, &quiet()).unwrap(), 0);
        }
    }

    #[test]
    fn wrong_rank_mismatches_from_index_two() {
        let mut buf = TypedBuffer::with_layout(Layout::scalar(Scalar::Int64), 10);
        buf.set_standard_array(1);
        assert_eq!(buf.check_standard_array(2, &quiet()).unwrap(), 8);
    }

    #[test]
    fn standard_blocks_are_independent() {
        let mut buf = TypedBuffer::with_layout(Layout::scalar(Scalar::UInt16), 3 * 5);
        for block in 0..3 {
            buf.set_standard_block(block, 5, block as i32);
        }
        for block in 0..3 {
            assert_eq!(buf.check_standard_block(block, 5, block as i32, &quiet()).unwrap(), 0);
        }
        assert_eq!(buf.check_standard_block(2, 5, 0, &quiet()).unwrap(), 3);
    }

    #[test]
    fn holes_are_ignored() {
        let layout = Layout::vector(2, 1, 2, Scalar::Int32);
        let mut a = TypedBuffer::with_layout(layout.clone(), 1);
        let mut b = TypedBuffer::with_layout(layout, 1);
        a.set_value(0, ValueMode::Value, 7);
        b.set_value(0, ValueMode::Value, 7);
        // scribble over the hole between the two blocks
        a.bytes[a.origin + 4..a.origin + 8].fill(0xff);
        assert!(a.value_eq(0, &b, 0));
    }

    #[test]
    fn set_value_is_reflexive() {
        let mut buf = TypedBuffer::with_layout(negative_struct(), 1);
        buf.set_value(0, ValueMode::Value, 123);
        assert!(buf.value_eq(0, &buf, 0));
    }

    #[test]
    fn mismatches_are_dumped_at_full() {
        let capture = Capture::default();
        let reporter = Reporter::with_writer(ReportLevel::Full, Box::new(capture.clone()));
        let mut buf = TypedBuffer::with_layout(Layout::scalar(Scalar::Int8), 3);
        buf.set_standard_array(0);
        assert_eq!(buf.check_standard_array(1, &reporter).unwrap(), 1);
        let text = capture.text();
        assert!(text.contains("index 2 expected"));
        assert!(text.contains("0000: 03"));
        assert!(text.contains("0000: 02"));
        assert!(text.contains("index 2: expected 3, received 2"));
    }

    #[test]
    fn nothing_is_decoded_below_full() {
        let capture = Capture::default();
        let reporter = Reporter::with_writer(ReportLevel::Run, Box::new(capture.clone()));
        let mut buf = TypedBuffer::with_layout(Layout::scalar(Scalar::Int8), 3);
        buf.set_standard_array(0);
        assert_eq!(buf.check_standard_array(1, &reporter).unwrap(), 1);
        assert!(capture.text().is_empty());
    }

    #[test]
    fn decoded_lists_every_scalar() {
        let mut buf = TypedBuffer::with_layout(negative_struct(), 2);
        buf.set_value(1, ValueMode::Value, -3);
        assert_eq!(buf.decoded(0), "0, 0, 0");
        assert_eq!(buf.decoded(1), "-3, -3, -3");
    }

    #[test]
    fn sums_are_set_per_scalar() {
        let mut buf = TypedBuffer::with_layout(negative_struct(), 1);
        buf.set_sum(0, &[20_000, 20_000]);
        // the Int16 wraps, the Int64 and the Float hold the exact sum
        assert_eq!(buf.decoded(0), "-25536, 40000, 40000");
    }
}
