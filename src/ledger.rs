//! The failure ledger
//!
//! Records every distinct (communicator, datatype, test, element count) tuple whose run reported
//! mismatching values. Each process keeps its own ledger; there is no merge across processes.

use crate::case::TestRegistry;
use crate::comm::CommRegistry;
use crate::datatype::TypeRegistry;
use crate::error::{Error, Result};
use crate::output::Reporter;

/// Maximum number of distinct failures before the run is aborted
pub const MAX_FAILURES: usize = 1024;

/// One failing triple.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FailureRecord {
    pub comm: usize,
    pub datatype: usize,
    pub test: usize,
    pub values_num: usize,
}

#[derive(Debug, Default)]
pub struct FailureLedger {
    records: Vec<FailureRecord>,
}

impl FailureLedger {
    pub fn new() -> FailureLedger {
        FailureLedger::default()
    }

    /// Append `record` unless it is already present. Returns whether it was new.
    ///
    /// A full ledger is an error: losing failure evidence is worse than stopping.
    pub fn record(&mut self, record: FailureRecord) -> Result<bool> {
        if self.records.contains(&record) {
            return Ok(false);
        }
        if self.records.len() >= MAX_FAILURES {
            return Err(Error::Capacity {
                table: "failure ledger",
                capacity: MAX_FAILURES,
            });
        }
        self.records.push(record);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Print the number of failures and one line per failure.
    pub fn print_summary(
        &self,
        tests: &TestRegistry,
        comms: &CommRegistry,
        types: &TypeRegistry,
        out: &Reporter,
    ) -> Result<()> {
        out.summary(format_args!("Number of failed tests: {}", self.records.len()))?;
        for record in &self.records {
            let test = tests.get(record.test)?;
            out.summary(format_args!(
                "  {} {} on {} with {} ({} values)",
                test.class(),
                test.name(),
                comms.name(record.comm)?,
                types.name(record.datatype)?,
                record.values_num
            ))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{CommClass, CommDescriptor};
    use crate::config::ReportLevel;
    use crate::datatype::{Scalar, TypeDescriptor};
    use crate::output::tests::Capture;

    fn record(test: usize) -> FailureRecord {
        FailureRecord {
            comm: 0,
            datatype: 0,
            test,
            values_num: 10,
        }
    }

    #[test]
    fn duplicates_are_recorded_once() {
        let mut ledger = FailureLedger::new();
        assert!(ledger.record(record(1)).unwrap());
        assert!(!ledger.record(record(1)).unwrap());
        assert!(ledger
            .record(FailureRecord {
                values_num: 11,
                ..record(1)
            })
            .unwrap());
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn overflow_is_fatal() {
        let mut ledger = FailureLedger::new();
        for test in 0..MAX_FAILURES {
            ledger.record(record(test)).unwrap();
        }
        // a duplicate is still fine
        assert!(!ledger.record(record(0)).unwrap());
        assert!(matches!(
            ledger.record(record(MAX_FAILURES)),
            Err(Error::Capacity { .. })
        ));
    }

    #[test]
    fn summary_names_the_triple() {
        let tests = TestRegistry::standard().unwrap();
        let mut comms = CommRegistry::new();
        comms
            .register(CommDescriptor::detached("MPI_COMM_WORLD", CommClass::INTRA, 4))
            .unwrap();
        let mut types = TypeRegistry::new();
        types.register(TypeDescriptor::predefined(Scalar::Int32)).unwrap();

        let mut ledger = FailureLedger::new();
        ledger.record(record(0)).unwrap();
        let capture = Capture::default();
        let out = Reporter::with_writer(ReportLevel::Summary, Box::new(capture.clone()));
        ledger.print_summary(&tests, &comms, &types, &out).unwrap();

        let text = capture.text();
        assert!(text.starts_with("Number of failed tests: 1\n"));
        assert!(text.contains(tests.name(0).unwrap()));
        assert!(text.contains("MPI_COMM_WORLD"));
        assert!(text.contains("MPI_INT32_T"));
    }
}
