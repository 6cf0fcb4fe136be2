//! Selection of tests, communicators and datatypes
//!
//! A selection string is a comma separated list of entry names and class names, matched without
//! regard to ASCII case. A leading `^` removes instead of adding. Class names are tried first, so
//! a class always wins over an entry of the same name.

use std::fmt;

use crate::case::{Env, TestClass, TestDescriptor, TestRegistry};
use crate::comm::{CommClass, CommDescriptor, CommRegistry};
use crate::config::Strictness;
use crate::datatype::{TypeClass, TypeDescriptor, TypeRegistry};
use crate::error::{Error, Result};
use crate::mask::ClassMask;

/// A registry entries can be selected from.
pub trait Catalog {
    type Class: ClassMask + fmt::Display;

    /// What the entries are called in messages
    const KIND: &'static str;

    fn len(&self) -> usize;

    fn entry_name(&self, id: usize) -> &str;

    fn class_of(&self, id: usize) -> Self::Class;
}

impl Catalog for TestRegistry {
    type Class = TestClass;
    const KIND: &'static str = "test";

    fn len(&self) -> usize {
        self.count()
    }

    fn entry_name(&self, id: usize) -> &str {
        self.get(id).map_or("", TestDescriptor::name)
    }

    fn class_of(&self, id: usize) -> TestClass {
        self.get(id).map_or(TestClass::NONE, TestDescriptor::class)
    }
}

impl Catalog for CommRegistry {
    type Class = CommClass;
    const KIND: &'static str = "communicator";

    fn len(&self) -> usize {
        self.count()
    }

    fn entry_name(&self, id: usize) -> &str {
        self.get(id).map_or("", CommDescriptor::name)
    }

    fn class_of(&self, id: usize) -> CommClass {
        self.get(id).map_or(CommClass::NONE, CommDescriptor::class)
    }
}

impl Catalog for TypeRegistry {
    type Class = TypeClass;
    const KIND: &'static str = "datatype";

    fn len(&self) -> usize {
        self.count()
    }

    fn entry_name(&self, id: usize) -> &str {
        self.get(id).map_or("", TypeDescriptor::name)
    }

    fn class_of(&self, id: usize) -> TypeClass {
        self.get(id).map_or(TypeClass::NONE, TypeDescriptor::class)
    }
}

/// Ordered set of selected ids of one registry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    ids: Vec<usize>,
}

impl Selection {
    pub fn new() -> Selection {
        Selection::default()
    }

    /// Build a selection from command line values.
    ///
    /// Without any adding entry, everything is selected first, so `^Name` alone means "all
    /// but Name".
    pub fn apply<C: Catalog>(catalog: &C, specs: &[String]) -> Result<Selection> {
        let tokens: Vec<&str> = specs
            .iter()
            .flat_map(|spec| spec.split(','))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .collect();

        let mut selection = Selection::new();
        if tokens.iter().all(|token| token.starts_with('^')) {
            selection.select(catalog, "All")?;
        }
        for token in tokens {
            match token.strip_prefix('^') {
                Some(name) => selection.deselect(catalog, name.trim())?,
                None => selection.select(catalog, token)?,
            };
        }
        tracing::info!(kind = C::KIND, selected = selection.len(), "selection ready");
        Ok(selection)
    }

    /// Add the entries `name` denotes, returning how many were new.
    pub fn select<C: Catalog>(&mut self, catalog: &C, name: &str) -> Result<usize> {
        let matching = matching(catalog, name)?;
        let mut added = 0;
        let mut duplicates = 0;
        for id in matching {
            if self.contains(id) {
                duplicates += 1;
            } else {
                self.ids.push(id);
                added += 1;
            }
        }
        if duplicates > 0 && added == 0 {
            tracing::warn!(kind = C::KIND, name, "already selected");
        }
        Ok(added)
    }

    /// Remove the entries `name` denotes, returning how many were present.
    pub fn deselect<C: Catalog>(&mut self, catalog: &C, name: &str) -> Result<usize> {
        let matching = matching(catalog, name)?;
        let before = self.ids.len();
        self.ids.retain(|id| !matching.contains(id));
        Ok(before - self.ids.len())
    }

    pub fn contains(&self, id: usize) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[usize] {
        &self.ids
    }
}

/// Ids of the entries a class or entry name denotes, in registry order.
fn matching<C: Catalog>(catalog: &C, name: &str) -> Result<Vec<usize>> {
    if let Some(class) = C::Class::from_name(name) {
        return Ok((0..catalog.len())
            .filter(|&id| catalog.class_of(id).intersects(class))
            .collect());
    }
    (0..catalog.len())
        .find(|&id| catalog.entry_name(id).eq_ignore_ascii_case(name))
        .map(|id| vec![id])
        .ok_or_else(|| Error::UnknownSelection {
            kind: C::KIND,
            name: name.to_owned(),
        })
}

/// Whether `test` runs on `comm` and `datatype` under the global strictness `mode`.
///
/// Only depends on values that are identical on every process, so all processes skip the same
/// triples.
pub fn applicable(
    test: &TestDescriptor,
    comm: &CommDescriptor,
    datatype: &TypeDescriptor,
    mode: Strictness,
) -> bool {
    mode.permits(test.strictness())
        && test.comm_classes().intersects(comm.class())
        && comm.min_size() >= test.min_comm_size()
        && test.type_classes().intersects(datatype.class())
}

/// `applicable` for the triple of `env`.
pub fn check_run(env: &Env<'_>, mode: Strictness) -> bool {
    applicable(env.test, env.comm, env.datatype, mode)
}

/// Whether the triple of `env` is wrapped in barriers on `MPI_COMM_WORLD`.
pub fn check_sync(env: &Env<'_>) -> bool {
    env.test.needs_sync()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::Fixture;
    use crate::datatype::Scalar;

    fn strings(specs: &[&str]) -> Vec<String> {
        specs.iter().map(|s| s.to_string()).collect()
    }

    fn p2p_ids(registry: &TestRegistry) -> Vec<usize> {
        (0..registry.count())
            .filter(|&id| registry.class(id).unwrap().contains(TestClass::P2P))
            .collect()
    }

    #[test]
    fn class_selects_exactly_its_members() {
        let registry = TestRegistry::standard().unwrap();
        let mut selection = Selection::new();
        selection.select(&registry, "P2P").unwrap();
        assert!(!selection.is_empty());
        assert_eq!(selection.ids(), p2p_ids(&registry).as_slice());
    }

    #[test]
    fn reselection_adds_nothing() {
        let registry = TestRegistry::standard().unwrap();
        let mut selection = Selection::new();
        let first = selection.select(&registry, "p2p").unwrap();
        assert_eq!(selection.select(&registry, "P2P").unwrap(), 0);
        assert_eq!(selection.select(&registry, "ring").unwrap(), 0);
        assert_eq!(selection.len(), first);
    }

    #[test]
    fn names_are_case_insensitive_and_exact() {
        let registry = TestRegistry::standard().unwrap();
        let mut selection = Selection::new();
        assert_eq!(selection.select(&registry, "rInG").unwrap(), 1);
        assert_eq!(registry.name(selection.ids()[0]).unwrap(), "Ring");
        assert!(matches!(
            selection.select(&registry, "Rin"),
            Err(Error::UnknownSelection { kind: "test", .. })
        ));
    }

    #[test]
    fn unknown_names_are_fatal_everywhere() {
        let registry = TestRegistry::standard().unwrap();
        let err = Selection::apply(&registry, &strings(&["Ring,Does not exist"])).unwrap_err();
        assert!(err.to_string().contains("not recognized"));
        assert!(Selection::apply(&registry, &strings(&["^Nope"])).is_err());
    }

    #[test]
    fn deselect_removes() {
        let registry = TestRegistry::standard().unwrap();
        let selection = Selection::apply(&registry, &strings(&["P2P", "^Ring Ssend"])).unwrap();
        assert_eq!(selection.len(), p2p_ids(&registry).len() - 1);
        assert!(selection.ids().iter().all(|&id| registry.name(id).unwrap() != "Ring Ssend"));
    }

    #[test]
    fn deselect_only_starts_from_everything() {
        let registry = TestRegistry::standard().unwrap();
        let selection = Selection::apply(&registry, &strings(&["^Threaded"])).unwrap();
        let threaded = (0..registry.count())
            .filter(|&id| registry.class(id).unwrap().contains(TestClass::THREADED))
            .count();
        assert_eq!(selection.len(), registry.count() - threaded);
    }

    #[test]
    fn empty_selects_all() {
        let registry = TestRegistry::standard().unwrap();
        assert_eq!(Selection::apply(&registry, &[]).unwrap().len(), registry.count());
    }

    #[test]
    fn comm_and_type_classes() {
        let mut comms = CommRegistry::new();
        comms.register(CommDescriptor::detached("MPI_COMM_WORLD", CommClass::INTRA, 4)).unwrap();
        comms.register(CommDescriptor::detached("MPI_COMM_SELF", CommClass::SELF, 1)).unwrap();
        let selection = Selection::apply(&comms, &strings(&["Self"])).unwrap();
        assert_eq!(selection.ids(), &[1]);

        let mut types = TypeRegistry::new();
        types.register(TypeDescriptor::predefined(Scalar::Int8)).unwrap();
        types.register(TypeDescriptor::predefined(Scalar::Double)).unwrap();
        let selection = Selection::apply(&types, &strings(&["std_c_float,MPI_INT8_T"])).unwrap();
        assert_eq!(selection.ids(), &[1, 0]);
    }

    struct Idle;

    impl Fixture for Idle {
        fn run(&mut self, _env: &Env<'_>) -> Result<usize> {
            Ok(0)
        }
    }

    fn idle(_env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        Ok(Box::new(Idle))
    }

    #[test]
    fn minimum_size_boundary() {
        let test = TestDescriptor::new("Pairwise", TestClass::P2P, idle).min_size(2);
        let int = TypeDescriptor::predefined(Scalar::Int32);
        let single = CommDescriptor::detached("one", CommClass::INTRA, 1);
        let pair = CommDescriptor::detached("two", CommClass::INTRA, 2);
        assert!(!applicable(&test, &single, &int, Strictness::Relaxed));
        assert!(applicable(&test, &pair, &int, Strictness::Relaxed));
    }

    #[test]
    fn classes_must_intersect() {
        let test = TestDescriptor::new("Intra only", TestClass::COLL, idle)
            .comms(CommClass::INTRA)
            .types(TypeClass::STD_INT);
        let world = CommDescriptor::detached("world", CommClass::INTRA, 2);
        let inter = CommDescriptor::detached("inter", CommClass::INTER, 2);
        let int = TypeDescriptor::predefined(Scalar::Int32);
        let double = TypeDescriptor::predefined(Scalar::Double);
        assert!(applicable(&test, &world, &int, Strictness::Strict));
        assert!(!applicable(&test, &inter, &int, Strictness::Strict));
        assert!(!applicable(&test, &world, &double, Strictness::Strict));
    }

    #[test]
    fn strictness_gates() {
        let world = CommDescriptor::detached("world", CommClass::INTRA, 2);
        let int = TypeDescriptor::predefined(Scalar::Int32);
        let relaxed =
            TestDescriptor::new("Relaxed", TestClass::ENV, idle).mode(Strictness::Relaxed);
        assert!(applicable(&relaxed, &world, &int, Strictness::Relaxed));
        assert!(applicable(&relaxed, &world, &int, Strictness::Disabled));
        assert!(!applicable(&relaxed, &world, &int, Strictness::Strict));
    }
}
