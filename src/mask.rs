//! Classification bitmasks
//!
//! Tests, communicators and datatypes are each tagged with a set of classes. Selection by class
//! name and the applicability check in the driver only ever ask two questions of these sets:
//! "which class is called X" and "do these two sets intersect".

/// Operations the selection engine needs from a class bitmask.
pub trait ClassMask: Copy {
    /// Look up a class by its display name, ignoring ASCII case.
    fn from_name(name: &str) -> Option<Self>;
    /// Whether the two sets share at least one class.
    fn intersects(self, other: Self) -> bool;
}

macro_rules! class_mask {
    {
        $(#[$doc:meta])*
        pub struct $name:ident {
            $(
                #[$flag_doc:meta]
                const $flag:ident = $bit:expr, $label:expr;
            )*
        }
    } => {
        $(#[$doc])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
        pub struct $name(u32);

        impl $name {
            $(
            #[$flag_doc]
            pub const $flag: $name = $name(1 << $bit);
            )*

            /// No class at all
            pub const NONE: $name = $name(0);

            /// Every class
            pub const ALL: $name = $name(0 $(| (1 << $bit))*);

            /// Display names of the individual classes, in bit order
            pub const NAMES: &'static [(&'static str, $name)] = &[
                $(($label, $name::$flag),)*
            ];

            /// Whether every class in `other` is also in `self`
            pub const fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            /// The raw bits
            pub const fn bits(self) -> u32 {
                self.0
            }
        }

        impl crate::mask::ClassMask for $name {
            fn from_name(name: &str) -> Option<$name> {
                if name.eq_ignore_ascii_case("All") {
                    return Some($name::ALL);
                }
                $name::NAMES
                    .iter()
                    .find(|(label, _)| label.eq_ignore_ascii_case(name))
                    .map(|&(_, class)| class)
            }

            fn intersects(self, other: $name) -> bool {
                self.0 & other.0 != 0
            }
        }

        impl ::std::ops::BitOr for $name {
            type Output = $name;

            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl ::std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                let mut first = true;
                for &(label, class) in $name::NAMES {
                    if self.contains(class) {
                        if !first {
                            f.write_str("|")?;
                        }
                        f.write_str(label)?;
                        first = false;
                    }
                }
                if first {
                    f.write_str("None")?;
                }
                Ok(())
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    }
}

pub(crate) use class_mask;

#[cfg(test)]
mod tests {
    use super::ClassMask;

    class_mask! {
        /// Colors for testing the macro
        pub struct Color {
            /// red
            const RED = 0, "Red";
            /// green
            const GREEN = 1, "Green";
            /// blue
            const BLUE = 2, "Blue";
        }
    }

    #[test]
    fn all_covers_every_flag() {
        assert_eq!(Color::ALL.bits(), 0b111);
        assert!(Color::ALL.contains(Color::RED | Color::BLUE));
        assert!(!Color::RED.contains(Color::RED | Color::GREEN));
    }

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!(Color::from_name("green"), Some(Color::GREEN));
        assert_eq!(Color::from_name("ALL"), Some(Color::ALL));
        assert_eq!(Color::from_name("purple"), None);
    }

    #[test]
    fn intersection() {
        assert!((Color::RED | Color::GREEN).intersects(Color::GREEN));
        assert!(!Color::RED.intersects(Color::BLUE));
        assert!(!Color::NONE.intersects(Color::ALL));
    }

    #[test]
    fn display_joins_labels() {
        assert_eq!((Color::RED | Color::BLUE).to_string(), "Red|Blue");
        assert_eq!(Color::NONE.to_string(), "None");
    }
}
