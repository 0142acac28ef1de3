//! Declarative generators for the protocol's name and index tables.

/// Defines the `Param` enum: every device parameter paired with its wire name.
macro_rules! define_params {
    ($($(#[$meta:meta])* $name:ident = $wire:literal),* $(,)?) => {
        /// A named device setting or sensor reading.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Param {
            $($(#[$meta])* $name),*
        }

        impl Param {
            /// Every parameter known to the driver, in declaration order.
            pub const ALL: &'static [Param] = &[$(Param::$name),*];

            /// Name used on the wire (`cols` / `opt` entries).
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Param::$name => $wire),*
                }
            }
        }

        impl std::str::FromStr for Param {
            type Err = $crate::error::GreeError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($wire => Ok(Param::$name),)*
                    _ => Err($crate::error::GreeError::UnknownParam(s.to_string())),
                }
            }
        }

        impl std::fmt::Display for Param {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl serde::Serialize for Param {
            fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
                s.serialize_str(self.as_str())
            }
        }
    };
}

/// Defines an enum whose variants map positionally onto a device index table.
///
/// The device reports these settings as small integers; the position of a
/// variant in the list is the integer the device uses for it.
macro_rules! define_mode {
    ($(#[$outer:meta])* $ty:ident { $($name:ident = $label:literal),* $(,)? }) => {
        $(#[$outer])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
        pub enum $ty {
            $($name),*
        }

        impl $ty {
            /// Table order; the position is the device index.
            pub const ALL: &'static [$ty] = &[$($ty::$name),*];

            /// Looks up a device-reported index. Out-of-range values yield `None`.
            pub fn from_index(index: i64) -> Option<Self> {
                usize::try_from(index).ok().and_then(|i| Self::ALL.get(i).copied())
            }

            /// Index the device uses for this variant.
            pub fn index(&self) -> i64 {
                *self as i64
            }

            /// Human-readable label.
            pub fn label(&self) -> &'static str {
                match self {
                    $($ty::$name => $label),*
                }
            }
        }

        impl std::str::FromStr for $ty {
            type Err = $crate::error::GreeError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|m| m.label().eq_ignore_ascii_case(s))
                    .ok_or_else(|| {
                        $crate::error::GreeError::Rejected(format!(
                            "'{}' is not a valid {}",
                            s,
                            stringify!($ty)
                        ))
                    })
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}
