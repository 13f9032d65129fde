// SPDX-License-Identifier: MIT

//! Prefixed, inline-buffered identifiers (`srv_xxxxxxxxxxxx`, `tool_xxxxxxxxxxxx`).
//!
//! IDs are short enough to store inline rather than heap-allocate, following
//! the teacher's `IdBuf` approach in `oj-core`.

use std::borrow::Borrow;
use std::fmt;

const NANOID_LEN: usize = 12;
const NANOID_ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
    'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

/// Fixed-capacity inline buffer holding `prefix_` + a 12-char nanoid body.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdBuf<const N: usize> {
    len: u8,
    bytes: [u8; N],
}

impl<const N: usize> IdBuf<N> {
    pub fn new(s: &str) -> Self {
        let b = s.as_bytes();
        assert!(b.len() <= N, "id {s:?} exceeds inline capacity {N}");
        let mut bytes = [0u8; N];
        bytes[..b.len()].copy_from_slice(b);
        Self {
            len: b.len() as u8,
            bytes,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }
}

impl<const N: usize> fmt::Debug for IdBuf<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> fmt::Display for IdBuf<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> Borrow<str> for IdBuf<N> {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl<const N: usize> serde::Serialize for IdBuf<N> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de, const N: usize> serde::Deserialize<'de> for IdBuf<N> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::new(&s))
    }
}

pub fn generate(prefix: &str) -> String {
    let mut s = String::with_capacity(prefix.len() + 1 + NANOID_LEN);
    s.push_str(prefix);
    s.push('_');
    s.push_str(&nanoid::nanoid!(NANOID_LEN, &NANOID_ALPHABET));
    s
}

/// Define a prefixed identifier newtype backed by [`IdBuf`].
///
/// `define_id!(pub struct UpstreamId, prefix = "srv", cap = 24);`
#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* pub struct $name:ident, prefix = $prefix:literal, cap = $cap:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name($crate::id::IdBuf<$cap>);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn generate() -> Self {
                Self($crate::id::IdBuf::new(&$crate::id::generate($prefix)))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0.as_str())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self($crate::id::IdBuf::new(s)))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self($crate::id::IdBuf::new(s))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self($crate::id::IdBuf::new(&s))
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.0.as_str()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    crate::define_id!(pub struct TestId, prefix = "tst", cap = 24);

    #[test]
    fn generated_id_has_prefix() {
        let id = TestId::generate();
        assert!(id.as_str().starts_with("tst_"));
    }

    #[test]
    fn roundtrips_through_from_str() {
        use std::str::FromStr;
        let id = TestId::from_str("tst_abc123").unwrap();
        assert_eq!(id.as_str(), "tst_abc123");
    }
}
