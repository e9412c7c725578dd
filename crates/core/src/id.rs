// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Fixed-capacity ID buffer and the [`define_id!`] macro for server-generated
//! identifiers. Client-supplied identifiers (worker IDs, codebase IDs) are
//! plain `String` newtypes instead — see `worker.rs` / `codebase.rs`.

/// Maximum byte length for an inline ID (4-char prefix + 21-char nanoid).
pub const ID_MAX_LEN: usize = 25;

/// Fixed-size inline ID buffer. Always <= `ID_MAX_LEN` ASCII bytes, `Copy`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdBuf {
    len: u8,
    buf: [u8; ID_MAX_LEN],
}

impl std::hash::Hash for IdBuf {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Hash only the active bytes so it matches str::hash, which is
        // required for Borrow<str> HashMap lookups.
        self.as_str().hash(state);
    }
}

impl IdBuf {
    pub const fn empty() -> Self {
        Self { len: 0, buf: [0; ID_MAX_LEN] }
    }

    pub fn new(s: &str) -> Self {
        debug_assert!(
            s.len() <= ID_MAX_LEN,
            "ID exceeds {} bytes ({} bytes): {:?}",
            ID_MAX_LEN,
            s.len(),
            s,
        );
        let len = s.len().min(ID_MAX_LEN);
        let mut buf = [0u8; ID_MAX_LEN];
        buf[..len].copy_from_slice(&s.as_bytes()[..len]);
        Self { len: len as u8, buf }
    }

    pub fn as_str(&self) -> &str {
        // Invariant: only constructed from &str, always valid UTF-8.
        match std::str::from_utf8(&self.buf[..self.len as usize]) {
            Ok(s) => s,
            Err(_) => unreachable!("IdBuf constructed from non-UTF-8"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::borrow::Borrow<str> for IdBuf {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Debug for IdBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl std::fmt::Display for IdBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl serde::Serialize for IdBuf {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for IdBuf {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <&str>::deserialize(deserializer)?;
        if s.len() > ID_MAX_LEN {
            return Err(serde::de::Error::custom(format!(
                "ID exceeds {} bytes: {:?}",
                ID_MAX_LEN, s
            )));
        }
        Ok(IdBuf::new(s))
    }
}

/// Define a newtype ID wrapper around [`IdBuf`] with a type prefix.
///
/// The ID format is `{prefix}{nanoid}` where `prefix` is a short type
/// indicator (e.g. `"task_"`) and `nanoid` fills the rest of the capacity.
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($prefix:literal);
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $crate::id::IdBuf);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new random ID with the type prefix.
            pub fn new() -> Self {
                let width = $crate::id::ID_MAX_LEN - Self::PREFIX.len();
                Self($crate::id::IdBuf::new(&format!(
                    "{}{}",
                    Self::PREFIX,
                    nanoid::nanoid!(width)
                )))
            }

            /// Parse an ID from an existing string (e.g. from a request body).
            pub fn from_string(id: impl AsRef<str>) -> Self {
                Self($crate::id::IdBuf::new(id.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.as_str())
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::from_string(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::from_string(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.0.as_str()
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0.as_str() == other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.0.as_str()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                self.0.as_str()
            }
        }
    };
}
