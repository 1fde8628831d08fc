//! Content-addressed object identifiers and the git-style object hashing
//! scheme used by the commit store (§6): a 20-byte SHA-1 digest of the
//! serialized object prefixed by `"<kind> <len>\0"`.

use std::fmt;

use sha1::{Digest, Sha1};

pub trait ObjectId {
    fn from_bytes(bytes: &[u8]) -> Self;
    fn as_bytes(&self) -> &[u8];
    fn from_hex(hex: &str) -> Result<Self, hex::FromHexError>
    where
        Self: Sized;
    fn hex(&self) -> String;
}

macro_rules! id_type {
    ($(#[$meta:meta])* $vis:vis $name:ident) => {
        $(#[$meta])*
        #[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
        $vis struct $name(Vec<u8>);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.hex()).finish()
            }
        }

        impl $crate::object_id::ObjectId for $name {
            fn from_bytes(bytes: &[u8]) -> Self {
                Self(bytes.to_vec())
            }

            fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            fn from_hex(hex: &str) -> Result<Self, hex::FromHexError> {
                Ok(Self(hex::decode(hex)?))
            }

            fn hex(&self) -> String {
                hex::encode(&self.0)
            }
        }
    };
}

id_type!(
    /// Identifies a blob (file content) object.
    pub FileId
);
id_type!(
    /// Identifies a tree (directory listing) object.
    pub TreeId
);
id_type!(
    /// Identifies a commit object.
    pub CommitId
);

/// Hashes `content` the way every object kind in this store is hashed:
/// `sha1("<kind> <len>\0" + content)`.
pub fn hash_object(kind: &str, content: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(kind.as_bytes());
    hasher.update(b" ");
    hasher.update(content.len().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(content);
    hasher.finalize().into()
}
