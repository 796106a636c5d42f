//! Applies classic IPS patches to binary images.
//!
//! ```
//! let original = [0u8; 4];
//! let patch = b"PATCH\x00\x00\x01\x00\x02\x11\x22EOF";
//! let patched = ips_patcher::apply(&original, patch).unwrap();
//! assert_eq!(patched, [0x00, 0x11, 0x22, 0x00]);
//! ```

pub mod archive;
pub mod error;
pub mod fingerprint;
pub mod ips;
pub mod library;
pub mod patch;

pub use error::{Error, Result};
pub use fingerprint::{Crc32, Fingerprint};
pub use ips::{apply, Patcher, Record, Records, Terminator};
pub use library::{AssociationTable, Manifest, PatchSelector};
