//! # Dexwriter
//!
//! A library for encoding an in-memory class model into Android dex containers
//!
//! Classes are described with the plain structs in [`types`], interned into a
//! [`DexFile`] and written out as a complete, checksummed container. A verifying
//! reader ([`read_dex`]) decodes the result back into the same model.
//!
use std::path::Path;

pub mod dex;
mod tests;
pub mod types;

pub use crate::dex::dex_file::{build_dex, DexFile, DexFileOptions};
pub use crate::dex::error::{DexError, ErrorKind};
pub use crate::dex::reader::{read_dex, verify_checksum, verify_signature, DexImage};

use crate::types::ClassDef;

/// Encodes `classes` and writes the container to `path`
///
/// # Examples
///
/// ```no_run
///  use dexwriter::write_dex_file;
///  use dexwriter::types::{AccessFlags, ClassDef};
///  use std::path::Path;
///
///  let class = ClassDef::new("Lcom/example/Main;", AccessFlags::PUBLIC, Some("Ljava/lang/Object;"));
///  write_dex_file(&[class], 26, Path::new("classes.dex")).unwrap();
/// ```
pub fn write_dex_file(classes: &[ClassDef], api_level: u32, path: &Path) -> Result<(), DexError> {
    let mut dex = DexFile::new(DexFileOptions { api_level });
    dex.intern_classes(classes)?;
    dex.write_to_file(path)
}
