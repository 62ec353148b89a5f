// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

#[macro_use]
extern crate log;

pub mod io;
mod kcc;
mod loaders;
mod tap;

use kc85_system::{Image, Kc85};

pub use self::io::{LoaderError, Reader, Result, SliceReader};
pub use self::kcc::KccLoader;
pub use self::loaders::Loaders;
pub use self::tap::{TapLoader, TAP_MAGIC};

/// Snapshot files larger than the address space are rejected outright.
pub const MAX_SNAPSHOT_SIZE: usize = 0x10000;

pub trait Loader {
    /// Parse and validate a snapshot; nothing is written into the
    /// machine until the returned image is mounted.
    fn load(&self, reader: &mut dyn Reader) -> Result<Box<dyn Image>>;
}

/// Sniff the snapshot format, parse it and mount it onto the machine.
pub fn load(kc85: &mut Kc85, data: &[u8]) -> Result<()> {
    let loader = Loaders::from_magic(data);
    let mut reader = SliceReader::new(data);
    let mut image = loader.load(&mut reader)?;
    image.mount(kc85);
    Ok(())
}
