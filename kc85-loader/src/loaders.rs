// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use crate::kcc::KccLoader;
use crate::tap::{TapLoader, TAP_MAGIC};
use crate::Loader;

pub struct Loaders;

impl Loaders {
    /// Pick a loader by file extension.
    pub fn from_ext(ext: Option<&str>) -> Option<Box<dyn Loader>> {
        match ext.map(str::to_lowercase).as_deref() {
            Some("kcc") => Some(Box::new(KccLoader::new())),
            Some("tap") | Some("853") | Some("854") => Some(Box::new(TapLoader::new())),
            _ => None,
        }
    }

    /// Pick a loader by sniffing the tape magic.
    pub fn from_magic(data: &[u8]) -> Box<dyn Loader> {
        if data.len() >= TAP_MAGIC.len() && &data[..TAP_MAGIC.len()] == TAP_MAGIC {
            Box::new(TapLoader::new())
        } else {
            Box::new(KccLoader::new())
        }
    }
}
