// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Variant {
    Kc852,
    Kc853,
    Kc854,
}

#[derive(Clone)]
pub struct SystemModel {
    pub variant: Variant,
    pub cpu_freq: u32,
    pub scanline_ticks: u32,
    pub scanlines: u32,
}

impl SystemModel {
    pub fn from(model: &str) -> SystemModel {
        match model {
            "/2" | "85/2" => SystemModel::new(Variant::Kc852, 1_750_000, 113),
            "/3" | "85/3" => SystemModel::new(Variant::Kc853, 1_750_000, 113),
            "/4" | "85/4" => SystemModel::new(Variant::Kc854, 1_770_000, 112),
            _ => panic!("invalid model {}", model),
        }
    }

    fn new(variant: Variant, cpu_freq: u32, scanline_ticks: u32) -> SystemModel {
        SystemModel {
            variant,
            cpu_freq,
            scanline_ticks,
            scanlines: 312,
        }
    }
}

/// ROM images for the configured model; images not used by the model may
/// be left out.
#[derive(Default)]
pub struct Roms {
    pub caos_e: Vec<u8>,
    pub caos_c: Option<Vec<u8>>,
    pub basic: Option<Vec<u8>>,
}

pub struct SoundConfig {
    pub sample_rate: u32,
    pub buffer_size: usize,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            buffer_size: 128,
        }
    }
}

pub struct Config {
    pub model: SystemModel,
    pub roms: Roms,
    pub sound: SoundConfig,
}

impl Config {
    pub fn new(model: SystemModel, roms: Roms) -> Self {
        Self {
            model,
            roms,
            sound: SoundConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    MissingRom(&'static str),
    RomSizeMismatch(&'static str, usize),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BuildError::MissingRom(name) => write!(f, "missing rom image {}", name),
            BuildError::RomSizeMismatch(name, size) => {
                write!(f, "rom image {} has unexpected size {}", name, size)
            }
        }
    }
}
