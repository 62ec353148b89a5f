// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use byteorder::LittleEndian;

use kc85_system::{Image, Kc85};

use crate::io::{LoaderError, Reader, Result};
use crate::{Loader, MAX_SNAPSHOT_SIZE};

// SPEC: KCC quickload format as written by the JTC/KC emulator family:
// a 128-byte header (16-byte name, address count, load/end/exec), then
// the raw payload for [load_addr, end_addr).

pub const KCC_HEADER_SIZE: usize = 128;

pub(crate) struct KccHeader {
    pub name: [u8; 16],
    pub num_addr: u8,
    pub load_addr: u16,
    pub end_addr: u16,
    pub exec_addr: u16,
}

impl KccHeader {
    pub(crate) fn read(reader: &mut dyn Reader) -> Result<KccHeader> {
        use byteorder::ByteOrder;
        let mut raw = [0u8; KCC_HEADER_SIZE];
        reader
            .read_exact(&mut raw)
            .map_err(|_| LoaderError::WrongHeaderSize)?;
        let mut name = [0u8; 16];
        name.copy_from_slice(&raw[0..16]);
        Ok(KccHeader {
            name,
            num_addr: raw[16],
            load_addr: LittleEndian::read_u16(&raw[17..19]),
            end_addr: LittleEndian::read_u16(&raw[19..21]),
            exec_addr: LittleEndian::read_u16(&raw[21..23]),
        })
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.num_addr > 3 {
            return Err(LoaderError::NumAddrTooBig);
        }
        if self.end_addr <= self.load_addr {
            return Err(LoaderError::EndAddrBeforeLoadAddr);
        }
        if self.num_addr > 2
            && (self.exec_addr < self.load_addr || self.exec_addr > self.end_addr)
        {
            return Err(LoaderError::ExecAddrOutOfRange);
        }
        Ok(())
    }

    pub(crate) fn payload_size(&self) -> usize {
        usize::from(self.end_addr - self.load_addr)
    }

    pub(crate) fn has_exec_addr(&self) -> bool {
        self.num_addr > 2
    }
}

pub(crate) struct KccImage {
    pub name: [u8; 16],
    pub load_addr: u16,
    pub exec_addr: Option<u16>,
    pub data: Vec<u8>,
}

impl Image for KccImage {
    fn mount(&mut self, kc85: &mut Kc85) {
        info!(
            target: "loader",
            "Mounting snapshot at 0x{:04x}, {} bytes",
            self.load_addr,
            self.data.len()
        );
        kc85.write_bytes(self.load_addr, &self.data);
        if let Some(exec_addr) = self.exec_addr {
            kc85.load_start(exec_addr);
        }
        kc85.notify_snapshot_loaded(&self.name);
    }
}

pub struct KccLoader;

impl KccLoader {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for KccLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader for KccLoader {
    fn load(&self, reader: &mut dyn Reader) -> Result<Box<dyn Image>> {
        if reader.remaining() > MAX_SNAPSHOT_SIZE {
            return Err(LoaderError::ImageTooBig);
        }
        let header = KccHeader::read(reader)?;
        header.validate()?;
        if reader.remaining() < header.payload_size() {
            return Err(LoaderError::NotEnoughData);
        }
        let mut data = vec![0u8; header.payload_size()];
        reader.read_exact(&mut data)?;
        info!(
            target: "loader",
            "Loading KCC, load 0x{:04x} end 0x{:04x} exec 0x{:04x}",
            header.load_addr,
            header.end_addr,
            header.exec_addr
        );
        Ok(Box::new(KccImage {
            name: header.name,
            load_addr: header.load_addr,
            exec_addr: if header.has_exec_addr() {
                Some(header.exec_addr)
            } else {
                None
            },
            data,
        }))
    }
}
