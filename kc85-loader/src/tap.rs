// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use kc85_system::Image;

use crate::io::{LoaderError, ReadBytesExt, Reader, Result};
use crate::kcc::{KccHeader, KccImage};
use crate::{Loader, MAX_SNAPSHOT_SIZE};

// SPEC: KC-TAPE format: the 16-byte magic, one type byte, an embedded
// KCC header, then the payload cut into 129-byte tape blocks (one block
// number byte followed by 128 data bytes). The block numbers are
// meaningless for a quickload and are skipped while copying.

pub const TAP_MAGIC: &[u8; 16] = b"\xc3KC-TAPE by AF. ";

const TAP_BLOCK_SIZE: usize = 128;

pub struct TapLoader;

impl TapLoader {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for TapLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader for TapLoader {
    fn load(&self, reader: &mut dyn Reader) -> Result<Box<dyn Image>> {
        Ok(Box::new(parse(reader)?))
    }
}

fn parse(reader: &mut dyn Reader) -> Result<KccImage> {
    if reader.remaining() > MAX_SNAPSHOT_SIZE {
        return Err(LoaderError::ImageTooBig);
    }
    let mut magic = [0u8; 16];
    reader
        .read_exact(&mut magic)
        .map_err(|_| LoaderError::NoMagicNumber)?;
    if &magic != TAP_MAGIC {
        return Err(LoaderError::NoMagicNumber);
    }
    // the tape type byte is irrelevant for a quickload
    let _tape_type = reader.read_u8().map_err(|_| LoaderError::WrongHeaderSize)?;
    let header = KccHeader::read(reader)?;
    header.validate()?;
    let size = header.payload_size();
    let blocks = (size + TAP_BLOCK_SIZE - 1) / TAP_BLOCK_SIZE;
    if reader.remaining() < size + blocks {
        return Err(LoaderError::NotEnoughData);
    }
    let mut data = vec![0u8; size];
    let mut copied = 0;
    while copied < size {
        // skip the leading block number of every tape block
        reader.consume(1);
        let chunk = TAP_BLOCK_SIZE.min(size - copied);
        reader.read_exact(&mut data[copied..copied + chunk])?;
        copied += chunk;
    }
    info!(
        target: "loader",
        "Loading TAP, load 0x{:04x} end 0x{:04x} exec 0x{:04x}",
        header.load_addr,
        header.end_addr,
        header.exec_addr
    );
    Ok(KccImage {
        name: header.name,
        load_addr: header.load_addr,
        exec_addr: if header.has_exec_addr() {
            Some(header.exec_addr)
        } else {
            None
        },
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SliceReader;

    fn make_tap(num_addr: u8, load_addr: u16, end_addr: u16, payload: &[u8]) -> Vec<u8> {
        let mut file = Vec::new();
        file.extend_from_slice(TAP_MAGIC);
        file.push(0x01);
        let mut header = vec![0u8; 128];
        header[0..4].copy_from_slice(b"TAPE");
        header[16] = num_addr;
        header[17] = load_addr as u8;
        header[18] = (load_addr >> 8) as u8;
        header[19] = end_addr as u8;
        header[20] = (end_addr >> 8) as u8;
        file.extend_from_slice(&header);
        for (block, chunk) in payload.chunks(TAP_BLOCK_SIZE).enumerate() {
            file.push(block as u8 + 1);
            file.extend_from_slice(chunk);
            // tape blocks are always padded to full size
            for _ in chunk.len()..TAP_BLOCK_SIZE {
                file.push(0x00);
            }
        }
        file
    }

    #[test]
    fn rejects_missing_magic() {
        let data = vec![0u8; 0x200];
        let result = parse(&mut SliceReader::new(&data));
        assert_eq!(Some(LoaderError::NoMagicNumber), result.err());
    }

    #[test]
    fn block_numbers_are_skipped_while_copying() {
        let payload: Vec<u8> = (0..200u16).map(|value| value as u8).collect();
        let file = make_tap(2, 0x0300, 0x0300 + 200, &payload);
        let image = parse(&mut SliceReader::new(&file)).unwrap();
        assert_eq!(payload, image.data);
        assert_eq!(0x0300, image.load_addr);
        assert_eq!(None, image.exec_addr);
    }

    #[test]
    fn rejects_truncated_tape() {
        let payload = vec![0x55u8; 200];
        let mut file = make_tap(2, 0x0300, 0x0300 + 200, &payload);
        file.truncate(file.len() - 100);
        let result = parse(&mut SliceReader::new(&file));
        assert_eq!(Some(LoaderError::NotEnoughData), result.err());
    }

    #[test]
    fn validation_follows_the_kcc_rules() {
        let file = make_tap(2, 0x0400, 0x0300, &[]);
        let result = parse(&mut SliceReader::new(&file));
        assert_eq!(Some(LoaderError::EndAddrBeforeLoadAddr), result.err());
    }
}
