// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::fmt;
use std::result;

use byteorder::ByteOrder;

pub type Result<T> = result::Result<T, LoaderError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderError {
    WrongHeaderSize,
    NumAddrTooBig,
    EndAddrBeforeLoadAddr,
    ExecAddrOutOfRange,
    NotEnoughData,
    NoMagicNumber,
    ImageTooBig,
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoaderError::WrongHeaderSize => write!(f, "snapshot header is truncated"),
            LoaderError::NumAddrTooBig => write!(f, "snapshot header address count out of range"),
            LoaderError::EndAddrBeforeLoadAddr => {
                write!(f, "snapshot end address lies before the load address")
            }
            LoaderError::ExecAddrOutOfRange => {
                write!(f, "snapshot exec address lies outside the loaded range")
            }
            LoaderError::NotEnoughData => write!(f, "snapshot payload is truncated"),
            LoaderError::NoMagicNumber => write!(f, "tape magic number not found"),
            LoaderError::ImageTooBig => write!(f, "snapshot file exceeds 64 KB"),
        }
    }
}

pub trait Reader {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;
    fn consume(&mut self, amt: usize);
    fn remaining(&self) -> usize;
}

pub trait ReadBytesExt: Reader {
    #[inline]
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    #[inline]
    fn read_u16<T: ByteOrder>(&mut self) -> Result<u16> {
        let mut buf = [0; 2];
        self.read_exact(&mut buf)?;
        Ok(T::read_u16(&buf))
    }
}

impl<R: Reader + ?Sized> ReadBytesExt for R {}

pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<'a> Reader for SliceReader<'a> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.remaining() < buf.len() {
            return Err(LoaderError::NotEnoughData);
        }
        buf.copy_from_slice(&self.data[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.data.len());
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}
