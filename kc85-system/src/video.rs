// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use kc85_core::mem::Ram;

use crate::config::{SystemModel, Variant};
use crate::frame_buffer::{FrameBuffer, DISPLAY_WIDTH};

// Design:
//   The video circuit races the cpu clock: the horizontal counter advances
//   once per clock tick, and every second count one 8-pixel group is
//   fetched from video RAM and decoded into the ARGB buffer, left to
//   right, 40 groups per line. The remaining counts of each line are
//   horizontal blanking. 312 lines make one frame; the vertical wrap is
//   reported to the caller, which forwards it to the ctc's channel-2
//   trigger input for the blink clock.
//
//   The /2 and /3 models scramble the pixel and color addresses with
//   y-bit interleaving, split into a 256x256 left area and a 64x256 right
//   area; the /4 stores columns linearly and banks two full images.

pub const FOREGROUND_PALETTE: [u32; 16] = [
    0xff00_0000, // black
    0xff00_00ff, // blue
    0xffff_0000, // red
    0xffff_00ff, // magenta
    0xff00_ff00, // green
    0xff00_ffff, // cyan
    0xffff_ff00, // yellow
    0xffff_ffff, // white
    0xff00_0000, // black #2
    0xffa0_00ff, // violet
    0xffff_a000, // orange
    0xffff_00a0, // purple
    0xff00_ffa0, // blueish green
    0xff00_a0ff, // greenish blue
    0xffa0_ff00, // yellow green
    0xffff_ffff, // white #2
];

pub const BACKGROUND_PALETTE: [u32; 8] = [
    0xff00_0000, // black
    0xff00_00a0, // dark blue
    0xffa0_0000, // dark red
    0xffa0_00a0, // dark magenta
    0xff00_a000, // dark green
    0xff00_a0a0, // dark cyan
    0xffa0_a000, // dark yellow
    0xffa0_a0a0, // gray
];

pub struct Video {
    variant: Variant,
    scanline_ticks: u32,
    scanlines: u32,
    h_count: u32,
    v_count: u32,
}

impl Video {
    pub fn new(model: &SystemModel) -> Self {
        Self {
            variant: model.variant,
            scanline_ticks: model.scanline_ticks,
            scanlines: model.scanlines,
            h_count: 0,
            v_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.h_count = 0;
        self.v_count = 0;
    }

    /// Advance the beam by `num_ticks` clock ticks, decoding pixel groups
    /// on the fly. Returns true when the vertical retrace wrapped.
    pub fn tick(
        &mut self,
        num_ticks: u32,
        irm: &Ram,
        frame_buffer: &mut FrameBuffer,
        blink_bg: bool,
        io84: u8,
    ) -> bool {
        let mut vsync = false;
        for _ in 0..num_ticks {
            if self.h_count & 1 == 0 {
                let x = self.h_count >> 1;
                if x < 40 && self.v_count < 256 {
                    self.decode8(x, self.v_count, irm, frame_buffer, blink_bg, io84);
                }
            }
            self.h_count += 1;
            if self.h_count >= self.scanline_ticks {
                self.h_count = 0;
                self.v_count += 1;
                if self.v_count >= self.scanlines {
                    self.v_count = 0;
                    vsync = true;
                }
            }
        }
        vsync
    }

    fn decode8(
        &self,
        x: u32,
        y: u32,
        irm: &Ram,
        frame_buffer: &mut FrameBuffer,
        blink_bg: bool,
        io84: u8,
    ) {
        let (pixels, color) = match self.variant {
            Variant::Kc852 | Variant::Kc853 => {
                let (pixel_offset, color_offset) = if x < 0x20 {
                    (
                        x | (y >> 2 & 0x03) << 5 | (y & 0x03) << 7 | (y >> 4 & 0x0f) << 9,
                        0x2800 + (x | (y >> 2 & 0x3f) << 5),
                    )
                } else {
                    (
                        0x2000
                            + ((x & 0x07)
                                | (y >> 4 & 0x03) << 3
                                | (y >> 2 & 0x03) << 5
                                | (y & 0x03) << 7
                                | (y >> 6 & 0x03) << 9),
                        0x3000
                            + ((x & 0x07)
                                | (y >> 4 & 0x03) << 3
                                | (y >> 2 & 0x03) << 5
                                | (y >> 6 & 0x03) << 7),
                    )
                };
                (
                    irm.read(pixel_offset as usize),
                    irm.read(color_offset as usize),
                )
            }
            Variant::Kc854 => {
                // column linear layout; io84 bit 0 selects the displayed
                // image pair, colors live in the +0x4000 bank
                let image_base = if io84 & 0x01 != 0 { 0x8000 } else { 0x0000 };
                let offset = (x << 8 | y) as usize;
                (
                    irm.read(image_base + offset),
                    irm.read(image_base + 0x4000 + offset),
                )
            }
        };
        let foreground = FOREGROUND_PALETTE[(color >> 3 & 0x0f) as usize];
        let background = BACKGROUND_PALETTE[(color & 0x07) as usize];
        let index = (y as usize) * DISPLAY_WIDTH + (x as usize) * 8;
        if blink_bg && color & 0x80 != 0 {
            for i in 0..8 {
                frame_buffer.set(index + i, background);
            }
        } else {
            for i in 0..8 {
                let lit = pixels & (0x80 >> i) != 0;
                frame_buffer.set(index + i, if lit { foreground } else { background });
            }
        }
    }
}
