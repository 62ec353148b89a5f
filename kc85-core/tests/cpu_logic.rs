// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use kc85_core::cpu::alu;
use kc85_core::cpu::Z80;
use kc85_core::factory::TickFn;
use kc85_core::pins;

struct TestBed {
    cpu: Z80,
    mem: Rc<RefCell<Vec<u8>>>,
    tick_fn: TickFn,
    int_line: Rc<Cell<bool>>,
    nmi_line: Rc<Cell<bool>>,
}

fn setup(program: &[u8]) -> TestBed {
    let mem = Rc::new(RefCell::new(vec![0u8; 0x10000]));
    let int_line = Rc::new(Cell::new(false));
    let nmi_line = Rc::new(Cell::new(false));
    let mem_clone = mem.clone();
    let int_clone = int_line.clone();
    let nmi_clone = nmi_line.clone();
    let tick_fn: TickFn = Rc::new(move |_ticks, mut p| {
        if p & pins::MREQ != 0 {
            let addr = pins::get_addr(p) as usize;
            if p & pins::RD != 0 {
                let value = mem_clone.borrow()[addr];
                p = pins::set_data(p, value);
            } else if p & pins::WR != 0 {
                let value = pins::get_data(p);
                mem_clone.borrow_mut()[addr] = value;
            }
        } else if (p & (pins::M1 | pins::IORQ)) == (pins::M1 | pins::IORQ) {
            // interrupt acknowledge: put a vector byte on the bus
            p = pins::set_data(p, 0x66);
        }
        if int_clone.get() {
            p |= pins::INT;
        }
        if nmi_clone.get() {
            p |= pins::NMI;
        }
        p
    });
    let mut cpu = Z80::new();
    cpu.set_af(0x0000);
    cpu.set_bc(0x0000);
    cpu.set_de(0x0000);
    cpu.set_hl(0x0000);
    cpu.set_sp(0xff00);
    cpu.set_pc(0x0100);
    mem.borrow_mut()[0x0100..0x0100 + program.len()].copy_from_slice(program);
    TestBed {
        cpu,
        mem,
        tick_fn,
        int_line,
        nmi_line,
    }
}

fn step(bed: &mut TestBed) -> u32 {
    let tick_fn = bed.tick_fn.clone();
    bed.cpu.exec(1, &tick_fn)
}

#[test]
fn refresh_register_increments_low_seven_bits_only() {
    let mut bed = setup(&[0x00; 16]);
    bed.cpu.set_r(0x80);
    for _ in 0..5 {
        step(&mut bed);
    }
    assert_eq!(0x85, bed.cpu.get_r());
    bed.cpu.set_r(0xff);
    step(&mut bed);
    assert_eq!(0x80, bed.cpu.get_r());
}

#[test]
fn wz_after_load_accumulator_ops() {
    // LD A,(0x1234)
    let mut bed = setup(&[0x3a, 0x34, 0x12]);
    step(&mut bed);
    assert_eq!(0x1235, bed.cpu.get_wz());

    // LD (0x1234),A with A = 0x7f: wz low is nn+1, wz high is A
    let mut bed = setup(&[0x32, 0x34, 0x12]);
    bed.cpu.set_af(0x7f00);
    step(&mut bed);
    assert_eq!(0x7f35, bed.cpu.get_wz());

    // LD (BC),A
    let mut bed = setup(&[0x02]);
    bed.cpu.set_af(0x4100);
    bed.cpu.set_bc(0x20ff);
    step(&mut bed);
    assert_eq!(0x4100, bed.cpu.get_wz());
    assert_eq!(0x41, bed.mem.borrow()[0x20ff]);
}

#[test]
fn wz_after_jumps_and_add16() {
    let mut bed = setup(&[0x18, 0x10]); // JR +16
    step(&mut bed);
    assert_eq!(0x0112, bed.cpu.get_pc());
    assert_eq!(0x0112, bed.cpu.get_wz());

    let mut bed = setup(&[0x09]); // ADD HL,BC
    bed.cpu.set_hl(0x4000);
    bed.cpu.set_bc(0x0234);
    step(&mut bed);
    assert_eq!(0x4001, bed.cpu.get_wz());
    assert_eq!(0x4234, bed.cpu.get_hl());
}

#[test]
fn bit_on_memory_leaks_wz_high_byte_into_xy() {
    // LD HL,(0x2000) sets wz to 0x2001, then BIT 7,(HL)
    let mut bed = setup(&[0x2a, 0x00, 0x20, 0xcb, 0x7e]);
    bed.mem.borrow_mut()[0x2000] = 0x00;
    bed.mem.borrow_mut()[0x2001] = 0x28; // -> HL = 0x2800, wz = 0x2001
    step(&mut bed);
    assert_eq!(0x2001, bed.cpu.get_wz());
    step(&mut bed);
    let f = bed.cpu.get_af() as u8;
    // memory at 0x2800 is zero: Z set, X/Y from wz high byte 0x20
    assert_ne!(0, f & alu::ZF);
    assert_ne!(0, f & alu::YF);
    assert_eq!(0, f & alu::XF);
}

#[test]
fn ddcb_rotate_double_writes_memory_and_register() {
    // RL (IX+2) -> D
    let mut bed = setup(&[0xdd, 0xcb, 0x02, 0x12]);
    bed.cpu.set_ix(0x2000);
    bed.mem.borrow_mut()[0x2002] = 0x41;
    step(&mut bed);
    assert_eq!(0x82, bed.mem.borrow()[0x2002]);
    assert_eq!(0x82, bed.cpu.get_de() >> 8);
    assert_eq!(0x2002, bed.cpu.get_wz());
}

#[test]
fn ddcb_bit_does_not_write_back() {
    // BIT 0,(IX+1)
    let mut bed = setup(&[0xdd, 0xcb, 0x01, 0x46]);
    bed.cpu.set_ix(0x2000);
    bed.mem.borrow_mut()[0x2001] = 0x01;
    step(&mut bed);
    assert_eq!(0x01, bed.mem.borrow()[0x2001]);
    let f = bed.cpu.get_af() as u8;
    assert_eq!(0, f & alu::ZF);
}

#[test]
fn ix_half_registers_are_addressable() {
    // LD IXH,0x12 via DD 26 n, then ADD A,IXH via DD 84
    let mut bed = setup(&[0xdd, 0x26, 0x12, 0xdd, 0x84]);
    bed.cpu.set_ix(0x00ff);
    step(&mut bed);
    assert_eq!(0x12ff, bed.cpu.get_ix());
    step(&mut bed);
    assert_eq!(0x12, (bed.cpu.get_af() >> 8) as u8);
}

#[test]
fn ld_h_from_indexed_memory_targets_real_register() {
    // LD H,(IX+0) must load H, not IXH
    let mut bed = setup(&[0xdd, 0x66, 0x00]);
    bed.cpu.set_ix(0x2000);
    bed.mem.borrow_mut()[0x2000] = 0x99;
    step(&mut bed);
    assert_eq!(0x99, (bed.cpu.get_hl() >> 8) as u8);
    assert_eq!(0x2000, bed.cpu.get_ix());
}

#[test]
fn daa_corrects_bcd_addition() {
    // LD A,0x15; ADD A,0x27; DAA
    let mut bed = setup(&[0x3e, 0x15, 0xc6, 0x27, 0x27]);
    step(&mut bed);
    step(&mut bed);
    step(&mut bed);
    assert_eq!(0x42, (bed.cpu.get_af() >> 8) as u8);
}

#[test]
fn neg_sets_carry_unless_zero() {
    let mut bed = setup(&[0xed, 0x44]);
    bed.cpu.set_af(0x0100);
    step(&mut bed);
    let af = bed.cpu.get_af();
    assert_eq!(0xff, (af >> 8) as u8);
    assert_ne!(0, af as u8 & alu::CF);
    assert_ne!(0, af as u8 & alu::NF);
}

#[test]
fn ld_a_i_copies_iff2_into_parity() {
    let mut bed = setup(&[0xed, 0x47, 0xfb, 0x00, 0xed, 0x57]); // LD I,A; EI; NOP; LD A,I
    bed.cpu.set_af(0x2500);
    step(&mut bed);
    assert_eq!(0x25, bed.cpu.get_i());
    step(&mut bed); // EI
    step(&mut bed); // NOP, interrupts now enabled
    step(&mut bed); // LD A,I
    let f = bed.cpu.get_af() as u8;
    assert_ne!(0, f & alu::PF);
    assert_eq!(0x25, (bed.cpu.get_af() >> 8) as u8);
}

#[test]
fn ldir_copies_block_and_clears_pv() {
    let mut bed = setup(&[0xed, 0xb0]);
    bed.cpu.set_hl(0x2000);
    bed.cpu.set_de(0x3000);
    bed.cpu.set_bc(0x0004);
    for i in 0..4 {
        bed.mem.borrow_mut()[0x2000 + i] = 0xa0 + i as u8;
    }
    while bed.cpu.get_bc() != 0 {
        step(&mut bed);
    }
    for i in 0..4 {
        assert_eq!(0xa0 + i as u8, bed.mem.borrow()[0x3000 + i]);
    }
    assert_eq!(0x2004, bed.cpu.get_hl());
    assert_eq!(0x3004, bed.cpu.get_de());
    assert_eq!(0, bed.cpu.get_af() as u8 & alu::PF);
    assert_eq!(0x0102, bed.cpu.get_pc());
}

#[test]
fn cpir_stops_on_match() {
    let mut bed = setup(&[0xed, 0xb1]);
    bed.cpu.set_af(0x5a00);
    bed.cpu.set_hl(0x2000);
    bed.cpu.set_bc(0x0010);
    bed.mem.borrow_mut()[0x2003] = 0x5a;
    loop {
        step(&mut bed);
        if bed.cpu.get_pc() == 0x0102 {
            break;
        }
    }
    assert_eq!(0x2004, bed.cpu.get_hl());
    assert_eq!(0x000c, bed.cpu.get_bc());
    let f = bed.cpu.get_af() as u8;
    assert_ne!(0, f & alu::ZF);
    assert_ne!(0, f & alu::PF);
}

#[test]
fn scf_and_ccf_take_xy_from_accumulator() {
    let mut bed = setup(&[0x37, 0x3f]); // SCF; CCF
    bed.cpu.set_af(0x2800);
    step(&mut bed);
    let f = bed.cpu.get_af() as u8;
    assert_ne!(0, f & alu::CF);
    assert_ne!(0, f & alu::XF);
    assert_ne!(0, f & alu::YF);
    step(&mut bed);
    let f = bed.cpu.get_af() as u8;
    assert_eq!(0, f & alu::CF);
    assert_ne!(0, f & alu::HF);
}

#[test]
fn ei_delays_interrupt_by_one_instruction() {
    // EI; NOP; NOP with the int line held active
    let mut bed = setup(&[0xfb, 0x00, 0x00]);
    bed.cpu.set_sp(0xff00);
    bed.int_line.set(true);
    step(&mut bed); // EI, line sampled but masked
    assert_eq!(0x0101, bed.cpu.get_pc());
    step(&mut bed); // NOP runs before the interrupt is accepted
    assert_eq!(0x0102, bed.cpu.get_pc());
    bed.int_line.set(false);
    step(&mut bed); // interrupt accepted here (IM 0 drops the vector)
    assert!(!bed.cpu.get_iff1());
}

#[test]
fn im1_interrupt_pushes_pc_and_jumps_to_0x38() {
    // IM 1; EI; NOP; then an interrupt
    let mut bed = setup(&[0xed, 0x56, 0xfb, 0x00]);
    step(&mut bed);
    step(&mut bed);
    // the line is sampled during the following instruction's cycles
    bed.int_line.set(true);
    step(&mut bed);
    assert_eq!(0x0104, bed.cpu.get_pc());
    step(&mut bed);
    bed.int_line.set(false);
    assert_eq!(0x0038, bed.cpu.get_pc());
    assert_eq!(0xfefe, bed.cpu.get_sp());
    assert_eq!(0x04, bed.mem.borrow()[0xfefe]);
    assert_eq!(0x01, bed.mem.borrow()[0xfeff]);
    assert!(!bed.cpu.get_iff1());
    assert!(!bed.cpu.get_iff2());
}

#[test]
fn im2_interrupt_vectors_through_table() {
    // LD A,0x20; LD I,A; IM 2; EI; NOP
    let mut bed = setup(&[0x3e, 0x20, 0xed, 0x47, 0xed, 0x5e, 0xfb, 0x00]);
    bed.mem.borrow_mut()[0x2066] = 0x34;
    bed.mem.borrow_mut()[0x2067] = 0x12;
    for _ in 0..4 {
        step(&mut bed);
    }
    bed.int_line.set(true);
    step(&mut bed); // trailing NOP, line sampled here
    step(&mut bed); // interrupt accepted
    bed.int_line.set(false);
    assert_eq!(0x1234, bed.cpu.get_pc());
}

#[test]
fn nmi_preserves_iff2_and_jumps_to_0x66() {
    // EI; NOP; then NMI
    let mut bed = setup(&[0xfb, 0x00, 0x00]);
    step(&mut bed);
    step(&mut bed);
    bed.nmi_line.set(true);
    step(&mut bed); // rising edge latched during this instruction
    bed.nmi_line.set(false);
    step(&mut bed);
    assert_eq!(0x0066, bed.cpu.get_pc());
    assert!(!bed.cpu.get_iff1());
    assert!(bed.cpu.get_iff2());
    // RETN restores iff1 from iff2
    bed.mem.borrow_mut()[0x0066] = 0xed;
    bed.mem.borrow_mut()[0x0067] = 0x45;
    step(&mut bed);
    assert!(bed.cpu.get_iff1());
    assert_eq!(0x0103, bed.cpu.get_pc());
}

#[test]
fn halt_is_left_on_interrupt() {
    // IM 1; EI; HALT
    let mut bed = setup(&[0xed, 0x56, 0xfb, 0x76]);
    step(&mut bed);
    step(&mut bed);
    step(&mut bed);
    assert_ne!(0, bed.cpu.get_pins() & pins::HALT);
    // halted: the same instruction executes again
    let pc = bed.cpu.get_pc();
    step(&mut bed);
    assert_eq!(pc, bed.cpu.get_pc());
    bed.int_line.set(true);
    step(&mut bed); // halt spin, line sampled
    step(&mut bed); // interrupt accepted
    bed.int_line.set(false);
    assert_eq!(0x0038, bed.cpu.get_pc());
    assert_eq!(0, bed.cpu.get_pins() & pins::HALT);
    // the pushed return address points past the halt instruction
    assert_eq!(0x04, bed.mem.borrow()[0xfefe]);
    assert_eq!(0x01, bed.mem.borrow()[0xfeff]);
}

#[test]
fn interrupts_are_suppressed_after_ix_prefix() {
    // IM 1; EI; NOP; DD 21 nn (LD IX,nn)
    let mut bed = setup(&[0xed, 0x56, 0xfb, 0x00, 0xdd, 0x21, 0x34, 0x12]);
    for _ in 0..3 {
        step(&mut bed);
    }
    bed.int_line.set(true);
    // budget of 1 tick executes the prefix and, with interrupts pinned off
    // inside the sequence, the full LD IX,nn before sampling the line
    let tick_fn = bed.tick_fn.clone();
    bed.cpu.exec(1, &tick_fn);
    assert_eq!(0x1234, bed.cpu.get_ix());
    assert!(bed.cpu.get_iff1());
    assert_eq!(0x0108, bed.cpu.get_pc());
    // the interrupt lands on the next instruction boundary
    bed.cpu.exec(1, &tick_fn);
    bed.int_line.set(false);
    assert_eq!(0x0038, bed.cpu.get_pc());
    assert_eq!(0x08, bed.mem.borrow()[0xfefe]);
    assert_eq!(0x01, bed.mem.borrow()[0xfeff]);
}

#[test]
fn out_in_roundtrip_via_io_pins() {
    let io_latch = Rc::new(Cell::new(0u8));
    let mem = Rc::new(RefCell::new(vec![0u8; 0x10000]));
    let mem_clone = mem.clone();
    let io_clone = io_latch.clone();
    let tick_fn: TickFn = Rc::new(move |_ticks, mut p| {
        if p & pins::MREQ != 0 {
            let addr = pins::get_addr(p) as usize;
            if p & pins::RD != 0 {
                let value = mem_clone.borrow()[addr];
                p = pins::set_data(p, value);
            } else if p & pins::WR != 0 {
                mem_clone.borrow_mut()[addr] = pins::get_data(p);
            }
        } else if p & pins::IORQ != 0 {
            if p & pins::WR != 0 {
                io_clone.set(pins::get_data(p));
            } else if p & pins::RD != 0 {
                p = pins::set_data(p, io_clone.get().wrapping_add(1));
            }
        }
        p
    });
    // LD A,0x77; OUT (0x34),A; IN A,(0x34)
    mem.borrow_mut()[0x0100..0x0106].copy_from_slice(&[0x3e, 0x77, 0xd3, 0x34, 0xdb, 0x34]);
    let mut cpu = Z80::new();
    cpu.set_pc(0x0100);
    cpu.exec(1, &tick_fn);
    cpu.exec(1, &tick_fn);
    assert_eq!(0x77, io_latch.get());
    // OUT (n),A: wz high byte is A, low byte n+1
    assert_eq!(0x7735, cpu.get_wz());
    cpu.exec(1, &tick_fn);
    assert_eq!(0x78, (cpu.get_af() >> 8) as u8);
    // IN A,(n): wz is the full port address + 1
    assert_eq!(0x7735, cpu.get_wz());
}

#[test]
fn ex_sp_hl_swaps_and_sets_wz() {
    let mut bed = setup(&[0xe3]);
    bed.cpu.set_hl(0x1234);
    bed.cpu.set_sp(0xfe00);
    bed.mem.borrow_mut()[0xfe00] = 0x78;
    bed.mem.borrow_mut()[0xfe01] = 0x56;
    step(&mut bed);
    assert_eq!(0x5678, bed.cpu.get_hl());
    assert_eq!(0x5678, bed.cpu.get_wz());
    assert_eq!(0x34, bed.mem.borrow()[0xfe00]);
    assert_eq!(0x12, bed.mem.borrow()[0xfe01]);
}

#[test]
fn rld_rotates_nibbles_through_accumulator() {
    let mut bed = setup(&[0xed, 0x6f]);
    bed.cpu.set_af(0x1200);
    bed.cpu.set_hl(0x2000);
    bed.mem.borrow_mut()[0x2000] = 0xab;
    step(&mut bed);
    assert_eq!(0x1a, (bed.cpu.get_af() >> 8) as u8);
    assert_eq!(0xb2, bed.mem.borrow()[0x2000]);
    assert_eq!(0x2001, bed.cpu.get_wz());
}

#[test]
fn cp_takes_xy_from_operand() {
    // CP 0x28 with A = 0x48
    let mut bed = setup(&[0xfe, 0x28]);
    bed.cpu.set_af(0x4800);
    step(&mut bed);
    let f = bed.cpu.get_af() as u8;
    assert_ne!(0, f & alu::YF);
    assert_ne!(0, f & alu::XF);
}
