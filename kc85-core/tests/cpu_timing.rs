// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::cell::RefCell;
use std::rc::Rc;

use kc85_core::cpu::Z80;
use kc85_core::factory::TickFn;
use kc85_core::pins;

fn setup() -> (Z80, Rc<RefCell<Vec<u8>>>, TickFn) {
    let mem = Rc::new(RefCell::new(vec![0u8; 0x10000]));
    let mem_clone = mem.clone();
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
    (cpu, mem, tick_fn)
}

// Documented cycle counts from the Z80 User Manual, with all flags clear
// and B == 0 before each instruction, so DJNZ and the NZ/NC/PO/P variants
// take their jump and the Z/C/PE/M variants fall through. Prefix bytes are
// skipped (0).

#[rustfmt::skip]
const OPCODE_TIMING: [u8; 256] = [
     4, // 00 NOP
    10, // 01 LD BC,nn
     7, // 02 LD (BC),A
     6, // 03 INC BC
     4, // 04 INC B
     4, // 05 DEC B
     7, // 06 LD B,n
     4, // 07 RLCA
     4, // 08 EX AF,AF'
    11, // 09 ADD HL,BC
     7, // 0A LD A,(BC)
     6, // 0B DEC BC
     4, // 0C INC C
     4, // 0D DEC C
     7, // 0E LD C,n
     4, // 0F RRCA
    13, // 10 DJNZ (taken)
    10, // 11 LD DE,nn
     7, // 12 LD (DE),A
     6, // 13 INC DE
     4, // 14 INC D
     4, // 15 DEC D
     7, // 16 LD D,n
     4, // 17 RLA
    12, // 18 JR
    11, // 19 ADD HL,DE
     7, // 1A LD A,(DE)
     6, // 1B DEC DE
     4, // 1C INC E
     4, // 1D DEC E
     7, // 1E LD E,n
     4, // 1F RRA
    12, // 20 JR NZ (taken)
    10, // 21 LD HL,nn
    16, // 22 LD (nn),HL
     6, // 23 INC HL
     4, // 24 INC H
     4, // 25 DEC H
     7, // 26 LD H,n
     4, // 27 DAA
     7, // 28 JR Z (not taken)
    11, // 29 ADD HL,HL
    16, // 2A LD HL,(nn)
     6, // 2B DEC HL
     4, // 2C INC L
     4, // 2D DEC L
     7, // 2E LD L,n
     4, // 2F CPL
    12, // 30 JR NC (taken)
    10, // 31 LD SP,nn
    13, // 32 LD (nn),A
     6, // 33 INC SP
    11, // 34 INC (HL)
    11, // 35 DEC (HL)
    10, // 36 LD (HL),n
     4, // 37 SCF
     7, // 38 JR C (not taken)
    11, // 39 ADD HL,SP
    13, // 3A LD A,(nn)
     6, // 3B DEC SP
     4, // 3C INC A
     4, // 3D DEC A
     7, // 3E LD A,n
     4, // 3F CCF
     4, // 40 LD B,B
     4, // 41 LD B,C
     4, // 42 LD B,D
     4, // 43 LD B,E
     4, // 44 LD B,H
     4, // 45 LD B,L
     7, // 46 LD B,(HL)
     4, // 47 LD B,A
     4, // 48 LD C,B
     4, // 49 LD C,C
     4, // 4A LD C,D
     4, // 4B LD C,E
     4, // 4C LD C,H
     4, // 4D LD C,L
     7, // 4E LD C,(HL)
     4, // 4F LD C,A
     4, // 50 LD D,B
     4, // 51 LD D,C
     4, // 52 LD D,D
     4, // 53 LD D,E
     4, // 54 LD D,H
     4, // 55 LD D,L
     7, // 56 LD D,(HL)
     4, // 57 LD D,A
     4, // 58 LD E,B
     4, // 59 LD E,C
     4, // 5A LD E,D
     4, // 5B LD E,E
     4, // 5C LD E,H
     4, // 5D LD E,L
     7, // 5E LD E,(HL)
     4, // 5F LD E,A
     4, // 60 LD H,B
     4, // 61 LD H,C
     4, // 62 LD H,D
     4, // 63 LD H,E
     4, // 64 LD H,H
     4, // 65 LD H,L
     7, // 66 LD H,(HL)
     4, // 67 LD H,A
     4, // 68 LD L,B
     4, // 69 LD L,C
     4, // 6A LD L,D
     4, // 6B LD L,E
     4, // 6C LD L,H
     4, // 6D LD L,L
     7, // 6E LD L,(HL)
     4, // 6F LD L,A
     7, // 70 LD (HL),B
     7, // 71 LD (HL),C
     7, // 72 LD (HL),D
     7, // 73 LD (HL),E
     7, // 74 LD (HL),H
     7, // 75 LD (HL),L
     4, // 76 HALT
     7, // 77 LD (HL),A
     4, // 78 LD A,B
     4, // 79 LD A,C
     4, // 7A LD A,D
     4, // 7B LD A,E
     4, // 7C LD A,H
     4, // 7D LD A,L
     7, // 7E LD A,(HL)
     4, // 7F LD A,A
     4, // 80 ADD A,B
     4, // 81 ADD A,C
     4, // 82 ADD A,D
     4, // 83 ADD A,E
     4, // 84 ADD A,H
     4, // 85 ADD A,L
     7, // 86 ADD A,(HL)
     4, // 87 ADD A,A
     4, // 88 ADC A,B
     4, // 89 ADC A,C
     4, // 8A ADC A,D
     4, // 8B ADC A,E
     4, // 8C ADC A,H
     4, // 8D ADC A,L
     7, // 8E ADC A,(HL)
     4, // 8F ADC A,A
     4, // 90 SUB B
     4, // 91 SUB C
     4, // 92 SUB D
     4, // 93 SUB E
     4, // 94 SUB H
     4, // 95 SUB L
     7, // 96 SUB (HL)
     4, // 97 SUB A
     4, // 98 SBC A,B
     4, // 99 SBC A,C
     4, // 9A SBC A,D
     4, // 9B SBC A,E
     4, // 9C SBC A,H
     4, // 9D SBC A,L
     7, // 9E SBC A,(HL)
     4, // 9F SBC A,A
     4, // A0 AND B
     4, // A1 AND C
     4, // A2 AND D
     4, // A3 AND E
     4, // A4 AND H
     4, // A5 AND L
     7, // A6 AND (HL)
     4, // A7 AND A
     4, // A8 XOR B
     4, // A9 XOR C
     4, // AA XOR D
     4, // AB XOR E
     4, // AC XOR H
     4, // AD XOR L
     7, // AE XOR (HL)
     4, // AF XOR A
     4, // B0 OR B
     4, // B1 OR C
     4, // B2 OR D
     4, // B3 OR E
     4, // B4 OR H
     4, // B5 OR L
     7, // B6 OR (HL)
     4, // B7 OR A
     4, // B8 CP B
     4, // B9 CP C
     4, // BA CP D
     4, // BB CP E
     4, // BC CP H
     4, // BD CP L
     7, // BE CP (HL)
     4, // BF CP A
    11, // C0 RET NZ (taken)
    10, // C1 POP BC
    10, // C2 JP NZ
    10, // C3 JP
    17, // C4 CALL NZ (taken)
    11, // C5 PUSH BC
     7, // C6 ADD A,n
    11, // C7 RST 00
     5, // C8 RET Z (not taken)
    10, // C9 RET
    10, // CA JP Z
     0, // CB prefix
    10, // CC CALL Z (not taken)
    17, // CD CALL
     7, // CE ADC A,n
    11, // CF RST 08
    11, // D0 RET NC (taken)
    10, // D1 POP DE
    10, // D2 JP NC
    11, // D3 OUT (n),A
    17, // D4 CALL NC (taken)
    11, // D5 PUSH DE
     7, // D6 SUB n
    11, // D7 RST 10
     5, // D8 RET C (not taken)
     4, // D9 EXX
    10, // DA JP C
    11, // DB IN A,(n)
    10, // DC CALL C (not taken)
     0, // DD prefix
     7, // DE SBC A,n
    11, // DF RST 18
    11, // E0 RET PO (taken)
    10, // E1 POP HL
    10, // E2 JP PO
    19, // E3 EX (SP),HL
    17, // E4 CALL PO (taken)
    11, // E5 PUSH HL
     7, // E6 AND n
    11, // E7 RST 20
     5, // E8 RET PE (not taken)
     4, // E9 JP (HL)
    10, // EA JP PE
     4, // EB EX DE,HL
    10, // EC CALL PE (not taken)
     0, // ED prefix
     7, // EE XOR n
    11, // EF RST 28
    11, // F0 RET P (taken)
    10, // F1 POP AF
    10, // F2 JP P
     4, // F3 DI
    17, // F4 CALL P (taken)
    11, // F5 PUSH AF
     7, // F6 OR n
    11, // F7 RST 30
     5, // F8 RET M (not taken)
     6, // F9 LD SP,HL
    10, // FA JP M
     4, // FB EI
    10, // FC CALL M (not taken)
     0, // FD prefix
     7, // FE CP n
    11, // FF RST 38
];

#[test]
fn unprefixed_opcode_timing() {
    for opcode in 0..256usize {
        let expected = OPCODE_TIMING[opcode];
        if expected == 0 {
            continue;
        }
        let (mut cpu, mem, tick_fn) = setup();
        mem.borrow_mut()[0x0100] = opcode as u8;
        let ticks = cpu.exec(1, &tick_fn);
        assert_eq!(
            u32::from(expected),
            ticks,
            "opcode 0x{:02x} took {} ticks, expected {}",
            opcode,
            ticks,
            expected
        );
    }
}

#[test]
fn exec_runs_exactly_one_instruction_for_a_one_tick_budget() {
    let (mut cpu, _mem, tick_fn) = setup();
    let ticks = cpu.exec(1, &tick_fn);
    assert_eq!(4, ticks);
    assert_eq!(0x0101, cpu.get_pc());
}

#[test]
fn prefixed_opcode_timing_samples() {
    // (bytes, expected ticks)
    let cases: &[(&[u8], u32)] = &[
        (&[0xdd, 0x21, 0x00, 0x20], 14),       // LD IX,nn
        (&[0xdd, 0x7e, 0x02], 19),             // LD A,(IX+2)
        (&[0xdd, 0x36, 0x02, 0x55], 19),       // LD (IX+2),n
        (&[0xdd, 0x34, 0x02], 23),             // INC (IX+2)
        (&[0xdd, 0xe3], 23),                   // EX (SP),IX
        (&[0xfd, 0xe9], 8),                    // JP (IY)
        (&[0xcb, 0x00], 8),                    // RLC B
        (&[0xcb, 0x46], 12),                   // BIT 0,(HL)
        (&[0xcb, 0xc6], 15),                   // SET 0,(HL)
        (&[0xdd, 0xcb, 0x02, 0x46], 20),       // BIT 0,(IX+2)
        (&[0xdd, 0xcb, 0x02, 0x06], 23),       // RLC (IX+2)
        (&[0xed, 0x47], 9),                    // LD I,A
        (&[0xed, 0x57], 9),                    // LD A,I
        (&[0xed, 0x44], 8),                    // NEG
        (&[0xed, 0x46], 8),                    // IM 0
        (&[0xed, 0x4a], 15),                   // ADC HL,BC
        (&[0xed, 0x43, 0x00, 0x20], 20),       // LD (nn),BC
        (&[0xed, 0x40], 12),                   // IN B,(C)
        (&[0xed, 0x41], 12),                   // OUT (C),B
        (&[0xed, 0x45], 14),                   // RETN
        (&[0xed, 0xa0], 16),                   // LDI
        (&[0xed, 0xa1], 16),                   // CPI
        (&[0xed, 0xa2], 16),                   // INI
        (&[0xed, 0xa3], 16),                   // OUTI
        (&[0xed, 0x67], 18),                   // RRD
        (&[0xed, 0x6f], 18),                   // RLD
        (&[0xed, 0x77], 8),                    // undocumented NONI/NOP
    ];
    for (bytes, expected) in cases {
        let (mut cpu, mem, tick_fn) = setup();
        mem.borrow_mut()[0x0100..0x0100 + bytes.len()].copy_from_slice(bytes);
        let ticks = cpu.exec(1, &tick_fn);
        assert_eq!(
            *expected, ticks,
            "sequence {:02x?} took {} ticks",
            bytes, ticks
        );
    }
}

#[test]
fn block_repeat_timing() {
    let (mut cpu, mem, tick_fn) = setup();
    // LDIR with BC == 3: two repeats at 21 plus the final pass at 16
    mem.borrow_mut()[0x0100] = 0xed;
    mem.borrow_mut()[0x0101] = 0xb0;
    cpu.set_bc(0x0003);
    cpu.set_hl(0x2000);
    cpu.set_de(0x3000);
    let mut total = 0;
    while cpu.get_bc() != 0 {
        total += cpu.exec(1, &tick_fn);
    }
    assert_eq!(21 + 21 + 16, total);
    assert_eq!(0x0102, cpu.get_pc());
}

#[test]
fn wait_states_stretch_machine_cycles() {
    let mem = Rc::new(RefCell::new(vec![0u8; 0x10000]));
    let mem_clone = mem.clone();
    // inject two wait states into every memory cycle
    let tick_fn: TickFn = Rc::new(move |_ticks, mut p| {
        if p & pins::MREQ != 0 {
            if p & pins::RD != 0 {
                let value = mem_clone.borrow()[pins::get_addr(p) as usize];
                p = pins::set_data(p, value);
            } else if p & pins::WR != 0 {
                mem_clone.borrow_mut()[pins::get_addr(p) as usize] = pins::get_data(p);
            }
            p = pins::set_wait(p, 2);
        }
        p
    });
    let mut cpu = Z80::new();
    cpu.set_pc(0x0100);
    // NOP: one M1 cycle -> 4 + 2
    let ticks = cpu.exec(1, &tick_fn);
    assert_eq!(6, ticks);
    // LD B,n: M1 + memory read -> 7 + 4
    mem.borrow_mut()[0x0101] = 0x06;
    let ticks = cpu.exec(1, &tick_fn);
    assert_eq!(11, ticks);
}
