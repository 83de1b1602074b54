//! Opcode metadata: lengths, base cycle counts, and mnemonics.
//!
//! Decoding is by the full opcode byte. The reserved encodings (0x08, 0x10,
//! 0x18, 0x20, 0x28, 0x30, 0x38, 0xCB, 0xD9, 0xDD, 0xFD) execute as NOP and
//! are tabled as one-byte, four-cycle instructions. 0xED is repurposed as
//! the supervisor trap opcode [`SYS`].
//!
//! `CYCLES` holds the not-taken count for conditional CALL and RET; the
//! execute loop adds the six extra states when the condition passes.

/// Supervisor trap opcode. Retiring it latches the system-call flag the
/// host driver consumes between instructions.
pub const SYS: u8 = 0xED;

/// Instruction length in bytes, indexed by opcode.
pub const LENGTHS: [u8; 256] = [
    // 0x00
    1, 3, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1,
    // 0x10
    1, 3, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1,
    // 0x20
    1, 3, 3, 1, 1, 1, 2, 1, 1, 1, 3, 1, 1, 1, 2, 1,
    // 0x30
    1, 3, 3, 1, 1, 1, 2, 1, 1, 1, 3, 1, 1, 1, 2, 1,
    // 0x40
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    // 0x50
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    // 0x60
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    // 0x70
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    // 0x80
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    // 0x90
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    // 0xA0
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    // 0xB0
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    // 0xC0
    1, 1, 3, 3, 3, 1, 2, 1, 1, 1, 3, 1, 3, 3, 2, 1,
    // 0xD0
    1, 1, 3, 2, 3, 1, 2, 1, 1, 1, 3, 2, 3, 1, 2, 1,
    // 0xE0
    1, 1, 3, 1, 3, 1, 2, 1, 1, 1, 3, 1, 3, 1, 2, 1,
    // 0xF0
    1, 1, 3, 1, 3, 1, 2, 1, 1, 1, 3, 1, 3, 1, 2, 1,
];

/// Documented cycle counts, indexed by opcode. Conditional CALL/RET entries
/// are the not-taken counts.
pub const CYCLES: [u8; 256] = [
    // 0x00
    4, 10, 7, 5, 5, 5, 7, 4, 4, 10, 7, 5, 5, 5, 7, 4,
    // 0x10
    4, 10, 7, 5, 5, 5, 7, 4, 4, 10, 7, 5, 5, 5, 7, 4,
    // 0x20
    4, 10, 16, 5, 5, 5, 7, 4, 4, 10, 16, 5, 5, 5, 7, 4,
    // 0x30
    4, 10, 13, 5, 10, 10, 10, 4, 4, 10, 13, 5, 5, 5, 7, 4,
    // 0x40
    5, 5, 5, 5, 5, 5, 7, 5, 5, 5, 5, 5, 5, 5, 7, 5,
    // 0x50
    5, 5, 5, 5, 5, 5, 7, 5, 5, 5, 5, 5, 5, 5, 7, 5,
    // 0x60
    5, 5, 5, 5, 5, 5, 7, 5, 5, 5, 5, 5, 5, 5, 7, 5,
    // 0x70
    7, 7, 7, 7, 7, 7, 7, 7, 5, 5, 5, 5, 5, 5, 7, 5,
    // 0x80
    4, 4, 4, 4, 4, 4, 7, 4, 4, 4, 4, 4, 4, 4, 7, 4,
    // 0x90
    4, 4, 4, 4, 4, 4, 7, 4, 4, 4, 4, 4, 4, 4, 7, 4,
    // 0xA0
    4, 4, 4, 4, 4, 4, 7, 4, 4, 4, 4, 4, 4, 4, 7, 4,
    // 0xB0
    4, 4, 4, 4, 4, 4, 7, 4, 4, 4, 4, 4, 4, 4, 7, 4,
    // 0xC0
    5, 10, 10, 10, 11, 11, 7, 11, 5, 10, 10, 4, 11, 17, 7, 11,
    // 0xD0
    5, 10, 10, 10, 11, 11, 7, 11, 5, 4, 10, 10, 11, 4, 7, 11,
    // 0xE0
    5, 10, 10, 18, 11, 11, 7, 11, 5, 5, 10, 4, 11, 11, 7, 11,
    // 0xF0
    5, 10, 10, 4, 11, 11, 7, 11, 5, 5, 10, 4, 11, 4, 7, 11,
];

/// Assembler mnemonics for the trace output.
pub const MNEMONICS: [&str; 256] = [
    // 0x00
    "NOP", "LXI B,d16", "STAX B", "INX B", "INR B", "DCR B", "MVI B,d8", "RLC",
    "NOP", "DAD B", "LDAX B", "DCX B", "INR C", "DCR C", "MVI C,d8", "RRC",
    // 0x10
    "NOP", "LXI D,d16", "STAX D", "INX D", "INR D", "DCR D", "MVI D,d8", "RAL",
    "NOP", "DAD D", "LDAX D", "DCX D", "INR E", "DCR E", "MVI E,d8", "RAR",
    // 0x20
    "NOP", "LXI H,d16", "SHLD a16", "INX H", "INR H", "DCR H", "MVI H,d8", "DAA",
    "NOP", "DAD H", "LHLD a16", "DCX H", "INR L", "DCR L", "MVI L,d8", "CMA",
    // 0x30
    "NOP", "LXI SP,d16", "STA a16", "INX SP", "INR M", "DCR M", "MVI M,d8", "STC",
    "NOP", "DAD SP", "LDA a16", "DCX SP", "INR A", "DCR A", "MVI A,d8", "CMC",
    // 0x40
    "MOV B,B", "MOV B,C", "MOV B,D", "MOV B,E", "MOV B,H", "MOV B,L", "MOV B,M", "MOV B,A",
    "MOV C,B", "MOV C,C", "MOV C,D", "MOV C,E", "MOV C,H", "MOV C,L", "MOV C,M", "MOV C,A",
    // 0x50
    "MOV D,B", "MOV D,C", "MOV D,D", "MOV D,E", "MOV D,H", "MOV D,L", "MOV D,M", "MOV D,A",
    "MOV E,B", "MOV E,C", "MOV E,D", "MOV E,E", "MOV E,H", "MOV E,L", "MOV E,M", "MOV E,A",
    // 0x60
    "MOV H,B", "MOV H,C", "MOV H,D", "MOV H,E", "MOV H,H", "MOV H,L", "MOV H,M", "MOV H,A",
    "MOV L,B", "MOV L,C", "MOV L,D", "MOV L,E", "MOV L,H", "MOV L,L", "MOV L,M", "MOV L,A",
    // 0x70
    "MOV M,B", "MOV M,C", "MOV M,D", "MOV M,E", "MOV M,H", "MOV M,L", "HLT", "MOV M,A",
    "MOV A,B", "MOV A,C", "MOV A,D", "MOV A,E", "MOV A,H", "MOV A,L", "MOV A,M", "MOV A,A",
    // 0x80
    "ADD B", "ADD C", "ADD D", "ADD E", "ADD H", "ADD L", "ADD M", "ADD A",
    "ADC B", "ADC C", "ADC D", "ADC E", "ADC H", "ADC L", "ADC M", "ADC A",
    // 0x90
    "SUB B", "SUB C", "SUB D", "SUB E", "SUB H", "SUB L", "SUB M", "SUB A",
    "SBB B", "SBB C", "SBB D", "SBB E", "SBB H", "SBB L", "SBB M", "SBB A",
    // 0xA0
    "ANA B", "ANA C", "ANA D", "ANA E", "ANA H", "ANA L", "ANA M", "ANA A",
    "XRA B", "XRA C", "XRA D", "XRA E", "XRA H", "XRA L", "XRA M", "XRA A",
    // 0xB0
    "ORA B", "ORA C", "ORA D", "ORA E", "ORA H", "ORA L", "ORA M", "ORA A",
    "CMP B", "CMP C", "CMP D", "CMP E", "CMP H", "CMP L", "CMP M", "CMP A",
    // 0xC0
    "RNZ", "POP B", "JNZ a16", "JMP a16", "CNZ a16", "PUSH B", "ADI d8", "RST 0",
    "RZ", "RET", "JZ a16", "NOP", "CZ a16", "CALL a16", "ACI d8", "RST 1",
    // 0xD0
    "RNC", "POP D", "JNC a16", "OUT d8", "CNC a16", "PUSH D", "SUI d8", "RST 2",
    "RC", "NOP", "JC a16", "IN d8", "CC a16", "NOP", "SBI d8", "RST 3",
    // 0xE0
    "RPO", "POP H", "JPO a16", "XTHL", "CPO a16", "PUSH H", "ANI d8", "RST 4",
    "RPE", "PCHL", "JPE a16", "XCHG", "CPE a16", "SYS", "XRI d8", "RST 5",
    // 0xF0
    "RP", "POP PSW", "JP a16", "DI", "CP a16", "PUSH PSW", "ORI d8", "RST 6",
    "RM", "SPHL", "JM a16", "EI", "CM a16", "NOP", "CPI d8", "RST 7",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_spot_checks() {
        assert_eq!(LENGTHS[0x00], 1); // NOP
        assert_eq!(LENGTHS[0x01], 3); // LXI B
        assert_eq!(LENGTHS[0x06], 2); // MVI B
        assert_eq!(LENGTHS[0x22], 3); // SHLD
        assert_eq!(LENGTHS[0xC3], 3); // JMP
        assert_eq!(LENGTHS[0xD3], 2); // OUT
        assert_eq!(LENGTHS[usize::from(SYS)], 1);

        assert_eq!(CYCLES[0x00], 4); // NOP
        assert_eq!(CYCLES[0x76], 7); // HLT
        assert_eq!(CYCLES[0xCD], 17); // CALL
        assert_eq!(CYCLES[0xC4], 11); // CNZ not taken
        assert_eq!(CYCLES[0xC0], 5); // RNZ not taken
        assert_eq!(CYCLES[0xE3], 18); // XTHL
    }

    #[test]
    fn mov_rows_are_uniform() {
        for opcode in 0x40..=0x7F {
            if opcode == 0x76 {
                continue; // HLT
            }
            assert_eq!(LENGTHS[opcode], 1);
            let memory_op = opcode & 0x07 == 0x06 || opcode & 0xF8 == 0x70;
            assert_eq!(CYCLES[opcode], if memory_op { 7 } else { 5 }, "opcode {opcode:#04x}");
        }
    }

    #[test]
    fn alu_rows_are_uniform() {
        for opcode in 0x80..=0xBF {
            assert_eq!(LENGTHS[opcode], 1);
            let memory_op = opcode & 0x07 == 0x06;
            assert_eq!(CYCLES[opcode], if memory_op { 7 } else { 4 }, "opcode {opcode:#04x}");
        }
    }
}
