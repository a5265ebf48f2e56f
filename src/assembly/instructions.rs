// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Static opcode tables for the CIL instruction set.
//!
//! Reserved slots have an empty mnemonic. [`crate::assembly::lookup`] treats them as invalid.

use crate::assembly::instruction::{FlowType, OperandType};

/// Static description of one opcode.
#[derive(Debug, Clone, Copy)]
pub struct CilInstruction<'a> {
    /// Mnemonic, empty for reserved opcodes
    pub instr: &'a str,
    /// Encoded operand shape
    pub op_type: OperandType,
    /// Control flow behavior
    pub flow: FlowType,
}

macro_rules! op {
    ($name:literal, $op_type:ident, $flow:ident) => {
        CilInstruction {
            instr: $name,
            op_type: OperandType::$op_type,
            flow: FlowType::$flow,
        }
    };
}

const RESERVED: CilInstruction<'static> = CilInstruction {
    instr: "",
    op_type: OperandType::None,
    flow: FlowType::Sequential,
};

/// Single-byte opcodes, indexed by opcode.
pub const INSTRUCTIONS: [CilInstruction<'static>; 225] = [
    op!("nop", None, Sequential), // 0x00
    op!("break", None, Sequential), // 0x01
    op!("ldarg.0", None, Sequential), // 0x02
    op!("ldarg.1", None, Sequential), // 0x03
    op!("ldarg.2", None, Sequential), // 0x04
    op!("ldarg.3", None, Sequential), // 0x05
    op!("ldloc.0", None, Sequential), // 0x06
    op!("ldloc.1", None, Sequential), // 0x07
    op!("ldloc.2", None, Sequential), // 0x08
    op!("ldloc.3", None, Sequential), // 0x09
    op!("stloc.0", None, Sequential), // 0x0A
    op!("stloc.1", None, Sequential), // 0x0B
    op!("stloc.2", None, Sequential), // 0x0C
    op!("stloc.3", None, Sequential), // 0x0D
    op!("ldarg.s", UInt8, Sequential), // 0x0E
    op!("ldarga.s", UInt8, Sequential), // 0x0F
    op!("starg.s", UInt8, Sequential), // 0x10
    op!("ldloc.s", UInt8, Sequential), // 0x11
    op!("ldloca.s", UInt8, Sequential), // 0x12
    op!("stloc.s", UInt8, Sequential), // 0x13
    op!("ldnull", None, Sequential), // 0x14
    op!("ldc.i4.m1", None, Sequential), // 0x15
    op!("ldc.i4.0", None, Sequential), // 0x16
    op!("ldc.i4.1", None, Sequential), // 0x17
    op!("ldc.i4.2", None, Sequential), // 0x18
    op!("ldc.i4.3", None, Sequential), // 0x19
    op!("ldc.i4.4", None, Sequential), // 0x1A
    op!("ldc.i4.5", None, Sequential), // 0x1B
    op!("ldc.i4.6", None, Sequential), // 0x1C
    op!("ldc.i4.7", None, Sequential), // 0x1D
    op!("ldc.i4.8", None, Sequential), // 0x1E
    op!("ldc.i4.s", Int8, Sequential), // 0x1F
    op!("ldc.i4", Int32, Sequential), // 0x20
    op!("ldc.i8", Int64, Sequential), // 0x21
    op!("ldc.r4", Float32, Sequential), // 0x22
    op!("ldc.r8", Float64, Sequential), // 0x23
    RESERVED, // 0x24
    op!("dup", None, Sequential), // 0x25
    op!("pop", None, Sequential), // 0x26
    op!("jmp", Token, Call), // 0x27
    op!("call", Token, Call), // 0x28
    op!("calli", Token, Call), // 0x29
    op!("ret", None, Return), // 0x2A
    op!("br.s", Int8, UnconditionalBranch), // 0x2B
    op!("brfalse.s", Int8, ConditionalBranch), // 0x2C
    op!("brtrue.s", Int8, ConditionalBranch), // 0x2D
    op!("beq.s", Int8, ConditionalBranch), // 0x2E
    op!("bge.s", Int8, ConditionalBranch), // 0x2F
    op!("bgt.s", Int8, ConditionalBranch), // 0x30
    op!("ble.s", Int8, ConditionalBranch), // 0x31
    op!("blt.s", Int8, ConditionalBranch), // 0x32
    op!("bne.un.s", Int8, ConditionalBranch), // 0x33
    op!("bge.un.s", Int8, ConditionalBranch), // 0x34
    op!("bgt.un.s", Int8, ConditionalBranch), // 0x35
    op!("ble.un.s", Int8, ConditionalBranch), // 0x36
    op!("blt.un.s", Int8, ConditionalBranch), // 0x37
    op!("br", Int32, UnconditionalBranch), // 0x38
    op!("brfalse", Int32, ConditionalBranch), // 0x39
    op!("brtrue", Int32, ConditionalBranch), // 0x3A
    op!("beq", Int32, ConditionalBranch), // 0x3B
    op!("bge", Int32, ConditionalBranch), // 0x3C
    op!("bgt", Int32, ConditionalBranch), // 0x3D
    op!("ble", Int32, ConditionalBranch), // 0x3E
    op!("blt", Int32, ConditionalBranch), // 0x3F
    op!("bne.un", Int32, ConditionalBranch), // 0x40
    op!("bge.un", Int32, ConditionalBranch), // 0x41
    op!("bgt.un", Int32, ConditionalBranch), // 0x42
    op!("ble.un", Int32, ConditionalBranch), // 0x43
    op!("blt.un", Int32, ConditionalBranch), // 0x44
    op!("switch", Switch, Switch), // 0x45
    op!("ldind.i1", None, Sequential), // 0x46
    op!("ldind.u1", None, Sequential), // 0x47
    op!("ldind.i2", None, Sequential), // 0x48
    op!("ldind.u2", None, Sequential), // 0x49
    op!("ldind.i4", None, Sequential), // 0x4A
    op!("ldind.u4", None, Sequential), // 0x4B
    op!("ldind.i8", None, Sequential), // 0x4C
    op!("ldind.i", None, Sequential), // 0x4D
    op!("ldind.r4", None, Sequential), // 0x4E
    op!("ldind.r8", None, Sequential), // 0x4F
    op!("ldind.ref", None, Sequential), // 0x50
    op!("stind.ref", None, Sequential), // 0x51
    op!("stind.i1", None, Sequential), // 0x52
    op!("stind.i2", None, Sequential), // 0x53
    op!("stind.i4", None, Sequential), // 0x54
    op!("stind.i8", None, Sequential), // 0x55
    op!("stind.r4", None, Sequential), // 0x56
    op!("stind.r8", None, Sequential), // 0x57
    op!("add", None, Sequential), // 0x58
    op!("sub", None, Sequential), // 0x59
    op!("mul", None, Sequential), // 0x5A
    op!("div", None, Sequential), // 0x5B
    op!("div.un", None, Sequential), // 0x5C
    op!("rem", None, Sequential), // 0x5D
    op!("rem.un", None, Sequential), // 0x5E
    op!("and", None, Sequential), // 0x5F
    op!("or", None, Sequential), // 0x60
    op!("xor", None, Sequential), // 0x61
    op!("shl", None, Sequential), // 0x62
    op!("shr", None, Sequential), // 0x63
    op!("shr.un", None, Sequential), // 0x64
    op!("neg", None, Sequential), // 0x65
    op!("not", None, Sequential), // 0x66
    op!("conv.i1", None, Sequential), // 0x67
    op!("conv.i2", None, Sequential), // 0x68
    op!("conv.i4", None, Sequential), // 0x69
    op!("conv.i8", None, Sequential), // 0x6A
    op!("conv.r4", None, Sequential), // 0x6B
    op!("conv.r8", None, Sequential), // 0x6C
    op!("conv.u4", None, Sequential), // 0x6D
    op!("conv.u8", None, Sequential), // 0x6E
    op!("callvirt", Token, Call), // 0x6F
    op!("cpobj", Token, Sequential), // 0x70
    op!("ldobj", Token, Sequential), // 0x71
    op!("ldstr", Token, Sequential), // 0x72
    op!("newobj", Token, Call), // 0x73
    op!("castclass", Token, Sequential), // 0x74
    op!("isinst", Token, Sequential), // 0x75
    op!("conv.r.un", None, Sequential), // 0x76
    RESERVED, // 0x77
    RESERVED, // 0x78
    op!("unbox", Token, Sequential), // 0x79
    op!("throw", None, Throw), // 0x7A
    op!("ldfld", Token, Sequential), // 0x7B
    op!("ldflda", Token, Sequential), // 0x7C
    op!("stfld", Token, Sequential), // 0x7D
    op!("ldsfld", Token, Sequential), // 0x7E
    op!("ldsflda", Token, Sequential), // 0x7F
    op!("stsfld", Token, Sequential), // 0x80
    op!("stobj", Token, Sequential), // 0x81
    op!("conv.ovf.i1.un", None, Sequential), // 0x82
    op!("conv.ovf.i2.un", None, Sequential), // 0x83
    op!("conv.ovf.i4.un", None, Sequential), // 0x84
    op!("conv.ovf.i8.un", None, Sequential), // 0x85
    op!("conv.ovf.u1.un", None, Sequential), // 0x86
    op!("conv.ovf.u2.un", None, Sequential), // 0x87
    op!("conv.ovf.u4.un", None, Sequential), // 0x88
    op!("conv.ovf.u8.un", None, Sequential), // 0x89
    op!("conv.ovf.i.un", None, Sequential), // 0x8A
    op!("conv.ovf.u.un", None, Sequential), // 0x8B
    op!("box", Token, Sequential), // 0x8C
    op!("newarr", Token, Sequential), // 0x8D
    op!("ldlen", None, Sequential), // 0x8E
    op!("ldelema", Token, Sequential), // 0x8F
    op!("ldelem.i1", None, Sequential), // 0x90
    op!("ldelem.u1", None, Sequential), // 0x91
    op!("ldelem.i2", None, Sequential), // 0x92
    op!("ldelem.u2", None, Sequential), // 0x93
    op!("ldelem.i4", None, Sequential), // 0x94
    op!("ldelem.u4", None, Sequential), // 0x95
    op!("ldelem.i8", None, Sequential), // 0x96
    op!("ldelem.i", None, Sequential), // 0x97
    op!("ldelem.r4", None, Sequential), // 0x98
    op!("ldelem.r8", None, Sequential), // 0x99
    op!("ldelem.ref", None, Sequential), // 0x9A
    op!("stelem.i", None, Sequential), // 0x9B
    op!("stelem.i1", None, Sequential), // 0x9C
    op!("stelem.i2", None, Sequential), // 0x9D
    op!("stelem.i4", None, Sequential), // 0x9E
    op!("stelem.i8", None, Sequential), // 0x9F
    op!("stelem.r4", None, Sequential), // 0xA0
    op!("stelem.r8", None, Sequential), // 0xA1
    op!("stelem.ref", None, Sequential), // 0xA2
    op!("ldelem", Token, Sequential), // 0xA3
    op!("stelem", Token, Sequential), // 0xA4
    op!("unbox.any", Token, Sequential), // 0xA5
    RESERVED, // 0xA6
    RESERVED, // 0xA7
    RESERVED, // 0xA8
    RESERVED, // 0xA9
    RESERVED, // 0xAA
    RESERVED, // 0xAB
    RESERVED, // 0xAC
    RESERVED, // 0xAD
    RESERVED, // 0xAE
    RESERVED, // 0xAF
    RESERVED, // 0xB0
    RESERVED, // 0xB1
    RESERVED, // 0xB2
    op!("conv.ovf.i1", None, Sequential), // 0xB3
    op!("conv.ovf.u1", None, Sequential), // 0xB4
    op!("conv.ovf.i2", None, Sequential), // 0xB5
    op!("conv.ovf.u2", None, Sequential), // 0xB6
    op!("conv.ovf.i4", None, Sequential), // 0xB7
    op!("conv.ovf.u4", None, Sequential), // 0xB8
    op!("conv.ovf.i8", None, Sequential), // 0xB9
    op!("conv.ovf.u8", None, Sequential), // 0xBA
    RESERVED, // 0xBB
    RESERVED, // 0xBC
    RESERVED, // 0xBD
    RESERVED, // 0xBE
    RESERVED, // 0xBF
    RESERVED, // 0xC0
    RESERVED, // 0xC1
    op!("refanyval", Token, Sequential), // 0xC2
    op!("ckfinite", None, Sequential), // 0xC3
    RESERVED, // 0xC4
    RESERVED, // 0xC5
    op!("mkrefany", Token, Sequential), // 0xC6
    RESERVED, // 0xC7
    RESERVED, // 0xC8
    RESERVED, // 0xC9
    RESERVED, // 0xCA
    RESERVED, // 0xCB
    RESERVED, // 0xCC
    RESERVED, // 0xCD
    RESERVED, // 0xCE
    RESERVED, // 0xCF
    op!("ldtoken", Token, Sequential), // 0xD0
    op!("conv.u2", None, Sequential), // 0xD1
    op!("conv.u1", None, Sequential), // 0xD2
    op!("conv.i", None, Sequential), // 0xD3
    op!("conv.ovf.i", None, Sequential), // 0xD4
    op!("conv.ovf.u", None, Sequential), // 0xD5
    op!("add.ovf", None, Sequential), // 0xD6
    op!("add.ovf.un", None, Sequential), // 0xD7
    op!("mul.ovf", None, Sequential), // 0xD8
    op!("mul.ovf.un", None, Sequential), // 0xD9
    op!("sub.ovf", None, Sequential), // 0xDA
    op!("sub.ovf.un", None, Sequential), // 0xDB
    op!("endfinally", None, EndFinally), // 0xDC
    op!("leave", Int32, Leave), // 0xDD
    op!("leave.s", Int8, Leave), // 0xDE
    op!("stind.i", None, Sequential), // 0xDF
    op!("conv.u", None, Sequential), // 0xE0
];

/// Opcodes following the `0xFE` prefix byte, indexed by the second byte.
pub const INSTRUCTIONS_FE: [CilInstruction<'static>; 31] = [
    op!("arglist", None, Sequential), // 0x00
    op!("ceq", None, Sequential), // 0x01
    op!("cgt", None, Sequential), // 0x02
    op!("cgt.un", None, Sequential), // 0x03
    op!("clt", None, Sequential), // 0x04
    op!("clt.un", None, Sequential), // 0x05
    op!("ldftn", Token, Sequential), // 0x06
    op!("ldvirtftn", Token, Sequential), // 0x07
    RESERVED, // 0x08
    op!("ldarg", UInt16, Sequential), // 0x09
    op!("ldarga", UInt16, Sequential), // 0x0A
    op!("starg", UInt16, Sequential), // 0x0B
    op!("ldloc", UInt16, Sequential), // 0x0C
    op!("ldloca", UInt16, Sequential), // 0x0D
    op!("stloc", UInt16, Sequential), // 0x0E
    op!("localloc", None, Sequential), // 0x0F
    RESERVED, // 0x10
    op!("endfilter", None, EndFinally), // 0x11
    op!("unaligned.", UInt8, Prefix), // 0x12
    op!("volatile.", None, Prefix), // 0x13
    op!("tail.", None, Prefix), // 0x14
    op!("initobj", Token, Sequential), // 0x15
    op!("constrained.", Token, Prefix), // 0x16
    op!("cpblk", None, Sequential), // 0x17
    op!("initblk", None, Sequential), // 0x18
    op!("no.", UInt8, Prefix), // 0x19
    op!("rethrow", None, Throw), // 0x1A
    RESERVED, // 0x1B
    op!("sizeof", Token, Sequential), // 0x1C
    op!("refanytype", None, Sequential), // 0x1D
    op!("readonly.", None, Prefix), // 0x1E
];
