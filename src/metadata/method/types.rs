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

//! Attribute flags of methods and method bodies.

#![allow(missing_docs)]

use bitflags::bitflags;

pub const METHOD_ACCESS_MASK: u16 = 0x0007;

bitflags! {
    /// Member access (`MethodAttributes` & `MemberAccessMask`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodAccessFlags: u16 {
        const COMPILER_CONTROLLED = 0x0000;
        const PRIVATE = 0x0001;
        const FAM_AND_ASSEM = 0x0002;
        const ASSEM = 0x0003;
        const FAMILY = 0x0004;
        const FAM_OR_ASSEM = 0x0005;
        const PUBLIC = 0x0006;
    }
}

impl MethodAccessFlags {
    #[must_use]
    pub fn from_method_flags(flags: u16) -> Self {
        let access = flags & METHOD_ACCESS_MASK;
        Self::from_bits_truncate(access)
    }
}

bitflags! {
    /// Everything in `MethodAttributes` besides the access bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodModifiers: u16 {
        const STATIC = 0x0010;
        const FINAL = 0x0020;
        const VIRTUAL = 0x0040;
        const HIDE_BY_SIG = 0x0080;
        const NEW_SLOT = 0x0100;
        const STRICT = 0x0200;
        const ABSTRACT = 0x0400;
        const SPECIAL_NAME = 0x0800;
        const RTSPECIAL_NAME = 0x1000;
        const PINVOKE_IMPL = 0x2000;
        const HAS_SECURITY = 0x4000;
        const REQUIRE_SEC_OBJECT = 0x8000;
    }
}

impl MethodModifiers {
    #[must_use]
    pub fn from_method_flags(flags: u16) -> Self {
        Self::from_bits_truncate(flags & !METHOD_ACCESS_MASK)
    }
}

bitflags! {
    /// Flags of the first header word of a method body.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodBodyFlags: u16 {
        const TINY_FORMAT = 0x2;
        const FAT_FORMAT = 0x3;
        const MORE_SECTS = 0x8;
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    /// Flags of an extra data section following the code.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u8 {
        const EHTABLE = 0x1;
        const OPT_ILTABLE = 0x2;
        const FAT_FORMAT = 0x40;
        const MORE_SECTS = 0x80;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_instance() {
        // public hidebysig instance
        let flags = 0x0086;
        assert_eq!(
            MethodAccessFlags::from_method_flags(flags),
            MethodAccessFlags::PUBLIC
        );
        assert!(!MethodModifiers::from_method_flags(flags).contains(MethodModifiers::STATIC));
    }

    #[test]
    fn private_static_special() {
        // private static specialname rtspecialname (.cctor)
        let flags = 0x1811;
        assert_eq!(
            MethodAccessFlags::from_method_flags(flags),
            MethodAccessFlags::PRIVATE
        );
        let modifiers = MethodModifiers::from_method_flags(flags);
        assert!(modifiers.contains(MethodModifiers::STATIC | MethodModifiers::RTSPECIAL_NAME));
    }
}
