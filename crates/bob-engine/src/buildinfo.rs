// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

//! Version constants and host-platform identification for audit trails
//! (spec.md §3's supplemented fields), mirroring `serpent_buildinfo`.

/// `bob`'s own version, embedded in every audit trail's `bob.version` field.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The closest stand-in for the original's architecture targeting: whether
/// a step runs as the host's native architecture or an emulated 32-bit one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Native,
    Emul32,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Native => "native",
            Platform::Emul32 => "emul32",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves `BOB_HOST_PLATFORM` from the running host's architecture triple.
/// Anything other than the recognized 32-bit emulation targets is `Native`.
pub fn host_platform() -> Platform {
    match std::env::consts::ARCH {
        "x86" | "arm" => Platform::Emul32,
        _ => Platform::Native,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn version_is_embedded_at_compile_time() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn platform_round_trips_through_display() {
        assert_eq!(Platform::Native.to_string(), "native");
        assert_eq!(Platform::Emul32.to_string(), "emul32");
    }
}
