//! Device architectures and their multilib classes.
//!
//! A bundle is architecture independent, but the native libraries it embeds
//! are not: one copy is built per architecture the device supports. The
//! [`Multilib`] of an architecture decides whether its libraries land in
//! `lib` or `lib64`, and non-native (translated) architectures get an extra
//! `<arch>` directory level.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BundleError;

/// Pointer-width class of an architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Multilib {
    Lib32,
    Lib64,
}

impl Multilib {
    /// In-image library directory for this class.
    pub fn lib_dir(self) -> &'static str {
        match self {
            Multilib::Lib32 => "lib",
            Multilib::Lib64 => "lib64",
        }
    }
}

/// Architecture types known to the device build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ArchType {
    Arm,
    Arm64,
    Mips,
    Mips64,
    X86,
    X86_64,
    Riscv64,
}

impl ArchType {
    pub fn name(self) -> &'static str {
        match self {
            ArchType::Arm => "arm",
            ArchType::Arm64 => "arm64",
            ArchType::Mips => "mips",
            ArchType::Mips64 => "mips64",
            ArchType::X86 => "x86",
            ArchType::X86_64 => "x86_64",
            ArchType::Riscv64 => "riscv64",
        }
    }

    pub fn multilib(self) -> Multilib {
        match self {
            ArchType::Arm | ArchType::Mips | ArchType::X86 => Multilib::Lib32,
            ArchType::Arm64 | ArchType::Mips64 | ArchType::X86_64 | ArchType::Riscv64 => {
                Multilib::Lib64
            }
        }
    }
}

impl fmt::Display for ArchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ArchType {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arm" => Ok(ArchType::Arm),
            "arm64" => Ok(ArchType::Arm64),
            "mips" => Ok(ArchType::Mips),
            "mips64" => Ok(ArchType::Mips64),
            "x86" => Ok(ArchType::X86),
            "x86_64" => Ok(ArchType::X86_64),
            "riscv64" => Ok(ArchType::Riscv64),
            other => Err(BundleError::UnknownArch(other.to_string())),
        }
    }
}

impl TryFrom<String> for ArchType {
    type Error = BundleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ArchType> for String {
    fn from(value: ArchType) -> Self {
        value.name().to_string()
    }
}

/// One concrete architecture variant of a native module.
///
/// `native` is false for architectures the device only runs through binary
/// translation (native bridge); their libraries are kept apart from the
/// native ones inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Arch {
    pub arch_type: ArchType,
    pub native: bool,
}

impl Arch {
    pub fn native(arch_type: ArchType) -> Self {
        Self {
            arch_type,
            native: true,
        }
    }

    pub fn native_bridge(arch_type: ArchType) -> Self {
        Self {
            arch_type,
            native: false,
        }
    }

    /// Value of the `arch` variation selecting this variant on `os`.
    ///
    /// Native-bridge variants are distinct from native ones of the same type:
    /// `android_arm64` vs `android_arm64_native_bridge`.
    pub fn variation(&self, os: Os) -> String {
        let base = os.arch_variation(self.arch_type);
        if self.native {
            base
        } else {
            format!("{base}_native_bridge")
        }
    }

    /// ABI qualifier used as an extra directory level, only for non-native arches.
    pub fn abi_qualifier(&self) -> Option<&'static str> {
        if self.native {
            None
        } else {
            Some(self.arch_type.name())
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.native {
            write!(f, "{}", self.arch_type)
        } else {
            write!(f, "{} (native bridge)", self.arch_type)
        }
    }
}

/// Operating system of the device the bundle is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Os {
    Android,
    LinuxBionic,
}

impl Os {
    pub fn name(self) -> &'static str {
        match self {
            Os::Android => "android",
            Os::LinuxBionic => "linux_bionic",
        }
    }

    /// Value of the `arch` variation for `arch_type` on this OS, e.g. `android_arm64`.
    pub fn arch_variation(self, arch_type: ArchType) -> String {
        format!("{}_{}", self.name(), arch_type.name())
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parse a list of arch names, keeping the device order (primary first).
pub fn parse_arches<S: AsRef<str>>(names: &[S], native: bool) -> Result<Vec<Arch>, BundleError> {
    names
        .iter()
        .map(|name| {
            let arch_type: ArchType = name.as_ref().parse()?;
            Ok(Arch { arch_type, native })
        })
        .collect()
}
