// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Media class - a performance tier backed by distinct storage
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub enum Mclass {
    /// Bulk capacity tier (default)
    Capacity,

    /// Fast staging tier
    Staging,

    /// Persistent memory tier
    Pmem,
}

/// Number of media classes
pub const MCLASS_COUNT: usize = 3;

impl Mclass {
    /// Canonical name of the media class.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::Staging => "staging",
            Self::Pmem => "pmem",
        }
    }

    /// Parses a canonical media class name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "capacity" => Some(Self::Capacity),
            "staging" => Some(Self::Staging),
            "pmem" => Some(Self::Pmem),
            _ => None,
        }
    }
}

impl From<Mclass> for u8 {
    fn from(value: Mclass) -> Self {
        match value {
            Mclass::Capacity => 0,
            Mclass::Staging => 1,
            Mclass::Pmem => 2,
        }
    }
}

impl TryFrom<u8> for Mclass {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Capacity),
            1 => Ok(Self::Staging),
            2 => Ok(Self::Pmem),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Mclass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
