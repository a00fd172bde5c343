use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use crate::config::{BackendConfiguration, QueryName};

/// Set of optional operations a backend supports.
///
/// Bit values are the host's action constants.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const CREATE_USER: Self = Self(0x0000_0001);
    pub const SET_PASSWORD: Self = Self(0x0000_0010);
    pub const CHECK_PASSWORD: Self = Self(0x0000_0100);
    pub const GET_HOME: Self = Self(0x0000_1000);
    pub const GET_DISPLAY_NAME: Self = Self(0x0001_0000);
    pub const SET_DISPLAY_NAME: Self = Self(0x0010_0000);
    pub const COUNT_USERS: Self = Self(0x1000_0000);

    const NAMED: [(Capabilities, &'static str); 7] = [
        (Self::CREATE_USER, "CreateUser"),
        (Self::SET_PASSWORD, "SetPassword"),
        (Self::CHECK_PASSWORD, "CheckPassword"),
        (Self::GET_HOME, "GetHome"),
        (Self::GET_DISPLAY_NAME, "GetDisplayName"),
        (Self::SET_DISPLAY_NAME, "SetDisplayName"),
        (Self::COUNT_USERS, "CountUsers"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Self::NAMED
            .iter()
            .fold(Self::empty(), |acc, (flag, _)| acc | *flag)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Keep only bits this crate knows about.
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::all().0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Host-facing names of the flags in this set.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMED
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
    }

    /// Derive the supported set from which templates are configured.
    ///
    /// CheckPassword needs both the hash lookup and the existence check;
    /// every other flag follows its own template.
    pub fn from_configuration(config: &BackendConfiguration) -> Self {
        let mut capabilities = Self::empty();

        if config.has_query(QueryName::GetPasswordHashForUser)
            && config.has_query(QueryName::UserExists)
        {
            capabilities.insert(Self::CHECK_PASSWORD);
        }

        for (flag, query) in [
            (Self::CREATE_USER, QueryName::CreateUser),
            (Self::SET_PASSWORD, QueryName::SetPasswordForUser),
            (Self::GET_HOME, QueryName::GetHome),
            (Self::GET_DISPLAY_NAME, QueryName::GetDisplayName),
            (Self::SET_DISPLAY_NAME, QueryName::SetDisplayName),
            (Self::COUNT_USERS, QueryName::CountUsers),
        ] {
            if config.has_query(query) {
                capabilities.insert(flag);
            }
        }

        capabilities
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Capabilities {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.names().collect();
        f.write_str(&names.join(" | "))
    }
}
