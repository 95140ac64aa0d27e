//! Core identifier and address types.
//!
//! Zero-cost newtypes keep instance IDs, port numbers and VLAN IDs from being
//! mixed up at call sites. All newtypes use `#[repr(transparent)]`.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};

/// Generates a transparent newtype with display prefix and raw-value conversions.
macro_rules! linaps_newtype {
    (
        $(#[$meta:meta])*
        $name:ident($inner:ty) => $prefix:literal
        $(, custom_methods: { $($custom:tt)* })?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[derive(Serialize, Deserialize)]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            /// Creates a new instance
            #[inline]
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Raw value
            #[inline]
            pub const fn value(self) -> $inner {
                self.0
            }

            $($($custom)*)?
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl Deref for $name {
            type Target = $inner;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl PartialEq<$inner> for $name {
            #[inline]
            fn eq(&self, other: &$inner) -> bool {
                self.0 == *other
            }
        }

        impl PartialEq<$name> for $inner {
            #[inline]
            fn eq(&self, other: &$name) -> bool {
                *self == other.0
            }
        }
    };
}

linaps_newtype!(
    /// Identifier of one protected working/protect pair.
    InstanceId(u32) => "#"
);

linaps_newtype!(
    /// Physical port number as known to the platform.
    PortNo(u32) => "port "
);

linaps_newtype!(
    /// 802.1Q VLAN identifier; zero means untagged.
    VlanId(u16) => "VID",
    custom_methods: {
        /// Whether this VLAN means "send untagged".
        #[inline]
        pub const fn is_untagged(self) -> bool {
            self.0 == 0
        }
    }
);

linaps_newtype!(
    /// Maintenance entity group level (0..=7).
    MegLevel(u8) => "L",
    custom_methods: {
        /// Last byte of the L-APS destination MAC for this level.
        #[inline]
        pub const fn dmac_suffix(self) -> u8 {
            0x30 | (self.0 & 0x07)
        }
    }
);

/// 48-bit Ethernet MAC address.
///
/// Serialized as its display string (`aa-bb-cc-dd-ee-ff`) so configuration
/// files stay readable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, SerializeDisplay, DeserializeFromStr)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// The all-zero address, meaning "derive from the protect port".
    pub const ZERO: Self = Self([0; 6]);

    /// Whether all octets are zero.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Whether the group (I/G) bit is set.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Raw octets.
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}-{b:02x}-{c:02x}-{d:02x}-{e:02x}-{g:02x}")
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Error returned when a MAC address string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid MAC address: '{0}'")]
pub struct MacAddrParseError(pub String);

impl FromStr for MacAddr {
    type Err = MacAddrParseError;

    /// Accepts six hex octets separated by `-` or `:`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(['-', ':']);
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| MacAddrParseError(s.to_string()))?;
            if part.len() != 2 {
                return Err(MacAddrParseError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| MacAddrParseError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(MacAddrParseError(s.to_string()));
        }
        Ok(MacAddr(octets))
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }
}
