//! Per-table network identity.
//!
//! A table's VLAN, gateway and per-role addresses are pure functions of
//! the table number. Nothing here is ever persisted; callers recompute.

use std::fmt;
use std::net::Ipv4Addr;

use thiserror::Error;

/// VLAN tag of table 0.
pub const VLAN_BASE: u32 = 50;

/// Last octet of the attacker resource.
pub const ATTACKER_OCTET: u8 = 100;

/// Last octet of the first target resource; later targets count up.
pub const FIRST_TARGET_OCTET: u8 = 101;

/// Prefix length of every table subnet.
pub const PREFIX_LEN: u8 = 24;

/// Highest table number whose VLAN still fits the third address octet.
pub const MAX_TABLE_NUMBER: u32 = 255 - VLAN_BASE;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("table {table} is out of range (max {MAX_TABLE_NUMBER})")]
    TableOutOfRange { table: u32 },
}

/// VLAN tag for a table: `50 + table`, saturating at `u32::MAX`.
pub fn vlan_for_table(table: u32) -> u32 {
    VLAN_BASE.saturating_add(table)
}

/// Gateway address for a table: `10.10.{vlan}.1`.
pub fn gateway_for_table(table: u32) -> String {
    format!("10.10.{}.1", vlan_for_table(table))
}

/// Validated network identity of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableNetwork {
    table: u32,
    vlan: u8,
}

impl TableNetwork {
    pub fn for_table(table: u32) -> Result<Self, NetworkError> {
        let vlan = u8::try_from(vlan_for_table(table))
            .map_err(|_| NetworkError::TableOutOfRange { table })?;
        Ok(Self { table, vlan })
    }

    pub fn table(&self) -> u32 {
        self.table
    }

    pub fn vlan(&self) -> u32 {
        u32::from(self.vlan)
    }

    pub fn gateway(&self) -> Ipv4Addr {
        Ipv4Addr::new(10, 10, self.vlan, 1)
    }

    /// Host address for a given last octet.
    pub fn host(&self, octet: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 10, self.vlan, octet)
    }

    /// Interface assignment for the attacker.
    pub fn attacker(&self) -> HostAssignment {
        self.assignment(ATTACKER_OCTET)
    }

    /// Interface assignment for the target at `position` (0-based).
    pub fn target(&self, position: u8) -> HostAssignment {
        self.assignment(FIRST_TARGET_OCTET.saturating_add(position))
    }

    fn assignment(&self, octet: u8) -> HostAssignment {
        HostAssignment {
            address: self.host(octet),
            prefix_len: PREFIX_LEN,
            gateway: self.gateway(),
            vlan: self.vlan(),
        }
    }
}

/// One interface's address, gateway and VLAN tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostAssignment {
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub gateway: Ipv4Addr,
    pub vlan: u32,
}

impl HostAssignment {
    /// `a.b.c.d/len` form.
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.address, self.prefix_len)
    }
}

impl fmt::Display for HostAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} gw {} vlan {}", self.cidr(), self.gateway, self.vlan)
    }
}
