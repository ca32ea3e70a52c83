//! Permissioning data for administered deployments.

use std::collections::BTreeSet;

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};

use unite_primitives::buf::Buf20;
use unite_primitives::params::{AdminKey, ADMIN_KEY_COUNT};

/// Commands an admin quorum may issue while permissioning is active.
#[derive(
    Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize,
)]
pub enum AdminCommand {
    AddToWhitelist(Vec<Buf20>),
    RemoveFromWhitelist(Vec<Buf20>),
    ResetAdmins([AdminKey; ADMIN_KEY_COUNT]),
    EndPermissioning,
}

/// Live permissioning state. Absent entirely on permissionless chains.
#[derive(
    Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize,
)]
pub struct AdminState {
    pub admin_keys: [AdminKey; ADMIN_KEY_COUNT],
    pub white_list: BTreeSet<Buf20>,
    pub permissioning_ended: bool,
}

impl AdminState {
    pub fn new(admin_keys: [AdminKey; ADMIN_KEY_COUNT]) -> Self {
        Self {
            admin_keys,
            white_list: BTreeSet::new(),
            permissioning_ended: false,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.permissioning_ended
    }

    pub fn is_whitelisted(&self, address: &Buf20) -> bool {
        self.white_list.contains(address)
    }

    pub fn is_admin_key(&self, key: &AdminKey) -> bool {
        self.admin_keys.contains(key)
    }
}
