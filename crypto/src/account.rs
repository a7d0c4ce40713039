//! In-memory account shape: a role plus a long-term keypair. Persisting an
//! account to disk (optionally encrypted) is the excluded account-store
//! collaborator's job (SPEC_FULL §6); this type only needs to exist and
//! sign/identify, which every component that holds a local identity needs.

use crate::id::{Id, Role};
use crate::keys::{PrivateKey, Signature};

#[derive(Clone)]
pub struct Account {
	pub role: Role,
	private_key: PrivateKey,
}

impl Account {
	pub fn new(role: Role) -> Account {
		Account {
			role,
			private_key: PrivateKey::generate(),
		}
	}

	pub fn from_private_key(role: Role, private_key: PrivateKey) -> Account {
		Account { role, private_key }
	}

	pub fn id(&self) -> Id {
		Id::from_role_and_pubkey(self.role, &self.private_key.public_key())
	}

	pub fn sign(&self, msg_hash: &[u8; 32]) -> Signature {
		self.private_key.sign(msg_hash)
	}

	pub fn private_key(&self) -> &PrivateKey {
		&self.private_key
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn account_id_matches_role() {
		let acc = Account::new(Role::Researcher);
		assert_eq!(acc.id().role(), Some(Role::Researcher));
	}
}
