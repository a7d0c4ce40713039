// Copyright 2026 The Ecoin Developers
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

//! Identities, hashing and signing. A-role (`Hospital`, `Researcher`)
//! identities may produce blocks; B-role (`Patient`, `Doctor`) identities
//! only submit and observe transactions.

#[macro_use]
extern crate failure_derive;

pub mod account;
pub mod error;
pub mod hash;
pub mod id;
pub mod keys;

pub use account::Account;
pub use error::Error;
pub use hash::{Hash, HASH_LEN, ZERO_HASH};
pub use id::{Id, Role, ID_LEN};
pub use keys::{PrivateKey, PublicKey, Signature};
