//! # otvp-keyring
//!
//! Agent signing key lifecycle for the OTVP trust attestation engine.
//!
//! One Ed25519 key pair per agent. The key is generated from OS entropy on
//! first use, persisted as PKCS#8 PEM with owner-only permissions, and loaded
//! on every later start. Only the public half is ever exposed.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use otvp_keyring::KeyStore;
//!
//! let store = KeyStore::new("/var/lib/otvp/keys");
//! let keypair = store.load_or_generate()?;
//!
//! let signature = otvp_crypto::sign_record(&record, &keypair)?;
//! let public_key = keypair.public_key();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type

mod error;
mod keypair;
mod store;
mod types;

pub use error::KeyringError;
pub use keypair::{AgentKeyPair, AgentPublicKey};
pub use store::{KeyStore, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
pub use types::{KeyInfo, KeyStorage};
