//! Multisig account creation
//!
//! Drives the two-phase protocol that deploys a new shared-custody account:
//! an attach transaction signed by an ephemeral key, wrapped in a sponsor
//! transaction paid by a regular account.

pub mod coordinator;

pub use coordinator::{CreationError, CreationPhase, MultisigCreationCoordinator};
