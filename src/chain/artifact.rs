//! Contract initialization artifact
//!
//! The multisig contract interface and bytecode are fixed external constants
//! shipped with the crate, never derived at runtime.

use crate::model::SUPPORTED_CONTRACT_VERSION;

/// Compiled bytecode of the simple multisig contract.
const SIMPLE_MULTISIG_BYTECODE: &[u8] = include_bytes!("simple_multisig.aeb");

/// A deployable contract: interface name, version and compiled code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractArtifact {
    pub name: &'static str,
    pub version: u32,
    pub bytecode: &'static [u8],
}

/// The simple multisig generalized-account contract.
pub const SIMPLE_MULTISIG_ARTIFACT: ContractArtifact = ContractArtifact {
    name: "SimpleGAMultiSig",
    version: SUPPORTED_CONTRACT_VERSION,
    bytecode: SIMPLE_MULTISIG_BYTECODE,
};
