//! Known network deployments.

use alloy_primitives::{Address, address};

/// Arbitrum Sepolia (testnet) chain ID.
pub const ARBITRUM_SEPOLIA: u64 = 421_614;

/// USDC contract address on Arbitrum Sepolia.
pub const USDC_ARBITRUM_SEPOLIA: Address = address!("75faf114eafb1BDbe2F0316DF893fd58CE46AA4d");

/// Circle token paymaster on Arbitrum Sepolia.
pub const PAYMASTER_ARBITRUM_SEPOLIA: Address =
    address!("31BE08D380A21fc740883c0BC434FcFc88740b58");

/// Canonical ERC-4337 v0.7 entry point, same address on every chain.
pub const ENTRY_POINT_V07: Address = address!("0000000071727De22E5E9d8BAf0edAc6f37da032");

/// ZeroDev ECDSA validator for Kernel v0.3, same address on every chain.
pub const KERNEL_ECDSA_VALIDATOR: Address = address!("845ADb2C711129d4f3966735eD98a9F09fC4cE57");

/// Pimlico public bundler endpoint for Arbitrum Sepolia.
pub const PIMLICO_ARBITRUM_SEPOLIA: &str = "https://public.pimlico.io/v2/421614/rpc";

/// Deployment set of one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    /// EIP-155 chain ID.
    pub chain_id: u64,
    /// Payment token.
    pub token: Address,
    /// Token paymaster accepting permits for `token`.
    pub sponsor: Address,
    /// Entry point the paymaster is staked with.
    pub entry_point: Address,
    /// Default public bundler.
    pub bundler_url: &'static str,
}

/// Networks with a known token paymaster deployment.
pub const KNOWN_NETWORKS: &[NetworkConfig] = &[NetworkConfig {
    chain_id: ARBITRUM_SEPOLIA,
    token: USDC_ARBITRUM_SEPOLIA,
    sponsor: PAYMASTER_ARBITRUM_SEPOLIA,
    entry_point: ENTRY_POINT_V07,
    bundler_url: PIMLICO_ARBITRUM_SEPOLIA,
}];

/// Looks up the deployment set for `chain_id`.
#[must_use]
pub fn network(chain_id: u64) -> Option<&'static NetworkConfig> {
    KNOWN_NETWORKS.iter().find(|n| n.chain_id == chain_id)
}
