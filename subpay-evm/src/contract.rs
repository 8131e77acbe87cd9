//! Solidity interface definitions for on-chain interactions.
//!
//! Contains the minimal ABI surface the engine touches:
//! - [`IERC20Permit`] - ERC-20 + EIP-2612 subset of the payment token
//! - [`ISponsor`] - the token paymaster's overhead getter
//! - [`IEntryPoint`] - ERC-4337 v0.7 entry point nonce lookup
//! - [`IKernel`] - Kernel v0.3 execute entry point, with [`Execution`] batches
//! - [`Kernel`] - typed wrapper Kernel applies to hashes it validates via ERC-1271
//! - [`ISubscription`] - the subscription contract and its trigger event
//! - [`Sig6492`] - ABI-decodable prefix of an EIP-6492 wrapped signature
//! - [`Permit`] - EIP-2612 typed-data struct

use alloy_sol_types::sol;

sol! {
    /// ERC-20 + EIP-2612 interface for USDC-style tokens.
    ///
    /// References:
    /// - EIP-2612: <https://eips.ethereum.org/EIPS/eip-2612>
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IERC20Permit {
        function name() external view returns (string);
        function version() external view returns (string);
        function nonces(address owner) external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

sol! {
    /// Token paymaster surface used to size the post-operation gas limit.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface ISponsor {
        function additionalGasCharge() external view returns (uint256);
    }
}

sol! {
    /// ERC-4337 v0.7 entry point.
    ///
    /// Reference: <https://eips.ethereum.org/EIPS/eip-4337>
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IEntryPoint {
        function getNonce(address sender, uint192 key) external view returns (uint256 nonce);
    }
}

sol! {
    /// Kernel v0.3 smart account (ERC-7579 execution).
    ///
    /// Reference: <https://eips.ethereum.org/EIPS/eip-7579>
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface IKernel {
        function execute(bytes32 execMode, bytes calldata executionCalldata) external payable;
    }
}

sol! {
    /// One call of a batch `execute`.
    #[derive(Debug)]
    struct Execution {
        address target;
        uint256 value;
        bytes   callData;
    }
}

sol! {
    /// Kernel wraps every hash it checks through ERC-1271 in this struct,
    /// signed over its own `Kernel` domain.
    #[derive(Debug)]
    struct Kernel {
        bytes32 hash;
    }
}

sol! {
    /// Subscription contract driven by the engine.
    ///
    /// `Ping` carries no payer; `PaymentDue` names one in its first topic.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface ISubscription {
        function executePayment(address subscriber) external;
        function performUpkeep(bytes calldata performData) external;

        event Ping();
        event PaymentDue(address indexed subscriber);
    }
}

sol! {
    /// Solidity-compatible struct for decoding the prefix of an EIP-6492 signature.
    #[derive(Debug)]
    struct Sig6492 {
        address factory;
        bytes   factoryCalldata;
        bytes   innerSig;
    }
}

sol! {
    /// EIP-2612 permit message.
    #[derive(Debug)]
    struct Permit {
        address owner;
        address spender;
        uint256 value;
        uint256 nonce;
        uint256 deadline;
    }
}
