//! Bridge and validator contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings. Only the calls and
//! events the relayer touches are declared; deployment is out of scope.

use alloy::sol;

sol! {
    /// Source-side bridge: locks underlying tokens and releases them on withdraw
    #[sol(rpc)]
    contract SourceBridge {
        /// Register an underlying token so it can be deposited (admin only)
        function register(address _token) external;

        /// Release locked tokens to `_recipient` after an Unwrap on the destination
        function withdraw(address _token, address _recipient, uint256 _amount) external;

        /// Emitted when a user locks tokens for bridging
        event Deposit(address indexed token, address indexed recipient, uint256 amount);

        /// Emitted when locked tokens are released
        event Withdrawal(address indexed token, address indexed recipient, uint256 amount);

        /// Emitted when a token is registered
        event Registration(address indexed token);
    }
}

sol! {
    /// Destination-side bridge: mints and burns wrapped tokens
    #[sol(rpc)]
    contract DestinationBridge {
        /// Deploy the wrapped counterpart of an underlying token (admin only)
        function createWrappedToken(address _underlying_token, string name, string symbol) external returns (address);

        /// Mint wrapped tokens after a Deposit on the source chain
        function wrap(address _underlying_token, address _recipient, uint256 _amount) external;

        /// Emitted when a user burns wrapped tokens to reclaim the underlying
        event Unwrap(
            address indexed underlying_token,
            address indexed wrapped_token,
            address frm,
            address indexed to,
            uint256 amount
        );

        /// Emitted when wrapped tokens are minted
        event Wrap(
            address indexed underlying_token,
            address indexed wrapped_token,
            address indexed to,
            uint256 amount
        );

        /// Emitted when a wrapped token is created
        event Creation(address indexed underlying_token, address indexed wrapped_token);
    }
}

sol! {
    /// Merkle claim validator (OpenZeppelin sorted-pair MerkleProof)
    #[sol(rpc)]
    contract MerkleValidator {
        /// Claim `leaf` by proving its inclusion under the stored root
        function submit(bytes32[] proof, bytes32 leaf) external returns (bool);

        /// The committed root
        function merkleRoot() external view returns (bytes32);
        /// Whether `account` holds `role`
        function hasRole(bytes32 role, address account) external view returns (bool);
        /// The prime claimed by `owner`, zero if none
        function getPrimeByOwner(address owner) external view returns (uint256);
    }
}

/// Function names the relay loop needs on each side
pub const SOURCE_RELAY_FUNCTIONS: &[&str] = &["withdraw"];
pub const DESTINATION_RELAY_FUNCTIONS: &[&str] = &["wrap"];
pub const SOURCE_REGISTRATION_FUNCTIONS: &[&str] = &["register"];
pub const DESTINATION_REGISTRATION_FUNCTIONS: &[&str] = &["createWrappedToken"];
pub const PROOF_FUNCTIONS: &[&str] = &["submit"];
