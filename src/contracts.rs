//! Centralized Contract Definitions
//!
//! Solidity interfaces consumed by the bot, defined using alloy's `sol!` macro.
//! The settlement contract is an external collaborator: only its call
//! surface, execution event and custom errors are declared here.

use alloy::sol;

// ── Swap step (settlement userData) ──────────────────────────────────

sol! {
    /// One leg of a multi-hop execution. `userData` for `executeFlashLoan`
    /// is the ABI encoding of `SwapStep[]`, one entry per priced leg.
    #[derive(Debug, PartialEq, Eq)]
    struct SwapStep {
        address sellToken;
        address buyToken;
        address target;
        bytes data;
    }
}

// ── Flash-loan settlement contract ───────────────────────────────────

sol! {
    #[sol(rpc)]
    interface IFlashArbExecutor {
        event FlashLoanExecuted(address indexed token, uint256 amount, uint256 fee, uint256 profit);

        error UntrustedTarget(address target);
        error InsufficientProfit(uint256 profit, uint256 minProfitBps);
        error SwapFailed(uint256 step);

        function executeFlashLoan(address[] calldata tokens, uint256[] calldata amounts, bytes calldata userData) external;
        function withdraw(address token) external;
        function owner() external view returns (address);
        function paused() external view returns (bool);
    }
}

// ── ERC20 ─────────────────────────────────────────────────────────────

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}
