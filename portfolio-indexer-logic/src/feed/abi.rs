use alloy::sol;

sol! {
    interface IPortfolioTracker {
        #[derive(Debug)]
        event UserRegistered(address indexed user);

        #[derive(Debug)]
        event PortfolioUpdated(address indexed user, uint256 totalValue);

        #[derive(Debug)]
        event AlertCreated(address indexed user, uint256 indexed alertId);
    }

    interface IERC20 {
        #[derive(Debug)]
        event Transfer(address indexed from, address indexed to, uint256 value);

        #[derive(Debug)]
        event Approval(address indexed owner, address indexed spender, uint256 value);
    }
}
