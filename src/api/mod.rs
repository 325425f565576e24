pub mod capital;
pub mod gemini;
pub mod symbols;

pub use capital::{
    resolution_for, Account, BrokerError, CapitalClient, Credentials, MarketInfo, OrderRequest,
    OrderResult, PositionUpdate,
};
pub use gemini::{validate_decision, DecisionError, GeminiClient, RawDecision};
pub use symbols::SymbolMap;
