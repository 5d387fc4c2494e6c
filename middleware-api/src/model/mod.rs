pub mod execution;
pub mod market_data;
pub mod message;
pub mod order;

pub use execution::{Execution, NewOrderAck, Rejection};
pub use market_data::{Bar, Tick};
pub use message::{AppInfo, Channel, HeartbeatPayload, InquiryResponse, MessageKind};
pub use order::{LimitOrder, MarketOrder, Side};
