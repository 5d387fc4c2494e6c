//! Control-plane message vocabulary.
//!
//! `MessageKind` tags every envelope on the bus; `Channel` names the five
//! logical queues a client binds per session. The routing layer resolves a
//! channel to a concrete routing key, app-ID qualified once the session
//! exists.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Logical channel a client binds for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Handshake, heartbeats, login/logout.
    Admin,
    /// Outbound orders and inbound ticks.
    TickOrder,
    /// Live bars and execution reports.
    LiveBarExecution,
    /// Historic bar replies and order rejections.
    HistoricBarRejection,
    /// Short-sale locate requests/responses.
    Locate,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Admin,
        Channel::TickOrder,
        Channel::LiveBarExecution,
        Channel::HistoricBarRejection,
        Channel::Locate,
    ];

    /// Stable name used in parameter keys and the app-info handshake.
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Admin => "admin",
            Channel::TickOrder => "tick_order",
            Channel::LiveBarExecution => "livebar_execution",
            Channel::HistoricBarRejection => "historicbar_rejection",
            Channel::Locate => "locate",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tag carried by every envelope on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    AppIdInquiry,
    AppIdResponse,
    AppInfo,
    Heartbeat,
    HeartbeatResponse,
    Login,
    Logout,
    Subscribe,
    Unsubscribe,
    MarketOrder,
    LimitOrder,
    CancelOrder,
    NewOrderAck,
    Execution,
    Rejection,
    Tick,
    LiveBar,
    HistoricBarRequest,
    HistoricBar,
    LocateRequest,
    LocateResponse,
}

impl MessageKind {
    /// The logical channel this kind travels on.
    pub fn channel(&self) -> Channel {
        use MessageKind::*;
        match self {
            AppIdInquiry | AppIdResponse | AppInfo | Heartbeat | HeartbeatResponse | Login
            | Logout => Channel::Admin,
            Subscribe | Unsubscribe | MarketOrder | LimitOrder | CancelOrder | Tick => {
                Channel::TickOrder
            }
            NewOrderAck | Execution | LiveBar => Channel::LiveBarExecution,
            Rejection | HistoricBarRequest | HistoricBar => Channel::HistoricBarRejection,
            LocateRequest | LocateResponse => Channel::Locate,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Matches the serde representation so log lines and wire tags
        // never diverge.
        write!(f, "{:?}", self)
    }
}

/// Heartbeat payload sent by the client on every send-timer tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub app_id: String,
    pub interval_ms: u64,
}

/// Reply to the first (unqualified) application-ID inquiry. Receiving this
/// creates the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InquiryResponse {
    pub app_id: String,
    /// Heartbeat interval the server expects, in milliseconds.
    pub heartbeat_interval_ms: u64,
}

/// Handshake payload advertising this client's bound queue names, published
/// once immediately after app-ID assignment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppInfo {
    pub app_id: String,
    /// Channel name -> bound queue name.
    pub queues: HashMap<String, String>,
}
