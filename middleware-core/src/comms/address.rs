//! Transport endpoint addresses.
//!
//! An `Address` names where a socket binds or connects without tying the
//! caller to one transport: ZMQ endpoint strings cross process
//! boundaries, named channels stay in-process. Binaries accept them on
//! the command line through `FromStr`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One socket endpoint, ZMQ or in-memory.
///
/// Parses from `tcp://host:port` / `ipc://path` (ZMQ, with an optional
/// `zmq:` prefix) or `mem:name` (in-memory channel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Address {
    /// A ZMQ endpoint string, passed to bind/connect verbatim.
    Zmq(String),

    /// A named in-process channel.
    Memory(String),
}

impl Address {
    pub fn zmq_tcp(ip: &str, port: u16) -> Self {
        Address::Zmq(format!("tcp://{}:{}", ip, port))
    }

    pub fn memory(name: &str) -> Self {
        Address::Memory(name.to_string())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Zmq(addr) => write!(f, "zmq:{}", addr),
            Address::Memory(name) => write!(f, "mem:{}", name),
        }
    }
}

impl Default for Address {
    fn default() -> Self {
        Address::Zmq("tcp://127.0.0.1:5555".to_string())
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(stripped) = s.strip_prefix("zmq:") {
            Ok(Address::Zmq(stripped.to_string()))
        } else if let Some(stripped) = s.strip_prefix("mem:") {
            Ok(Address::Memory(stripped.to_string()))
        } else if s.starts_with("tcp://") || s.starts_with("ipc://") {
            Ok(Address::Zmq(s.to_string()))
        } else {
            Err(format!("Unknown address format: {}", s))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        let a: Address = "tcp://127.0.0.1:5561".parse().unwrap();
        assert_eq!(a, Address::zmq_tcp("127.0.0.1", 5561));

        let m: Address = "mem:raw_feed".parse().unwrap();
        assert_eq!(m, Address::memory("raw_feed"));

        assert!("bogus".parse::<Address>().is_err());
    }
}
