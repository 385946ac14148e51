//! AMQP 0-9-1 Protocol Constants
//!
//! Canonical numeric assignments from the AMQP 0-9-1 specification: frame
//! type codes, class and method ids, reply codes, and the negotiation
//! defaults advertised by this client.

/// Protocol header sent before any frame: `"AMQP" 0 0 9 1`.
pub const PROTOCOL_HEADER: [u8; 8] = [b'A', b'M', b'Q', b'P', 0, 0, 9, 1];

/// Protocol version implemented by this client.
pub const PROTOCOL_VERSION: (u8, u8, u8) = (0, 9, 1);

/// Method frame type code.
pub const FRAME_METHOD: u8 = 1;
/// Content header frame type code.
pub const FRAME_HEADER: u8 = 2;
/// Content body frame type code.
pub const FRAME_BODY: u8 = 3;
/// Heartbeat frame type code.
pub const FRAME_HEARTBEAT: u8 = 8;

/// Trailing byte closing every frame.
pub const FRAME_END: u8 = 0xCE;

/// Size of the wire frame header: type (1) + channel (2) + size (4).
pub const FRAME_HEADER_SIZE: usize = 7;

/// Per-frame overhead: wire header plus the end byte.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + 1;

/// Maximum frame size advertised by the client.
pub const DEFAULT_FRAME_SIZE: u32 = 131_072;
/// Maximum channel count advertised by the client.
pub const DEFAULT_MAX_CHANNELS: u16 = 65_535;
/// Heartbeat interval in seconds advertised in `tune-ok`.
pub const DEFAULT_HEARTBEAT: u16 = 60;
/// Locale requested in `start-ok`.
pub const DEFAULT_LOCALE: &str = "en_US";
/// SASL mechanism used by default.
pub const DEFAULT_MECHANISM: &str = "PLAIN";

/// Reply code for a normal, successful close.
pub const REPLY_SUCCESS: u16 = 200;
/// Reply code for an operator-forced connection close.
pub const CONNECTION_FORCED: u16 = 320;

/// Product name reported in the `start-ok` client properties.
pub const PRODUCT: &str = "dumq-amqp091";
/// Crate version reported in the `start-ok` client properties.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Copyright line reported in the `start-ok` client properties.
pub const COPYRIGHT: &str = "Copyright (c) dumq contributors";

/// Advisory platform string for the `start-ok` client properties.
pub fn platform() -> String {
    format!("Rust/{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// AMQP class ids.
pub mod class {
    pub const CONNECTION: u16 = 10;
    pub const CHANNEL: u16 = 20;
    pub const EXCHANGE: u16 = 40;
    pub const QUEUE: u16 = 50;
    pub const BASIC: u16 = 60;
}

/// Connection class method ids.
pub mod connection {
    pub const START: u16 = 10;
    pub const START_OK: u16 = 11;
    pub const SECURE: u16 = 20;
    pub const SECURE_OK: u16 = 21;
    pub const TUNE: u16 = 30;
    pub const TUNE_OK: u16 = 31;
    pub const OPEN: u16 = 40;
    pub const OPEN_OK: u16 = 41;
    pub const CLOSE: u16 = 50;
    pub const CLOSE_OK: u16 = 51;
}

/// Channel class method ids.
pub mod channel {
    pub const OPEN: u16 = 10;
    pub const OPEN_OK: u16 = 11;
    pub const CLOSE: u16 = 40;
    pub const CLOSE_OK: u16 = 41;
}

/// Exchange class method ids.
pub mod exchange {
    pub const DECLARE: u16 = 10;
    pub const DECLARE_OK: u16 = 11;
    pub const DELETE: u16 = 20;
    pub const DELETE_OK: u16 = 21;
    pub const BIND: u16 = 30;
    pub const BIND_OK: u16 = 31;
    pub const UNBIND: u16 = 40;
    // unbind-ok is 51, not 41, per the 0-9-1 errata.
    pub const UNBIND_OK: u16 = 51;
}

/// Queue class method ids.
pub mod queue {
    pub const DECLARE: u16 = 10;
    pub const DECLARE_OK: u16 = 11;
    pub const BIND: u16 = 20;
    pub const BIND_OK: u16 = 21;
    pub const PURGE: u16 = 30;
    pub const PURGE_OK: u16 = 31;
    pub const DELETE: u16 = 40;
    pub const DELETE_OK: u16 = 41;
    pub const UNBIND: u16 = 50;
    pub const UNBIND_OK: u16 = 51;
}

/// Basic class method ids.
pub mod basic {
    pub const QOS: u16 = 10;
    pub const QOS_OK: u16 = 11;
    pub const CONSUME: u16 = 20;
    pub const CONSUME_OK: u16 = 21;
    pub const CANCEL: u16 = 30;
    pub const CANCEL_OK: u16 = 31;
    pub const PUBLISH: u16 = 40;
    pub const RETURN: u16 = 50;
    pub const DELIVER: u16 = 60;
    pub const GET: u16 = 70;
    pub const GET_OK: u16 = 71;
    pub const GET_EMPTY: u16 = 72;
    pub const ACK: u16 = 80;
    pub const REJECT: u16 = 90;
    pub const NACK: u16 = 120;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_header_bytes() {
        assert_eq!(&PROTOCOL_HEADER[..4], b"AMQP");
        assert_eq!(&PROTOCOL_HEADER[4..], &[0, 0, 9, 1]);
    }

    #[test]
    fn test_frame_overhead() {
        // type + channel + size + end byte
        assert_eq!(FRAME_OVERHEAD, 8);
    }

    #[test]
    fn test_platform_string() {
        let platform = platform();
        assert!(platform.starts_with("Rust/"));
        assert!(platform.contains(std::env::consts::ARCH));
    }
}
