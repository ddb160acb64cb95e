//! SOCKS5 UDP encapsulation
//!
//! Parses and builds the RFC 1928 UDP request header that wraps every
//! datagram exchanged over a UDP association:
//! RSV(2) FRAG(1) ATYP(1) DST.ADDR DST.PORT DATA.

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{consts, ReplyCode, TargetAddr};
use crate::error::SockdError;
use crate::Result;

/// A datagram with its SOCKS5 encapsulation header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpPacket {
    /// Fragment number; only 0 (standalone datagram) is supported
    pub frag: u8,
    /// Destination (client-to-relay) or source (relay-to-client)
    pub addr: TargetAddr,
    /// Datagram payload
    pub data: Bytes,
}

impl UdpPacket {
    /// Wrap a payload headed back to the client.
    pub fn new(addr: TargetAddr, data: Bytes) -> Self {
        UdpPacket {
            frag: 0,
            addr,
            data,
        }
    }

    /// Whether this packet is part of a fragmented datagram.
    pub fn is_fragmented(&self) -> bool {
        self.frag != 0
    }

    /// Parse an encapsulated datagram.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let mut buf = raw;
        if buf.remaining() < 4 {
            return Err(SockdError::protocol(
                ReplyCode::GeneralFailure,
                "truncated UDP header",
            ));
        }
        buf.advance(2); // RSV
        let frag = buf.get_u8();
        let atyp = buf.get_u8();

        let addr = match atyp {
            consts::SOCKS5_ADDR_TYPE_IPV4 => {
                if buf.remaining() < 6 {
                    return Err(truncated());
                }
                let ip = Ipv4Addr::from(buf.get_u32());
                TargetAddr::ipv4(ip, buf.get_u16())
            }
            consts::SOCKS5_ADDR_TYPE_IPV6 => {
                if buf.remaining() < 18 {
                    return Err(truncated());
                }
                let ip = Ipv6Addr::from(buf.get_u128());
                TargetAddr::ipv6(ip, buf.get_u16())
            }
            consts::SOCKS5_ADDR_TYPE_DOMAIN => {
                if buf.remaining() < 1 {
                    return Err(truncated());
                }
                let len = buf.get_u8() as usize;
                if buf.remaining() < len + 2 {
                    return Err(truncated());
                }
                let domain = String::from_utf8(buf[..len].to_vec()).map_err(|_| {
                    SockdError::protocol(
                        ReplyCode::AddressTypeNotSupported,
                        "domain name is not valid UTF-8",
                    )
                })?;
                buf.advance(len);
                TargetAddr::domain(domain, buf.get_u16())?
            }
            other => {
                return Err(SockdError::protocol(
                    ReplyCode::AddressTypeNotSupported,
                    format!("unsupported address type: {:#04x}", other),
                ))
            }
        };

        Ok(UdpPacket {
            frag,
            addr,
            data: Bytes::copy_from_slice(buf),
        })
    }

    /// Encode the packet, header and payload.
    pub fn encode(&self) -> Bytes {
        let addr_bytes = self.addr.to_bytes();
        let mut buf = BytesMut::with_capacity(3 + addr_bytes.len() + self.data.len());
        buf.put_u16(0); // RSV
        buf.put_u8(self.frag);
        buf.put_slice(&addr_bytes);
        buf.put_slice(&self.data);
        buf.freeze()
    }
}

fn truncated() -> SockdError {
    SockdError::protocol(ReplyCode::GeneralFailure, "truncated UDP header")
}
