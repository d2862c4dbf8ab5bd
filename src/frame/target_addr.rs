use std::fmt::{Display, Formatter};
use anyhow::bail;
use bytes::Buf;
use crate::util::safe_converter::SafeCast;

const ADDR_TYPE_IPV4: u8 = 0;
const ADDR_TYPE_DOMAIN: u8 = 1;
const ADDR_TYPE_IPV6: u8 = 2;

/// The connect target decoded from the address block of a request-open frame.
///
/// NB: The wire format stores IPv4 octets and IPv6 groups in reverse order relative to their
///  textual form. That ordering is what the deployed peers send, so it must be preserved
///  bit-for-bit even though it looks backwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddr {
    pub host: String,
    pub port: u16,
}

impl TargetAddr {
    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<TargetAddr> {
        let addr_type = buf.try_get_u8()?;

        let host = match addr_type {
            ADDR_TYPE_IPV4 => {
                let mut octets = [0u8; 4];
                for octet in octets.iter_mut() {
                    *octet = buf.try_get_u8()?;
                }
                format!("{}.{}.{}.{}", octets[3], octets[2], octets[1], octets[0])
            }
            ADDR_TYPE_DOMAIN => {
                let len: usize = buf.try_get_u8()?.safe_cast();
                if buf.remaining() < len {
                    bail!("hostname is truncated");
                }
                let mut raw = vec![0u8; len];
                buf.copy_to_slice(&mut raw);
                String::from_utf8(raw)?
            }
            ADDR_TYPE_IPV6 => {
                let mut groups = [0u16; 8];
                for group in groups.iter_mut() {
                    *group = buf.try_get_u16_le()?;
                }
                groups.iter().rev()
                    .map(|group| format!("{:x}", group))
                    .collect::<Vec<_>>()
                    .join(":")
            }
            other => bail!("unknown address type {}", other),
        };

        let port = buf.try_get_u16_le()?;
        Ok(TargetAddr { host, port })
    }
}

impl Display for TargetAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
