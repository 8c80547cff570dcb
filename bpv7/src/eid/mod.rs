use super::*;
use error::CaptureFieldErr;

mod error;
mod parse;

pub use error::Error;
pub use parse::{ClaAddressParser, EidFactory};

#[cfg(test)]
mod str_tests;


/// A convergence-layer address, parsed by the per-CLA sub-parser registered
/// with the [`EidFactory`].
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum ClaAddress {
    Tcp(std::net::SocketAddr),
    Unknown(Box<str>),
}

impl core::fmt::Display for ClaAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ClaAddress::Tcp(addr) => write!(f, "{addr}"),
            ClaAddress::Unknown(s) => f.write_str(s),
        }
    }
}

/// The EID of a directly-connected convergence-layer peer, written as a
/// bracketed dtn node name: `dtn://[name:address]/demux`.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct ClaEid {
    pub name: Box<str>,
    pub address: ClaAddress,
    pub demux: Box<str>,
}

#[derive(Default, Debug, Clone, Hash, PartialEq, Eq)]
pub enum Eid {
    /// The null endpoint, `dtn:none`. Matches nothing.
    #[default]
    Null,
    Dtn {
        node: Box<str>,
        demux: Box<str>,
    },
    Ipn {
        node: u32,
        service: u32,
    },
    Cla(ClaEid),
    /// A process-local alias for the node itself, `api:me/demux`.
    /// Never serialized.
    Api {
        demux: Box<str>,
    },
    /// An EID of an unrecognised scheme, carrying the raw CBOR of its
    /// scheme-specific part so re-encoding is byte-identical.
    Unknown {
        scheme: u64,
        data: Box<[u8]>,
    },
}

impl Eid {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Eid::Null)
    }

    /// The canonical dtn-scheme ssp, for the variants that have one.
    fn text_ssp(&self) -> Option<String> {
        match self {
            Eid::Dtn { node, demux } => Some(format!("//{node}/{demux}")),
            Eid::Cla(cla) => Some(format!("//[{}:{}]/{}", cla.name, cla.address, cla.demux)),
            _ => None,
        }
    }

    /// Semantic match used for destination and local-delivery checks.
    ///
    /// dtn-scheme EIDs match on ssp prefix, so a node endpoint
    /// `dtn://node/` matches every sink under it. The null endpoint
    /// matches nothing, itself included.
    pub fn matches(&self, other: &Eid) -> bool {
        match (self, other) {
            (Eid::Null, _) | (_, Eid::Null) => false,
            (Eid::Dtn { .. }, Eid::Dtn { .. }) | (Eid::Cla(_), Eid::Cla(_)) => {
                match (self.text_ssp(), other.text_ssp()) {
                    (Some(a), Some(b)) => b.starts_with(&a),
                    _ => false,
                }
            }
            (
                Eid::Ipn { node, service },
                Eid::Ipn {
                    node: other_node,
                    service: other_service,
                },
            ) => node == other_node && service == other_service,
            (Eid::Api { demux }, Eid::Api { demux: other_demux }) => {
                other_demux.starts_with(&**demux)
            }
            _ => false,
        }
    }

    /// Does this EID admit suffix (sink) addressing under it?
    pub fn is_authoritative(&self) -> bool {
        match self {
            Eid::Dtn { demux, .. } => demux.is_empty(),
            Eid::Ipn { service, .. } => *service == 0,
            Eid::Cla(cla) => cla.demux.is_empty(),
            _ => false,
        }
    }

    /// Is this EID the authority for `other`, i.e. authoritative and naming
    /// the same node?
    pub fn is_authoritative_over(&self, other: &Eid) -> bool {
        if !self.is_authoritative() {
            return false;
        }
        match (self, other) {
            (Eid::Ipn { node, .. }, Eid::Ipn {
                node: other_node, ..
            }) => node == other_node,
            _ => self.matches(other),
        }
    }

    /// `api:` EIDs are aliases with no wire form; everything else encodes.
    pub fn has_wire_form(&self) -> bool {
        !matches!(self, Eid::Api { .. })
    }
}

impl cbor::encode::ToCbor for Eid {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        match self {
            Eid::Null => encoder.emit_array(Some(2), |a| {
                a.emit(&1u64);
                a.emit(&0u64);
            }),
            Eid::Dtn { .. } | Eid::Cla(_) => {
                // text_ssp is always Some for these variants
                let ssp = self.text_ssp().unwrap_or_default();
                encoder.emit_array(Some(2), |a| {
                    a.emit(&1u64);
                    a.emit(ssp.as_str());
                })
            }
            Eid::Ipn { node, service } => encoder.emit_array(Some(2), |a| {
                a.emit(&2u64);
                a.emit_array(Some(2), |a| {
                    a.emit(node);
                    a.emit(service);
                });
            }),
            Eid::Unknown { scheme, data } => encoder.emit_array(Some(2), |a| {
                a.emit(scheme);
                a.emit_raw_slice(data);
            }),
            // Callers validate with has_wire_form() before encoding
            Eid::Api { .. } => unreachable!(),
        }
    }
}

impl cbor::decode::FromCbor for Eid {
    type Error = self::Error;

    fn from_cbor(data: &[u8]) -> Result<(Self, usize), Self::Error> {
        cbor::decode::parse_value(data, |value, _| {
            let cbor::decode::Value::Array(a) = value else {
                return Err(cbor::decode::Error::IncorrectType(
                    "Array".to_string(),
                    value.type_name(),
                )
                .into());
            };

            let scheme = a.parse::<u64>().map_field_err("scheme")?;
            let eid = match scheme {
                1 => a
                    .parse_value(|value, _| match value {
                        cbor::decode::Value::UnsignedInteger(0) => Ok(Eid::Null),
                        cbor::decode::Value::Text(s) => EidFactory::default().parse_dtn_ssp(s),
                        value => Err(cbor::decode::Error::IncorrectType(
                            "Text String or 0".to_string(),
                            value.type_name(),
                        )
                        .into()),
                    })
                    .map_field_err("dtn scheme-specific part")?,
                2 => a
                    .parse_value(|value, _| {
                        let cbor::decode::Value::Array(a) = value else {
                            return Err(Error::from(cbor::decode::Error::IncorrectType(
                                "Array".to_string(),
                                value.type_name(),
                            )));
                        };
                        let node = a.parse::<u32>()?;
                        let service = a.parse::<u32>()?;
                        if a.end()?.is_none() {
                            return Err(Error::IpnFormat);
                        }
                        Ok(Eid::Ipn { node, service })
                    })
                    .map_field_err("ipn scheme-specific part")?,
                scheme => {
                    let start = a.offset();
                    if !a.skip_value()? {
                        return Err(cbor::decode::Error::NotEnoughItems.into());
                    }
                    Eid::Unknown {
                        scheme,
                        data: data[start..a.offset()].into(),
                    }
                }
            };

            if a.end()?.is_none() {
                return Err(Error::AdditionalItems);
            }
            Ok(eid)
        })
    }
}

impl core::fmt::Display for Eid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Eid::Null => f.write_str("dtn:none"),
            Eid::Dtn { .. } | Eid::Cla(_) => {
                write!(f, "dtn:{}", self.text_ssp().unwrap_or_default())
            }
            Eid::Ipn { node, service } => write!(f, "ipn:{node}.{service}"),
            Eid::Api { demux } => {
                if demux.is_empty() {
                    f.write_str("api:me")
                } else {
                    write!(f, "api:me/{demux}")
                }
            }
            Eid::Unknown { scheme, data } => {
                write!(f, "unknown({scheme}):0x")?;
                for b in data.iter() {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl core::str::FromStr for Eid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EidFactory::default().parse(s)
    }
}
