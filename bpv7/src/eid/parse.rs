use super::*;
use std::sync::Arc;

/// A pluggable parser for one convergence layer's address syntax, keyed by
/// CLA name in the [`EidFactory`].
pub trait ClaAddressParser: Send + Sync {
    fn parse(&self, address: &str) -> Result<ClaAddress, Error>;
}

struct TcpParser;

impl ClaAddressParser for TcpParser {
    fn parse(&self, address: &str) -> Result<ClaAddress, Error> {
        address
            .parse()
            .map(ClaAddress::Tcp)
            .map_err(|_| Error::InvalidClaAddress("tcp", address.to_string()))
    }
}

/// Parses EID text, holding the per-CLA address sub-parsers.
///
/// A non-strict factory (the default) parses an unregistered CLA name to
/// [`ClaAddress::Unknown`]; a strict one rejects it.
pub struct EidFactory {
    parsers: hashbrown::HashMap<Box<str>, Arc<dyn ClaAddressParser>>,
    strict: bool,
}

impl Default for EidFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EidFactory {
    pub fn new() -> Self {
        let mut f = Self {
            parsers: hashbrown::HashMap::new(),
            strict: false,
        };
        f.register_cla("tcp", Arc::new(TcpParser));
        f
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn register_cla(&mut self, name: &str, parser: Arc<dyn ClaAddressParser>) {
        self.parsers.insert(name.into(), parser);
    }

    pub fn parse(&self, s: &str) -> Result<Eid, Error> {
        let Some((scheme, ssp)) = s.split_once(':') else {
            return Err(Error::UnsupportedScheme(s.to_string()));
        };
        match scheme {
            "dtn" => self.parse_dtn_ssp(ssp),
            "ipn" => parse_ipn_ssp(ssp),
            "api" => parse_api_ssp(ssp),
            scheme => Err(Error::UnsupportedScheme(scheme.to_string())),
        }
    }

    /// Parse a dtn-scheme ssp, i.e. the part after `dtn:`. This is also the
    /// text carried on the wire for scheme 1.
    pub(super) fn parse_dtn_ssp(&self, ssp: &str) -> Result<Eid, Error> {
        if ssp == "none" {
            return Ok(Eid::Null);
        }
        let Some(rest) = ssp.strip_prefix("//") else {
            return Err(Error::InvalidSsp(ssp.to_string()));
        };
        let (node, demux) = match rest.split_once('/') {
            Some((node, demux)) => (node, demux),
            None => (rest, ""),
        };
        if node.is_empty() {
            return Err(Error::InvalidSsp(ssp.to_string()));
        }

        if let Some(bracketed) = node.strip_prefix('[').and_then(|n| n.strip_suffix(']')) {
            let Some((name, address)) = bracketed.split_once(':') else {
                return Err(Error::InvalidSsp(ssp.to_string()));
            };
            let address = match self.parsers.get(name) {
                Some(parser) => parser.parse(address)?,
                None if self.strict => return Err(Error::UnknownCla(name.to_string())),
                None => ClaAddress::Unknown(address.into()),
            };
            Ok(Eid::Cla(ClaEid {
                name: name.into(),
                address,
                demux: demux.into(),
            }))
        } else {
            Ok(Eid::Dtn {
                node: node.into(),
                demux: demux.into(),
            })
        }
    }
}

fn parse_ipn_ssp(ssp: &str) -> Result<Eid, Error> {
    let Some((node, service)) = ssp.split_once('.') else {
        return Err(Error::IpnFormat);
    };
    Ok(Eid::Ipn {
        node: node.parse().map_err(|_| Error::IpnFormat)?,
        service: service.parse().map_err(|_| Error::IpnFormat)?,
    })
}

fn parse_api_ssp(ssp: &str) -> Result<Eid, Error> {
    let Some(rest) = ssp.strip_prefix("me") else {
        return Err(Error::InvalidSsp(ssp.to_string()));
    };
    let demux = match rest.strip_prefix('/') {
        Some(demux) => demux,
        None if rest.is_empty() => "",
        None => return Err(Error::InvalidSsp(ssp.to_string())),
    };
    Ok(Eid::Api {
        demux: demux.into(),
    })
}
