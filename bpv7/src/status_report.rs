use super::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown administrative record type {0}")]
    UnknownAdminRecordType(u64),

    #[error("Reserved status report reason code (255)")]
    ReservedReasonCode,

    #[error("Administrative record has additional data after end of CBOR array")]
    AdditionalData,

    #[error("Failed to parse {field}: {source}")]
    InvalidField {
        field: &'static str,
        source: Box<dyn core::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    InvalidCbor(#[from] cbor::decode::Error),
}

trait CaptureFieldErr<T> {
    fn map_field_err(self, field: &'static str) -> Result<T, Error>;
}

impl<T, E: Into<Box<dyn core::error::Error + Send + Sync>>> CaptureFieldErr<T>
    for core::result::Result<T, E>
{
    fn map_field_err(self, field: &'static str) -> Result<T, Error> {
        self.map_err(|e| Error::InvalidField {
            field,
            source: e.into(),
        })
    }
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReasonCode {
    #[default]
    NoAdditionalInformation,
    LifetimeExpired,
    ForwardedOverUnidirectionalLink,
    TransmissionCanceled,
    DepletedStorage,
    DestinationEndpointUnavailable,
    NoKnownRouteToDestination,
    NoTimelyContactWithNextNode,
    BlockUnintelligible,
    HopLimitExceeded,
    Unassigned(u64),
}

impl From<ReasonCode> for u64 {
    fn from(value: ReasonCode) -> Self {
        match value {
            ReasonCode::NoAdditionalInformation => 0,
            ReasonCode::LifetimeExpired => 1,
            ReasonCode::ForwardedOverUnidirectionalLink => 2,
            ReasonCode::TransmissionCanceled => 3,
            ReasonCode::DepletedStorage => 4,
            ReasonCode::DestinationEndpointUnavailable => 5,
            ReasonCode::NoKnownRouteToDestination => 6,
            ReasonCode::NoTimelyContactWithNextNode => 7,
            ReasonCode::BlockUnintelligible => 8,
            ReasonCode::HopLimitExceeded => 9,
            ReasonCode::Unassigned(v) => v,
        }
    }
}

impl TryFrom<u64> for ReasonCode {
    type Error = self::Error;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ReasonCode::NoAdditionalInformation),
            1 => Ok(ReasonCode::LifetimeExpired),
            2 => Ok(ReasonCode::ForwardedOverUnidirectionalLink),
            3 => Ok(ReasonCode::TransmissionCanceled),
            4 => Ok(ReasonCode::DepletedStorage),
            5 => Ok(ReasonCode::DestinationEndpointUnavailable),
            6 => Ok(ReasonCode::NoKnownRouteToDestination),
            7 => Ok(ReasonCode::NoTimelyContactWithNextNode),
            8 => Ok(ReasonCode::BlockUnintelligible),
            9 => Ok(ReasonCode::HopLimitExceeded),
            255 => Err(Error::ReservedReasonCode),
            v => Ok(ReasonCode::Unassigned(v)),
        }
    }
}

impl cbor::encode::ToCbor for ReasonCode {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit(&u64::from(*self))
    }
}

impl cbor::decode::FromCbor for ReasonCode {
    type Error = self::Error;

    fn from_cbor(data: &[u8]) -> Result<(Self, usize), Self::Error> {
        let (v, len) = cbor::decode::parse::<u64>(data)?;
        Ok((v.try_into()?, len))
    }
}

/// One asserted status, with the time of the event when the reporting node
/// chose to include it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusAssertion(pub Option<DtnTime>);

fn emit_status_assertion(a: &mut cbor::encode::Array, sa: &Option<StatusAssertion>) {
    match sa {
        None => a.emit_array(Some(1), |a| {
            a.emit(&false);
        }),
        Some(StatusAssertion(None)) => a.emit_array(Some(1), |a| {
            a.emit(&true);
        }),
        Some(StatusAssertion(Some(timestamp))) => a.emit_array(Some(2), |a| {
            a.emit(&true);
            a.emit(timestamp);
        }),
    }
}

fn parse_status_assertion(
    a: &mut cbor::decode::Array,
) -> Result<Option<StatusAssertion>, Error> {
    a.parse_array(|a, _| {
        let status = a.parse::<bool>().map_field_err("status indicator")?;

        let assertion = if status {
            match a.try_parse::<DtnTime>().map_field_err("status time")? {
                Some(timestamp) if timestamp.millisecs() != 0 => {
                    Some(StatusAssertion(Some(timestamp)))
                }
                _ => Some(StatusAssertion(None)),
            }
        } else {
            None
        };

        if a.end()?.is_none() {
            return Err(Error::AdditionalData);
        }
        Ok::<_, Error>(assertion)
    })
}

/// The content of a bundle status report administrative record.
#[derive(Default, Debug, Clone)]
pub struct StatusReport {
    pub bundle_id: BundleId,
    pub received: Option<StatusAssertion>,
    pub forwarded: Option<StatusAssertion>,
    pub delivered: Option<StatusAssertion>,
    pub deleted: Option<StatusAssertion>,
    pub reason: ReasonCode,
}

impl cbor::encode::ToCbor for StatusReport {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array(
            Some(self.bundle_id.fragment_info.as_ref().map_or(4, |_| 6)),
            |a| {
                a.emit_array(Some(4), |a| {
                    emit_status_assertion(a, &self.received);
                    emit_status_assertion(a, &self.forwarded);
                    emit_status_assertion(a, &self.delivered);
                    emit_status_assertion(a, &self.deleted);
                });

                a.emit(&self.reason);
                a.emit(&self.bundle_id.source);
                a.emit(&self.bundle_id.timestamp);

                if let Some(fragment_info) = &self.bundle_id.fragment_info {
                    a.emit(&fragment_info.offset);
                    a.emit(&fragment_info.total_len);
                }
            },
        )
    }
}

impl cbor::decode::FromCbor for StatusReport {
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

            let mut report = Self::default();
            a.parse_array(|a, _| {
                report.received =
                    parse_status_assertion(a).map_field_err("received status")?;
                report.forwarded =
                    parse_status_assertion(a).map_field_err("forwarded status")?;
                report.delivered =
                    parse_status_assertion(a).map_field_err("delivered status")?;
                report.deleted = parse_status_assertion(a).map_field_err("deleted status")?;

                if a.end()?.is_none() {
                    return Err(Error::AdditionalData);
                }
                Ok::<_, Error>(())
            })
            .map_field_err("bundle status information")?;

            report.reason = a.parse().map_field_err("reason code")?;

            report.bundle_id = BundleId {
                source: a.parse().map_field_err("source EID")?,
                timestamp: a.parse().map_field_err("creation timestamp")?,
                fragment_info: None,
            };

            if let Some(offset) = a.try_parse().map_field_err("fragment offset")? {
                report.bundle_id.fragment_info = Some(FragmentInfo {
                    offset,
                    total_len: a
                        .parse()
                        .map_field_err("total application data unit length")?,
                });
            }

            if a.end()?.is_none() {
                return Err(Error::AdditionalData);
            }
            Ok::<_, Error>(report)
        })
    }
}

/// The administrative record envelope carried as the payload of a bundle
/// with the `is_admin_record` flag set.
#[derive(Debug, Clone)]
pub enum AdministrativeRecord {
    BundleStatusReport(StatusReport),
}

impl AdministrativeRecord {
    /// Serialize into an exactly-sized payload buffer.
    pub fn to_payload(&self) -> Vec<u8> {
        let len = cbor::encode::measure(self);
        let mut e = cbor::encode::Encoder::with_capacity(len);
        e.emit(self);
        let data = e.build();
        debug_assert_eq!(data.len(), len);
        data
    }
}

impl cbor::encode::ToCbor for AdministrativeRecord {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array(Some(2), |a| match self {
            AdministrativeRecord::BundleStatusReport(report) => {
                a.emit(&1u64);
                a.emit(report);
            }
        })
    }
}

impl cbor::decode::FromCbor for AdministrativeRecord {
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

            let record = match a.parse::<u64>().map_field_err("record type code")? {
                1 => Self::BundleStatusReport(
                    a.parse().map_field_err("bundle status report")?,
                ),
                v => return Err(Error::UnknownAdminRecordType(v)),
            };

            if a.end()?.is_none() {
                return Err(Error::AdditionalData);
            }
            Ok::<_, Error>(record)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_report() -> StatusReport {
        StatusReport {
            bundle_id: BundleId {
                source: "ipn:977000.1".parse().unwrap(),
                timestamp: CreationTimestamp {
                    creation_time: Some(DtnTime::new(812_072_455_000)),
                    sequence_number: 7,
                },
                fragment_info: None,
            },
            delivered: Some(StatusAssertion(Some(DtnTime::new(812_072_456_000)))),
            reason: ReasonCode::NoAdditionalInformation,
            ..Default::default()
        }
    }

    fn round_trip(record: &AdministrativeRecord) -> StatusReport {
        let payload = record.to_payload();
        let (parsed, len) = cbor::decode::parse::<AdministrativeRecord>(&payload).unwrap();
        assert_eq!(len, payload.len());
        let AdministrativeRecord::BundleStatusReport(report) = parsed;
        report
    }

    #[test]
    fn delivery_report_round_trip() {
        let report = test_report();
        let parsed = round_trip(&AdministrativeRecord::BundleStatusReport(report.clone()));

        assert_eq!(parsed.bundle_id, report.bundle_id);
        assert!(parsed.received.is_none());
        assert!(parsed.forwarded.is_none());
        assert_eq!(parsed.delivered, report.delivered);
        assert!(parsed.deleted.is_none());
        assert_eq!(parsed.reason, ReasonCode::NoAdditionalInformation);
    }

    #[test]
    fn assertion_without_time() {
        let mut report = test_report();
        report.delivered = None;
        report.deleted = Some(StatusAssertion(None));
        report.reason = ReasonCode::LifetimeExpired;

        let parsed = round_trip(&AdministrativeRecord::BundleStatusReport(report));
        assert_eq!(parsed.deleted, Some(StatusAssertion(None)));
        assert_eq!(parsed.reason, ReasonCode::LifetimeExpired);
    }

    #[test]
    fn fragment_fields_round_trip() {
        let mut report = test_report();
        report.bundle_id.fragment_info = Some(FragmentInfo {
            offset: 100,
            total_len: 500,
        });

        let parsed = round_trip(&AdministrativeRecord::BundleStatusReport(report.clone()));
        assert_eq!(parsed.bundle_id.fragment_info, report.bundle_id.fragment_info);
    }

    #[test]
    fn unknown_record_type() {
        let data = cbor::encode::emit_array(Some(2), |a| {
            a.emit(&3u64);
            a.emit(&0u64);
        });
        assert!(matches!(
            cbor::decode::parse::<AdministrativeRecord>(&data),
            Err(Error::UnknownAdminRecordType(3))
        ));
    }

    #[test]
    fn reserved_reason_code() {
        assert!(matches!(
            ReasonCode::try_from(255),
            Err(Error::ReservedReasonCode)
        ));
        assert!(matches!(
            ReasonCode::try_from(20),
            Ok(ReasonCode::Unassigned(20))
        ));
    }

    #[test]
    fn unassigned_reason_survives() {
        let mut report = test_report();
        report.reason = ReasonCode::Unassigned(77);
        let parsed = round_trip(&AdministrativeRecord::BundleStatusReport(report));
        assert_eq!(parsed.reason, ReasonCode::Unassigned(77));
    }
}
