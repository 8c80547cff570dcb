use super::*;
use error::CaptureFieldErr;

/// A bundle creation timestamp: DTN creation time plus a sequence number
/// disambiguating bundles created in the same millisecond. A source with no
/// clock emits time zero, carried here as `None`.
#[derive(Default, Debug, Clone, Hash, PartialEq, Eq)]
pub struct CreationTimestamp {
    pub creation_time: Option<DtnTime>,
    pub sequence_number: u64,
}

impl CreationTimestamp {
    pub fn now() -> Self {
        let timestamp = time::OffsetDateTime::now_utc();
        Self {
            creation_time: timestamp.try_into().ok(),
            sequence_number: (timestamp.nanosecond() % 1_000_000) as u64,
        }
    }
}

impl cbor::encode::ToCbor for CreationTimestamp {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit_array(Some(2), |a| {
            a.emit(&self.creation_time.unwrap_or_default().millisecs());
            a.emit(&self.sequence_number);
        })
    }
}

impl cbor::decode::FromCbor for CreationTimestamp {
    type Error = crate::Error;

    fn from_cbor(data: &[u8]) -> Result<(Self, usize), Self::Error> {
        cbor::decode::parse_value(data, |value, _| {
            let cbor::decode::Value::Array(a) = value else {
                return Err(cbor::decode::Error::IncorrectType(
                    "Array".to_string(),
                    value.type_name(),
                )
                .into());
            };
            let timestamp = a.parse::<u64>().map_field_err("bundle creation time")?;
            let timestamp = CreationTimestamp {
                creation_time: (timestamp != 0).then_some(DtnTime::new(timestamp)),
                sequence_number: a.parse().map_field_err("sequence number")?,
            };
            if a.end()?.is_none() {
                return Err(Error::AdditionalData);
            }
            Ok::<_, Error>(timestamp)
        })
    }
}
