use super::*;

mod parse;
mod primary_block;


/// Bundle processing control flags, including the status-report request
/// bits consulted by the processing agent.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Flags {
    pub is_fragment: bool,
    pub is_admin_record: bool,
    pub do_not_fragment: bool,
    pub app_ack_requested: bool,
    pub report_status_time: bool,
    pub receipt_report_requested: bool,
    pub forward_report_requested: bool,
    pub delivery_report_requested: bool,
    pub delete_report_requested: bool,

    pub unrecognised: Option<u64>,
}

impl From<u64> for Flags {
    fn from(value: u64) -> Self {
        let mut flags = Self::default();
        let mut unrecognised = value;

        for b in 0..=20 {
            if value & (1 << b) != 0 {
                match b {
                    0 => flags.is_fragment = true,
                    1 => flags.is_admin_record = true,
                    2 => flags.do_not_fragment = true,
                    5 => flags.app_ack_requested = true,
                    6 => flags.report_status_time = true,
                    14 => flags.receipt_report_requested = true,
                    16 => flags.forward_report_requested = true,
                    17 => flags.delivery_report_requested = true,
                    18 => flags.delete_report_requested = true,
                    _ => continue,
                }
                unrecognised &= !(1 << b);
            }
        }

        if unrecognised != 0 {
            flags.unrecognised = Some(unrecognised);
        }
        flags
    }
}

impl From<&Flags> for u64 {
    fn from(value: &Flags) -> Self {
        let mut flags = value.unrecognised.unwrap_or_default();
        if value.is_fragment {
            flags |= 1 << 0;
        }
        if value.is_admin_record {
            flags |= 1 << 1;
        }
        if value.do_not_fragment {
            flags |= 1 << 2;
        }
        if value.app_ack_requested {
            flags |= 1 << 5;
        }
        if value.report_status_time {
            flags |= 1 << 6;
        }
        if value.receipt_report_requested {
            flags |= 1 << 14;
        }
        if value.forward_report_requested {
            flags |= 1 << 16;
        }
        if value.delivery_report_requested {
            flags |= 1 << 17;
        }
        if value.delete_report_requested {
            flags |= 1 << 18;
        }
        flags
    }
}

impl cbor::encode::ToCbor for Flags {
    fn to_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit(&u64::from(self))
    }
}

impl cbor::decode::FromCbor for Flags {
    type Error = cbor::decode::Error;

    fn from_cbor(data: &[u8]) -> Result<(Self, usize), Self::Error> {
        cbor::decode::parse::<u64>(data).map(|(value, len)| (value.into(), len))
    }
}

/// A bundle: the primary block unpacked into fields, plus the ordered
/// canonical blocks. `crc_check` is the primary block's integrity tag.
#[derive(Default, Debug, Clone)]
pub struct Bundle {
    pub id: BundleId,
    pub flags: Flags,
    pub crc_type: crc::CrcType,
    pub destination: eid::Eid,
    pub report_to: eid::Eid,
    pub lifetime: core::time::Duration,

    pub blocks: Vec<block::Block>,

    pub crc_check: Option<bool>,
}

impl Bundle {
    /// The payload block, block number 0.
    pub fn payload(&self) -> Option<&block::Block> {
        self.block(0)
    }

    pub fn block(&self, number: u64) -> Option<&block::Block> {
        self.blocks.iter().find(|b| b.number == number)
    }

    pub fn block_mut(&mut self, number: u64) -> Option<&mut block::Block> {
        self.blocks.iter_mut().find(|b| b.number == number)
    }

    pub fn block_of_type(&self, block_type: block::Type) -> Option<&block::Block> {
        self.blocks.iter().find(|b| b.block_type == block_type)
    }

    pub fn remove_block(&mut self, number: u64) {
        self.blocks.retain(|b| b.number != number);
    }

    /// Did the primary block and every canonical block pass its CRC check?
    pub fn crc_ok(&self) -> bool {
        self.crc_check != Some(false) && self.blocks.iter().all(|b| b.crc_check != Some(false))
    }

    /// Lifetime check against the creation timestamp, falling back to the
    /// bundle-age block when the source had no clock.
    pub fn has_expired(&self, now: DtnTime) -> bool {
        if let Some(creation_time) = self.id.timestamp.creation_time {
            now.millisecs()
                >= creation_time
                    .millisecs()
                    .saturating_add(self.lifetime.as_millis() as u64)
        } else if let Some(age) = self
            .block_of_type(block::Type::BundleAge)
            .and_then(|b| b.bundle_age().ok())
        {
            age >= self.lifetime
        } else {
            false
        }
    }

    fn check_wire_form(&self) -> Result<(), Error> {
        if self.id.source.has_wire_form()
            && self.destination.has_wire_form()
            && self.report_to.has_wire_form()
        {
            Ok(())
        } else {
            Err(Error::ApiEidOnWire)
        }
    }

    /// Serialize the whole bundle into one buffer.
    pub fn emit(&self) -> Result<Vec<u8>, Error> {
        let mut data = Vec::new();
        self.emit_chunked(|chunk| data.extend_from_slice(chunk))?;
        Ok(data)
    }

    /// Serialize the bundle a piece at a time: framing bytes, the primary
    /// block, then each canonical block as its own chunk, so no more than
    /// one block is ever materialized.
    pub fn emit_chunked<F>(&self, mut sink: F) -> Result<(), Error>
    where
        F: FnMut(&[u8]),
    {
        self.check_wire_form()?;

        // Outer array: [primary, [canonical...]], indefinite at both levels
        sink(&[0x9F]);
        sink(&primary_block::PrimaryBlock::emit(self));
        sink(&[0x9F]);
        for block in &self.blocks {
            sink(&block.to_vec());
        }
        sink(&[0xFF]);
        sink(&[0xFF]);
        Ok(())
    }
}
