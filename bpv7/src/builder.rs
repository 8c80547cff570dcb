use super::*;

/// Fluent construction of outbound bundles. The payload block is always
/// emitted last, as block number 0; extension blocks are numbered from 1 in
/// the order they are added.
pub struct Builder {
    flags: bundle::Flags,
    crc_type: crc::CrcType,
    source: eid::Eid,
    destination: eid::Eid,
    report_to: Option<eid::Eid>,
    lifetime: core::time::Duration,
    payload: BlockTemplate,
    extensions: Vec<BlockTemplate>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            flags: bundle::Flags::default(),
            crc_type: crc::CrcType::CRC32_CASTAGNOLI,
            source: eid::Eid::default(),
            destination: eid::Eid::default(),
            report_to: None,
            lifetime: core::time::Duration::from_secs(24 * 60 * 60),
            payload: BlockTemplate::new(
                block::Type::Payload,
                block::Flags::default(),
                crc::CrcType::CRC32_CASTAGNOLI,
            ),
            extensions: Vec::new(),
        }
    }
}

impl Builder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn flags(&mut self, flags: bundle::Flags) -> &mut Self {
        self.flags = flags;
        self
    }

    pub fn crc_type(&mut self, crc_type: crc::CrcType) -> &mut Self {
        self.crc_type = crc_type;
        self
    }

    pub fn source(&mut self, source: eid::Eid) -> &mut Self {
        self.source = source;
        self
    }

    pub fn destination(&mut self, destination: eid::Eid) -> &mut Self {
        self.destination = destination;
        self
    }

    pub fn report_to(&mut self, report_to: eid::Eid) -> &mut Self {
        self.report_to = Some(report_to);
        self
    }

    pub fn lifetime(&mut self, lifetime: core::time::Duration) -> &mut Self {
        self.lifetime = lifetime;
        self
    }

    pub fn add_extension_block(&mut self, block_type: block::Type) -> BlockBuilder<'_> {
        BlockBuilder::new(self, block_type)
    }

    pub fn add_payload_block(&mut self, data: Vec<u8>) -> &mut Self {
        self.add_extension_block(block::Type::Payload)
            .data(data)
            .build()
    }

    pub fn build(mut self) -> Bundle {
        let mut blocks = Vec::with_capacity(self.extensions.len() + 1);
        for (idx, template) in self.extensions.into_iter().enumerate() {
            blocks.push(template.build(idx as u64 + 1));
        }
        blocks.push(self.payload.build(0));

        Bundle {
            report_to: if let Some(report_to) = &mut self.report_to {
                core::mem::take(report_to)
            } else {
                self.source.clone()
            },
            id: BundleId {
                source: core::mem::take(&mut self.source),
                timestamp: CreationTimestamp::now(),
                ..Default::default()
            },
            flags: self.flags,
            crc_type: self.crc_type,
            destination: core::mem::take(&mut self.destination),
            lifetime: self.lifetime,
            blocks,
            crc_check: None,
        }
    }
}

pub struct BlockBuilder<'a> {
    builder: &'a mut Builder,
    template: BlockTemplate,
}

impl<'a> BlockBuilder<'a> {
    fn new(builder: &'a mut Builder, block_type: block::Type) -> Self {
        Self {
            template: BlockTemplate::new(block_type, block::Flags::default(), builder.crc_type),
            builder,
        }
    }

    pub fn must_replicate(mut self, must_replicate: bool) -> Self {
        self.template.flags.must_replicate = must_replicate;
        self
    }

    pub fn report_on_failure(mut self, report_on_failure: bool) -> Self {
        self.template.flags.report_on_failure = report_on_failure;
        self
    }

    pub fn delete_bundle_on_failure(mut self, delete_bundle_on_failure: bool) -> Self {
        self.template.flags.delete_bundle_on_failure = delete_bundle_on_failure;
        self
    }

    pub fn delete_block_on_failure(mut self, delete_block_on_failure: bool) -> Self {
        self.template.flags.delete_block_on_failure = delete_block_on_failure;
        self
    }

    pub fn crc_type(mut self, crc_type: crc::CrcType) -> Self {
        self.template.crc_type = crc_type;
        self
    }

    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.template.data = data;
        self
    }

    pub fn build(self) -> &'a mut Builder {
        if let block::Type::Payload = self.template.block_type {
            self.builder.payload = self.template;
        } else {
            self.builder.extensions.push(self.template);
        }
        self.builder
    }
}

#[derive(Clone)]
struct BlockTemplate {
    block_type: block::Type,
    flags: block::Flags,
    crc_type: crc::CrcType,
    data: Vec<u8>,
}

impl BlockTemplate {
    fn new(block_type: block::Type, flags: block::Flags, crc_type: crc::CrcType) -> Self {
        Self {
            block_type,
            flags,
            crc_type,
            data: Vec::new(),
        }
    }

    fn build(self, number: u64) -> block::Block {
        block::Block::new(self.block_type, number, self.flags, self.crc_type, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_valid_bundle() {
        let mut b = Builder::new();
        b.source("ipn:1.0".parse().unwrap())
            .destination("ipn:2.0".parse().unwrap())
            .report_to("ipn:3.0".parse().unwrap())
            .lifetime(core::time::Duration::from_secs(60));

        b.add_extension_block(block::Type::BundleAge)
            .crc_type(crc::CrcType::CRC16_X25)
            .data(cbor::encode::emit(&0u64))
            .build()
            .add_payload_block(b"ping".to_vec());

        let bundle = b.build();
        let data = bundle.emit().unwrap();
        let (parsed, len) = Bundle::parse(&data).unwrap();

        assert_eq!(len, data.len());
        assert_eq!(parsed.id.source, "ipn:1.0".parse().unwrap());
        assert_eq!(parsed.report_to, "ipn:3.0".parse().unwrap());
        assert_eq!(parsed.blocks.len(), 2);
        assert_eq!(parsed.blocks[0].block_type, block::Type::BundleAge);
        assert_eq!(parsed.blocks[0].number, 1);
        assert_eq!(&*parsed.payload().unwrap().data, b"ping");
        assert!(parsed.crc_ok());
    }

    #[test]
    fn report_to_defaults_to_source() {
        let mut b = Builder::new();
        b.source("ipn:1.0".parse().unwrap())
            .destination("ipn:2.0".parse().unwrap())
            .add_payload_block(Vec::new());

        let bundle = b.build();
        assert_eq!(bundle.report_to, bundle.id.source);
    }
}
