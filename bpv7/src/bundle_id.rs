use super::*;

/// The identity of a bundle: source EID plus creation timestamp, and the
/// fragment extent when the bundle is a fragment.
#[derive(Default, Debug, Clone, Hash, PartialEq, Eq)]
pub struct BundleId {
    pub source: eid::Eid,
    pub timestamp: CreationTimestamp,
    pub fragment_info: Option<FragmentInfo>,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct FragmentInfo {
    pub offset: u64,
    pub total_len: u64,
}

impl core::fmt::Display for BundleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}/{}.{}",
            self.source,
            self.timestamp
                .creation_time
                .unwrap_or_default()
                .millisecs(),
            self.timestamp.sequence_number
        )?;
        if let Some(fragment_info) = &self.fragment_info {
            write!(f, "/{}:{}", fragment_info.offset, fragment_info.total_len)?;
        }
        Ok(())
    }
}
