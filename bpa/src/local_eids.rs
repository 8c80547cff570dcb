use super::*;

/// How a destination EID turned out to be local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Matches an application registration; deliver via the registrar,
    /// keyed by the registered endpoint.
    Registration(bpv7::eid::Eid),

    /// Matches the node id or a configured alias.
    NodeId,

    /// Matches the peer of a live convergence-layer channel.
    ClaAlias,
}

/// Resolves destination EIDs against everything this node answers to.
/// Registrations take precedence over the node id, which takes precedence
/// over link-local channel peers.
pub struct LocalEidTable {
    node_id: bpv7::eid::Eid,
    aliases: Vec<bpv7::eid::Eid>,
    registrar: Arc<dyn registrar::Registrar>,
    channels: Arc<cla::ChannelTable>,
}

impl LocalEidTable {
    pub fn new(
        config: &config::Config,
        registrar: Arc<dyn registrar::Registrar>,
        channels: Arc<cla::ChannelTable>,
    ) -> Self {
        Self {
            node_id: config.node_id.clone(),
            aliases: config.aliases.clone(),
            registrar,
            channels,
        }
    }

    pub fn node_id(&self) -> &bpv7::eid::Eid {
        &self.node_id
    }

    pub async fn lookup(&self, eid: &bpv7::eid::Eid) -> Option<Lookup> {
        for registration in self.registrar.registrations().await {
            if registration.matches(eid) {
                return Some(Lookup::Registration(registration));
            }
        }

        if self.node_id.matches(eid)
            || self.node_id.is_authoritative_over(eid)
            || self.aliases.iter().any(|a| a.matches(eid))
        {
            return Some(Lookup::NodeId);
        }

        if self.channels.find_matching(eid).await.is_some() {
            return Some(Lookup::ClaAlias);
        }

        None
    }
}
