//! Contains the topology and server descriptions and server selection.

mod description;
mod topology;

pub use self::{
    description::{
        server::{ServerDescription, ServerType},
        topology::{
            server_selection::{attempt_to_select_server, SelectedServer},
            TopologyDescription,
            TopologyType,
        },
    },
    topology::{
        Topology,
        TopologyUpdateRequestReceiver,
        TopologyUpdater,
        TopologyWatcher,
    },
};
