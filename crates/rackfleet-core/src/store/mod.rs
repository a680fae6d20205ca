// ── Topology storage ──

mod collection;
pub mod data_store;
pub mod repository;
pub mod snapshot;

pub use data_store::DataStore;
pub use repository::{
    AddressRepository, FabricRepository, InterfaceRepository, NodeRepository,
    ServiceStatusRepository, SettingsRepository, SnippetRepository, SubnetRepository, Topology,
    VlanRepository,
};
pub use snapshot::TopologySnapshot;
