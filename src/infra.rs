pub mod config;
pub mod descriptor_store;
pub mod podman_adapter;

pub use descriptor_store::DescriptorStore;
pub use podman_adapter::PodmanAdapter;
