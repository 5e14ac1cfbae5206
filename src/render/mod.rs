//! Artifact renderer and the on-disk artifact store.

mod renderer;
pub mod store;

pub use renderer::{encode_command, Artifact, RenderedPair, Renderer};
pub use store::{ArtifactStore, RequestScope, StoreError, StoredUpload};
