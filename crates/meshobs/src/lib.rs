//! Mesh observability installer library.
//!
//! Reconciles a Kubernetes cluster towards a [`desired::DesiredStateSpec`]:
//! the Istio control plane, its Prometheus addon, and a remote-write sink
//! configured on that addon.
//!
//! # Example
//!
//! ```ignore
//! use meshobs::addon::AddonTemplate;
//! use meshobs::client::kube::KubeClusterClient;
//! use meshobs::desired::DesiredStateSpec;
//! use meshobs::reconciler::{Reconciler, ReconcilerOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = KubeClusterClient::connect(None, "istioctl").await?;
//!     let mut reconciler =
//!         Reconciler::new(client, AddonTemplate::bundled()?, ReconcilerOptions::default());
//!     reconciler.apply(&DesiredStateSpec::default(), None).await?;
//!     Ok(())
//! }
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

pub mod addon;
pub mod backend;
pub mod client;
pub mod config;
pub mod desired;
pub mod error;
pub mod observe;
pub mod plan;
pub mod preflight;
pub mod reconciler;
pub mod relabel;
pub mod remote_write;
pub mod retry;
pub mod ui;
pub mod verify;
pub mod wait;
pub mod workspace;

// Re-export commonly used types at the crate root
pub use desired::{DesiredStateSpec, MeshProfile};
pub use error::{Error, ErrorKind, Result};
pub use reconciler::{Phase, Reconciler, StepFailure};
