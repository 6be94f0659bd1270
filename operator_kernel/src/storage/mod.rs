//! Data tier: record store, similarity index and blob store, plus the
//! compute descriptor for the selected deployment mode.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::KernelError;

pub mod blob_store;
pub mod record_store;
pub mod vector_store;

pub use blob_store::BlobStore;
pub use record_store::RecordStore;
pub use vector_store::{tokenize, BagOfWordsIndex, SearchHit, SimilarityIndex};

/// Where the kernel and its data tier are expected to run.
///
/// Only the [`ComputeResources`] descriptor depends on it; kernel behaviour
/// is identical in every mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    #[default]
    Local,
    RemoteKernel,
    PersonalRemote,
    Hybrid,
}

impl DeploymentMode {
    pub const ALL: [DeploymentMode; 4] = [
        DeploymentMode::Local,
        DeploymentMode::RemoteKernel,
        DeploymentMode::PersonalRemote,
        DeploymentMode::Hybrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::Local => "local",
            DeploymentMode::RemoteKernel => "remote_kernel",
            DeploymentMode::PersonalRemote => "personal_remote",
            DeploymentMode::Hybrid => "hybrid",
        }
    }

    pub fn compute_resources(&self) -> ComputeResources {
        let (primary, secondary) = match self {
            DeploymentMode::Local => ("local CPU/GPU", None),
            DeploymentMode::RemoteKernel => ("local CPU/GPU", Some("remote kernel server")),
            DeploymentMode::PersonalRemote => ("personal cloud VM", Some("local CPU")),
            DeploymentMode::Hybrid => ("local CPU/GPU", Some("cloud compute")),
        };
        ComputeResources {
            primary: primary.to_string(),
            secondary: secondary.map(str::to_string),
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentMode {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<_> = Self::ALL.iter().map(|m| m.as_str()).collect();
                KernelError::Configuration(format!(
                    "deployment_mode must be one of {:?}, got '{}'",
                    names, s
                ))
            })
    }
}

/// Compute resources available to a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeResources {
    pub primary: String,
    pub secondary: Option<String>,
}

/// Aggregates the storage primitives shared by kernel services.
#[derive(Debug)]
pub struct DataLayer {
    deployment_mode: DeploymentMode,
    pub records: RecordStore,
    pub index: Arc<dyn SimilarityIndex>,
    pub blobs: BlobStore,
}

impl DataLayer {
    pub fn new(deployment_mode: DeploymentMode) -> Self {
        Self::with_index(deployment_mode, Arc::new(BagOfWordsIndex::new()))
    }

    /// Build a data layer around a custom similarity index.
    pub fn with_index(deployment_mode: DeploymentMode, index: Arc<dyn SimilarityIndex>) -> Self {
        Self {
            deployment_mode,
            records: RecordStore::new(),
            index,
            blobs: BlobStore::new(),
        }
    }

    pub fn deployment_mode(&self) -> DeploymentMode {
        self.deployment_mode
    }

    pub fn compute_resources(&self) -> ComputeResources {
        self.deployment_mode.compute_resources()
    }
}
