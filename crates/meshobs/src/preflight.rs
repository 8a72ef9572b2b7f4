//! Preconditions checked before any mutating call.

use tracing::{error, info};

use crate::client::ClusterClient;
use crate::error::{Error, Result};
use crate::ui;

/// One precondition and what was found.
#[derive(Debug, Clone)]
pub struct Requirement {
    pub name: &'static str,
    pub outcome: std::result::Result<String, String>,
}

/// Check cluster reachability and, when `need_installer` is set, presence
/// of the mesh installer.
///
/// # Errors
///
/// Returns [`Error::Fatal`] naming every unmet requirement.
pub async fn check<C>(client: &C, need_installer: bool) -> Result<Vec<Requirement>>
where
    C: ClusterClient + ?Sized,
{
    let mut requirements = vec![Requirement {
        name: "Kubernetes API server",
        outcome: client.cluster_info().await.map_err(|e| e.to_string()),
    }];
    if need_installer {
        requirements.push(Requirement {
            name: "Mesh installer",
            outcome: client.mesh_installer().await.map_err(|e| e.to_string()),
        });
    }

    for requirement in &requirements {
        match &requirement.outcome {
            Ok(found) => {
                info!(requirement = requirement.name, found = %found, "Precondition met");
                ui::print_check_result(requirement.name, true, Some(found));
            }
            Err(reason) => {
                error!(requirement = requirement.name, reason = %reason, "Precondition failed");
                ui::print_check_result(requirement.name, false, Some(reason));
            }
        }
    }

    let failures: Vec<String> = requirements
        .iter()
        .filter_map(|r| r.outcome.as_ref().err().map(|e| format!("{}: {e}", r.name)))
        .collect();
    if failures.is_empty() {
        Ok(requirements)
    } else {
        Err(Error::Fatal(format!(
            "preconditions not met: {}",
            failures.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::InMemoryCluster;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_all_met() {
        let cluster = InMemoryCluster::new();
        let found = check(&cluster, true).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_cluster_is_fatal() {
        let cluster = InMemoryCluster::new();
        cluster.set_reachable(false);
        let err = check(&cluster, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(err.to_string().contains("Kubernetes API server"));
    }

    #[tokio::test]
    async fn test_missing_installer_only_when_needed() {
        let cluster = InMemoryCluster::new();
        cluster.set_installer(None);
        assert!(check(&cluster, false).await.is_ok());
        let err = check(&cluster, true).await.unwrap_err();
        assert!(err.to_string().contains("istioctl not found"));
    }
}
