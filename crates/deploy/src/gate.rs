//! Network gate: decides which declared steps apply to the targeted network.

use crate::{manifest::Scheduled, network::NetworkName};

/// Whether `step` applies to `network`.
///
/// A step with no target networks applies everywhere. A step that does not
/// apply is skipped silently; it is never an error.
pub fn applies<S: Scheduled + ?Sized>(step: &S, network: &NetworkName) -> bool {
    let targets = step.networks();
    targets.is_empty() || targets.contains(network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ArtifactSpec;

    fn net(name: &str) -> NetworkName {
        NetworkName::new(name).unwrap()
    }

    #[test]
    fn test_empty_targets_apply_everywhere() {
        let spec = ArtifactSpec::new("Controller");
        assert!(applies(&spec, &net("sepolia")));
        assert!(applies(&spec, &net("mainnet")));
    }

    #[test]
    fn test_membership() {
        let spec = ArtifactSpec::new("PythOracle").networks(["mainnet"]);
        assert!(applies(&spec, &net("mainnet")));
        assert!(!applies(&spec, &net("sepolia")));
    }
}
