//! Candidate resolution: which instances a request applies to.

use loadgrid_consume::{ConsumeError, ConsumeResult};
use loadgrid_discovery::Instance;
use rand::seq::SliceRandom;
use tracing::warn;

use crate::proto;

/// Turn a candidate selector into the concrete instance list. `explicit`
/// is the host/port pair carried by the request, required for SPECIFIC
/// and ignored otherwise.
pub fn resolve(
    candidate: proto::Candidate,
    self_instance: &Instance,
    explicit: Option<&Instance>,
    peers: &[Instance],
) -> ConsumeResult<Vec<Instance>> {
    match candidate {
        proto::Candidate::Self_ => Ok(vec![self_instance.clone()]),
        proto::Candidate::Random => {
            let peer = peers.choose(&mut rand::thread_rng()).ok_or_else(|| {
                ConsumeError::Dependency(
                    "no peers available to pick a random candidate from".to_string(),
                )
            })?;
            Ok(vec![peer.clone()])
        }
        proto::Candidate::Specific => {
            let wanted = explicit.ok_or_else(|| {
                ConsumeError::InvalidParameter(
                    "a specific candidate requires a host and port".to_string(),
                )
            })?;
            if !peers.contains(wanted) {
                return Err(ConsumeError::InvalidParameter(format!(
                    "instance {wanted} is not a known fleet member"
                )));
            }
            Ok(vec![wanted.clone()])
        }
        proto::Candidate::All => {
            if peers.is_empty() {
                warn!("candidate ALL resolved with an empty peer list, applying to self only");
                return Ok(vec![self_instance.clone()]);
            }
            Ok(peers.to_vec())
        }
        proto::Candidate::Unspecified => Err(ConsumeError::InvalidParameter(
            "request is missing a candidate selector".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me() -> Instance {
        Instance::new("10.0.0.1", 9090)
    }

    fn fleet() -> Vec<Instance> {
        vec![
            Instance::new("10.0.0.1", 9090),
            Instance::new("10.0.0.2", 9090),
            Instance::new("10.0.0.3", 9090),
        ]
    }

    #[test]
    fn self_resolves_to_this_instance() {
        let resolved = resolve(proto::Candidate::Self_, &me(), None, &fleet()).unwrap();
        assert_eq!(resolved, vec![me()]);
    }

    #[test]
    fn random_picks_one_fleet_member() {
        let peers = fleet();
        for _ in 0..20 {
            let resolved = resolve(proto::Candidate::Random, &me(), None, &peers).unwrap();
            assert_eq!(resolved.len(), 1);
            assert!(peers.contains(&resolved[0]));
        }
    }

    #[test]
    fn random_with_no_peers_is_a_dependency_failure() {
        let err = resolve(proto::Candidate::Random, &me(), None, &[]).unwrap_err();
        assert!(matches!(err, ConsumeError::Dependency(_)));
    }

    #[test]
    fn specific_requires_a_known_member() {
        let known = Instance::new("10.0.0.2", 9090);
        let resolved =
            resolve(proto::Candidate::Specific, &me(), Some(&known), &fleet()).unwrap();
        assert_eq!(resolved, vec![known]);

        let stranger = Instance::new("192.168.0.9", 1234);
        let err =
            resolve(proto::Candidate::Specific, &me(), Some(&stranger), &fleet()).unwrap_err();
        assert!(matches!(err, ConsumeError::InvalidParameter(_)));

        let err = resolve(proto::Candidate::Specific, &me(), None, &fleet()).unwrap_err();
        assert!(matches!(err, ConsumeError::InvalidParameter(_)));
    }

    #[test]
    fn specific_requires_discovery_even_for_self() {
        // The fleet list is the single source of truth; naming this
        // instance explicitly does not bypass it.
        let err = resolve(proto::Candidate::Specific, &me(), Some(&me()), &[]).unwrap_err();
        assert!(matches!(err, ConsumeError::InvalidParameter(_)));

        let resolved = resolve(proto::Candidate::Specific, &me(), Some(&me()), &fleet()).unwrap();
        assert_eq!(resolved, vec![me()]);
    }

    #[test]
    fn all_resolves_to_the_full_fleet() {
        let resolved = resolve(proto::Candidate::All, &me(), None, &fleet()).unwrap();
        assert_eq!(resolved, fleet());
    }

    #[test]
    fn all_with_no_peers_degrades_to_self() {
        let resolved = resolve(proto::Candidate::All, &me(), None, &[]).unwrap();
        assert_eq!(resolved, vec![me()]);
    }

    #[test]
    fn unspecified_candidate_is_rejected() {
        let err = resolve(proto::Candidate::Unspecified, &me(), None, &fleet()).unwrap_err();
        assert!(matches!(err, ConsumeError::InvalidParameter(_)));
    }
}
