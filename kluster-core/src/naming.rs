//! Deterministic names for external resources
//!
//! External resources are looked up by name every pass, so the name must be a pure
//! function of the owner, and two owners must never share one. Cloud providers
//! disagree on allowed characters; the common denominator is lower-case
//! alphanumerics and `-`, at most 63 characters.
//!
//! Names that can be read back unambiguously are used as is. Anything else (a
//! namespace containing `-`, characters that had to be replaced, or a name that had
//! to be shortened) gets a digest of the raw identity appended.
use crate::{Error, Result};
use kube::{Resource, ResourceExt};
use sha2::{Digest, Sha256};

/// Longest name accepted by every supported provider
pub const MAX_NAME_LEN: usize = 63;

/// Bytes of the SHA-256 digest kept as a suffix, hex encoded
const DIGEST_BYTES: usize = 4;

/// `"<prefix>-<namespace>-<name>"` for the owner, at most [`MAX_NAME_LEN`] characters
pub fn resource_name<K: Resource>(prefix: &str, owner: &K) -> Result<String> {
    resource_name_within(prefix, owner, MAX_NAME_LEN)
}

/// [`resource_name`] for providers with a stricter length limit
pub fn resource_name_within<K: Resource>(prefix: &str, owner: &K, max_len: usize) -> Result<String> {
    let name = owner.meta().name.as_deref().ok_or(Error::MissingObjectKey(".metadata.name"))?;
    let namespace = owner.namespace().ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let readable = format!("{prefix}-{namespace}-{name}");
    let unambiguous = !namespace.contains('-');
    Ok(fit(&readable, unambiguous, &format!("{namespace}/{name}"), max_len))
}

/// `"<parent>-<child>"` for a resource nested under an external `parent` name
pub fn child_name(parent: &str, child: &str) -> String {
    fit(&format!("{parent}-{child}"), true, &format!("{parent}/{child}"), MAX_NAME_LEN)
}

fn fit(readable: &str, unambiguous: bool, identity: &str, max_len: usize) -> String {
    let normalized = normalize(readable);
    if unambiguous && normalized == readable && readable.len() <= max_len {
        return normalized;
    }
    let digest = hex::encode(&Sha256::digest(identity.as_bytes())[..DIGEST_BYTES]);
    let mut base = normalized;
    base.truncate(max_len.saturating_sub(digest.len() + 1));
    match base.trim_end_matches('-') {
        "" => digest,
        base => format!("{base}-{digest}"),
    }
}

/// Lower-case, collapse runs of unsupported characters into one `-` and trim
fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cluster, ClusterSpec};

    fn owner(namespace: &str, name: &str) -> Cluster {
        let mut cluster = Cluster::new(name, ClusterSpec::default());
        cluster.metadata.namespace = Some(namespace.into());
        cluster
    }

    #[test]
    fn plain_names_are_kept() {
        assert_eq!(resource_name("rg", &owner("default", "c1")).unwrap(), "rg-default-c1");
        assert_eq!(resource_name("rg", &owner("prod", "eu-west")).unwrap(), "rg-prod-eu-west");
    }

    #[test]
    fn names_are_deterministic() {
        let cluster = owner("team-a", "Prod_EU");
        let name = resource_name("rg", &cluster).unwrap();
        assert_eq!(resource_name("rg", &cluster).unwrap(), name);
        assert!(name.starts_with("rg-team-a-prod-eu-"));
        assert_eq!(name.len(), "rg-team-a-prod-eu-".len() + 2 * DIGEST_BYTES);
    }

    #[test]
    fn distinct_owners_never_share_a_name() {
        let a = resource_name("rg", &owner("team-a", "prod")).unwrap();
        let b = resource_name("rg", &owner("team", "a-prod")).unwrap();
        assert_eq!(b, "rg-team-a-prod");
        assert_ne!(a, b);

        let long_x = resource_name("rg", &owner("ns", &("b".repeat(70) + "x"))).unwrap();
        let long_y = resource_name("rg", &owner("ns", &("b".repeat(70) + "y"))).unwrap();
        assert_ne!(long_x, long_y);
        for name in [&long_x, &long_y] {
            assert_eq!(name.len(), MAX_NAME_LEN);
            assert!(name.starts_with("rg-ns-bbb"));
        }
    }

    #[test]
    fn stricter_limits_are_honoured() {
        let name = resource_name_within("kl", &owner("default", "a-rather-long-cluster-name"), 30).unwrap();
        assert!(name.len() <= 30);
        assert!(name.starts_with("kl-default-"));
        assert!(!name.contains("--"));
    }

    #[test]
    fn children_with_replaced_characters_stay_apart() {
        assert_eq!(child_name("eks-default-c1", "workers"), "eks-default-c1-workers");
        let underscore = child_name("eks-default-c1", "a_b");
        let dot = child_name("eks-default-c1", "a.b");
        assert_ne!(underscore, dot);
        assert!(underscore.starts_with("eks-default-c1-a-b-"));
    }

    #[test]
    fn namespace_is_required() {
        let cluster = Cluster::new("prod", ClusterSpec::default());
        assert_eq!(
            resource_name("rg", &cluster),
            Err(Error::MissingObjectKey(".metadata.namespace"))
        );
    }
}
