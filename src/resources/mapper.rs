//! Resource type aliases

use crate::error::{Result, SomError};

/// Alias to canonical resource type
const ALIASES: &[(&str, &str)] = &[
    ("pod", "pods"),
    ("pods", "pods"),
    ("po", "pods"),
    ("deployment", "deployments"),
    ("deployments", "deployments"),
    ("deploy", "deployments"),
    ("service", "services"),
    ("services", "services"),
    ("svc", "services"),
    ("statefulset", "statefulsets"),
    ("statefulsets", "statefulsets"),
    ("sts", "statefulsets"),
    ("s", "statefulsets"),
    ("node", "nodes"),
    ("nodes", "nodes"),
    ("no", "nodes"),
    ("namespace", "namespaces"),
    ("namespaces", "namespaces"),
    ("ns", "namespaces"),
    ("container", "containers"),
    ("containers", "containers"),
    ("ct", "containers"),
    ("image", "images"),
    ("images", "images"),
    ("stack", "stacks"),
    ("stacks", "stacks"),
];

/// Canonical plural name for a resource type, case-insensitive
pub fn normalize_type(input: &str) -> Result<&'static str> {
    let key = input.trim().to_ascii_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| *canonical)
        .ok_or_else(|| SomError::Resource(format!("unsupported resource type: {}", input)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases() {
        assert_eq!(normalize_type("po").unwrap(), "pods");
        assert_eq!(normalize_type("Deploy").unwrap(), "deployments");
        assert_eq!(normalize_type("svc").unwrap(), "services");
        assert_eq!(normalize_type("s").unwrap(), "statefulsets");
        assert_eq!(normalize_type("no").unwrap(), "nodes");
        assert_eq!(normalize_type("ns").unwrap(), "namespaces");
        assert_eq!(normalize_type("ct").unwrap(), "containers");
        assert_eq!(normalize_type("stack").unwrap(), "stacks");
    }

    #[test]
    fn test_unknown_type() {
        let err = normalize_type("ingress").unwrap_err();
        assert_eq!(err.to_string(), "Resource error: unsupported resource type: ingress");
    }
}
