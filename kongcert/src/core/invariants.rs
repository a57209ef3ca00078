//! Mirror invariants not expressible in the serialized shape.

use std::collections::{HashMap, HashSet};

use crate::core::mirror::Mirror;

/// Check mirror invariants:
/// - No duplicate certificate ids
/// - Every SNI is listed by exactly one certificate
/// - No duplicate route ids
pub fn validate_mirror(mirror: &Mirror) -> Vec<String> {
    let mut errors = Vec::new();

    let mut cert_ids = HashSet::new();
    let mut sni_owner: HashMap<&str, &str> = HashMap::new();
    for cert in &mirror.certificates {
        if !cert_ids.insert(cert.id.as_str()) {
            errors.push(format!("duplicate certificate id '{}'", cert.id));
        }
        for sni in &cert.snis {
            if let Some(owner) = sni_owner.insert(sni.as_str(), cert.id.as_str()) {
                errors.push(format!(
                    "sni '{}' listed by certificates '{}' and '{}'",
                    sni, owner, cert.id
                ));
            }
        }
    }

    let mut route_ids = HashSet::new();
    for route in &mirror.routes {
        if !route_ids.insert(route.id.as_str()) {
            errors.push(format!("duplicate route id '{}'", route.id));
        }
    }

    errors
}
