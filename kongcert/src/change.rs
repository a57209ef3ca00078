//! Reversible units of work against the admin API.
//!
//! Every [`Change`] stores the pre-image and post-image it needs, so undo
//! never has to re-query the gateway. Creation variants undo via delete,
//! deletion variants via recreate-with-original-material, and update
//! variants via update-to-prior-value.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{CertificateData, PluginData, RouteData, ServiceData};
use crate::io::admin_api::{AdminApi, ApiError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    AddCertificate {
        certificate_id: String,
        data: CertificateData,
    },
    DeleteCertificate {
        certificate_id: String,
        data: CertificateData,
    },
    UpdateCertificate {
        certificate_id: String,
        data: CertificateData,
        previous: CertificateData,
    },
    UpdateSniCertificate {
        sni: String,
        certificate_id: String,
        previous_certificate_id: String,
    },
    CreateSni {
        sni: String,
        certificate_id: String,
    },
    UpdateRouteProtocols {
        route_id: String,
        protocols: Vec<String>,
        previous_protocols: Vec<String>,
    },
    CreateService {
        service_id: String,
        data: ServiceData,
    },
    CreatePlugin {
        plugin_id: String,
        data: PluginData,
    },
    CreateRoute {
        route_id: String,
        data: RouteData,
    },
}

impl Change {
    /// Perform the single remote write this change stands for.
    pub fn execute<A: AdminApi + ?Sized>(&self, api: &A) -> Result<(), ApiError> {
        debug!(change = %self.describe(), "executing change");
        match self {
            Change::AddCertificate {
                certificate_id,
                data,
            } => api.create_certificate(certificate_id, data).map(|_| ()),
            Change::DeleteCertificate { certificate_id, .. } => {
                api.delete_certificate(certificate_id)
            }
            Change::UpdateCertificate {
                certificate_id,
                data,
                ..
            } => api.update_certificate(certificate_id, data),
            Change::UpdateSniCertificate {
                sni,
                certificate_id,
                ..
            } => api.update_sni(sni, certificate_id),
            Change::CreateSni {
                sni,
                certificate_id,
            } => api.create_sni(sni, certificate_id),
            Change::UpdateRouteProtocols {
                route_id,
                protocols,
                ..
            } => api.update_route_protocols(route_id, protocols),
            Change::CreateService { service_id, data } => {
                api.create_or_update_service(service_id, data)
            }
            Change::CreatePlugin { plugin_id, data } => {
                api.create_or_update_plugin(plugin_id, data)
            }
            Change::CreateRoute { route_id, data } => api.create_or_update_route(route_id, data),
        }
    }

    /// Perform the exact inverse of [`Change::execute`].
    pub fn undo<A: AdminApi + ?Sized>(&self, api: &A) -> Result<(), ApiError> {
        debug!(change = %self.describe(), "undoing change");
        match self {
            Change::AddCertificate { certificate_id, .. } => {
                api.delete_certificate(certificate_id)
            }
            Change::DeleteCertificate {
                certificate_id,
                data,
            } => api.create_certificate(certificate_id, data).map(|_| ()),
            Change::UpdateCertificate {
                certificate_id,
                previous,
                ..
            } => api.update_certificate(certificate_id, previous),
            Change::UpdateSniCertificate {
                sni,
                previous_certificate_id,
                ..
            } => api.update_sni(sni, previous_certificate_id),
            Change::CreateSni { sni, .. } => api.delete_sni(sni),
            Change::UpdateRouteProtocols {
                route_id,
                previous_protocols,
                ..
            } => api.update_route_protocols(route_id, previous_protocols),
            Change::CreateService { service_id, .. } => api.delete_service(service_id),
            Change::CreatePlugin { plugin_id, .. } => api.delete_plugin(plugin_id),
            Change::CreateRoute { route_id, .. } => api.delete_route(route_id),
        }
    }

    /// Stable one-line summary for notes and logs. Never used for control flow.
    pub fn describe(&self) -> String {
        match self {
            Change::AddCertificate { certificate_id, .. } => {
                format!("Add certificate {certificate_id}")
            }
            Change::DeleteCertificate { certificate_id, .. } => {
                format!("Delete certificate {certificate_id}")
            }
            Change::UpdateCertificate { certificate_id, .. } => {
                format!("Update certificate {certificate_id}")
            }
            Change::UpdateSniCertificate { sni, .. } => format!("Update SNI {sni}"),
            Change::CreateSni { sni, .. } => format!("Add SNI {sni}"),
            Change::UpdateRouteProtocols { route_id, .. } => {
                format!("Update route protocols {route_id}")
            }
            Change::CreateService { service_id, .. } => format!("Add service {service_id}"),
            Change::CreatePlugin { plugin_id, .. } => format!("Add plugin {plugin_id}"),
            Change::CreateRoute { route_id, .. } => format!("Add route {route_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::EntityRef;
    use crate::test_support::{ApiCall, FakeKong, certificate, route};

    fn fake() -> FakeKong {
        FakeKong::new(
            vec![certificate("cert001", "C1", "K1", &["a.test"])],
            vec![route("route001", &["a.test"], &["http", "https"])],
        )
    }

    #[test]
    fn add_certificate_undo_deletes_it() {
        let api = fake();
        let change = Change::AddCertificate {
            certificate_id: "cert002".to_string(),
            data: CertificateData::new("C2", "K2"),
        };

        change.execute(&api).expect("execute");
        assert!(api.certificate("cert002").is_some());
        change.undo(&api).expect("undo");
        assert!(api.certificate("cert002").is_none());
        assert_eq!(
            api.write_calls(),
            vec![
                ApiCall::CreateCertificate("cert002".to_string()),
                ApiCall::DeleteCertificate("cert002".to_string()),
            ]
        );
    }

    #[test]
    fn delete_certificate_undo_recreates_original_material() {
        let api = fake();
        api.delete_sni("a.test").expect("detach sni");
        let change = Change::DeleteCertificate {
            certificate_id: "cert001".to_string(),
            data: CertificateData::new("C1", "K1"),
        };

        change.execute(&api).expect("execute");
        assert!(api.certificate("cert001").is_none());
        change.undo(&api).expect("undo");
        let restored = api.certificate("cert001").expect("restored");
        assert!(restored.has_material("C1", "K1"));
    }

    #[test]
    fn update_certificate_undo_restores_previous_material() {
        let api = fake();
        let change = Change::UpdateCertificate {
            certificate_id: "cert001".to_string(),
            data: CertificateData::new("C9", "K9"),
            previous: CertificateData::new("C1", "K1"),
        };

        change.execute(&api).expect("execute");
        assert!(api.certificate("cert001").expect("cert").has_material("C9", "K9"));
        change.undo(&api).expect("undo");
        assert!(api.certificate("cert001").expect("cert").has_material("C1", "K1"));
    }

    #[test]
    fn sni_changes_round_trip_through_fake() {
        let api = fake();
        api.create_certificate("cert002", &CertificateData::new("C2", "K2"))
            .expect("create cert002");

        let update = Change::UpdateSniCertificate {
            sni: "a.test".to_string(),
            certificate_id: "cert002".to_string(),
            previous_certificate_id: "cert001".to_string(),
        };
        update.execute(&api).expect("execute update");
        assert_eq!(api.sni_certificate("a.test").as_deref(), Some("cert002"));
        update.undo(&api).expect("undo update");
        assert_eq!(api.sni_certificate("a.test").as_deref(), Some("cert001"));

        let create = Change::CreateSni {
            sni: "b.test".to_string(),
            certificate_id: "cert002".to_string(),
        };
        create.execute(&api).expect("execute create");
        assert_eq!(api.sni_certificate("b.test").as_deref(), Some("cert002"));
        create.undo(&api).expect("undo create");
        assert_eq!(api.sni_certificate("b.test"), None);
    }

    #[test]
    fn route_protocols_undo_restores_previous() {
        let api = fake();
        let change = Change::UpdateRouteProtocols {
            route_id: "route001".to_string(),
            protocols: vec!["https".to_string()],
            previous_protocols: vec!["http".to_string(), "https".to_string()],
        };

        change.execute(&api).expect("execute");
        assert_eq!(api.route("route001").expect("route").protocols, vec!["https"]);
        change.undo(&api).expect("undo");
        assert_eq!(
            api.route("route001").expect("route").protocols,
            vec!["http", "https"]
        );
    }

    #[test]
    fn creation_changes_undo_via_delete() {
        let api = fake();
        let service = Change::CreateService {
            service_id: "svc".to_string(),
            data: ServiceData {
                name: "challenge".to_string(),
                url: "http://invalid.example.com".to_string(),
            },
        };
        let route = Change::CreateRoute {
            route_id: "rt".to_string(),
            data: RouteData {
                service: EntityRef::new("svc"),
                paths: vec!["/.well-known/acme-challenge/t".to_string()],
                hosts: vec!["a.test".to_string()],
                protocols: vec!["http".to_string()],
            },
        };

        service.execute(&api).expect("service");
        route.execute(&api).expect("route");
        route.undo(&api).expect("undo route");
        service.undo(&api).expect("undo service");

        assert_eq!(
            api.write_calls(),
            vec![
                ApiCall::PutService("svc".to_string()),
                ApiCall::PutRoute("rt".to_string()),
                ApiCall::DeleteRoute("rt".to_string()),
                ApiCall::DeleteService("svc".to_string()),
            ]
        );
    }

    #[test]
    fn describe_is_stable() {
        let change = Change::UpdateSniCertificate {
            sni: "a.test".to_string(),
            certificate_id: "new".to_string(),
            previous_certificate_id: "old".to_string(),
        };
        assert_eq!(change.describe(), "Update SNI a.test");
        let change = Change::AddCertificate {
            certificate_id: "abc".to_string(),
            data: CertificateData::new("C", "K"),
        };
        assert_eq!(change.describe(), "Add certificate abc");
    }

    #[test]
    fn serializes_with_kind_tag() {
        let change = Change::CreateSni {
            sni: "a.test".to_string(),
            certificate_id: "cert001".to_string(),
        };
        let value = serde_json::to_value(&change).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({"kind": "create_sni", "sni": "a.test", "certificate_id": "cert001"})
        );
    }
}
