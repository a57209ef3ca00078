//! In-memory mirror of gateway certificate and route state.
//!
//! Lookups are linear scans; gateway configs stay in the low thousands of
//! entries so an index would only add bookkeeping.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::types::{Certificate, Route};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    pub certificates: Vec<Certificate>,
    pub routes: Vec<Route>,
}

impl Mirror {
    pub fn new(certificates: Vec<Certificate>, routes: Vec<Route>) -> Self {
        Self {
            certificates,
            routes,
        }
    }

    /// Index of the first certificate whose (cert, key) pair matches exactly.
    pub fn certificate_with_material(&self, cert: &str, key: &str) -> Option<usize> {
        self.certificates
            .iter()
            .position(|c| c.has_material(cert, key))
    }

    /// Index of the certificate currently listing `sni`.
    pub fn certificate_for_sni(&self, sni: &str) -> Option<usize> {
        self.certificates.iter().position(|c| c.snis.contains(sni))
    }

    pub fn route(&self, route_id: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.id == route_id)
    }

    pub fn route_mut(&mut self, route_id: &str) -> Option<&mut Route> {
        self.routes.iter_mut().find(|r| r.id == route_id)
    }

    /// Every SNI and every route host known to the gateway.
    pub fn all_names(&self) -> BTreeSet<String> {
        let snis = self.certificates.iter().flat_map(|c| c.snis.iter());
        let hosts = self.routes.iter().flat_map(|r| r.hosts.iter());
        snis.chain(hosts).cloned().collect()
    }
}
