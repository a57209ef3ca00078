//! Change invoker: the in-memory mirror plus a manual undo log.
//!
//! Intent methods mutate the mirror optimistically and queue [`Change`]s.
//! [`ChangeInvoker::apply_changes`] executes the queue in order; the first
//! failure triggers a best-effort rollback of everything already executed.
//! The gateway cannot be changed atomically, so a rollback that itself fails
//! is reported as [`RollbackIncomplete`] rather than hidden.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::change::Change;
use crate::core::invariants::validate_mirror;
use crate::core::mirror::Mirror;
use crate::core::types::{
    Certificate, CertificateData, EntityRef, PROTOCOL_HTTP, PROTOCOL_HTTPS, PluginData,
    RequestTerminationConfig, Route, RouteData, ServiceData,
};
use crate::io::admin_api::{AdminApi, ApiError};

/// Name given to the temporary challenge service.
pub const CHALLENGE_SERVICE_NAME: &str = "certbot-kong TEMPORARY ACME challenge";
/// Upstream of the challenge service; never contacted because the
/// request-termination plugin answers first.
pub const CHALLENGE_SERVICE_URL: &str = "http://invalid.example.com";

#[derive(Debug, thiserror::Error)]
pub enum InvokerError {
    /// Reloading now would orphan queued intents.
    #[error("unable to load config while {pending} change(s) are queued")]
    QueueNotEmpty { pending: usize },

    #[error("unable to redirect route {0} as there is no matching route")]
    UnknownRoute(String),

    #[error("invalid invoker snapshot: {}", .0.join("; "))]
    InvalidSnapshot(Vec<String>),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    RollbackIncomplete(#[from] RollbackIncomplete),
}

/// A change whose undo call failed.
#[derive(Debug)]
pub struct UndoFailure {
    pub change: Change,
    pub error: ApiError,
}

/// Rollback finished but at least one undo failed; the gateway may no longer
/// match the mirror.
#[derive(Debug)]
pub struct RollbackIncomplete {
    /// Every failed undo, in the order they were attempted.
    pub failures: Vec<UndoFailure>,
    /// Apply failure that triggered the rollback, if any.
    pub cause: Option<ApiError>,
}

impl RollbackIncomplete {
    /// First change whose undo failed.
    pub fn failed_change(&self) -> Option<&Change> {
        self.failures.first().map(|f| &f.change)
    }
}

impl fmt::Display for RollbackIncomplete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unable to undo changes, configuration may be in an inconsistent state: "
        )?;
        let failed = self
            .failures
            .iter()
            .map(|failure| format!("{} ({})", failure.change.describe(), failure.error))
            .collect::<Vec<_>>();
        write!(f, "{}", failed.join("; "))?;
        if let Some(cause) = &self.cause {
            write!(f, "; rollback triggered by: {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RollbackIncomplete {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Full serializable invoker state used for checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokerState {
    #[serde(flatten)]
    pub mirror: Mirror,
    pub queued: Vec<Change>,
    pub executed: Vec<Change>,
}

/// Ids of a queued challenge service triplet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeService {
    pub service_id: String,
    pub plugin_id: String,
    pub route_id: String,
}

pub struct ChangeInvoker<A: AdminApi> {
    api: A,
    mirror: Mirror,
    queued: Vec<Change>,
    executed: Vec<Change>,
}

impl<A: AdminApi> ChangeInvoker<A> {
    /// Build an invoker and load the mirror from the gateway.
    pub fn new(api: A) -> Result<Self, InvokerError> {
        let mut invoker = Self {
            api,
            mirror: Mirror::default(),
            queued: Vec::new(),
            executed: Vec::new(),
        };
        invoker.load_config()?;
        Ok(invoker)
    }

    /// Rebuild an invoker from a snapshot without contacting the gateway.
    ///
    /// The snapshot is validated first; an invalid snapshot builds nothing.
    pub fn restore(api: A, state: InvokerState) -> Result<Self, InvokerError> {
        let errors = validate_mirror(&state.mirror);
        if !errors.is_empty() {
            return Err(InvokerError::InvalidSnapshot(errors));
        }
        debug!(
            queued = state.queued.len(),
            executed = state.executed.len(),
            "restoring invoker from snapshot"
        );
        Ok(Self {
            api,
            mirror: state.mirror,
            queued: state.queued,
            executed: state.executed,
        })
    }

    pub fn snapshot(&self) -> InvokerState {
        InvokerState {
            mirror: self.mirror.clone(),
            queued: self.queued.clone(),
            executed: self.executed.clone(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.mirror.certificates
    }

    pub fn routes(&self) -> &[Route] {
        &self.mirror.routes
    }

    pub fn queued_changes(&self) -> &[Change] {
        &self.queued
    }

    pub fn executed_changes(&self) -> &[Change] {
        &self.executed
    }

    pub fn all_names(&self) -> BTreeSet<String> {
        self.mirror.all_names()
    }

    pub fn queued_change_descriptions(&self) -> Vec<String> {
        self.queued.iter().map(Change::describe).collect()
    }

    /// Replace the mirror with the gateway's current certificates and routes.
    #[instrument(skip_all)]
    pub fn load_config(&mut self) -> Result<(), InvokerError> {
        if !self.queued.is_empty() {
            return Err(InvokerError::QueueNotEmpty {
                pending: self.queued.len(),
            });
        }
        let certificates = self.api.list_certificates()?;
        let routes = self.api.list_routes()?;
        let mirror = Mirror::new(certificates, routes);
        for violation in validate_mirror(&mirror) {
            warn!(%violation, "gateway config violates mirror invariants");
        }
        debug!(
            certificates = mirror.certificates.len(),
            routes = mirror.routes.len(),
            "mirror loaded"
        );
        self.mirror = mirror;
        Ok(())
    }

    /// Bind `sni` to the certificate with the given material.
    ///
    /// Creates the certificate if no certificate has exactly this material,
    /// creates or rebinds the SNI, and (with `delete_unused`) deletes the
    /// previous certificate once this removal leaves it without SNIs.
    #[instrument(skip(self, cert, key))]
    pub fn set_sni_cert(&mut self, sni: &str, cert: &str, key: &str, delete_unused: bool) {
        let old_index = self.mirror.certificate_for_sni(sni);

        let cert_id = match self.mirror.certificate_with_material(cert, key) {
            Some(index) => self.mirror.certificates[index].id.clone(),
            None => {
                let id = Uuid::new_v4().to_string();
                info!(certificate_id = %id, "adding certificate");
                self.mirror.certificates.push(Certificate {
                    id: id.clone(),
                    cert: cert.to_string(),
                    key: key.to_string(),
                    snis: BTreeSet::new(),
                });
                self.queue(Change::AddCertificate {
                    certificate_id: id.clone(),
                    data: CertificateData::new(cert, key),
                });
                id
            }
        };

        match old_index {
            None => {
                info!(sni, certificate_id = %cert_id, "creating sni");
                self.queue(Change::CreateSni {
                    sni: sni.to_string(),
                    certificate_id: cert_id.clone(),
                });
            }
            Some(index) if self.mirror.certificates[index].id == cert_id => {
                info!(sni, certificate_id = %cert_id, "sni already uses certificate, no action required");
            }
            Some(index) => {
                let old_id = self.mirror.certificates[index].id.clone();
                info!(sni, from = %old_id, to = %cert_id, "updating sni certificate");
                self.queue(Change::UpdateSniCertificate {
                    sni: sni.to_string(),
                    certificate_id: cert_id.clone(),
                    previous_certificate_id: old_id.clone(),
                });

                let old = &mut self.mirror.certificates[index];
                old.snis.remove(sni);
                if old.snis.is_empty() && delete_unused {
                    let removed = self.mirror.certificates.remove(index);
                    info!(certificate_id = %old_id, "deleting certificate as no snis are using it");
                    self.queue(Change::DeleteCertificate {
                        certificate_id: old_id,
                        data: removed.data(),
                    });
                }
            }
        }

        if let Some(target) = self
            .mirror
            .certificates
            .iter_mut()
            .find(|c| c.id == cert_id)
        {
            target.snis.insert(sni.to_string());
        }
    }

    /// Force a route to accept HTTPS only.
    #[instrument(skip(self))]
    pub fn redirect_route(&mut self, route_id: &str) -> Result<(), InvokerError> {
        let route = self
            .mirror
            .route_mut(route_id)
            .ok_or_else(|| InvokerError::UnknownRoute(route_id.to_string()))?;
        let previous_protocols = route.protocols.clone();
        let protocols = vec![PROTOCOL_HTTPS.to_string()];
        info!(
            from = ?previous_protocols,
            to = ?protocols,
            "updating route protocols"
        );
        route.protocols = protocols.clone();
        self.queue(Change::UpdateRouteProtocols {
            route_id: route_id.to_string(),
            protocols,
            previous_protocols,
        });
        Ok(())
    }

    /// Queue a service, request-termination plugin and route that answer
    /// `validation` at `validation_path` on `domain` over plain HTTP.
    #[instrument(skip(self, validation))]
    pub fn create_challenge_service(
        &mut self,
        domain: &str,
        validation: &str,
        validation_path: &str,
    ) -> ChallengeService {
        let ids = ChallengeService {
            service_id: Uuid::new_v4().to_string(),
            plugin_id: Uuid::new_v4().to_string(),
            route_id: Uuid::new_v4().to_string(),
        };
        info!(
            service_id = %ids.service_id,
            plugin_id = %ids.plugin_id,
            route_id = %ids.route_id,
            "adding http01 challenge service"
        );

        // The plugin and route reference the service, so it must exist first.
        self.queue(Change::CreateService {
            service_id: ids.service_id.clone(),
            data: ServiceData {
                name: CHALLENGE_SERVICE_NAME.to_string(),
                url: CHALLENGE_SERVICE_URL.to_string(),
            },
        });
        self.queue(Change::CreatePlugin {
            plugin_id: ids.plugin_id.clone(),
            data: PluginData {
                service: EntityRef::new(&ids.service_id),
                name: "request-termination".to_string(),
                config: RequestTerminationConfig {
                    status_code: 200,
                    content_type: "text/plain".to_string(),
                    body: validation.to_string(),
                },
            },
        });
        self.queue(Change::CreateRoute {
            route_id: ids.route_id.clone(),
            data: RouteData {
                service: EntityRef::new(&ids.service_id),
                paths: vec![validation_path.to_string()],
                hosts: vec![domain.to_string()],
                protocols: vec![PROTOCOL_HTTP.to_string()],
            },
        });
        ids
    }

    /// Execute queued changes in order.
    ///
    /// On the first failure every executed change is undone in reverse and
    /// the original error is returned; the queue is left intact. If the
    /// rollback itself fails, [`InvokerError::RollbackIncomplete`] is returned
    /// with the original error as its cause. On success the queue is cleared
    /// and the executed stack is kept until [`ChangeInvoker::clear_changes`].
    #[instrument(skip_all, fields(queued = self.queued.len()))]
    pub fn apply_changes(&mut self) -> Result<(), InvokerError> {
        for index in 0..self.queued.len() {
            let change = &self.queued[index];
            if let Err(err) = change.execute(&self.api) {
                warn!(change = %change.describe(), error = %err, "change failed, undoing executed changes");
                return Err(self.roll_back(err));
            }
            self.executed.push(change.clone());
        }
        info!(applied = self.queued.len(), "changes applied");
        self.queued.clear();
        Ok(())
    }

    /// Undo every executed change in reverse order.
    ///
    /// Each executed change gets an undo attempt even if an earlier undo
    /// failed; all failures are returned together.
    pub fn undo_changes(&mut self) -> Result<(), InvokerError> {
        self.undo_executed().map_err(InvokerError::from)
    }

    /// Drop both the queue and the executed stack.
    pub fn clear_changes(&mut self) {
        self.queued.clear();
        self.executed.clear();
    }

    fn queue(&mut self, change: Change) {
        debug!(change = %change.describe(), "queued change");
        self.queued.push(change);
    }

    fn roll_back(&mut self, cause: ApiError) -> InvokerError {
        match self.undo_executed() {
            Ok(()) => InvokerError::Api(cause),
            Err(mut incomplete) => {
                incomplete.cause = Some(cause);
                InvokerError::RollbackIncomplete(incomplete)
            }
        }
    }

    fn undo_executed(&mut self) -> Result<(), RollbackIncomplete> {
        let mut failures = Vec::new();
        while let Some(change) = self.executed.pop() {
            if let Err(error) = change.undo(&self.api) {
                warn!(change = %change.describe(), %error, "unable to undo change");
                failures.push(UndoFailure { change, error });
            }
        }
        if failures.is_empty() {
            return Ok(());
        }
        Err(RollbackIncomplete {
            failures,
            cause: None,
        })
    }
}
