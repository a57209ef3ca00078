//! Installer workflow: deploy certificates, enable redirects, answer HTTP-01
//! challenges, and checkpoint every save so it can be rolled back.
//!
//! Each save applies the invoker's queued batch, records the executed changes
//! as the latest checkpoint, then resynchronizes the mirror with the gateway.
//! Temporary saves made while challenge services are live accumulate into
//! the same temporary checkpoint; permanent saves wait until it is removed.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::change::Change;
use crate::core::domains::{expand_wildcard, host_matches, is_wildcard};
use crate::invoker::{ChallengeService, ChangeInvoker, InvokerError};
use crate::io::admin_api::AdminApi;
use crate::io::cert_files::{CertMaterial, read_cert_material};
use crate::io::config::KongcertConfig;
use crate::io::snapshot::{Checkpoint, load_checkpoint, remove_checkpoint, write_checkpoint};

/// Title recorded for challenge checkpoints.
pub const CHALLENGE_CHECKPOINT_TITLE: &str = "HTTP challenge";

/// Path prefix the ACME server requests HTTP-01 tokens from.
pub const ACME_CHALLENGE_PATH: &str = "/.well-known/acme-challenge";

/// Policy knobs taken from [`KongcertConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerOptions {
    pub delete_unused_certificates: bool,
    pub redirect_route_no_host: bool,
    pub redirect_route_any_host: bool,
    /// Where checkpoints are persisted. `None` keeps them in memory only.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for InstallerOptions {
    fn default() -> Self {
        Self::from_config(&KongcertConfig::default())
    }
}

impl InstallerOptions {
    pub fn from_config(cfg: &KongcertConfig) -> Self {
        Self {
            delete_unused_certificates: cfg.delete_unused_certificates,
            redirect_route_no_host: cfg.redirect_route_no_host,
            redirect_route_any_host: cfg.redirect_route_any_host,
            snapshot_path: Some(cfg.snapshot_path.clone()),
        }
    }

    /// Same policy, checkpoints kept in memory.
    pub fn in_memory(self) -> Self {
        Self {
            snapshot_path: None,
            ..self
        }
    }
}

/// One HTTP-01 challenge to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http01Challenge {
    pub domain: String,
    pub token: String,
    /// Key authorization the ACME server expects as the response body.
    pub validation: String,
}

impl Http01Challenge {
    pub fn validation_path(&self) -> String {
        format!("{ACME_CHALLENGE_PATH}/{}", self.token)
    }
}

/// A save whose batch failed and was rolled back.
#[derive(Debug, thiserror::Error)]
#[error("unable to apply changes")]
pub struct SaveFailed(#[source] pub InvokerError);

/// A permanent save refused while a temporary checkpoint is outstanding.
#[derive(Debug, thiserror::Error)]
#[error("{changes} challenge change(s) are still live; recover or clean up the challenge first")]
pub struct ChallengePending {
    pub changes: usize,
}

/// The batch was applied but its checkpoint could not be written, so it was
/// undone.
#[derive(Debug, thiserror::Error)]
#[error("unable to record checkpoint, applied changes were undone: {message}")]
pub struct CheckpointFailed {
    pub message: String,
}

pub struct Installer<A: AdminApi> {
    invoker: ChangeInvoker<A>,
    options: InstallerOptions,
    notes: Vec<String>,
    checkpoint: Option<Checkpoint>,
}

impl<A: AdminApi> Installer<A> {
    /// Connect to the gateway and load the mirror.
    pub fn new(api: A, options: InstallerOptions) -> Result<Self> {
        let invoker = ChangeInvoker::new(api).context("load gateway config")?;
        Ok(Self {
            invoker,
            options,
            notes: Vec::new(),
            checkpoint: None,
        })
    }

    pub fn invoker(&self) -> &ChangeInvoker<A> {
        &self.invoker
    }

    pub fn options(&self) -> &InstallerOptions {
        &self.options
    }

    /// Human-readable descriptions of the unsaved changes.
    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// Every SNI and route host known to the gateway.
    pub fn all_names(&self) -> BTreeSet<String> {
        self.invoker.all_names()
    }

    /// Queue changes binding `domain` to `material`.
    ///
    /// A wildcard domain is resolved against all known names one label below
    /// its base; the wildcard becomes an SNI only when the gateway already
    /// lists it. Returns the domains that were bound.
    #[instrument(skip(self, material))]
    pub fn deploy_cert(&mut self, domain: &str, material: &CertMaterial) -> Vec<String> {
        let domains = if is_wildcard(domain) {
            let names = self.all_names();
            expand_wildcard(domain, &names)
        } else {
            vec![domain.to_string()]
        };
        if domains.is_empty() {
            info!(domain, "no route hosts or snis match wildcard");
            return domains;
        }

        for name in &domains {
            self.invoker.set_sni_cert(
                name,
                &material.fullchain,
                &material.key,
                self.options.delete_unused_certificates,
            );
        }
        self.refresh_notes();
        domains
    }

    /// Read certificate files, then [`Installer::deploy_cert`].
    pub fn deploy_cert_files(
        &mut self,
        domain: &str,
        key_path: &Path,
        fullchain_path: &Path,
    ) -> Result<Vec<String>> {
        let material = read_cert_material(key_path, fullchain_path)
            .with_context(|| format!("unable to open cert files for {domain}"))?;
        Ok(self.deploy_cert(domain, &material))
    }

    /// Queue HTTPS-only protocols for the routes serving `domain`.
    ///
    /// Only routes still accepting plain HTTP are considered, and routes
    /// serving a live challenge are skipped. Returns the ids of redirected
    /// routes.
    #[instrument(skip(self))]
    pub fn enhance_redirect(&mut self, domain: &str) -> Result<Vec<String>> {
        let challenge_routes: BTreeSet<String> = self
            .pending_challenge()?
            .map(|checkpoint| challenge_route_ids(&checkpoint.state.executed))
            .unwrap_or_default();
        let selected: Vec<String> = self
            .invoker
            .routes()
            .iter()
            .filter(|route| route.accepts_http() && !challenge_routes.contains(&route.id))
            .filter(|route| {
                if route.hosts.is_empty() {
                    return self.options.redirect_route_no_host;
                }
                let matching = route
                    .hosts
                    .iter()
                    .filter(|host| host_matches(host, domain))
                    .count();
                matching == route.hosts.len()
                    || (matching > 0 && self.options.redirect_route_any_host)
            })
            .map(|route| route.id.clone())
            .collect();

        for route_id in &selected {
            self.invoker
                .redirect_route(route_id)
                .with_context(|| format!("redirect route {route_id}"))?;
        }
        if selected.is_empty() {
            info!(domain, "no routes to redirect");
        }
        self.refresh_notes();
        Ok(selected)
    }

    /// Stand up a challenge service per challenge and save them as a
    /// temporary checkpoint.
    pub fn perform_http01(
        &mut self,
        challenges: &[Http01Challenge],
    ) -> Result<Vec<ChallengeService>> {
        if challenges.is_empty() {
            return Ok(Vec::new());
        }
        let services: Vec<ChallengeService> = challenges
            .iter()
            .map(|challenge| {
                self.invoker.create_challenge_service(
                    &challenge.domain,
                    &challenge.validation,
                    &challenge.validation_path(),
                )
            })
            .collect();
        self.refresh_notes();
        self.save(Some(CHALLENGE_CHECKPOINT_TITLE), true)?;
        Ok(services)
    }

    /// Remove challenge services created by [`Installer::perform_http01`].
    pub fn cleanup_http01(&mut self) -> Result<usize> {
        self.rollback_temporary()
    }

    /// Apply queued changes and record them as the latest checkpoint.
    ///
    /// While a temporary checkpoint is outstanding, a temporary save extends
    /// it and a permanent save is refused with [`ChallengePending`] before
    /// any write. On failure the batch has already been undone; it is
    /// discarded and the mirror is reloaded from the gateway before the error
    /// is returned. Changes whose undo failed are kept in the checkpoint.
    #[instrument(skip(self))]
    pub fn save(&mut self, title: Option<&str>, temporary: bool) -> Result<()> {
        let mut recorded = match self.pending_challenge()? {
            Some(pending) if !temporary => {
                self.discard_batch();
                return Err(ChallengePending {
                    changes: pending.state.executed.len(),
                }
                .into());
            }
            Some(pending) => pending.state.executed,
            None => Vec::new(),
        };

        if let Err(err) = self.invoker.apply_changes() {
            if let InvokerError::RollbackIncomplete(incomplete) = &err {
                recorded.extend(
                    incomplete
                        .failures
                        .iter()
                        .rev()
                        .map(|failure| failure.change.clone()),
                );
                let checkpoint = self.checkpoint_with(title, temporary, recorded);
                if let Err(write_err) = self.record(checkpoint) {
                    let error = format!("{write_err:#}");
                    warn!(%error, "unable to persist changes left by incomplete rollback");
                }
            }
            self.discard_batch();
            return Err(SaveFailed(err).into());
        }

        let executed = self.invoker.executed_changes().len();
        if executed > 0 {
            let previous = self.checkpoint.clone();
            let base = recorded.clone();
            recorded.extend_from_slice(self.invoker.executed_changes());
            let checkpoint = self.checkpoint_with(title, temporary, recorded);
            if let Err(err) = self.record(checkpoint) {
                return Err(self.undo_unrecorded(title, temporary, previous, base, err));
            }
            info!(executed, temporary, "checkpoint recorded");
        }

        self.invoker.load_config()?;
        self.invoker.clear_changes();
        self.notes.clear();
        Ok(())
    }

    /// Undo the latest checkpoint. Returns the number of undone changes.
    pub fn rollback_checkpoint(&mut self) -> Result<usize> {
        match self.current_checkpoint()? {
            Some(checkpoint) => self.roll_back(checkpoint),
            None => {
                info!("no checkpoint to roll back");
                Ok(0)
            }
        }
    }

    /// Undo the latest checkpoint only if it is temporary.
    ///
    /// Used after an interrupted run to remove leftover challenge services;
    /// permanent checkpoints are kept.
    pub fn recover(&mut self) -> Result<usize> {
        self.rollback_temporary()
    }

    fn rollback_temporary(&mut self) -> Result<usize> {
        match self.current_checkpoint()? {
            Some(checkpoint) if checkpoint.temporary => self.roll_back(checkpoint),
            Some(checkpoint) => {
                info!(title = ?checkpoint.title, "latest checkpoint is permanent, keeping it");
                Ok(0)
            }
            None => Ok(0),
        }
    }

    /// The latest checkpoint if it still holds live challenge services.
    fn pending_challenge(&self) -> Result<Option<Checkpoint>> {
        Ok(self
            .current_checkpoint()?
            .filter(|checkpoint| checkpoint.temporary))
    }

    fn current_checkpoint(&self) -> Result<Option<Checkpoint>> {
        if let Some(checkpoint) = &self.checkpoint {
            return Ok(Some(checkpoint.clone()));
        }
        match &self.options.snapshot_path {
            Some(path) => load_checkpoint(path),
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(title = ?checkpoint.title))]
    fn roll_back(&mut self, checkpoint: Checkpoint) -> Result<usize> {
        let pending = self.invoker.queued_changes().len();
        if pending > 0 {
            return Err(InvokerError::QueueNotEmpty { pending }.into());
        }

        let count = checkpoint.state.executed.len();
        info!(count, "rolling back checkpoint");
        let Checkpoint {
            title,
            temporary,
            state,
        } = checkpoint;
        let outcome = ChangeInvoker::restore(self.invoker.api(), state)
            .and_then(|mut restored| restored.undo_changes());

        match outcome {
            Ok(()) => {
                self.checkpoint = None;
                if let Some(path) = &self.options.snapshot_path {
                    remove_checkpoint(path)?;
                }
            }
            Err(InvokerError::RollbackIncomplete(incomplete)) => {
                // Keep only the changes that still need undoing, in apply order.
                let remaining: Vec<Change> = incomplete
                    .failures
                    .iter()
                    .rev()
                    .map(|failure| failure.change.clone())
                    .collect();
                let remaining = self.checkpoint_with(title.as_deref(), temporary, remaining);
                let recorded = self.record(remaining);
                self.discard_batch();
                recorded?;
                return Err(InvokerError::RollbackIncomplete(incomplete).into());
            }
            Err(err) => return Err(err.into()),
        }

        self.discard_batch();
        Ok(count)
    }

    /// Undo a batch whose checkpoint could not be written.
    fn undo_unrecorded(
        &mut self,
        title: Option<&str>,
        temporary: bool,
        previous: Option<Checkpoint>,
        mut base: Vec<Change>,
        err: anyhow::Error,
    ) -> anyhow::Error {
        let message = format!("{err:#}");
        warn!(error = %message, "unable to record checkpoint, undoing applied changes");
        match self.invoker.undo_changes() {
            Ok(()) => {
                self.checkpoint = previous;
                self.discard_batch();
                CheckpointFailed { message }.into()
            }
            Err(InvokerError::RollbackIncomplete(incomplete)) => {
                base.extend(
                    incomplete
                        .failures
                        .iter()
                        .rev()
                        .map(|failure| failure.change.clone()),
                );
                let remaining = self.checkpoint_with(title, temporary, base);
                if let Err(write_err) = self.record(remaining) {
                    let error = format!("{write_err:#}");
                    warn!(%error, "checkpoint kept in memory only");
                }
                self.discard_batch();
                anyhow::Error::new(InvokerError::RollbackIncomplete(incomplete))
                    .context(format!("unable to record checkpoint: {message}"))
            }
            Err(other) => {
                self.discard_batch();
                anyhow::Error::new(other)
                    .context(format!("unable to record checkpoint: {message}"))
            }
        }
    }

    /// Checkpoint of the current mirror with `executed` as its undo log.
    fn checkpoint_with(
        &self,
        title: Option<&str>,
        temporary: bool,
        executed: Vec<Change>,
    ) -> Checkpoint {
        let mut state = self.invoker.snapshot();
        state.queued.clear();
        state.executed = executed;
        Checkpoint {
            title: title.map(str::to_string),
            temporary,
            state,
        }
    }

    /// Keep `checkpoint` as the latest one, then persist it when configured.
    fn record(&mut self, checkpoint: Checkpoint) -> Result<()> {
        let written = match &self.options.snapshot_path {
            Some(path) => write_checkpoint(path, &checkpoint),
            None => Ok(()),
        };
        self.checkpoint = Some(checkpoint);
        written
    }

    /// Drop queued and executed changes and resync the mirror.
    fn discard_batch(&mut self) {
        self.invoker.clear_changes();
        self.notes.clear();
        if let Err(err) = self.invoker.load_config() {
            warn!(error = %err, "unable to reload gateway config");
        }
    }

    fn refresh_notes(&mut self) {
        self.notes = self.invoker.queued_change_descriptions();
    }
}

fn challenge_route_ids(changes: &[Change]) -> BTreeSet<String> {
    changes
        .iter()
        .filter_map(|change| match change {
            Change::CreateRoute { route_id, .. } => Some(route_id.clone()),
            _ => None,
        })
        .collect()
}
