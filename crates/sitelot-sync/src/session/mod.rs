//! Per-lot checklist session.
//!
//! A [`LotSession`] is the explicit, per-lot owner of everything the
//! checklist view needs: the in-memory instance view, the offline fallback
//! flags, the mutation operations, the caller-invoked queue replay, and
//! conformance evaluation. Sessions for different lots are independent and
//! torn down independently; nothing here is ambient global state.
//!
//! # Mutation flow
//!
//! Every mutation first runs the pure completion state machine against the
//! current view. A [`Refusal`] comes straight back with no IO. An applied
//! action is then written server-first; the server's returned record is
//! authoritative and reconciled into both the view and the durable
//! snapshot. On connectivity failure the intent is queued (overwrite per
//! item) and the optimistic result is shown, attributed to
//! "... (Offline)".
//!
//! # NCR auto-raise
//!
//! A `MarkFailed` transition carries a [`Effect::RaiseNcr`] effect. Online,
//! the session upserts the failed state, creates the NCR, and links it back
//! in a follow-up upsert. If NCR creation is rejected after the failed
//! state was accepted, the completion is left failed without a link and
//! [`SessionError::NcrCreationFailed`] is returned; a later re-submission
//! (or queue replay) re-emits the raise effect, so the failure is never
//! silently left without an NCR. Exactly one NCR results per failing
//! transition: a completion that already links an NCR never raises again.

mod error;


use std::sync::Arc;

use chrono::{DateTime, Utc};
use sitelot_core::completion::{
    Attachment, Completion, CompletionAction, Effect, FailureReport, Outcome, Refusal,
    TransitionContext, WitnessRecord, apply,
};
use sitelot_core::conformance::{GateInput, GateResult, evaluate};
use sitelot_core::instance::ItpInstance;
use sitelot_core::ncr::NcrDraft;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub use self::error::SessionError;
use crate::cache::{DesiredState, OfflineCache, OfflineQueueEntry, QueuedIntent};
use crate::remote::{AttachmentUpload, CompletionWrite, RemoteApi, RemoteError};

/// Where the data currently on screen came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewSource {
    /// Live server data.
    Server {
        /// When it was fetched.
        fetched_at: DateTime<Utc>,
    },
    /// Cached snapshot shown because the server is unreachable. The
    /// timestamp is displayed to the user.
    Cached {
        /// When the snapshot was originally fetched.
        fetched_at: DateTime<Utc>,
    },
    /// Nothing loaded yet.
    Empty,
}

/// Result of a [`LotSession::refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Live data fetched and cached.
    Live,
    /// Server unreachable; showing the cached snapshot from `fetched_at`.
    CachedFallback {
        /// Snapshot age marker for the UI.
        fetched_at: DateTime<Utc>,
    },
    /// Server unreachable and no snapshot exists for this lot.
    Unavailable,
    /// The lot has no ITP instance assigned yet (template-suggestion flow
    /// takes over from here).
    Unassigned,
}

/// Result of a mutation operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Accepted by the server; this is the authoritative record.
    Updated(Completion),
    /// Refused pending more input; nothing was written anywhere.
    Refused(Refusal),
    /// Server unreachable; the intent is queued and this optimistic record
    /// is what the view shows until replay.
    QueuedOffline(Completion),
}

/// Outcome of a [`LotSession::replay_pending`] call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplayReport {
    /// Entries accepted by the server and removed from the queue.
    pub replayed: usize,
    /// Entries still queued (connectivity dropped mid-replay).
    pub remaining: usize,
    /// Entries the server rejected; removed from the queue so the next
    /// read converges on server truth, and reported here.
    pub rejected: Vec<String>,
}

struct ViewState {
    instance: Option<ItpInstance>,
    source: ViewSource,
}

/// The per-lot session owning view state, mutations, and replay.
pub struct LotSession {
    lot_id: String,
    author: String,
    remote: Arc<dyn RemoteApi>,
    cache: Arc<OfflineCache>,
    view: RwLock<ViewState>,
}

impl LotSession {
    /// Creates a session for one lot. Nothing is fetched until
    /// [`refresh`](Self::refresh) is called.
    #[must_use]
    pub fn new(
        lot_id: impl Into<String>,
        author: impl Into<String>,
        remote: Arc<dyn RemoteApi>,
        cache: Arc<OfflineCache>,
    ) -> Self {
        Self {
            lot_id: lot_id.into(),
            author: author.into(),
            remote,
            cache,
            view: RwLock::new(ViewState {
                instance: None,
                source: ViewSource::Empty,
            }),
        }
    }

    /// The lot this session tracks.
    #[must_use]
    pub fn lot_id(&self) -> &str {
        &self.lot_id
    }

    /// A clone of the current in-memory instance view.
    pub async fn instance(&self) -> Option<ItpInstance> {
        self.view.read().await.instance.clone()
    }

    /// Whether the view is showing cached/offline data.
    pub async fn is_showing_cached(&self) -> bool {
        matches!(self.view.read().await.source, ViewSource::Cached { .. })
    }

    /// The snapshot timestamp when showing cached data.
    pub async fn cached_at(&self) -> Option<DateTime<Utc>> {
        match self.view.read().await.source {
            ViewSource::Cached { fetched_at } => Some(fetched_at),
            ViewSource::Server { .. } | ViewSource::Empty => None,
        }
    }

    /// Number of local edits not yet replayed to the server.
    pub fn pending_count(&self) -> Result<usize, SessionError> {
        Ok(self.cache.pending_count(&self.lot_id)?)
    }

    // -------------------------------------------------------------------
    // Read path
    // -------------------------------------------------------------------

    /// Fetches the lot's ITP instance, falling back to the cached snapshot
    /// when the server is unreachable.
    pub async fn refresh(&self) -> Result<RefreshOutcome, SessionError> {
        match self.remote.fetch_instance(&self.lot_id).await {
            Ok(instance) => {
                let now = Utc::now();
                self.cache.store_snapshot(&instance, now)?;
                let mut view = self.view.write().await;
                view.instance = Some(instance);
                view.source = ViewSource::Server { fetched_at: now };
                Ok(RefreshOutcome::Live)
            },
            Err(RemoteError::NotFound) => {
                let mut view = self.view.write().await;
                view.instance = None;
                view.source = ViewSource::Empty;
                Ok(RefreshOutcome::Unassigned)
            },
            Err(err) if err.is_connectivity() => {
                debug!(lot_id = %self.lot_id, error = %err, "fetch failed, falling back to cache");
                match self.cache.load_snapshot(&self.lot_id)? {
                    Some(snapshot) => {
                        let fetched_at = snapshot.fetched_at;
                        let mut view = self.view.write().await;
                        view.instance = Some(snapshot.instance);
                        view.source = ViewSource::Cached { fetched_at };
                        Ok(RefreshOutcome::CachedFallback { fetched_at })
                    },
                    None => Ok(RefreshOutcome::Unavailable),
                }
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Best-effort poll refresh: replaces the view only when the fresh
    /// result meaningfully differs, so an unrelated poll never clobbers an
    /// in-flight local edit. All failures are swallowed.
    pub async fn poll_refresh(&self) {
        let fresh = match self.remote.fetch_instance(&self.lot_id).await {
            Ok(instance) => instance,
            Err(err) => {
                debug!(lot_id = %self.lot_id, error = %err, "poll refresh skipped");
                return;
            },
        };

        let now = Utc::now();
        if let Err(err) = self.cache.store_snapshot(&fresh, now) {
            warn!(lot_id = %self.lot_id, error = %err, "poll snapshot store failed");
        }

        let mut view = self.view.write().await;
        let replace = match view.instance.as_ref() {
            None => true,
            Some(current) => current.meaningfully_differs(&fresh),
        };
        if replace {
            debug!(lot_id = %self.lot_id, "poll refresh replaced the view");
            view.instance = Some(fresh);
            view.source = ViewSource::Server { fetched_at: now };
        }
    }

    /// Assigns a checklist template to the lot. The server guards
    /// idempotency: a lot with an active instance rejects a second
    /// assignment.
    pub async fn assign_template(&self, template_id: &str) -> Result<(), SessionError> {
        let instance = self.remote.assign_template(&self.lot_id, template_id).await?;
        let now = Utc::now();
        self.cache.store_snapshot(&instance, now)?;
        let mut view = self.view.write().await;
        view.instance = Some(instance);
        view.source = ViewSource::Server { fetched_at: now };
        Ok(())
    }

    // -------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------

    /// Toggles completion of an item: pending items are completed (subject
    /// to evidence and witness guards), completed items go back to pending.
    pub async fn toggle_completion(
        &self,
        checklist_item_id: &str,
        notes: Option<String>,
        witness: Option<WitnessRecord>,
        allow_missing_evidence: bool,
    ) -> Result<Mutation, SessionError> {
        let target = {
            let view = self.view.read().await;
            let instance = view.instance.as_ref().ok_or_else(|| SessionError::NoInstance {
                lot_id: self.lot_id.clone(),
            })?;
            !instance.completion_or_pending(checklist_item_id).is_completed
        };
        self.mutate(
            checklist_item_id,
            CompletionAction::SetCompleted {
                completed: target,
                notes,
                witness,
                allow_missing_evidence,
            },
        )
        .await
    }

    /// Updates notes without changing state.
    pub async fn update_notes(
        &self,
        checklist_item_id: &str,
        notes: String,
    ) -> Result<Mutation, SessionError> {
        self.mutate(checklist_item_id, CompletionAction::UpdateNotes { notes })
            .await
    }

    /// Marks an item not applicable, with a reason.
    pub async fn mark_not_applicable(
        &self,
        checklist_item_id: &str,
        reason: String,
    ) -> Result<Mutation, SessionError> {
        self.mutate(checklist_item_id, CompletionAction::MarkNotApplicable { reason })
            .await
    }

    /// Marks an item failed; auto-raises an NCR exactly once.
    pub async fn mark_failed(
        &self,
        checklist_item_id: &str,
        report: FailureReport,
    ) -> Result<Mutation, SessionError> {
        self.mutate(checklist_item_id, CompletionAction::MarkFailed { report })
            .await
    }

    /// Records hold-point verification on a completed item.
    pub async fn verify_hold_point(
        &self,
        checklist_item_id: &str,
    ) -> Result<Mutation, SessionError> {
        self.mutate(checklist_item_id, CompletionAction::Verify).await
    }

    /// Uploads an evidence attachment for an item.
    pub async fn add_photo(
        &self,
        checklist_item_id: &str,
        upload: AttachmentUpload,
    ) -> Result<Mutation, SessionError> {
        // Item must belong to the template before anything is written.
        {
            let view = self.view.read().await;
            let instance = view.instance.as_ref().ok_or_else(|| SessionError::NoInstance {
                lot_id: self.lot_id.clone(),
            })?;
            if instance.template.item(checklist_item_id).is_none() {
                return Err(SessionError::UnknownItem {
                    checklist_item_id: checklist_item_id.to_string(),
                });
            }
        }

        match self
            .remote
            .add_attachment(&self.lot_id, checklist_item_id, upload.clone())
            .await
        {
            Ok(attachment) => {
                let record = self
                    .apply_local(checklist_item_id, CompletionAction::AddAttachment { attachment })
                    .await?;
                self.reconcile(record.clone()).await?;
                Ok(Mutation::Updated(record))
            },
            Err(err) if err.is_connectivity() => {
                // Keep a provisional attachment record so the evidence shows
                // up (and satisfies the evidence guard) before sync.
                let attachment = Attachment {
                    id: format!("local-{}", upload.file_ref),
                    file_ref: upload.file_ref.clone(),
                    caption: upload.caption.clone(),
                    gps: upload.gps,
                    added_at: Utc::now(),
                };
                let record = self
                    .apply_local(checklist_item_id, CompletionAction::AddAttachment { attachment })
                    .await?;
                self.enqueue_offline(checklist_item_id, QueuedIntent::Attachment { upload })?;
                self.record_optimistic(record.clone()).await;
                Ok(Mutation::QueuedOffline(record))
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Evaluates the conformance gate over the current instance and live
    /// collaborator signals. Computed fresh on every call; never cached.
    pub async fn evaluate_conformance(&self) -> Result<GateResult, SessionError> {
        let test_results = self.remote.fetch_test_results(&self.lot_id).await?;
        let ncrs = self.remote.fetch_open_ncrs(&self.lot_id).await?;
        let view = self.view.read().await;
        Ok(evaluate(GateInput {
            instance: view.instance.as_ref(),
            test_results: &test_results,
            ncrs: &ncrs,
        }))
    }

    // -------------------------------------------------------------------
    // Replay
    // -------------------------------------------------------------------

    /// Replays the pending queue against the server, one entry at a time in
    /// queued order. Each server response becomes the authoritative state
    /// for its item (server-wins; no three-way merge). Safe to call
    /// repeatedly and a no-op when the queue is empty; stops at the first
    /// connectivity failure, leaving the remainder queued.
    pub async fn replay_pending(&self) -> Result<ReplayReport, SessionError> {
        let entries = self.cache.pending(&self.lot_id)?;
        if entries.is_empty() {
            return Ok(ReplayReport::default());
        }

        info!(lot_id = %self.lot_id, pending = entries.len(), "replaying offline queue");
        let mut report = ReplayReport::default();
        let total = entries.len();

        for (index, entry) in entries.into_iter().enumerate() {
            let item_id = entry.checklist_item_id.clone();
            let outcome = match &entry.intent {
                QueuedIntent::Completion { desired } => {
                    self.replay_completion(&item_id, desired.clone(), &entry.author).await
                },
                QueuedIntent::Attachment { upload } => {
                    self.replay_attachment(&item_id, upload.clone()).await
                },
            };

            match outcome {
                Ok(()) => {
                    self.cache.remove_pending(&entry)?;
                    report.replayed += 1;
                },
                Err(err) if err.is_connectivity() => {
                    debug!(lot_id = %self.lot_id, item = %item_id, "connectivity lost mid-replay");
                    report.remaining = total - index;
                    return Ok(report);
                },
                Err(err) => {
                    // Server-wins: the rejected intent is dropped and the
                    // next read converges on server truth. Reported, never
                    // silent.
                    warn!(lot_id = %self.lot_id, item = %item_id, error = %err, "queued edit rejected");
                    self.cache.remove_pending(&entry)?;
                    report.rejected.push(format!("{item_id}: {err}"));
                },
            }
        }

        // Converge the whole view on server truth after a full drain.
        self.poll_refresh().await;
        Ok(report)
    }

    async fn replay_completion(
        &self,
        checklist_item_id: &str,
        desired: DesiredState,
        author: &str,
    ) -> Result<(), RemoteError> {
        let upsert = |action: CompletionAction| {
            let write = CompletionWrite {
                action,
                author: author.to_string(),
            };
            self.remote
                .upsert_completion(&self.lot_id, checklist_item_id, write)
        };

        let record = match desired {
            DesiredState::Pending { notes } => {
                let record = upsert(CompletionAction::SetCompleted {
                    completed: false,
                    notes: None,
                    witness: None,
                    allow_missing_evidence: false,
                })
                .await?;
                match notes {
                    Some(notes) if record.notes.as_deref() != Some(notes.as_str()) => {
                        upsert(CompletionAction::UpdateNotes { notes }).await?
                    },
                    _ => record,
                }
            },
            DesiredState::Completed { notes, witness } => {
                // The user confirmed any evidence warning when the edit was
                // made offline; the replay must not re-refuse.
                upsert(CompletionAction::SetCompleted {
                    completed: true,
                    notes,
                    witness,
                    allow_missing_evidence: true,
                })
                .await?
            },
            DesiredState::NotApplicable { reason } => {
                upsert(CompletionAction::MarkNotApplicable { reason }).await?
            },
            DesiredState::Failed { report } => {
                let record = upsert(CompletionAction::MarkFailed {
                    report: report.clone(),
                })
                .await?;
                // A replayed failure still owes its NCR.
                if record.is_failed && record.linked_ncr.is_none() {
                    let draft = NcrDraft {
                        description: report.description.clone(),
                        category: report.category.clone(),
                        severity: report.severity,
                        lot_id: self.lot_id.clone(),
                        checklist_item_id: checklist_item_id.to_string(),
                    };
                    self.raise_and_link(checklist_item_id, draft, author).await?
                } else {
                    record
                }
            },
        };

        self.record_optimistic(record).await;
        Ok(())
    }

    async fn replay_attachment(
        &self,
        checklist_item_id: &str,
        upload: AttachmentUpload,
    ) -> Result<(), RemoteError> {
        let attachment = self
            .remote
            .add_attachment(&self.lot_id, checklist_item_id, upload)
            .await?;
        if let Ok(record) = self
            .apply_local(checklist_item_id, CompletionAction::AddAttachment { attachment })
            .await
        {
            self.record_optimistic(record).await;
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Write pipeline
    // -------------------------------------------------------------------

    async fn mutate(
        &self,
        checklist_item_id: &str,
        action: CompletionAction,
    ) -> Result<Mutation, SessionError> {
        let (item, current) = {
            let view = self.view.read().await;
            let instance = view.instance.as_ref().ok_or_else(|| SessionError::NoInstance {
                lot_id: self.lot_id.clone(),
            })?;
            let item = instance
                .template
                .item(checklist_item_id)
                .ok_or_else(|| SessionError::UnknownItem {
                    checklist_item_id: checklist_item_id.to_string(),
                })?
                .clone();
            (item, instance.completion_or_pending(checklist_item_id))
        };

        let ctx = TransitionContext {
            lot_id: self.lot_id.clone(),
            actor: self.author.clone(),
            now: Utc::now(),
        };

        match apply(&item, &current, action.clone(), &ctx)? {
            Outcome::Refused(refusal) => Ok(Mutation::Refused(refusal)),
            Outcome::Applied(applied) => {
                if !applied.changed && applied.effects.is_empty() {
                    // Idempotent re-submission: no write, no side effect.
                    return Ok(Mutation::Updated(applied.completion));
                }
                self.submit(checklist_item_id, action, applied.completion, applied.effects)
                    .await
            },
        }
    }

    async fn submit(
        &self,
        checklist_item_id: &str,
        action: CompletionAction,
        optimistic: Completion,
        effects: Vec<Effect>,
    ) -> Result<Mutation, SessionError> {
        let write = CompletionWrite {
            action: action.clone(),
            author: self.author.clone(),
        };

        let failure = match &action {
            CompletionAction::MarkFailed { report } => Some(report.clone()),
            _ => None,
        };

        match self
            .remote
            .upsert_completion(&self.lot_id, checklist_item_id, write)
            .await
        {
            Ok(mut record) => {
                for effect in effects {
                    let Effect::RaiseNcr(draft) = effect;
                    if record.linked_ncr.is_some() {
                        continue;
                    }
                    match self.raise_and_link(checklist_item_id, draft, &self.author).await {
                        Ok(linked) => record = linked,
                        Err(err) if err.is_connectivity() => {
                            // The failed state reached the server but the NCR
                            // did not. Queue the failed intent; replay finds
                            // the record already failed and re-emits the
                            // raise.
                            let desired = DesiredState::capture(&record, failure.as_ref());
                            self.enqueue_offline(
                                checklist_item_id,
                                QueuedIntent::Completion { desired },
                            )?;
                            self.reconcile(record.clone()).await?;
                            return Ok(Mutation::QueuedOffline(record));
                        },
                        Err(err) => {
                            // Open-question resolution: the completion stays
                            // failed without an NCR and the failure is
                            // reported separately.
                            self.reconcile(record).await?;
                            return Err(SessionError::NcrCreationFailed { source: err });
                        },
                    }
                }
                self.reconcile(record.clone()).await?;
                Ok(Mutation::Updated(record))
            },
            Err(err) if err.is_connectivity() => {
                info!(lot_id = %self.lot_id, item = %checklist_item_id, "offline, queueing edit");
                let desired = DesiredState::capture(&optimistic, failure.as_ref());
                self.enqueue_offline(checklist_item_id, QueuedIntent::Completion { desired })?;
                self.record_optimistic(optimistic.clone()).await;
                Ok(Mutation::QueuedOffline(optimistic))
            },
            Err(err) => Err(err.into()),
        }
    }

    async fn raise_and_link(
        &self,
        checklist_item_id: &str,
        draft: NcrDraft,
        author: &str,
    ) -> Result<Completion, RemoteError> {
        let ncr = self.remote.create_ncr(draft).await?;
        info!(lot_id = %self.lot_id, item = %checklist_item_id, ncr = %ncr.number, "auto-raised NCR");
        self.remote
            .upsert_completion(
                &self.lot_id,
                checklist_item_id,
                CompletionWrite {
                    action: CompletionAction::LinkNcr { ncr_id: ncr.id },
                    author: author.to_string(),
                },
            )
            .await
    }

    /// Runs an action against the current view without any server write,
    /// returning the resulting record. Used for attachment bookkeeping.
    async fn apply_local(
        &self,
        checklist_item_id: &str,
        action: CompletionAction,
    ) -> Result<Completion, SessionError> {
        let view = self.view.read().await;
        let instance = view.instance.as_ref().ok_or_else(|| SessionError::NoInstance {
            lot_id: self.lot_id.clone(),
        })?;
        let item = instance
            .template
            .item(checklist_item_id)
            .ok_or_else(|| SessionError::UnknownItem {
                checklist_item_id: checklist_item_id.to_string(),
            })?
            .clone();
        let current = instance.completion_or_pending(checklist_item_id);
        drop(view);

        let ctx = TransitionContext {
            lot_id: self.lot_id.clone(),
            actor: self.author.clone(),
            now: Utc::now(),
        };
        match apply(&item, &current, action, &ctx)? {
            Outcome::Applied(applied) => Ok(applied.completion),
            // Attachment adds never refuse; treat a refusal as unchanged.
            Outcome::Refused(_) => Ok(current),
        }
    }

    /// Reconciles a server-authoritative record into the view and the
    /// durable snapshot.
    async fn reconcile(&self, record: Completion) -> Result<(), SessionError> {
        let mut view = self.view.write().await;
        if let Some(instance) = view.instance.as_mut() {
            instance.record(record);
            self.cache.store_snapshot(instance, Utc::now())?;
        }
        Ok(())
    }

    /// Applies an optimistic (or replayed) record to the in-memory view
    /// only; the durable snapshot keeps the last server state.
    async fn record_optimistic(&self, record: Completion) {
        let mut view = self.view.write().await;
        if let Some(instance) = view.instance.as_mut() {
            instance.record(record);
        }
    }

    fn enqueue_offline(
        &self,
        checklist_item_id: &str,
        intent: QueuedIntent,
    ) -> Result<(), SessionError> {
        self.cache.enqueue(&OfflineQueueEntry {
            lot_id: self.lot_id.clone(),
            checklist_item_id: checklist_item_id.to_string(),
            intent,
            author: format!("{} (Offline)", self.author),
            queued_at: Utc::now(),
        })?;
        Ok(())
    }
}
