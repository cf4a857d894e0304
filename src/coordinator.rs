//! Request Coordinator: owns one search lifecycle from submission to a
//! terminal state, gates the primary fetch behind the clarification step, and
//! wires the scheduler and progress simulator together.

use crate::generation::Generations;
use crate::models::{AttributeMap, ImageUpload, Mode, RefinementRequest, SearchQuery};
use crate::progress::{ProgressSimulator, ProgressState};
use crate::remote::{RemoteError, RemoteOps};
use crate::scheduler::RecomputeScheduler;
use crate::session::{SearchPhase, Session, SessionSnapshot};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("query must not be empty")]
pub struct EmptyQuery;

pub struct Coordinator {
    session: Session,
    progress: Arc<ProgressSimulator>,
    scheduler: RecomputeScheduler,
    ctx: TaskCtx,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn new(remote: Arc<dyn RemoteOps>) -> Self {
        let session = Session::new();
        let progress = Arc::new(ProgressSimulator::new());
        let generations = Arc::new(Generations::new());
        let scheduler =
            RecomputeScheduler::new(remote.clone(), session.clone(), generations);
        let ctx = TaskCtx {
            remote,
            session: session.clone(),
            progress: progress.clone(),
        };
        Self {
            session,
            progress,
            scheduler,
            ctx,
            task: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.session.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressState> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> &ProgressSimulator {
        &self.progress
    }

    pub fn subscribe_refreshing(&self) -> watch::Receiver<bool> {
        self.scheduler.subscribe_refreshing()
    }

    pub fn is_refreshing(&self) -> bool {
        self.scheduler.is_refreshing()
    }

    /// Start a new search. Resets every piece of query-scoped state before
    /// any new asynchronous work becomes observable; `keep_image` carries the
    /// photo/condition context across an AI-detected-name resubmission.
    pub fn submit(&self, text: &str, mode: Mode, keep_image: bool) -> Result<(), EmptyQuery> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EmptyQuery);
        }
        let search_id = Uuid::new_v4();
        self.abort_task();
        self.scheduler.cancel_pending();

        let query = SearchQuery::new(text, mode);
        self.session.update(|s| {
            s.reset_for_submission(keep_image);
            s.phase = SearchPhase::Submitted;
            s.query = Some(query.clone());
        });
        self.progress.start(mode);
        info!(
            target: "marketmaker.coordinator",
            %search_id,
            mode = ?mode,
            keep_image,
            "search submitted"
        );

        let ctx = self.ctx.clone();
        self.replace_task(tokio::spawn(async move {
            ctx.run_submission(query).await;
        }));
        Ok(())
    }

    /// Merge the chosen clarification values and move on to the primary
    /// fetch. Values join the base query in field declaration order, and feed
    /// the sell-side attribute map so the same parameter is never re-asked.
    pub fn submit_clarification(&self, selections: AttributeMap) {
        let snapshot = self.session.snapshot();
        if snapshot.phase != SearchPhase::NeedsRefinement {
            debug!(target: "marketmaker.coordinator", "clarification ignored outside NeedsRefinement");
            return;
        }
        let mode = snapshot.mode();
        let Some(refinement) = snapshot.refinement else {
            return;
        };

        let effective = effective_query(&refinement, &selections);
        let chosen: AttributeMap = selections
            .into_iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        self.session.update(|s| {
            s.refinement = None;
            s.refinement_values = chosen.clone();
            if mode == Some(Mode::Sell) {
                for (key, value) in &chosen {
                    s.attributes.insert(key.clone(), value.clone());
                }
            }
            s.phase = SearchPhase::Executing;
        });
        self.progress.resume();
        info!(target: "marketmaker.coordinator", effective = %effective, "clarification submitted");

        let ctx = self.ctx.clone();
        self.replace_task(tokio::spawn(async move {
            ctx.execute_primary(effective).await;
        }));
    }

    /// Clarification with no selections: search the base query as-is.
    pub fn skip_clarification(&self) {
        self.submit_clarification(AttributeMap::new());
    }

    /// Record a condition edit and queue a debounced recompute.
    pub fn set_condition(&self, rating: Option<u8>) {
        self.session.update(|s| s.condition = rating);
        self.maybe_schedule();
    }

    /// Record an attribute edit; an empty value means "any" and clears it.
    pub fn set_attribute(&self, key: &str, value: &str) {
        self.session.update(|s| {
            if value.trim().is_empty() {
                s.attributes.remove(key);
            } else {
                s.attributes.insert(key.to_string(), value.to_string());
            }
        });
        self.maybe_schedule();
    }

    /// Score an uploaded photo. Success adopts the rating as the condition
    /// and merges detected attributes; failure stays scoped to the widget.
    pub async fn analyze_image(&self, upload: ImageUpload) {
        let preview = upload.data_url();
        self.session.update(|s| {
            s.image_preview = Some(preview);
            s.image_error = None;
        });

        match self.ctx.remote.analyze_image(upload).await {
            Ok(analysis) => {
                self.session.update(|s| {
                    s.condition = Some(analysis.rating);
                    if let Some(detected) = &analysis.detected_attributes {
                        for (key, value) in detected {
                            s.detected_attributes.insert(key.clone(), value.clone());
                        }
                    }
                    s.image = Some(analysis);
                });
                self.maybe_schedule();
            }
            Err(err) => {
                warn!(target: "marketmaker.coordinator", error = %err, "image analysis failed");
                self.session.update(|s| s.image_error = Some(err.to_string()));
            }
        }
    }

    /// "Go home": unconditionally back to `Idle`, dropping any paused
    /// clarification, pending recompute, and in-flight loading indicator.
    pub fn reset(&self) {
        self.abort_task();
        self.scheduler.cancel_pending();
        self.progress.dismiss();
        self.session.update(|s| *s = SessionSnapshot::default());
        info!(target: "marketmaker.coordinator", "session reset");
    }

    fn maybe_schedule(&self) {
        let snapshot = self.session.snapshot();
        if snapshot.mode() == Some(Mode::Sell) && snapshot.sell.is_some() {
            self.scheduler
                .schedule(snapshot.condition, snapshot.sell_details());
        }
    }

    fn replace_task(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self
            .task
            .lock()
            .expect("coordinator lock")
            .replace(handle)
        {
            previous.abort();
        }
    }

    fn abort_task(&self) {
        if let Some(task) = self.task.lock().expect("coordinator lock").take() {
            task.abort();
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.abort_task();
    }
}

/// Append the chosen non-empty values in field declaration order, not map
/// iteration order, so the refined query reads the way the form was shown.
fn effective_query(refinement: &RefinementRequest, selections: &AttributeMap) -> String {
    let extras: Vec<&str> = refinement
        .fields
        .iter()
        .filter_map(|field| selections.get(&field.key))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect();
    if extras.is_empty() {
        refinement.base_query.clone()
    } else {
        format!("{} {}", refinement.base_query, extras.join(" "))
    }
}

/// Everything a spawned lifecycle task needs; cheap to clone into the task.
#[derive(Clone)]
struct TaskCtx {
    remote: Arc<dyn RemoteOps>,
    session: Session,
    progress: Arc<ProgressSimulator>,
}

impl TaskCtx {
    async fn run_submission(self, query: SearchQuery) {
        self.session
            .update(|s| s.phase = SearchPhase::CheckingRefinement);
        match self.remote.check_refinement(&query.text).await {
            Ok(check) if check.needs_refinement && !check.fields.is_empty() => {
                self.session.update(|s| {
                    s.phase = SearchPhase::NeedsRefinement;
                    s.refinement = Some(RefinementRequest {
                        base_query: query.text.clone(),
                        fields: check.fields,
                    });
                });
                self.progress.pause();
            }
            Ok(_) => {
                self.session.update(|s| s.phase = SearchPhase::Executing);
                self.execute_primary(query.text).await;
            }
            Err(err) => self.fail(err),
        }
    }

    async fn execute_primary(&self, effective: String) {
        let snapshot = self.session.snapshot();
        let Some(mode) = snapshot.mode() else {
            return;
        };
        match mode {
            Mode::Buy => match self.remote.analyze_buy(&effective).await {
                Ok(analysis) => {
                    self.session.update(|s| {
                        s.buy = Some(analysis);
                        s.phase = SearchPhase::Completed;
                    });
                    self.progress.finalize();
                }
                Err(err) => self.fail(err),
            },
            Mode::Sell => {
                let details = snapshot.sell_details();
                let (advice, fields) = tokio::join!(
                    self.remote.sell_advice(
                        &effective,
                        snapshot.condition,
                        &details,
                        CancellationToken::new(),
                    ),
                    self.remote.product_fields(&effective),
                );
                match advice {
                    Ok(advice) => {
                        // Field inference failure degrades to an empty form.
                        let fields = fields.unwrap_or_else(|err| {
                            warn!(
                                target: "marketmaker.coordinator",
                                error = %err,
                                "product field inference failed"
                            );
                            Vec::new()
                        });
                        let answered = snapshot.refinement_values;
                        self.session.update(|s| {
                            s.sell = Some(advice);
                            s.sell_fields = fields
                                .into_iter()
                                .filter(|f| !answered.contains_key(&f.key))
                                .collect();
                            s.phase = SearchPhase::Completed;
                        });
                        self.progress.finalize();
                    }
                    Err(err) => self.fail(err),
                }
            }
        }
    }

    fn fail(&self, err: RemoteError) {
        warn!(target: "marketmaker.coordinator", error = %err, "submission failed");
        self.session.update(|s| {
            s.phase = SearchPhase::Failed;
            s.error = Some(err.to_string());
        });
        self.progress.dismiss();
    }
}
