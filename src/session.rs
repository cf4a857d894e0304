//! Query-scoped session state and its subscribe/notify handle. The snapshot
//! is the single source of truth the UI renders from; collaborators mutate it
//! through [`Session::update`], which publishes to every subscriber.

use crate::models::{
    AttributeMap, BuyAnalysis, ImageAnalysis, Mode, ProductField, RefinementRequest, SearchQuery,
    SellAdvice,
};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchPhase {
    #[default]
    Idle,
    Submitted,
    CheckingRefinement,
    NeedsRefinement,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub phase: SearchPhase,
    pub query: Option<SearchQuery>,
    pub refinement: Option<RefinementRequest>,
    /// Clarification answers, merged into `attributes` for sell mode so the
    /// same parameter is never asked again downstream.
    pub refinement_values: AttributeMap,
    pub buy: Option<BuyAnalysis>,
    pub sell: Option<SellAdvice>,
    pub sell_fields: Vec<ProductField>,
    pub condition: Option<u8>,
    pub attributes: AttributeMap,
    pub detected_attributes: AttributeMap,
    pub image: Option<ImageAnalysis>,
    pub image_preview: Option<String>,
    /// Scoped to the upload widget; never promoted to `error`.
    pub image_error: Option<String>,
    /// Top-level submission-fatal error message.
    pub error: Option<String>,
}

impl SessionSnapshot {
    pub fn mode(&self) -> Option<Mode> {
        self.query.as_ref().map(|q| q.mode)
    }

    /// True once a query has been accepted and not yet reset.
    pub fn has_active_query(&self) -> bool {
        self.query.is_some()
    }

    /// Attribute map sent with sell-side pricing calls: detected attributes
    /// as a baseline, explicit user/clarification values winning.
    pub fn sell_details(&self) -> AttributeMap {
        let mut details = self.detected_attributes.clone();
        for (key, value) in &self.attributes {
            details.insert(key.clone(), value.clone());
        }
        details
    }

    /// Wipe everything scoped to the previous query. `keep_image` preserves
    /// the photo/condition context for AI-detected-name resubmissions.
    pub fn reset_for_submission(&mut self, keep_image: bool) {
        let kept = if keep_image {
            Some((
                self.condition.take(),
                self.image.take(),
                self.image_preview.take(),
                self.detected_attributes.clone(),
            ))
        } else {
            None
        };
        *self = Self::default();
        if let Some((condition, image, preview, detected)) = kept {
            self.condition = condition;
            self.image = image;
            self.image_preview = preview;
            self.detected_attributes = detected;
        }
    }
}

/// Cloneable handle around the snapshot's watch channel.
#[derive(Clone)]
pub struct Session {
    tx: watch::Sender<SessionSnapshot>,
}

impl Session {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionSnapshot::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    /// Mutate the snapshot and notify subscribers.
    pub fn update(&self, mutate: impl FnOnce(&mut SessionSnapshot)) {
        self.tx.send_modify(mutate);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
