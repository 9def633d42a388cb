//! Extension-wide state and its single mutation entry point.
//!
//! [`ExtensionStore`] owns the current [`ExtensionState`] behind a
//! `tokio::sync::watch` channel. Writers go through [`ExtensionStore::mutate`]
//! or [`ExtensionStore::mutate_if`]; each applies its recipe under the
//! channel's lock, so a read-modify-write is never split across two calls.

use konveyor_types::{
    AnalysisProfile, EnhancedIncident, RuleSet, ServerState, enhance_incidents,
};
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionState {
    pub server_state: ServerState,
    pub is_analyzing: bool,
    /// 0 to 100.
    pub analysis_progress: u8,
    /// Detailed progress text shown in the analysis panel.
    pub analysis_progress_message: String,
    pub rule_sets: Vec<RuleSet>,
    pub enhanced_incidents: Vec<EnhancedIncident>,
    pub profiles: Vec<AnalysisProfile>,
    pub active_profile_id: Option<String>,
    pub last_analysis_error: Option<String>,
}

impl ExtensionState {
    #[must_use]
    pub fn with_profiles(profiles: Vec<AnalysisProfile>, active_profile_id: Option<String>) -> Self {
        Self {
            profiles,
            active_profile_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn active_profile(&self) -> Option<&AnalysisProfile> {
        let id = self.active_profile_id.as_deref()?;
        self.profiles.iter().find(|profile| profile.id == id)
    }

    /// Replace the current results and rebuild the flattened incident list.
    pub fn load_rule_sets(&mut self, rule_sets: Vec<RuleSet>) {
        self.enhanced_incidents = enhance_incidents(&rule_sets);
        self.rule_sets = rule_sets;
    }

    /// Clearing the flag also resets the displayed progress.
    pub fn set_analyzing(&mut self, analyzing: bool) {
        self.is_analyzing = analyzing;
        if !analyzing {
            self.analysis_progress = 0;
            self.analysis_progress_message.clear();
        }
    }
}

pub struct ExtensionStore {
    tx: watch::Sender<ExtensionState>,
}

impl ExtensionStore {
    #[must_use]
    pub fn new(initial: ExtensionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Apply `recipe` and publish the result to every subscriber.
    pub fn mutate(&self, recipe: impl FnOnce(&mut ExtensionState)) {
        self.tx.send_modify(recipe);
    }

    /// Apply `recipe`; subscribers are notified only if it returns `true`.
    pub fn mutate_if(&self, recipe: impl FnOnce(&mut ExtensionState) -> bool) -> bool {
        self.tx.send_if_modified(recipe)
    }

    /// Read without cloning. `f` must not call back into the store.
    pub fn read<R>(&self, f: impl FnOnce(&ExtensionState) -> R) -> R {
        f(&self.tx.borrow())
    }

    #[must_use]
    pub fn snapshot(&self) -> ExtensionState {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ExtensionState> {
        self.tx.subscribe()
    }
}

impl Default for ExtensionStore {
    fn default() -> Self {
        Self::new(ExtensionState::default())
    }
}
