//! Opportunity scoring: per-thread signals, weighted score, recommended action
//! and the full refresh over every persisted thread.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tof_core::{AffiliateProgram, Intent, Opportunity, RecommendedAction, Thread};
use tof_storage::Store;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::EngineError;
use crate::serp::SerpChecker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// Per distinct matched program, up to `max_counted_programs`.
    ProgramMatch,
    /// Flat bonus for COMPARISON and REVIEW threads.
    CommercialIntent,
    /// Flat bonus when the thread ranks in search.
    SerpMatch,
    /// Scaled by upvotes / `engagement_saturation`, capped at 1.
    Engagement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringThresholds {
    /// Minimum score (inclusive) for a COMMENT recommendation.
    pub comment: f64,
    pub engagement_saturation: f64,
    pub max_counted_programs: usize,
}

impl Default for ScoringThresholds {
    fn default() -> Self {
        Self {
            comment: 50.0,
            engagement_saturation: 500.0,
            max_counted_programs: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub weights: BTreeMap<Signal, f64>,
    #[serde(default)]
    pub thresholds: ScoringThresholds,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: BTreeMap::from([
                (Signal::ProgramMatch, 20.0),
                (Signal::CommercialIntent, 15.0),
                (Signal::SerpMatch, 25.0),
                (Signal::Engagement, 20.0),
            ]),
            thresholds: ScoringThresholds::default(),
        }
    }
}

impl ScoringConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, EngineError> {
        let config: ScoringConfig =
            serde_yaml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Missing signals weigh zero.
    pub fn weight(&self, signal: Signal) -> f64 {
        self.weights.get(&signal).copied().unwrap_or(0.0)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if let Some((signal, weight)) = self
            .weights
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(EngineError::Config(format!(
                "weight for {signal:?} must be a non-negative number, got {weight}"
            )));
        }
        let t = &self.thresholds;
        if !t.comment.is_finite() {
            return Err(EngineError::Config("comment threshold must be finite".into()));
        }
        if !(t.engagement_saturation.is_finite() && t.engagement_saturation > 0.0) {
            return Err(EngineError::Config(
                "engagement_saturation must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// What a refresh does with rows an operator edited by hand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverridePolicy {
    #[default]
    Overwrite,
    PreserveManual,
}

impl FromStr for OverridePolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "overwrite" => Ok(OverridePolicy::Overwrite),
            "preserve-manual" | "preserve" => Ok(OverridePolicy::PreserveManual),
            other => Err(EngineError::Config(format!("unknown override policy {other}"))),
        }
    }
}

/// Inputs to the score for one thread.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSignals {
    pub matched_programs: Vec<Uuid>,
    pub intent: Intent,
    pub serp_match: bool,
    pub upvotes: i64,
}

/// Ids of programs with a keyword in the thread's title or body, in program order.
pub fn matched_programs(thread: &Thread, programs: &[AffiliateProgram]) -> Vec<Uuid> {
    let haystack = format!("{}\n{}", thread.title, thread.body).to_lowercase();
    let mut ids = Vec::new();
    for program in programs {
        if program.matches_text(&haystack) && !ids.contains(&program.id) {
            ids.push(program.id);
        }
    }
    ids
}

fn is_commercial(intent: Intent) -> bool {
    matches!(intent, Intent::Comparison | Intent::Review)
}

pub fn score(config: &ScoringConfig, signals: &ThreadSignals) -> f64 {
    let t = &config.thresholds;
    let programs = signals.matched_programs.len().min(t.max_counted_programs) as f64;
    let engagement = (signals.upvotes.max(0) as f64 / t.engagement_saturation).min(1.0);

    let mut total = programs * config.weight(Signal::ProgramMatch);
    if is_commercial(signals.intent) {
        total += config.weight(Signal::CommercialIntent);
    }
    if signals.serp_match {
        total += config.weight(Signal::SerpMatch);
    }
    total += engagement * config.weight(Signal::Engagement);
    (total * 100.0).round() / 100.0
}

pub fn recommend(config: &ScoringConfig, score: f64, has_matches: bool) -> RecommendedAction {
    if !has_matches {
        RecommendedAction::Skip
    } else if score >= config.thresholds.comment {
        RecommendedAction::Comment
    } else {
        RecommendedAction::Watch
    }
}

pub fn compute_opportunity(
    config: &ScoringConfig,
    thread: &Thread,
    programs: &[AffiliateProgram],
    serp_match: bool,
    now: DateTime<Utc>,
) -> Opportunity {
    let signals = ThreadSignals {
        matched_programs: matched_programs(thread, programs),
        intent: thread.intent,
        serp_match,
        upvotes: thread.upvotes,
    };
    let score = score(config, &signals);
    let action = recommend(config, score, !signals.matched_programs.is_empty());
    Opportunity {
        id: Opportunity::natural_id(thread.id),
        thread_id: thread.id,
        score,
        intent: thread.intent,
        matched_programs: signals.matched_programs,
        serp_match,
        action,
        manual_override: false,
        computed_at: now,
        updated_at: now,
    }
}

/// The single place where a freshly computed row meets the stored one.
pub fn apply_override_policy(
    policy: OverridePolicy,
    existing: Option<&Opportunity>,
    computed: Opportunity,
) -> Opportunity {
    match (policy, existing) {
        (OverridePolicy::PreserveManual, Some(previous)) if previous.manual_override => Opportunity {
            score: previous.score,
            action: previous.action,
            manual_override: true,
            updated_at: previous.updated_at,
            ..computed
        },
        _ => computed,
    }
}

pub struct ScoringEngine {
    store: Arc<dyn Store>,
    config: ScoringConfig,
    policy: OverridePolicy,
    serp_backfill: Option<Arc<SerpChecker>>,
}

impl ScoringEngine {
    pub fn new(store: Arc<dyn Store>, config: ScoringConfig, policy: OverridePolicy) -> Self {
        Self {
            store,
            config,
            policy,
            serp_backfill: None,
        }
    }

    /// Check threads that have never been checked before scoring them.
    pub fn with_serp_backfill(mut self, checker: Arc<SerpChecker>) -> Self {
        self.serp_backfill = Some(checker);
        self
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn policy(&self) -> OverridePolicy {
        self.policy
    }

    /// Recompute and upsert the opportunity of every persisted thread. Returns
    /// the number of rows written.
    pub async fn refresh_all(&self) -> Result<usize, EngineError> {
        self.refresh_inner()
            .instrument(info_span!("refresh_opportunities", policy = ?self.policy))
            .await
    }

    async fn refresh_inner(&self) -> Result<usize, EngineError> {
        let mut programs = self.store.list_programs().await?;
        programs.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        let threads = self.store.all_threads().await?;

        let mut serp_state: HashMap<Uuid, bool> = HashMap::new();
        for result in self.store.all_serp_results().await? {
            *serp_state.entry(result.thread_id).or_default() |= result.ranked;
        }

        let mut written = 0usize;
        let mut by_action: BTreeMap<&'static str, usize> = BTreeMap::new();
        for thread in &threads {
            let serp_match = match serp_state.get(&thread.id) {
                Some(ranked) => *ranked,
                None => self.backfill_serp(thread).await,
            };
            let computed =
                compute_opportunity(&self.config, thread, &programs, serp_match, Utc::now());
            // Read right before writing so edits made mid-refresh are seen.
            let existing = self.store.opportunity_for_thread(thread.id).await?;
            let merged = apply_override_policy(self.policy, existing.as_ref(), computed);
            *by_action.entry(merged.action.as_str()).or_default() += 1;
            self.store.upsert_opportunity(merged).await?;
            written += 1;
        }

        info!(threads = threads.len(), written, actions = ?by_action, "opportunities refreshed");
        Ok(written)
    }

    async fn backfill_serp(&self, thread: &Thread) -> bool {
        let Some(checker) = &self.serp_backfill else {
            return false;
        };
        match checker.check_position(thread.id, None).await {
            Ok(result) => result.ranked,
            Err(err) => {
                warn!(thread_id = %thread.id, error = %err, "serp check failed during refresh; treating as unranked");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread(title: &str, intent: Intent, upvotes: i64) -> Thread {
        Thread {
            id: Thread::natural_id("homelab", title),
            source: "homelab".into(),
            external_id: title.into(),
            title: title.into(),
            body: String::new(),
            permalink: format!("https://www.reddit.com/r/homelab/comments/{title}/"),
            upvotes,
            comment_count: 0,
            intent,
            crawled_at: Utc::now(),
        }
    }

    fn nas_program() -> AffiliateProgram {
        AffiliateProgram::new("Synology", "https://synology.example", vec!["Synology".into()])
    }

    #[test]
    fn keyword_and_serp_match_outscore_an_unmatched_thread() {
        let config = ScoringConfig::default();
        let programs = vec![nas_program()];
        let now = Utc::now();
        let matched = compute_opportunity(
            &config,
            &thread("Which SYNOLOGY model?", Intent::Question, 40),
            &programs,
            true,
            now,
        );
        let plain = compute_opportunity(
            &config,
            &thread("Which rack model?", Intent::Question, 40),
            &programs,
            false,
            now,
        );
        assert!(matched.score > plain.score);
        assert_eq!(matched.matched_programs, vec![programs[0].id]);
    }

    #[test]
    fn zero_matches_always_skip() {
        let config = ScoringConfig {
            thresholds: ScoringThresholds {
                comment: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let opp = compute_opportunity(
            &config,
            &thread("Massive rack tour", Intent::Review, 100_000),
            &[nas_program()],
            true,
            Utc::now(),
        );
        assert!(opp.score > config.thresholds.comment);
        assert_eq!(opp.action, RecommendedAction::Skip);
    }

    #[test]
    fn threshold_is_inclusive_for_comment() {
        let config = ScoringConfig::default();
        assert_eq!(recommend(&config, 50.0, true), RecommendedAction::Comment);
        assert_eq!(recommend(&config, 49.99, true), RecommendedAction::Watch);
    }

    #[test]
    fn score_combines_weighted_signals() {
        let config = ScoringConfig::default();
        let signals = ThreadSignals {
            matched_programs: vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()],
            intent: Intent::Comparison,
            serp_match: true,
            upvotes: 250,
        };
        // 3 counted programs * 20 + 15 + 25 + 0.5 * 20
        assert_eq!(score(&config, &signals), 110.0);

        let negative = ThreadSignals {
            matched_programs: vec![],
            intent: Intent::Discovery,
            serp_match: false,
            upvotes: -12,
        };
        assert_eq!(score(&config, &negative), 0.0);
    }

    #[test]
    fn weights_come_from_configuration() {
        let config = ScoringConfig::from_yaml_str(
            "weights:\n  program_match: 1.0\n  engagement: 0.0\nthresholds:\n  comment: 1.0\n  engagement_saturation: 10\n  max_counted_programs: 5\n",
        )
        .unwrap();
        assert_eq!(config.weight(Signal::SerpMatch), 0.0);
        let signals = ThreadSignals {
            matched_programs: vec![Uuid::new_v4(), Uuid::new_v4()],
            intent: Intent::Review,
            serp_match: true,
            upvotes: 5,
        };
        assert_eq!(score(&config, &signals), 2.0);
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        assert!(ScoringConfig::from_yaml_str("weights:\n  serp_match: -3\n").is_err());
        assert!(ScoringConfig::from_yaml_str(
            "weights: {}\nthresholds:\n  comment: 1\n  engagement_saturation: 0\n  max_counted_programs: 1\n"
        )
        .is_err());
        assert!(ScoringConfig::from_yaml_str("weights:\n  popularity: 2\n").is_err());
    }

    #[test]
    fn workspace_scoring_file_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../scoring.yaml");
        assert_eq!(ScoringConfig::load(&path).unwrap(), ScoringConfig::default());
    }

    #[test]
    fn override_policy_decides_manual_rows() {
        let now = Utc::now();
        let config = ScoringConfig::default();
        let t = thread("Synology or QNAP?", Intent::Comparison, 10);
        let computed = compute_opportunity(&config, &t, &[nas_program()], false, now);
        let mut manual = computed.clone();
        manual.action = RecommendedAction::Skip;
        manual.score = 1.0;
        manual.manual_override = true;

        let overwritten = apply_override_policy(OverridePolicy::Overwrite, Some(&manual), computed.clone());
        assert_eq!(overwritten, computed);

        let kept = apply_override_policy(OverridePolicy::PreserveManual, Some(&manual), computed.clone());
        assert_eq!(kept.action, RecommendedAction::Skip);
        assert_eq!(kept.score, 1.0);
        assert!(kept.manual_override);
        assert_eq!(kept.matched_programs, computed.matched_programs);
    }

    #[test]
    fn override_policy_parses_from_env_values() {
        assert_eq!("overwrite".parse::<OverridePolicy>().unwrap(), OverridePolicy::Overwrite);
        assert_eq!(
            "PRESERVE_MANUAL".parse::<OverridePolicy>().unwrap(),
            OverridePolicy::PreserveManual
        );
        assert!("sometimes".parse::<OverridePolicy>().is_err());
    }

    mod refresh {
        use super::*;
        use async_trait::async_trait;
        use tof_adapters::{CollaboratorError, SearchEngine, StaticSearchEngine};
        use tof_storage::MemoryStore;

        use crate::serp::{default_query, SerpSettings};

        struct DownSearch;

        #[async_trait]
        impl SearchEngine for DownSearch {
            fn name(&self) -> &str {
                "down"
            }

            async fn search(&self, _query: &str) -> Result<Vec<String>, CollaboratorError> {
                Err(CollaboratorError::Unavailable("search backend offline".into()))
            }
        }

        /// Marks the thread's opportunity as manually skipped while the
        /// refresh is waiting on search.
        struct EditingSearch {
            store: Arc<MemoryStore>,
            thread_id: Uuid,
        }

        #[async_trait]
        impl SearchEngine for EditingSearch {
            fn name(&self) -> &str {
                "editing"
            }

            async fn search(&self, _query: &str) -> Result<Vec<String>, CollaboratorError> {
                let mut edited = self
                    .store
                    .opportunity_for_thread(self.thread_id)
                    .await
                    .unwrap()
                    .unwrap();
                edited.action = RecommendedAction::Skip;
                edited.score = 1.0;
                edited.manual_override = true;
                self.store.update_opportunity(edited).await.unwrap().unwrap();
                Ok(Vec::new())
            }
        }

        async fn seeded_store(threads: &[Thread]) -> Arc<MemoryStore> {
            let store = Arc::new(MemoryStore::new());
            store.create_program(nas_program()).await.unwrap();
            store.upsert_threads(threads).await.unwrap();
            store
        }

        fn engine_with_search(
            store: Arc<MemoryStore>,
            search: Arc<dyn SearchEngine>,
            policy: OverridePolicy,
        ) -> ScoringEngine {
            let checker = SerpChecker::new(store.clone(), search, SerpSettings::default());
            ScoringEngine::new(store, ScoringConfig::default(), policy)
                .with_serp_backfill(Arc::new(checker))
        }

        #[tokio::test]
        async fn failed_backfill_scores_threads_as_unranked() {
            let threads = vec![
                thread("Synology vs QNAP", Intent::Comparison, 200),
                thread("Synology fan noise", Intent::Question, 10),
            ];
            let store = seeded_store(&threads).await;
            let engine = engine_with_search(store.clone(), Arc::new(DownSearch), OverridePolicy::Overwrite);

            assert_eq!(engine.refresh_all().await.unwrap(), 2);

            let opportunities = store.all_opportunities().await.unwrap();
            assert_eq!(opportunities.len(), 2);
            assert!(opportunities.iter().all(|o| !o.serp_match));
            assert!(store.all_serp_results().await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn successful_backfill_marks_ranked_threads() {
            let t = thread("Synology vs QNAP", Intent::Comparison, 200);
            let store = seeded_store(std::slice::from_ref(&t)).await;
            let search = StaticSearchEngine::default()
                .with_results(&default_query(&t), vec![t.permalink.clone()]);
            let engine = engine_with_search(store.clone(), Arc::new(search), OverridePolicy::Overwrite);

            assert_eq!(engine.refresh_all().await.unwrap(), 1);

            let opportunity = store.opportunity_for_thread(t.id).await.unwrap().unwrap();
            assert!(opportunity.serp_match);
            // 20 + 15 + 25 + 0.4 * 20
            assert_eq!(opportunity.score, 68.0);
            let serp = store.serp_results_for_thread(t.id).await.unwrap();
            assert_eq!(serp.len(), 1);
            assert_eq!(serp[0].position, Some(1));
        }

        #[tokio::test]
        async fn manual_edit_made_during_refresh_is_preserved() {
            let t = thread("Synology vs QNAP", Intent::Comparison, 200);
            let store = seeded_store(std::slice::from_ref(&t)).await;
            ScoringEngine::new(store.clone(), ScoringConfig::default(), OverridePolicy::PreserveManual)
                .refresh_all()
                .await
                .unwrap();
            assert!(!store.opportunity_for_thread(t.id).await.unwrap().unwrap().manual_override);

            let search = EditingSearch {
                store: store.clone(),
                thread_id: t.id,
            };
            let engine = engine_with_search(store.clone(), Arc::new(search), OverridePolicy::PreserveManual);
            assert_eq!(engine.refresh_all().await.unwrap(), 1);

            let kept = store.opportunity_for_thread(t.id).await.unwrap().unwrap();
            assert!(kept.manual_override);
            assert_eq!(kept.action, RecommendedAction::Skip);
            assert_eq!(kept.score, 1.0);
        }
    }
}
