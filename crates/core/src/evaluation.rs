//! Turn evaluation: an LLM grades each roleplay turn, and a deterministic
//! aggregator makes the result safe to use. The aggregator never fails a
//! turn: evaluator errors degrade to a neutral zero-score result, and
//! phase policies only ever add warnings.

use crate::conversation::ConversationTurn;
use crate::generator::TextGenerator;
use anyhow::{Context, Result};
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// How well a technique was applied, worst to best.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Gemist,
    Bijna,
    Goed,
    Perfect,
}

impl Quality {
    pub fn default_score(&self) -> i32 {
        match self {
            Quality::Gemist => 0,
            Quality::Bijna => 5,
            Quality::Goed => 10,
            Quality::Perfect => 15,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Gemist => "gemist",
            Quality::Bijna => "bijna",
            Quality::Goed => "goed",
            Quality::Perfect => "perfect",
        }
    }
}

/// Whether the seller locked in a concrete commitment this turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitmentEvent {
    pub performed: bool,
    #[serde(default)]
    pub themes_locked: Vec<String>,
}

/// One graded turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnEvaluation {
    pub applied_technique: Option<String>,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub score_delta: i32,
    #[serde(default)]
    pub feedback_points: Vec<String>,
    #[serde(default)]
    pub mistakes_detected: Vec<String>,
    pub customer_attitude: Option<String>,
    #[serde(default)]
    pub commitment: CommitmentEvent,
}

impl TurnEvaluation {
    /// The fallback when grading is unavailable: no technique, no score,
    /// nothing detected. A turn must never fail because grading did.
    pub fn neutral() -> Self {
        TurnEvaluation::default()
    }
}

/// What the evaluator knows about the session when grading.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub phase: u8,
    pub technique_id: String,
    pub technique_name: String,
    pub used_techniques: Vec<String>,
}

#[async_trait]
pub trait TurnEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        history: &[ConversationTurn],
        ctx: &EvalContext,
    ) -> Result<TurnEvaluation>;
}

/// Deterministic phase rules layered over the evaluator. Violations are
/// reported as warnings; they never change the score or block the turn.
#[derive(Debug, Clone)]
pub struct PhasePolicy {
    /// Phase 1 techniques in their one allowed order.
    pub phase1_order: Vec<String>,
    /// Technique prefixes that do not belong in phase 4.
    pub phase4_prohibited: Vec<String>,
    /// The technique credited when a commitment phrase is detected.
    pub commitment_technique_id: String,
    /// Seller phrases that count as an explicit commitment.
    pub commitment_phrases: Vec<String>,
}

impl Default for PhasePolicy {
    fn default() -> Self {
        Self {
            phase1_order: ["1.1", "1.2", "1.3", "1.4"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            phase4_prohibited: vec!["2.2".to_string()],
            commitment_technique_id: "2.4".to_string(),
            commitment_phrases: [
                "spreken we af",
                "afgesproken",
                "zullen we afspreken",
                "dan plan ik",
                "ik zet het in de agenda",
                "dan noteer ik",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

pub const COMMITMENT_NOTE: &str =
    "Commitment herkend: je hebt de afspraak expliciet vastgelegd.";

/// The aggregated, always-usable result of grading one turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnVerdict {
    pub evaluation: TurnEvaluation,
    pub warnings: Vec<String>,
    /// True when the evaluator failed and the neutral fallback was used.
    pub degraded: bool,
}

pub struct EvaluationAggregator {
    evaluator: Arc<dyn TurnEvaluator>,
    policy: PhasePolicy,
}

impl EvaluationAggregator {
    pub fn new(evaluator: Arc<dyn TurnEvaluator>, policy: PhasePolicy) -> Self {
        Self { evaluator, policy }
    }

    /// Grades one seller turn. Infallible by construction.
    pub async fn assess(
        &self,
        seller_message: &str,
        history: &[ConversationTurn],
        ctx: &EvalContext,
    ) -> TurnVerdict {
        let (mut evaluation, degraded) = match self.evaluator.evaluate(history, ctx).await {
            Ok(eval) => (eval, false),
            Err(e) => {
                warn!(error = ?e, technique = %ctx.technique_id, "turn evaluation failed, using neutral fallback");
                (TurnEvaluation::neutral(), true)
            }
        };

        // A literal commitment phrase from the seller is ground truth and
        // overrides whatever the evaluator classified.
        if self.detect_commitment(seller_message) {
            if evaluation.applied_technique.as_deref()
                != Some(self.policy.commitment_technique_id.as_str())
            {
                evaluation.applied_technique = Some(self.policy.commitment_technique_id.clone());
            }
            evaluation.commitment.performed = true;
            if !evaluation
                .feedback_points
                .iter()
                .any(|p| p == COMMITMENT_NOTE)
            {
                evaluation.feedback_points.push(COMMITMENT_NOTE.to_string());
            }
        }

        let mut warnings = Vec::new();
        if let Some(applied) = evaluation.applied_technique.as_deref() {
            self.check_phase1_order(applied, &ctx.used_techniques, &mut warnings);
            self.check_phase4_prohibition(ctx.phase, applied, &mut warnings);
        }

        TurnVerdict {
            evaluation,
            warnings,
            degraded,
        }
    }

    fn detect_commitment(&self, seller_message: &str) -> bool {
        let text = seller_message.to_lowercase();
        self.policy
            .commitment_phrases
            .iter()
            .any(|p| text.contains(p.as_str()))
    }

    fn check_phase1_order(&self, applied: &str, used: &[String], warnings: &mut Vec<String>) {
        if !self.policy.phase1_order.iter().any(|t| t == applied) {
            return;
        }
        let expected = self
            .policy
            .phase1_order
            .iter()
            .find(|t| !used.contains(t));
        if let Some(expected) = expected {
            if expected != applied {
                warnings.push(format!(
                    "Techniek {applied} buiten de vaste volgorde van fase 1; verwacht was {expected}."
                ));
            }
        }
    }

    fn check_phase4_prohibition(&self, phase: u8, applied: &str, warnings: &mut Vec<String>) {
        if phase != 4 {
            return;
        }
        if self
            .policy
            .phase4_prohibited
            .iter()
            .any(|p| applied == p || applied.starts_with(&format!("{p}.")))
        {
            warnings.push(format!(
                "Techniek {applied} hoort niet thuis in fase 4 (afronding)."
            ));
        }
    }
}

/// Phase never moves backwards; a technique from a later phase pulls the
/// session forward to that phase.
pub fn advance_phase(current: u8, applied_technique: Option<&str>) -> u8 {
    let hint = applied_technique
        .and_then(|id| id.split('.').next())
        .and_then(|s| s.parse::<u8>().ok())
        .unwrap_or(0);
    current.max(hint).clamp(1, 4)
}

/// The LLM-backed evaluator. Builds a grading prompt over the recent
/// roleplay history and parses the model's JSON verdict; any parse or
/// transport failure surfaces as an error for the aggregator to absorb.
pub struct LlmTurnEvaluator {
    generator: Arc<dyn TextGenerator>,
}

const EVAL_HISTORY_WINDOW: usize = 12;

impl LlmTurnEvaluator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    fn system_prompt(ctx: &EvalContext) -> String {
        format!(
            "Je bent een beoordelaar van verkooptechnieken. De verkoper oefent \
             techniek {} ({}), fase {}. Reeds toegepaste technieken: [{}]. \
             Beoordeel ALLEEN de laatste beurt van de verkoper. Antwoord met \
             uitsluitend een JSON-object met de velden: applied_technique \
             (techniek-nummer of null), quality (\"perfect\"|\"goed\"|\"bijna\"|\"gemist\"), \
             score_delta (geheel getal), feedback_points (lijst van strings), \
             mistakes_detected (lijst van strings), customer_attitude (string of null), \
             commitment {{performed: bool, themes_locked: lijst van strings}}.",
            ctx.technique_id,
            ctx.technique_name,
            ctx.phase,
            ctx.used_techniques.join(", "),
        )
    }

    fn transcript(history: &[ConversationTurn]) -> String {
        let start = history.len().saturating_sub(EVAL_HISTORY_WINDOW);
        history[start..]
            .iter()
            .map(|t| format!("{}: {}", t.role.as_str(), t.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Strips an optional markdown code fence so the body parses as JSON.
fn strip_json_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

#[async_trait]
impl TurnEvaluator for LlmTurnEvaluator {
    async fn evaluate(
        &self,
        history: &[ConversationTurn],
        ctx: &EvalContext,
    ) -> Result<TurnEvaluation> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(Self::system_prompt(ctx))
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(Self::transcript(history))
                .build()?
                .into(),
        ];
        let raw = self.generator.complete(messages).await?;
        let mut evaluation: TurnEvaluation = serde_json::from_str(strip_json_fence(&raw))
            .context("evaluator returned malformed JSON")?;
        if evaluation.score_delta == 0 && evaluation.applied_technique.is_some() {
            evaluation.score_delta = evaluation.quality.default_score();
        }
        Ok(evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FixedEvaluator(Option<TurnEvaluation>);

    #[async_trait]
    impl TurnEvaluator for FixedEvaluator {
        async fn evaluate(
            &self,
            _history: &[ConversationTurn],
            _ctx: &EvalContext,
        ) -> Result<TurnEvaluation> {
            self.0.clone().ok_or_else(|| anyhow!("evaluator down"))
        }
    }

    fn ctx(phase: u8, used: &[&str]) -> EvalContext {
        EvalContext {
            phase,
            technique_id: "2.1".to_string(),
            technique_name: "Vraagtechnieken".to_string(),
            used_techniques: used.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn graded(applied: &str, quality: Quality) -> TurnEvaluation {
        TurnEvaluation {
            applied_technique: Some(applied.to_string()),
            quality,
            score_delta: quality.default_score(),
            ..TurnEvaluation::default()
        }
    }

    #[test]
    fn quality_is_totally_ordered() {
        assert!(Quality::Gemist < Quality::Bijna);
        assert!(Quality::Bijna < Quality::Goed);
        assert!(Quality::Goed < Quality::Perfect);
    }

    #[tokio::test]
    async fn evaluator_failure_degrades_to_neutral() {
        let agg = EvaluationAggregator::new(Arc::new(FixedEvaluator(None)), PhasePolicy::default());
        let verdict = agg.assess("mijn beurt", &[], &ctx(2, &[])).await;
        assert!(verdict.degraded);
        assert_eq!(verdict.evaluation.score_delta, 0);
        assert!(verdict.evaluation.applied_technique.is_none());
        assert!(verdict.evaluation.feedback_points.is_empty());
        assert!(verdict.evaluation.mistakes_detected.is_empty());
    }

    #[tokio::test]
    async fn commitment_phrase_overrides_the_classifier() {
        let agg = EvaluationAggregator::new(
            Arc::new(FixedEvaluator(Some(graded("2.1", Quality::Goed)))),
            PhasePolicy::default(),
        );
        let verdict = agg
            .assess("Dan spreken we af dat ik dinsdag terugbel.", &[], &ctx(2, &[]))
            .await;
        assert_eq!(verdict.evaluation.applied_technique.as_deref(), Some("2.4"));
        assert!(verdict.evaluation.commitment.performed);
        assert!(verdict
            .evaluation
            .feedback_points
            .iter()
            .any(|p| p == COMMITMENT_NOTE));
    }

    #[tokio::test]
    async fn commitment_override_applies_even_on_fallback() {
        let agg = EvaluationAggregator::new(Arc::new(FixedEvaluator(None)), PhasePolicy::default());
        let verdict = agg.assess("afgesproken!", &[], &ctx(2, &[])).await;
        assert!(verdict.degraded);
        assert_eq!(verdict.evaluation.applied_technique.as_deref(), Some("2.4"));
    }

    #[tokio::test]
    async fn out_of_order_phase1_technique_warns_without_blocking() {
        let agg = EvaluationAggregator::new(
            Arc::new(FixedEvaluator(Some(graded("1.3", Quality::Goed)))),
            PhasePolicy::default(),
        );
        let verdict = agg.assess("beurt", &[], &ctx(1, &["1.1"])).await;
        assert_eq!(verdict.warnings.len(), 1);
        assert!(verdict.warnings[0].contains("1.3"));
        assert!(verdict.warnings[0].contains("1.2"));
        assert_eq!(verdict.evaluation.score_delta, Quality::Goed.default_score());
    }

    #[tokio::test]
    async fn phase1_technique_in_order_is_clean() {
        let agg = EvaluationAggregator::new(
            Arc::new(FixedEvaluator(Some(graded("1.2", Quality::Perfect)))),
            PhasePolicy::default(),
        );
        let verdict = agg.assess("beurt", &[], &ctx(1, &["1.1"])).await;
        assert!(verdict.warnings.is_empty());
    }

    #[tokio::test]
    async fn prohibited_category_in_phase4_warns() {
        let agg = EvaluationAggregator::new(
            Arc::new(FixedEvaluator(Some(graded("2.2", Quality::Goed)))),
            PhasePolicy::default(),
        );
        let verdict = agg.assess("beurt", &[], &ctx(4, &[])).await;
        assert_eq!(verdict.warnings.len(), 1);
        let verdict = agg.assess("beurt", &[], &ctx(3, &[])).await;
        assert!(verdict.warnings.is_empty());
    }

    #[test]
    fn phase_only_moves_forward() {
        assert_eq!(advance_phase(2, Some("3.1")), 3);
        assert_eq!(advance_phase(3, Some("1.2")), 3);
        assert_eq!(advance_phase(2, None), 2);
        assert_eq!(advance_phase(4, Some("9.1")), 4);
    }

    #[test]
    fn fence_stripping() {
        assert_eq!(strip_json_fence("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_json_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_json_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn evaluation_json_round_trip_with_defaults() {
        let raw = r#"{"applied_technique":"2.1","quality":"goed","score_delta":10}"#;
        let eval: TurnEvaluation = serde_json::from_str(raw).unwrap();
        assert_eq!(eval.quality, Quality::Goed);
        assert!(eval.feedback_points.is_empty());
        assert!(!eval.commitment.performed);
    }
}
