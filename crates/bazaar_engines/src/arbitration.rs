#![forbid(unsafe_code)]

use bazaar_kernel_contracts::arbitration::{ArbitratedRecord, DecisionBasis};
use bazaar_kernel_contracts::candidate::{
    CandidateResult, ConfidenceScore, ExtractionPayload, PayloadSchema, SourceId,
};
use bazaar_kernel_contracts::receipt::{LineItem, ReceiptPayload};
use bazaar_kernel_contracts::simquery::SimulationQueryPayload;
use bazaar_kernel_contracts::{normalize_categorical, ContractViolation, TimestampMs, Validate};
use rust_decimal::Decimal;

use crate::fallback::fallback_payload;

pub const NUMERIC_TOLERANCE_BPS_DEFAULT: u32 = 100;
pub const DISAGREEMENT_PENALTY_DEFAULT: u8 = 10;
pub const FALLBACK_CONFIDENCE_DEFAULT: u8 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbitrationConfig {
    /// Relative tolerance for numeric fields, in basis points of the larger magnitude.
    pub numeric_tolerance_bps: u32,
    pub disagreement_penalty: u8,
    /// Wins confidence ties.
    pub primary_source: SourceId,
    pub fallback_confidence: ConfidenceScore,
}

impl ArbitrationConfig {
    pub fn mvp_v1() -> Self {
        Self {
            numeric_tolerance_bps: NUMERIC_TOLERANCE_BPS_DEFAULT,
            disagreement_penalty: DISAGREEMENT_PENALTY_DEFAULT,
            primary_source: SourceId::SourceA,
            fallback_confidence: ConfidenceScore::saturating(i64::from(FALLBACK_CONFIDENCE_DEFAULT)),
        }
    }
}

impl Validate for ArbitrationConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.numeric_tolerance_bps > 10_000 {
            return Err(ContractViolation::InvalidRange {
                field: "arbitration_config.numeric_tolerance_bps",
                min: 0.0,
                max: 10_000.0,
                got: self.numeric_tolerance_bps as f64,
            });
        }
        if self.disagreement_penalty > ConfidenceScore::MAX {
            return Err(ContractViolation::InvalidRange {
                field: "arbitration_config.disagreement_penalty",
                min: 0.0,
                max: ConfidenceScore::MAX as f64,
                got: self.disagreement_penalty as f64,
            });
        }
        if !self.primary_source.is_remote() {
            return Err(ContractViolation::InvalidValue {
                field: "arbitration_config.primary_source",
                reason: "must be a remote source",
            });
        }
        Ok(())
    }
}

/// Everything the engine needs for one decision. The caller supplies the
/// timestamp so the engine never reads a clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbitrationRequest {
    pub schema: PayloadSchema,
    pub input_digest: String,
    /// Successful candidates only, zero to two of them.
    pub candidates: Vec<CandidateResult>,
    /// Text the local heuristic may use when no candidate survived.
    pub fallback_text: Option<String>,
    pub requested_at: TimestampMs,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArbitrationError {
    #[error("no usable result for {schema:?} input")]
    NoUsableResult { schema: PayloadSchema },
    #[error("invalid arbitration request: {0}")]
    InvalidRequest(#[from] ContractViolation),
}

#[derive(Debug, Clone)]
pub struct ArbitrationEngine {
    config: ArbitrationConfig,
}

impl ArbitrationEngine {
    pub fn new(config: ArbitrationConfig) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ArbitrationConfig {
        &self.config
    }

    pub fn arbitrate(&self, req: &ArbitrationRequest) -> Result<ArbitratedRecord, ArbitrationError> {
        let mut candidates = req.candidates.clone();
        check_candidates(req.schema, &candidates)?;
        candidates.sort_by_key(CandidateResult::source_id);

        match candidates.len() {
            0 => self.fallback(req),
            1 => {
                let only = &candidates[0];
                Ok(ArbitratedRecord::v1(
                    req.input_digest.clone(),
                    only.payload().clone(),
                    DecisionBasis::SingleSourceOnly,
                    only.confidence(),
                    candidates.clone(),
                )?)
            }
            _ => {
                let (winner, loser) = self.rank(&candidates[0], &candidates[1]);
                if payloads_agree(winner.payload(), loser.payload(), self.config.numeric_tolerance_bps)
                {
                    let confidence = winner.confidence().max(loser.confidence());
                    let payload = winner.payload().clone();
                    return Ok(ArbitratedRecord::v1(
                        req.input_digest.clone(),
                        payload,
                        DecisionBasis::Agreement,
                        confidence,
                        candidates,
                    )?);
                }
                let payload = merge_payloads(winner.payload(), loser.payload());
                let avg = (i64::from(winner.confidence().value())
                    + i64::from(loser.confidence().value()))
                    / 2;
                let confidence =
                    ConfidenceScore::saturating(avg - i64::from(self.config.disagreement_penalty));
                Ok(ArbitratedRecord::v1(
                    req.input_digest.clone(),
                    payload,
                    DecisionBasis::Merged,
                    confidence,
                    candidates,
                )?)
            }
        }
    }

    /// Higher confidence first; the primary source wins ties.
    fn rank<'a>(
        &self,
        a: &'a CandidateResult,
        b: &'a CandidateResult,
    ) -> (&'a CandidateResult, &'a CandidateResult) {
        match a.confidence().cmp(&b.confidence()) {
            std::cmp::Ordering::Greater => (a, b),
            std::cmp::Ordering::Less => (b, a),
            std::cmp::Ordering::Equal => {
                if b.source_id() == self.config.primary_source {
                    (b, a)
                } else {
                    (a, b)
                }
            }
        }
    }

    fn fallback(&self, req: &ArbitrationRequest) -> Result<ArbitratedRecord, ArbitrationError> {
        let no_result = ArbitrationError::NoUsableResult { schema: req.schema };
        let Some(text) = req.fallback_text.as_deref() else {
            return Err(no_result);
        };
        let Some(payload) = fallback_payload(req.schema, text) else {
            return Err(no_result);
        };
        let candidate = CandidateResult::v1(
            SourceId::LocalFallback,
            payload.clone(),
            self.config.fallback_confidence,
            req.requested_at,
        )?;
        Ok(ArbitratedRecord::v1(
            req.input_digest.clone(),
            payload,
            DecisionBasis::FallbackBasic,
            self.config.fallback_confidence,
            vec![candidate],
        )?)
    }
}

fn check_candidates(schema: PayloadSchema, candidates: &[CandidateResult]) -> Result<(), ContractViolation> {
    if candidates.len() > 2 {
        return Err(ContractViolation::InvalidValue {
            field: "arbitration_request.candidates",
            reason: "at most two candidates",
        });
    }
    for c in candidates {
        if !c.source_id().is_remote() {
            return Err(ContractViolation::InvalidValue {
                field: "arbitration_request.candidates",
                reason: "candidates must come from remote sources",
            });
        }
        if c.schema() != schema {
            return Err(ContractViolation::InvalidValue {
                field: "arbitration_request.candidates",
                reason: "candidate schema must match request schema",
            });
        }
    }
    if candidates.len() == 2 && candidates[0].source_id() == candidates[1].source_id() {
        return Err(ContractViolation::InvalidValue {
            field: "arbitration_request.candidates",
            reason: "candidates must come from distinct sources",
        });
    }
    Ok(())
}

/// `|a - b| <= bps/10000 * max(|a|, |b|)`.
pub fn numbers_agree(a: Decimal, b: Decimal, tolerance_bps: u32) -> bool {
    let scale = a.abs().max(b.abs());
    (a - b).abs() * Decimal::from(10_000u32) <= scale * Decimal::from(tolerance_bps)
}

fn optional_numbers_agree(a: Option<Decimal>, b: Option<Decimal>, bps: u32) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => numbers_agree(a, b, bps),
        _ => false,
    }
}

fn categorical_agree(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => normalize_categorical(a) == normalize_categorical(b),
        _ => false,
    }
}

pub fn payloads_agree(a: &ExtractionPayload, b: &ExtractionPayload, bps: u32) -> bool {
    match (a, b) {
        (ExtractionPayload::Receipt(a), ExtractionPayload::Receipt(b)) => receipts_agree(a, b, bps),
        (ExtractionPayload::SimulationQuery(a), ExtractionPayload::SimulationQuery(b)) => {
            queries_agree(a, b, bps)
        }
        _ => false,
    }
}

fn receipts_agree(a: &ReceiptPayload, b: &ReceiptPayload, bps: u32) -> bool {
    categorical_agree(a.vendor.as_deref(), b.vendor.as_deref())
        && categorical_agree(a.date.as_deref(), b.date.as_deref())
        && categorical_agree(a.currency.as_deref(), b.currency.as_deref())
        && optional_numbers_agree(a.total, b.total, bps)
        && a.items.len() == b.items.len()
        && a.items.iter().zip(&b.items).all(|(x, y)| items_agree(x, y, bps))
}

fn items_agree(a: &LineItem, b: &LineItem, bps: u32) -> bool {
    normalize_categorical(&a.name) == normalize_categorical(&b.name)
        && optional_numbers_agree(a.line_total, b.line_total, bps)
}

fn queries_agree(a: &SimulationQueryPayload, b: &SimulationQueryPayload, bps: u32) -> bool {
    a.scenario == b.scenario
        && normalize_categorical(&a.item) == normalize_categorical(&b.item)
        && numbers_agree(a.change_percent, b.change_percent, bps)
        && optional_numbers_agree(
            a.shop_count.map(Decimal::from),
            b.shop_count.map(Decimal::from),
            bps,
        )
}

/// Field-wise merge: winner's values, holes filled from the loser.
fn merge_payloads(winner: &ExtractionPayload, loser: &ExtractionPayload) -> ExtractionPayload {
    match (winner, loser) {
        (ExtractionPayload::Receipt(w), ExtractionPayload::Receipt(l)) => {
            ExtractionPayload::Receipt(ReceiptPayload {
                vendor: w.vendor.clone().or_else(|| l.vendor.clone()),
                date: w.date.clone().or_else(|| l.date.clone()),
                currency: w.currency.clone().or_else(|| l.currency.clone()),
                items: if w.items.is_empty() {
                    l.items.clone()
                } else {
                    w.items.clone()
                },
                total: w.total.or(l.total),
            })
        }
        (ExtractionPayload::SimulationQuery(w), ExtractionPayload::SimulationQuery(l)) => {
            let item = if normalize_categorical(&w.item) == "unknown" {
                l.item.clone()
            } else {
                w.item.clone()
            };
            ExtractionPayload::SimulationQuery(SimulationQueryPayload {
                scenario: w.scenario,
                item,
                change_percent: w.change_percent,
                shop_count: w.shop_count.or(l.shop_count),
            })
        }
        _ => winner.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_kernel_contracts::simquery::SimulationScenario;
    use proptest::prelude::*;

    const DIGEST: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    fn receipt_candidate(source: SourceId, total: Decimal, confidence: u8) -> CandidateResult {
        CandidateResult::v1(
            source,
            ExtractionPayload::Receipt(ReceiptPayload::with_total(total)),
            ConfidenceScore::new(confidence).unwrap(),
            TimestampMs(1_700_000_000_000),
        )
        .unwrap()
    }

    fn request(candidates: Vec<CandidateResult>, fallback_text: Option<&str>) -> ArbitrationRequest {
        ArbitrationRequest {
            schema: PayloadSchema::Receipt,
            input_digest: DIGEST.to_string(),
            candidates,
            fallback_text: fallback_text.map(str::to_string),
            requested_at: TimestampMs(1_700_000_000_500),
        }
    }

    fn engine() -> ArbitrationEngine {
        ArbitrationEngine::new(ArbitrationConfig::mvp_v1()).unwrap()
    }

    #[test]
    fn at_arb_01_agreeing_totals_take_max_confidence() {
        let rec = engine()
            .arbitrate(&request(
                vec![
                    receipt_candidate(SourceId::SourceA, Decimal::new(10500, 2), 90),
                    receipt_candidate(SourceId::SourceB, Decimal::new(10500, 2), 85),
                ],
                None,
            ))
            .unwrap();
        assert_eq!(rec.decision_basis(), DecisionBasis::Agreement);
        assert_eq!(rec.confidence().value(), 90);
        assert_eq!(rec.contributing_candidates().len(), 2);
    }

    #[test]
    fn at_arb_02_disagreeing_totals_merge_to_higher_confidence() {
        let rec = engine()
            .arbitrate(&request(
                vec![
                    receipt_candidate(SourceId::SourceA, Decimal::new(10000, 2), 70),
                    receipt_candidate(SourceId::SourceB, Decimal::new(12000, 2), 90),
                ],
                None,
            ))
            .unwrap();
        assert_eq!(rec.decision_basis(), DecisionBasis::Merged);
        assert_eq!(
            rec.final_payload().as_receipt().unwrap().total,
            Some(Decimal::new(12000, 2))
        );
        assert_eq!(rec.confidence().value(), 70);
    }

    #[test]
    fn at_arb_03_single_source_keeps_its_confidence() {
        let rec = engine()
            .arbitrate(&request(
                vec![receipt_candidate(SourceId::SourceB, Decimal::new(5000, 2), 64)],
                None,
            ))
            .unwrap();
        assert_eq!(rec.decision_basis(), DecisionBasis::SingleSourceOnly);
        assert_eq!(rec.confidence().value(), 64);
        assert_eq!(rec.contributing_candidates()[0].source_id(), SourceId::SourceB);
    }

    #[test]
    fn at_arb_04_both_failed_uses_fallback_or_fails() {
        let rec = engine()
            .arbitrate(&request(Vec::new(), Some("Kirana Mart\nTotal Rs. 250")))
            .unwrap();
        assert_eq!(rec.decision_basis(), DecisionBasis::FallbackBasic);
        assert_eq!(rec.confidence().value(), FALLBACK_CONFIDENCE_DEFAULT);
        assert_eq!(
            rec.contributing_candidates()[0].source_id(),
            SourceId::LocalFallback
        );

        let err = engine()
            .arbitrate(&request(Vec::new(), Some("blurry photo")))
            .unwrap_err();
        assert_eq!(
            err,
            ArbitrationError::NoUsableResult {
                schema: PayloadSchema::Receipt
            }
        );
        assert!(engine().arbitrate(&request(Vec::new(), None)).is_err());
    }

    #[test]
    fn at_arb_05_tolerance_is_relative() {
        assert!(numbers_agree(Decimal::from(100), Decimal::new(1009, 1), 100));
        assert!(!numbers_agree(Decimal::from(100), Decimal::new(1011, 1), 100));
        assert!(numbers_agree(Decimal::ZERO, Decimal::ZERO, 0));
    }

    #[test]
    fn at_arb_06_tie_prefers_primary_and_fills_holes() {
        let a = CandidateResult::v1(
            SourceId::SourceA,
            ExtractionPayload::Receipt(ReceiptPayload {
                vendor: None,
                currency: Some("INR".to_string()),
                ..ReceiptPayload::with_total(Decimal::from(300))
            }),
            ConfidenceScore::new(80).unwrap(),
            TimestampMs(1),
        )
        .unwrap();
        let b = CandidateResult::v1(
            SourceId::SourceB,
            ExtractionPayload::Receipt(ReceiptPayload {
                vendor: Some("Gupta Stores".to_string()),
                ..ReceiptPayload::with_total(Decimal::from(350))
            }),
            ConfidenceScore::new(80).unwrap(),
            TimestampMs(2),
        )
        .unwrap();
        let mut cfg = ArbitrationConfig::mvp_v1();
        cfg.primary_source = SourceId::SourceB;
        let rec = ArbitrationEngine::new(cfg)
            .unwrap()
            .arbitrate(&request(vec![a, b], None))
            .unwrap();
        let merged = rec.final_payload().as_receipt().unwrap();
        assert_eq!(merged.total, Some(Decimal::from(350)));
        assert_eq!(merged.vendor.as_deref(), Some("Gupta Stores"));
        assert_eq!(merged.currency.as_deref(), Some("INR"));
        assert_eq!(rec.confidence().value(), 70);
        assert_eq!(
            rec.contributing_candidates()
                .iter()
                .map(CandidateResult::source_id)
                .collect::<Vec<_>>(),
            vec![SourceId::SourceA, SourceId::SourceB]
        );
    }

    #[test]
    fn at_arb_07_queries_compare_item_case_insensitively() {
        let q = |item: &str, source| {
            CandidateResult::v1(
                source,
                ExtractionPayload::SimulationQuery(
                    SimulationQueryPayload::v1(
                        SimulationScenario::IncreasePrice,
                        item,
                        Decimal::from(5),
                        None,
                    )
                    .unwrap(),
                ),
                ConfidenceScore::new(75).unwrap(),
                TimestampMs(1),
            )
            .unwrap()
        };
        let mut req = request(vec![q("Rice", SourceId::SourceB), q(" rice ", SourceId::SourceA)], None);
        req.schema = PayloadSchema::SimulationQuery;
        let rec = engine().arbitrate(&req).unwrap();
        assert_eq!(rec.decision_basis(), DecisionBasis::Agreement);
        assert_eq!(rec.contributing_candidates()[0].source_id(), SourceId::SourceA);
    }

    #[test]
    fn at_arb_08_rejects_invalid_requests() {
        let dup = request(
            vec![
                receipt_candidate(SourceId::SourceA, Decimal::ONE, 50),
                receipt_candidate(SourceId::SourceA, Decimal::ONE, 50),
            ],
            None,
        );
        assert!(matches!(
            engine().arbitrate(&dup),
            Err(ArbitrationError::InvalidRequest(_))
        ));
        let mut cfg = ArbitrationConfig::mvp_v1();
        cfg.primary_source = SourceId::LocalFallback;
        assert!(ArbitrationEngine::new(cfg).is_err());
    }

    proptest! {
        #[test]
        fn at_arb_prop_01_pure_and_bounded(
            total_a in 0i64..1_000_000,
            total_b in 0i64..1_000_000,
            conf_a in 0u8..=100,
            conf_b in 0u8..=100,
        ) {
            let req = request(
                vec![
                    receipt_candidate(SourceId::SourceA, Decimal::new(total_a, 2), conf_a),
                    receipt_candidate(SourceId::SourceB, Decimal::new(total_b, 2), conf_b),
                ],
                None,
            );
            let first = engine().arbitrate(&req).unwrap();
            let second = engine().arbitrate(&req).unwrap();
            prop_assert_eq!(&first, &second);

            let c = first.confidence().value();
            prop_assert!(c <= 100);
            match first.decision_basis() {
                DecisionBasis::Agreement => prop_assert_eq!(c, conf_a.max(conf_b)),
                DecisionBasis::Merged => {
                    prop_assert!(u16::from(c) * 2 <= u16::from(conf_a) + u16::from(conf_b))
                }
                other => prop_assert!(false, "unexpected basis {:?}", other),
            }
        }
    }
}
