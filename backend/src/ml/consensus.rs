//! Majority-vote aggregation across the registered models.

use std::sync::Arc;

use ckd_shared::{ConsensusSummary, IndividualPrediction, Label};

use super::classifier::{ClassifierError, Prediction};
use super::registry::LoadedModel;
use crate::features::FeatureVector;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsensusError {
    #[error("Ensemble requires at least one model")]
    InvalidState,
    #[error("Model '{model}' failed: {source}")]
    Classifier {
        model: String,
        #[source]
        source: ClassifierError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelVote {
    pub model: String,
    pub prediction: Prediction,
}

impl ModelVote {
    pub fn to_individual(&self) -> IndividualPrediction {
        IndividualPrediction {
            model: self.model.clone(),
            prediction: self.prediction.label,
            confidence: self.prediction.confidence,
            probability: self.prediction.probability,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consensus {
    pub label: Label,
    pub agreement_count: usize,
    pub total: usize,
    pub average_confidence: f64,
}

impl Consensus {
    /// Share of models voting for the majority label, in `(0, 1]`.
    pub fn agreement(&self) -> f64 {
        self.agreement_count as f64 / self.total as f64
    }

    pub fn unanimous(&self) -> bool {
        self.agreement_count == self.total
    }

    pub fn agreement_text(&self) -> String {
        format!("{}/{} models", self.agreement_count, self.total)
    }

    pub fn summary(&self) -> ConsensusSummary {
        ConsensusSummary {
            prediction: self.label,
            agreement: self.agreement_text(),
            agreement_count: self.agreement_count,
            total_models: self.total,
            consensus_confidence: self.agreement(),
            average_model_confidence: self.average_confidence,
            unanimous: self.unanimous(),
        }
    }
}

/// Majority label by raw vote count. On a tie the label that was voted first
/// wins.
pub fn consensus(votes: &[ModelVote]) -> Result<Consensus, ConsensusError> {
    if votes.is_empty() {
        return Err(ConsensusError::InvalidState);
    }

    let mut tally: Vec<(Label, usize)> = Vec::with_capacity(2);
    for vote in votes {
        match tally.iter_mut().find(|(label, _)| *label == vote.prediction.label) {
            Some((_, count)) => *count += 1,
            None => tally.push((vote.prediction.label, 1)),
        }
    }

    let mut winner = tally[0];
    for &(label, count) in &tally[1..] {
        if count > winner.1 {
            winner = (label, count);
        }
    }

    let total = votes.len();
    let average_confidence = votes.iter().map(|v| v.prediction.confidence).sum::<f64>() / total as f64;
    Ok(Consensus {
        label: winner.0,
        agreement_count: winner.1,
        total,
        average_confidence,
    })
}

#[derive(Debug, Clone)]
pub struct Ensemble {
    pub votes: Vec<ModelVote>,
    pub consensus: Consensus,
}

/// Classifies with every model in order. Any failing model aborts the call.
pub fn run_ensemble(models: &[Arc<LoadedModel>], features: &FeatureVector) -> Result<Ensemble, ConsensusError> {
    if models.is_empty() {
        return Err(ConsensusError::InvalidState);
    }
    let votes = models
        .iter()
        .map(|m| {
            m.classifier
                .classify(features)
                .map(|prediction| ModelVote {
                    model: m.name.clone(),
                    prediction,
                })
                .map_err(|source| ConsensusError::Classifier {
                    model: m.name.clone(),
                    source,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let consensus = consensus(&votes)?;
    Ok(Ensemble { votes, consensus })
}
