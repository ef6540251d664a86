use crate::classifier::{FeatureVector, SignalClassifier, SignalModel};
use crate::error::EngineError;
use crate::models::{Bar, SignalAction};

/// Fallback candidate: always predicts the most frequent training label.
/// Exists so the chain can still produce a signal stream when feature data is
/// too degenerate for the distance model.
pub struct MajorityClassClassifier;

impl MajorityClassClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MajorityClassClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalClassifier for MajorityClassClassifier {
    fn name(&self) -> &'static str {
        "majority_class"
    }

    fn train(&self, training_bars: &[Bar]) -> Result<Box<dyn SignalModel>, EngineError> {
        let mut buy = 0usize;
        let mut hold = 0usize;
        let mut sell = 0usize;
        for bar in training_bars {
            match bar.signal {
                Some(SignalAction::Buy) => buy += 1,
                Some(SignalAction::Hold) => hold += 1,
                Some(SignalAction::Sell) => sell += 1,
                None => {}
            }
        }

        if buy + hold + sell == 0 {
            return Err(EngineError::ModelTrainingFailure {
                ticker: training_bars
                    .first()
                    .map(|bar| bar.ticker.clone())
                    .unwrap_or_default(),
                reason: "no labeled rows".to_string(),
            });
        }

        // Ties resolve toward the least aggressive action.
        let majority = if hold >= buy && hold >= sell {
            SignalAction::Hold
        } else if sell >= buy {
            SignalAction::Sell
        } else {
            SignalAction::Buy
        };

        Ok(Box::new(MajorityModel { majority }))
    }
}

struct MajorityModel {
    majority: SignalAction,
}

impl SignalModel for MajorityModel {
    fn predict(&self, _features: &FeatureVector) -> SignalAction {
        self.majority
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::test_fixtures::labeled_bars;

    #[test]
    fn predicts_most_frequent_label() {
        let mut bars = labeled_bars(10);
        for bar in &mut bars[..7] {
            bar.signal = Some(SignalAction::Sell);
        }

        let model = MajorityClassClassifier::new().train(&bars).unwrap();
        let features = FeatureVector::from_bar(&bars[0]).unwrap();
        assert_eq!(model.predict(&features), SignalAction::Sell);
    }

    #[test]
    fn unlabeled_training_data_fails() {
        let mut bars = labeled_bars(10);
        for bar in &mut bars {
            bar.signal = None;
        }
        assert!(MajorityClassClassifier::new().train(&bars).is_err());
    }
}
