use crate::error::EngineError;
use crate::models::{Bar, SignalAction};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Per-day feature vector consumed by signal models. Built only when every
/// indicator column is present and finite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub rsi: f64,
    pub ema_10: f64,
    pub ema_20: f64,
    pub macd: f64,
}

impl FeatureVector {
    pub fn from_bar(bar: &Bar) -> Option<Self> {
        let rsi = bar.rsi.filter(|v| v.is_finite())?;
        let ema_10 = bar.ema_10.filter(|v| v.is_finite())?;
        let ema_20 = bar.ema_20.filter(|v| v.is_finite())?;
        let macd = bar.macd.filter(|v| v.is_finite())?;
        Some(Self {
            rsi,
            ema_10,
            ema_20,
            macd,
        })
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.rsi, self.ema_10, self.ema_20, self.macd]
    }
}

/// A trained model ready to label feature vectors.
pub trait SignalModel: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> SignalAction;
}

/// The classifier collaborator. Trained once per instrument on the leading
/// partition and consumed read-only afterwards.
pub trait SignalClassifier: Send + Sync {
    fn name(&self) -> &'static str;
    fn train(&self, training_bars: &[Bar]) -> Result<Box<dyn SignalModel>, EngineError>;
}

#[path = "classifiers/centroid.rs"]
pub mod centroid;

pub use centroid::NearestCentroidClassifier;

#[path = "classifiers/majority.rs"]
pub mod majority;

pub use majority::MajorityClassClassifier;

/// Distinguishes "the model produced a label" from "the model could not run
/// on this bar" so HOLD never masks a missing prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Signal(SignalAction),
    NoSignal,
}

impl SignalOutcome {
    pub fn action(self) -> Option<SignalAction> {
        match self {
            SignalOutcome::Signal(action) => Some(action),
            SignalOutcome::NoSignal => None,
        }
    }
}

/// Per-instrument classifier output over the test partition, fully
/// materialized before the replay loop consumes it.
#[derive(Debug, Clone)]
pub struct SignalForecast {
    pub ticker: String,
    pub classifier: &'static str,
    pub test_len: usize,
    pub predictions: Vec<(DateTime<Utc>, Option<SignalAction>)>,
}

/// Ordered fallback chain over classifier candidates: the first one that
/// trains wins. Training data with fewer than two signal classes is
/// untrainable for every candidate and fails the chain up front.
pub struct ClassifierChain {
    classifiers: Vec<Box<dyn SignalClassifier>>,
}

impl ClassifierChain {
    pub fn new(classifiers: Vec<Box<dyn SignalClassifier>>) -> Self {
        Self { classifiers }
    }

    /// Default chain: nearest-centroid model, then the majority-class
    /// fallback for degenerate feature data.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(NearestCentroidClassifier::new()),
            Box::new(MajorityClassClassifier::new()),
        ])
    }

    pub fn train(
        &self,
        ticker: &str,
        training_bars: &[Bar],
    ) -> Result<TrainedClassifier, EngineError> {
        let classes: HashSet<SignalAction> = training_bars
            .iter()
            .filter(|bar| FeatureVector::from_bar(bar).is_some())
            .filter_map(|bar| bar.signal)
            .collect();
        if classes.len() < 2 {
            return Err(EngineError::ModelTrainingFailure {
                ticker: ticker.to_string(),
                reason: format!(
                    "{} signal class(es) in training data, 2 required",
                    classes.len()
                ),
            });
        }

        let mut failures = Vec::new();
        for classifier in &self.classifiers {
            match classifier.train(training_bars) {
                Ok(model) => {
                    return Ok(TrainedClassifier {
                        name: classifier.name(),
                        model,
                    })
                }
                Err(error) => failures.push(format!("{}: {}", classifier.name(), error)),
            }
        }

        Err(EngineError::ModelTrainingFailure {
            ticker: ticker.to_string(),
            reason: failures.join("; "),
        })
    }
}

/// A chain candidate that trained, tagged with which candidate it was.
pub struct TrainedClassifier {
    pub name: &'static str,
    model: Box<dyn SignalModel>,
}

impl std::fmt::Debug for TrainedClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainedClassifier")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl TrainedClassifier {
    pub fn predict_bar(&self, bar: &Bar) -> SignalOutcome {
        match FeatureVector::from_bar(bar) {
            Some(features) => SignalOutcome::Signal(self.model.predict(&features)),
            None => SignalOutcome::NoSignal,
        }
    }

    pub fn forecast(&self, ticker: &str, test_bars: &[Bar]) -> SignalForecast {
        let predictions = test_bars
            .iter()
            .map(|bar| (bar.date, self.predict_bar(bar).action()))
            .collect();

        SignalForecast {
            ticker: ticker.to_string(),
            classifier: self.name,
            test_len: test_bars.len(),
            predictions,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::labeled_bars;
    use super::*;

    #[test]
    fn feature_vector_requires_every_column() {
        let mut bars = labeled_bars(1);
        assert!(FeatureVector::from_bar(&bars[0]).is_some());
        bars[0].macd = None;
        assert!(FeatureVector::from_bar(&bars[0]).is_none());
        bars[0].macd = Some(f64::NAN);
        assert!(FeatureVector::from_bar(&bars[0]).is_none());
    }

    #[test]
    fn chain_rejects_single_class_training_data() {
        let mut bars = labeled_bars(30);
        for bar in &mut bars {
            bar.signal = Some(SignalAction::Hold);
        }

        let error = ClassifierChain::standard().train("TEST", &bars).unwrap_err();
        assert!(matches!(error, EngineError::ModelTrainingFailure { .. }));
    }

    #[test]
    fn chain_trains_first_viable_candidate() {
        let bars = labeled_bars(30);
        let trained = ClassifierChain::standard().train("TEST", &bars).unwrap();
        assert_eq!(trained.name, "nearest_centroid");
    }

    #[test]
    fn prediction_distinguishes_no_signal_from_hold() {
        let bars = labeled_bars(30);
        let trained = ClassifierChain::standard().train("TEST", &bars).unwrap();

        let mut unlabeled = bars[0].clone();
        unlabeled.rsi = None;
        assert_eq!(trained.predict_bar(&unlabeled), SignalOutcome::NoSignal);
        assert!(matches!(
            trained.predict_bar(&bars[0]),
            SignalOutcome::Signal(_)
        ));
    }

    #[test]
    fn forecast_covers_every_test_bar() {
        let bars = labeled_bars(40);
        let trained = ClassifierChain::standard().train("TEST", &bars[..32]).unwrap();
        let forecast = trained.forecast("TEST", &bars[32..]);
        assert_eq!(forecast.test_len, 8);
        assert_eq!(forecast.predictions.len(), 8);
        assert!(forecast.predictions.iter().all(|(_, p)| p.is_some()));
    }
}
