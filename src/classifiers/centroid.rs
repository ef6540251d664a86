use crate::classifier::{FeatureVector, SignalClassifier, SignalModel};
use crate::error::EngineError;
use crate::models::{Bar, SignalAction};

const FEATURE_COUNT: usize = 4;
const CLASS_ORDER: [SignalAction; 3] = [SignalAction::Sell, SignalAction::Hold, SignalAction::Buy];

/// Nearest-centroid signal model: one standardized feature centroid per
/// signal class, prediction by minimum Euclidean distance. Stands in for the
/// externally trained gradient-boosted classifier at the same interface.
pub struct NearestCentroidClassifier;

impl NearestCentroidClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NearestCentroidClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalClassifier for NearestCentroidClassifier {
    fn name(&self) -> &'static str {
        "nearest_centroid"
    }

    fn train(&self, training_bars: &[Bar]) -> Result<Box<dyn SignalModel>, EngineError> {
        let samples: Vec<([f64; FEATURE_COUNT], SignalAction)> = training_bars
            .iter()
            .filter_map(|bar| {
                let features = FeatureVector::from_bar(bar)?;
                let label = bar.signal?;
                Some((features.as_array(), label))
            })
            .collect();

        if samples.is_empty() {
            return Err(EngineError::ModelTrainingFailure {
                ticker: training_bars
                    .first()
                    .map(|bar| bar.ticker.clone())
                    .unwrap_or_default(),
                reason: "no rows with complete features and labels".to_string(),
            });
        }

        // Standardize per feature so the price-scaled columns do not drown
        // out the oscillators.
        let mut means = [0.0f64; FEATURE_COUNT];
        for (features, _) in &samples {
            for (i, value) in features.iter().enumerate() {
                means[i] += value;
            }
        }
        for mean in &mut means {
            *mean /= samples.len() as f64;
        }

        let mut stds = [0.0f64; FEATURE_COUNT];
        for (features, _) in &samples {
            for (i, value) in features.iter().enumerate() {
                stds[i] += (value - means[i]).powi(2);
            }
        }
        for std in &mut stds {
            *std = (*std / samples.len() as f64).sqrt();
            if *std <= f64::EPSILON {
                *std = 1.0;
            }
        }

        let mut centroids: Vec<(SignalAction, [f64; FEATURE_COUNT], usize)> = Vec::new();
        for (features, label) in &samples {
            let standardized = standardize(features, &means, &stds);
            match centroids.iter_mut().find(|(class, _, _)| class == label) {
                Some((_, sum, count)) => {
                    for (i, value) in standardized.iter().enumerate() {
                        sum[i] += value;
                    }
                    *count += 1;
                }
                None => centroids.push((*label, standardized, 1)),
            }
        }

        if centroids.len() < 2 {
            return Err(EngineError::ModelTrainingFailure {
                ticker: training_bars
                    .first()
                    .map(|bar| bar.ticker.clone())
                    .unwrap_or_default(),
                reason: format!("{} usable class(es), 2 required", centroids.len()),
            });
        }

        let centroids = centroids
            .into_iter()
            .map(|(class, sum, count)| {
                let mut centroid = sum;
                for value in &mut centroid {
                    *value /= count as f64;
                }
                (class, centroid)
            })
            .collect();

        Ok(Box::new(CentroidModel {
            means,
            stds,
            centroids,
        }))
    }
}

fn standardize(
    features: &[f64; FEATURE_COUNT],
    means: &[f64; FEATURE_COUNT],
    stds: &[f64; FEATURE_COUNT],
) -> [f64; FEATURE_COUNT] {
    let mut out = [0.0f64; FEATURE_COUNT];
    for i in 0..FEATURE_COUNT {
        out[i] = (features[i] - means[i]) / stds[i];
    }
    out
}

struct CentroidModel {
    means: [f64; FEATURE_COUNT],
    stds: [f64; FEATURE_COUNT],
    centroids: Vec<(SignalAction, [f64; FEATURE_COUNT])>,
}

impl SignalModel for CentroidModel {
    fn predict(&self, features: &FeatureVector) -> SignalAction {
        let standardized = standardize(&features.as_array(), &self.means, &self.stds);

        let mut best = SignalAction::Hold;
        let mut best_distance = f64::INFINITY;
        // Fixed class order keeps ties deterministic.
        for class in CLASS_ORDER {
            let Some((_, centroid)) = self.centroids.iter().find(|(c, _)| *c == class) else {
                continue;
            };
            let distance: f64 = standardized
                .iter()
                .zip(centroid.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();
            if distance < best_distance {
                best_distance = distance;
                best = class;
            }
        }

        best
    }
}
