use crate::estimation::normalize_weights;
use crate::options::IrlsInitialization;
use nalgebra::Vector2;
use rand::rngs::StdRng;
use rand::Rng;

/// Weight multiplier of the vectors that disagree with the dominant flow
pub const DISAGREEMENT_PENALTY: f32 = 0.1;

/// Finds the dominant flow and down-weights the vectors that disagree with it.
///
/// Every round samples one vector as the hypothesis and scores it by the prior weight of the
/// vectors whose flow lies within `cutoff` of it. The priors stay normalized. Returns the number
/// of vectors that agree with the best hypothesis.
///
pub fn initialize_weights(
    flows: &[Vector2<f32>],
    priors: &mut [f32],
    opts: &IrlsInitialization,
    rng: &mut StdRng,
) -> usize {
    if flows.is_empty() || !opts.activated || opts.rounds == 0 {
        return flows.len();
    }

    let agreement = |hypothesis: &Vector2<f32>| {
        flows
            .iter()
            .zip(priors.iter())
            .filter(|(f, _)| (*f - hypothesis).norm() <= opts.cutoff)
            .map(|(_, w)| *w)
            .sum::<f32>()
    };

    let mut best = None;
    let mut best_score = f32::MIN;
    for _ in 0..opts.rounds {
        let candidate = rng.gen_range(0..flows.len());
        let score = agreement(&flows[candidate]);
        if score > best_score {
            best_score = score;
            best = Some(candidate);
        }
    }

    let hypothesis = match best {
        Some(i) => flows[i],
        None => return flows.len(),
    };

    let mut agreeing = 0;
    for (f, w) in flows.iter().zip(priors.iter_mut()) {
        if (f - hypothesis).norm() <= opts.cutoff {
            agreeing += 1;
        } else {
            *w *= DISAGREEMENT_PENALTY;
        }
    }
    normalize_weights(priors);
    agreeing
}
