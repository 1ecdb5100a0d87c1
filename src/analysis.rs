/// Candidate selection and prior weights
pub mod weights;

/// Inlier/outlier classification and the statistics derived from it
pub mod inliers;

/// Occupancy grid laid over the box
pub mod density;

/// Confidence-blended spatial prior of the object within the box
pub mod spatial_prior;

/// Multiplier of a previous inlier when the box moves fast
pub const INLIER_BOOST: f32 = 20.0;

/// Divisor of a previous outlier
pub const OUTLIER_DISCOUNT: f32 = 20.0;

/// Cap of all history multipliers
pub const MAX_MULTIPLIER: f32 = 100.0;

/// Continuation length beyond which inliers are not boosted any further
pub const MAX_BOOSTED_LENGTH: u32 = 4;
