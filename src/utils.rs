/// Homographies, similarities and point-set fits
pub mod transform;

/// Explicit 4-vertex regions: convexity, half-plane tests, polygon conversion
pub mod quad;
