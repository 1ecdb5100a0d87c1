use crate::estimation::homography::estimate_homography;
use crate::estimation::{check_correspondences, IrlsFit, IrlsScale};
use crate::options::CameraIntrinsics;
use crate::utils::quad::Quad;
use crate::utils::transform::{homography_from_4_points, project, Homography};
use crate::{Errors, EPS};
use anyhow::Result;
use log::trace;
use nalgebra::{Matrix3, Vector2, Vector3};

const UNDISTORT_ITERATIONS: usize = 20;

/// Pose of the tracked plane after the step
///
#[derive(Debug, Clone, PartialEq)]
pub struct PnpPose {
    /// New corners of the object in image coordinates
    pub quad: Quad,
    /// Old quad to new quad, image coordinates
    pub frame_homography: Homography,
    /// Model plane (`aspect_ratio` by `1` rectangle) to image, without lens distortion
    pub pose_homography: Homography,
    pub rotation: Matrix3<f32>,
    pub translation: Vector3<f32>,
}

/// Image point to the ideal (undistorted) camera plane.
///
/// The radial model `xd = xu * (1 + k0 r^2 + k1 r^4 + k2 r^6)` is inverted by fixed-point
/// iteration.
///
pub fn undistort(k: &CameraIntrinsics, p: &Vector2<f32>) -> Vector2<f64> {
    let xd = Vector2::new(
        (p.x - k.cx) as f64 / k.fx as f64,
        (p.y - k.cy) as f64 / k.fy as f64,
    );
    if !k.has_distortion() {
        return xd;
    }
    let mut xu = xd;
    for _ in 0..UNDISTORT_ITERATIONS {
        let factor = radial_factor(k, xu.norm_squared());
        if factor.abs() < f64::EPSILON {
            break;
        }
        xu = xd / factor;
    }
    xu
}

/// Ideal camera plane point back to the image
///
pub fn distort(k: &CameraIntrinsics, p: &Vector2<f64>) -> Vector2<f32> {
    let xd = p * radial_factor(k, p.norm_squared());
    Vector2::new(
        (xd.x * k.fx as f64 + k.cx as f64) as f32,
        (xd.y * k.fy as f64 + k.cy as f64) as f32,
    )
}

fn radial_factor(k: &CameraIntrinsics, r2: f64) -> f64 {
    let (k0, k1, k2) = (k.k0 as f64, k.k1 as f64, k.k2 as f64);
    1.0 + r2 * (k0 + r2 * (k1 + r2 * k2))
}

fn model_rectangle(aspect_ratio: f64) -> [Vector2<f64>; 4] {
    [
        Vector2::new(0.0, 0.0),
        Vector2::new(aspect_ratio, 0.0),
        Vector2::new(aspect_ratio, 1.0),
        Vector2::new(0.0, 1.0),
    ]
}

/// Rotation and translation of the model plane from the plane-to-camera homography `K^-1 H`.
///
fn decompose(h: &Matrix3<f64>) -> Result<(Matrix3<f64>, Vector3<f64>)> {
    let m1 = h.column(0).into_owned();
    let m2 = h.column(1).into_owned();
    let m3 = h.column(2).into_owned();
    let norm = m1.norm() + m2.norm();
    if norm < EPS as f64 {
        return Err(Errors::DegeneratePose.into());
    }
    let mut lambda = 2.0 / norm;
    if m3.z * lambda < 0.0 {
        lambda = -lambda;
    }
    let r1 = m1 * lambda;
    let r2 = m2 * lambda;
    let r3 = r1.cross(&r2);
    let t = m3 * lambda;

    let approx = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = approx.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(Errors::DegeneratePose.into()),
    };
    let rotation = u * v_t;
    if rotation.determinant() <= 0.0 || t.z <= EPS as f64 {
        return Err(Errors::DegeneratePose.into());
    }
    Ok((rotation, t))
}

/// Tracks a planar object of fixed aspect ratio through a perspective camera.
///
/// The correspondences are undistorted, a robust homography moves the current quad, the moved
/// quad is explained by a rigid pose of the model rectangle and the pose is projected back to
/// the image. The result is always a quad consistent with some rigid pose of the rectangle,
/// which keeps the shape from drifting into arbitrary quads.
///
#[allow(clippy::too_many_arguments)]
pub fn estimate_pose(
    src: &[Vector2<f32>],
    dst: &[Vector2<f32>],
    priors: &[f32],
    quad: &Quad,
    aspect_ratio: f32,
    intrinsics: &CameraIntrinsics,
    scale: &IrlsScale,
    iterations: usize,
) -> Result<IrlsFit<PnpPose>> {
    check_correspondences(src.len())?;
    if aspect_ratio <= EPS || !aspect_ratio.is_finite() {
        return Err(Errors::InvalidGeometry(format!("aspect ratio {}", aspect_ratio)).into());
    }
    let to_camera = |p: &Vector2<f32>| undistort(intrinsics, p).cast::<f32>();
    let camera_src = src.iter().map(to_camera).collect::<Vec<_>>();
    let camera_dst = dst.iter().map(to_camera).collect::<Vec<_>>();
    let focal = (intrinsics.fx + intrinsics.fy) / 2.0;

    let fit = estimate_homography(
        &camera_src,
        &camera_dst,
        priors,
        &scale.scaled(focal),
        iterations,
    )?;

    let moved = quad
        .vertices
        .map(|v| project(&fit.model, &to_camera(&v)).cast::<f64>());
    let model = model_rectangle(aspect_ratio as f64);
    let plane = homography_from_4_points(&model, &moved).ok_or(Errors::DegeneratePose)?;
    let (rotation, translation) = decompose(&plane)?;

    let reprojection = Matrix3::from_columns(&[
        rotation.column(0).into_owned(),
        rotation.column(1).into_owned(),
        translation,
    ]);
    let mut vertices = [Vector2::zeros(); 4];
    for (v, m) in vertices.iter_mut().zip(model.iter()) {
        let p = reprojection * Vector3::new(m.x, m.y, 1.0);
        if p.z <= EPS as f64 {
            return Err(Errors::DegeneratePose.into());
        }
        *v = distort(intrinsics, &Vector2::new(p.x / p.z, p.y / p.z));
    }
    let new_quad = Quad::new(vertices);
    if !new_quad.is_finite() {
        return Err(Errors::DegeneratePose.into());
    }
    if !new_quad.is_convex() {
        return Err(Errors::NonConvexQuad.into());
    }

    let k = Matrix3::new(
        intrinsics.fx as f64,
        0.0,
        intrinsics.cx as f64,
        0.0,
        intrinsics.fy as f64,
        intrinsics.cy as f64,
        0.0,
        0.0,
        1.0,
    );
    let pose = k * reprojection;
    let pose = pose / pose[(2, 2)];

    let old = quad.vertices.map(|v| v.cast::<f64>());
    let new = new_quad.vertices.map(|v| v.cast::<f64>());
    let frame_homography = homography_from_4_points(&old, &new).ok_or(Errors::DegeneratePose)?;

    trace!(
        "Pose recovered: t = [{:.4}, {:.4}, {:.4}]",
        translation.x,
        translation.y,
        translation.z
    );

    Ok(IrlsFit {
        model: PnpPose {
            quad: new_quad,
            frame_homography: frame_homography.cast::<f32>(),
            pose_homography: pose.cast::<f32>(),
            rotation: rotation.cast::<f32>(),
            translation: translation.cast::<f32>(),
        },
        weights: fit.weights,
    })
}

#[cfg(test)]
mod tests {
    use crate::estimation::perspective::{distort, estimate_pose, undistort};
    use crate::estimation::IrlsScale;
    use crate::options::CameraIntrinsics;
    use crate::utils::quad::Quad;
    use nalgebra::{Vector2, Vector3};

    fn inside(quad: &Quad) -> Vec<Vector2<f32>> {
        let c = quad.center();
        let mut points = vec![c];
        for v in quad.vertices.iter() {
            points.push(c + (v - c) * 0.5);
            points.push(c + (v - c) * 0.8);
        }
        points
    }

    #[test]
    fn distortion_inverts() {
        let k = CameraIntrinsics::pinhole(0.9, 0.9, 0.5, 0.4).distortion(0.1, -0.02, 0.001);
        let p = Vector2::new(0.8, 0.15);
        let back = distort(&k, &undistort(&k, &p));
        assert!((back - p).norm() < 1e-5);
    }

    #[test]
    fn fronto_parallel_translation() {
        let quad = Quad::from_rotated_rect(Vector2::new(0.5, 0.5), 0.2, 0.2, 0.0);
        let src = inside(&quad);
        let flow = Vector2::new(0.01, 0.0);
        let dst = src.iter().map(|p| p + flow).collect::<Vec<_>>();
        let priors = vec![1.0 / src.len() as f32; src.len()];
        let k = CameraIntrinsics::pinhole(1.0, 1.0, 0.5, 0.5);

        let fit = estimate_pose(&src, &dst, &priors, &quad, 1.0, &k, &IrlsScale::isotropic(500.0), 3)
            .unwrap();
        for (old, new) in quad.vertices.iter().zip(fit.model.quad.vertices.iter()) {
            assert!((old + flow - new).norm() < 1e-4);
        }
        // camera looks straight at the plane at depth 5
        assert!((fit.model.translation - Vector3::new(-0.45, -0.5, 5.0)).norm() < 1e-2);
        assert!((fit.model.rotation[(0, 0)] - 1.0).abs() < 1e-3);
        assert!(fit.weights.iter().all(|w| w.is_finite() && *w > 0.5));
    }
}
