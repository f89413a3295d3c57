use approx::assert_relative_eq;
use mvcam_pnp::{
    project_points, solve_pnp, CameraIntrinsics, CameraModel, IPPEParams, PnPMethod, PnPResult,
    PolynomialDistortion, IPPE,
};

fn chessboard(columns: usize, rows: usize, square: f64) -> Vec<[f64; 3]> {
    (0..rows)
        .flat_map(|r| (0..columns).map(move |c| [c as f64 * square, r as f64 * square, 0.0]))
        .collect()
}

#[test]
fn ippe_square_identity_pose() {
    // Unit square seen head-on from one unit away.
    let norm = [[-0.5, 0.5], [0.5, 0.5], [0.5, -0.5], [-0.5, -0.5]];

    let res = IPPE::solve_square(&norm, 1.0).expect("IPPE solve_square should succeed");
    let r = res.first.rotation;
    let t = res.first.translation;

    assert_relative_eq!(r[0][0], 1.0, epsilon = 1e-9);
    assert_relative_eq!(r[1][1], 1.0, epsilon = 1e-9);
    assert_relative_eq!(r[2][2], 1.0, epsilon = 1e-9);
    assert_relative_eq!(t[0], 0.0, epsilon = 1e-9);
    assert_relative_eq!(t[1], 0.0, epsilon = 1e-9);
    assert_relative_eq!(t[2], 1.0, epsilon = 1e-9);
}

#[test]
fn ippe_chessboard_with_distortion() -> Result<(), Box<dyn std::error::Error>> {
    let camera = CameraModel::with_distortion(
        CameraIntrinsics::new(1450.0, 1445.0, 968.0, 608.0),
        PolynomialDistortion {
            k1: -0.21,
            k2: 0.08,
            p1: 0.0007,
            p2: -0.0004,
            k3: 0.0,
        },
    );
    let world = chessboard(9, 6, 0.025);
    let truth = PnPResult::from_rvec([0.25, -0.35, 0.1], [-0.1, -0.05, 0.7]);
    let image = project_points(&world, &truth, &camera);

    let pose = solve_pnp(&world, &image, &camera, PnPMethod::IppeDefault)?;

    assert!(pose.reproj_rmse.is_some_and(|e| e < 1e-4));
    for i in 0..3 {
        assert_relative_eq!(pose.rvec[i], truth.rvec[i], epsilon = 1e-6);
        assert_relative_eq!(pose.translation[i], truth.translation[i], epsilon = 1e-6);
    }
    Ok(())
}

#[test]
fn ippe_without_refinement_reports_pixel_error() -> Result<(), Box<dyn std::error::Error>> {
    let camera = CameraModel::default();
    let world = chessboard(7, 5, 0.03);
    let truth = PnPResult::from_rvec([-0.1, 0.2, 0.0], [-0.08, -0.06, 0.8]);
    let image = project_points(&world, &truth, &camera);

    let pose = solve_pnp(
        &world,
        &image,
        &camera,
        PnPMethod::Ippe(IPPEParams { refine_lm: None }),
    )?;

    assert!(pose.num_iterations.is_none());
    assert!(pose.reproj_rmse.is_some_and(|e| e < 1e-6));
    let c = pose.camera_center();
    let c_truth = truth.camera_center();
    for i in 0..3 {
        assert_relative_eq!(c[i], c_truth[i], epsilon = 1e-7);
    }
    Ok(())
}
