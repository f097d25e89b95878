//! Property-based tests using proptest.
//!
//! These tests verify invariants that must hold for all valid inputs,
//! rather than checking specific numerical values:
//!   - batch partition of the AR(1) fit
//!   - p-value and z-score bounds
//!   - contrast additivity and scale invariance
//!   - neutrality of null session contrasts

use proptest::prelude::*;
use rand::distributions::Distribution;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use statrs::distribution::Normal;

use nistats_core::contrast::ContrastType;
use nistats_core::glm::{data_scaling, session_glm, GeneralLinearModel, NoiseModel};
use nistats_core::model::{ContrastOptions, FitOptions, FmriLinearModel, MaskInput};
use nistats_io::{identity_affine, Image};
use nistats_linalg::DenseMatrix;

fn randn(nrows: usize, ncols: usize, rng: &mut ChaCha8Rng) -> DenseMatrix {
    let normal = Normal::new(0.0, 1.0).unwrap();
    DenseMatrix::from_fn(nrows, ncols, |_, _| normal.sample(&mut *rng))
}

// ---------------------------------------------------------------------------
// 1. AR(1) batches partition the units
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn prop_batches_partition_units(
        n in 1usize..60,
        q in 1usize..5,
        bins in 1usize..200,
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let p = 30;
        let x = randn(p, q, &mut rng);
        let y = randn(p, n, &mut rng);

        let (labels, results) = session_glm(&y, &x, NoiseModel::Ar1, bins).unwrap();
        prop_assert_eq!(labels.len(), n);
        let total: usize = results.values().map(|r| r.n_units()).sum();
        prop_assert_eq!(total, n);
        for (label, res) in &results {
            prop_assert_eq!(label.bins, bins);
            prop_assert_eq!(labels.iter().filter(|l| *l == label).count(), res.n_units());
            prop_assert_eq!(res.df_resid, p - q);
        }
    }
}

// ---------------------------------------------------------------------------
// 2. p-values in [0, 1], z-scores finite
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn prop_pvalues_in_unit_interval(
        dim in 1usize..4,
        ols in any::<bool>(),
        tmin in any::<bool>(),
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (p, q, n) = (40, 4, 20);
        let noise_model = if ols { NoiseModel::Ols } else { NoiseModel::Ar1 };
        let fit = GeneralLinearModel::new(randn(p, q, &mut rng))
            .fit(&randn(p, n, &mut rng), noise_model, 100)
            .unwrap();
        let c = randn(dim, q, &mut rng);
        let contrast_type = if tmin { Some(ContrastType::TminConjunction) } else { None };
        let con = fit.contrast(&c, contrast_type).unwrap();

        for pv in con.p_value() {
            prop_assert!((0.0..=1.0).contains(&pv), "p-value out of range: {}", pv);
        }
        for z in con.z_score() {
            prop_assert!(z.is_finite(), "non-finite z: {}", z);
        }
    }
}

// ---------------------------------------------------------------------------
// 3. Contrast algebra
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn prop_addition_doubles_f_stat(dim in 1usize..4, seed in 0u64..1000) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (p, q, n) = (40, 4, 15);
        let fit = GeneralLinearModel::new(randn(p, q, &mut rng))
            .fit(&randn(p, n, &mut rng), NoiseModel::Ar1, 100)
            .unwrap();
        let con = fit.contrast(&randn(dim, q, &mut rng), Some(ContrastType::F)).unwrap();
        let sum = (&con + &con).unwrap();
        for (s1, s2) in con.stat().iter().zip(sum.stat()) {
            prop_assert!((s2 - 2.0 * s1).abs() <= 1e-6 * s1.abs().max(1.0));
        }
    }

    #[test]
    fn prop_positive_scaling_keeps_z(
        scale in 0.01f64..100.0,
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (p, q, n) = (40, 3, 15);
        let fit = GeneralLinearModel::new(randn(p, q, &mut rng))
            .fit(&randn(p, n, &mut rng), NoiseModel::Ols, 100)
            .unwrap();
        let con = fit.contrast(&randn(1, q, &mut rng), None).unwrap();
        let scaled = scale * &con;
        for (a, b) in con.z_score().iter().zip(scaled.z_score()) {
            prop_assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
        }
    }

    #[test]
    fn prop_scaling_centers_columns(
        offset in 1.0f64..1000.0,
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let noise = randn(50, 5, &mut rng);
        let y = DenseMatrix::from_fn(50, 5, |i, j| offset + noise.get(i, j));
        let (scaled, mean) = data_scaling(&y);
        for j in 0..5 {
            let m: f64 = scaled.col(j).iter().sum::<f64>() / 50.0;
            prop_assert!(m.abs() < 1e-8);
            prop_assert!((mean[j] - offset).abs() < 1.0);
        }
    }
}

// ---------------------------------------------------------------------------
// 4. A null contrast on one session leaves the other unchanged
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(10))]

    #[test]
    fn prop_null_session_neutral(seed in 0u64..1000) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let n_frames = 25;
        let q = 3;
        let run = |rng: &mut ChaCha8Rng| {
            let img = Image::from_fn([3, 3, 2], n_frames, identity_affine(), |_, _, _, _| {
                100.0 + normal.sample(&mut *rng)
            });
            (img, randn(n_frames, q, rng))
        };
        let (img1, x1) = run(&mut rng);
        let (img2, x2) = run(&mut rng);

        let mut multi = FmriLinearModel::new(
            vec![img1.clone(), img2],
            vec![x1.clone(), x2],
            MaskInput::None,
        )
        .unwrap();
        multi.fit(&FitOptions::default()).unwrap();
        let mut single = FmriLinearModel::new(img1, x1, MaskInput::None).unwrap();
        single.fit(&FitOptions::default()).unwrap();

        let c = DenseMatrix::row_vector(&[1.0, -1.0, 0.0]);
        let opts = ContrastOptions::default();
        let z_multi = multi
            .contrast(vec![c.clone(), DenseMatrix::zeros(1, q)], &opts)
            .unwrap();
        let z_single = single.contrast(c, &opts).unwrap();
        for (a, b) in z_multi[0].data().iter().zip(z_single[0].data()) {
            prop_assert!((a - b).abs() < 1e-10);
        }
    }
}
