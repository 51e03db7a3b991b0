//! End-to-end appraisal of synthetic photographs.

#![allow(clippy::unwrap_used)]

use image::Rgb;
use koi_metrics::{
    AppraisalContext, AppraisalError, Detection, Detections, FEATURE_COUNT, FEATURE_NAMES, Mask,
    PatternClass, PatternPrediction, RegressionModel, RgbImage, TrainingConfig, TrainingRow,
    appraise, extract_features, train,
};

const W: u32 = 600;
const H: u32 = 400;
const FISH_CENTER: (f64, f64) = (260.0, 200.0);
const HALF_LENGTH: f64 = 150.0;
const HALF_WIDTH: f64 = 20.0;

/// Body coordinates `(along, across)` of the centre of pixel `(x, y)`
/// for a fish turned by `angle` radians.
fn body_coords(x: u32, y: u32, angle: f64) -> (f64, f64) {
    let dx = f64::from(x) + 0.5 - FISH_CENTER.0;
    let dy = f64::from(y) + 0.5 - FISH_CENTER.1;
    let (sin, cos) = angle.sin_cos();
    (dx * cos + dy * sin, -dx * sin + dy * cos)
}

fn in_fish(x: u32, y: u32, angle: f64) -> bool {
    let (along, across) = body_coords(x, y, angle);
    along.abs() < HALF_LENGTH && across.abs() < HALF_WIDTH
}

fn disk(cx: f64, cy: f64, r: f64) -> Mask {
    Mask::from_fn(W, H, |x, y| {
        (f64::from(x) - cx).hypot(f64::from(y) - cy) <= r
    })
}

/// A 300x40 px kohaku with red and white saddles across the body, turned
/// by `angle`, next to a 60 px one-peso coin.
fn photograph(angle: f64) -> (RgbImage, Detections) {
    let image = RgbImage::from_fn(W, H, |x, y| {
        if in_fish(x, y, angle) {
            let (along, _) = body_coords(x, y, angle);
            if ((along + HALF_LENGTH) / 50.0).floor() as i64 % 2 == 0 {
                Rgb([215, 35, 25])
            } else {
                Rgb([248, 246, 240])
            }
        } else {
            Rgb([35, 85, 60])
        }
    });
    let fish = Mask::from_fn(W, H, |x, y| in_fish(x, y, angle));
    let detections = Detections {
        fish: vec![Detection::new(fish, 0.96, "koi")],
        coins: vec![Detection::new(disk(520.0, 340.0, 30.0), 0.92, "1peso")],
        pattern: PatternPrediction {
            label: "kohaku".into(),
            confidence: 0.91,
        },
    };
    (image, detections)
}

fn price_model() -> RegressionModel {
    let mut coefficients = [0.0; FEATURE_COUNT];
    coefficients[0] = 120.0; // size_cm
    coefficients[3] = 800.0; // pattern_kohaku
    coefficients[8] = 400.0; // symmetry_score
    RegressionModel::new(coefficients, -200.0)
}

#[test]
fn eleven_and_a_half_centimetre_koi() {
    let (image, detections) = photograph(0.0);
    assert_eq!(detections.fish[0].mask.area(), 12_000);
    let metrics = appraise(
        &image,
        &detections,
        &AppraisalContext::default(),
        &price_model(),
    )
    .unwrap();

    assert!((metrics.length_px - 300.0).abs() < 1e-9);
    assert!((metrics.cm_per_px - 2.3 / 60.0).abs() < 5e-4);
    assert!((metrics.size_cm - 11.5).abs() < 0.2, "size {}", metrics.size_cm);
    assert_eq!(metrics.pattern, PatternClass::Kohaku);
    assert!(metrics.symmetry_score > 0.99);

    let expected = -200.0 + 120.0 * metrics.size_cm + 800.0 + 400.0 * metrics.symmetry_score;
    assert!((metrics.predicted_price - expected).abs() < 1e-9);
}

#[test]
fn size_does_not_depend_on_orientation() {
    let context = AppraisalContext::default();
    let (image, detections) = photograph(0.0);
    let upright = extract_features(&image, &detections, &context).unwrap();

    for degrees in [15.0_f64, 30.0, 45.0, 90.0, 127.0, 200.0] {
        let (image, detections) = photograph(degrees.to_radians());
        let turned = extract_features(&image, &detections, &context).unwrap();
        assert!(
            (turned.size_cm - upright.size_cm).abs() < 0.15,
            "{degrees} deg: {} vs {}",
            turned.size_cm,
            upright.size_cm
        );
    }
}

#[test]
fn color_percentages_stay_bounded() {
    let context = AppraisalContext::default();
    for degrees in [0.0_f64, 33.0, 90.0] {
        let (image, detections) = photograph(degrees.to_radians());
        let f = extract_features(&image, &detections, &context).unwrap();
        let pcts = [f.color_white_pct, f.color_red_pct, f.color_black_pct];
        assert!(pcts.iter().all(|p| (0.0..=100.0).contains(p)));
        assert!(pcts.iter().sum::<f64>() <= 100.0 + 1e-9);
        // Saddles of equal length: red and white split the body.
        assert!((f.color_red_pct - 50.0).abs() < 5.0, "{degrees} deg: {pcts:?}");
        assert!((0.0..=1.0).contains(&f.color_quality));
    }
}

#[test]
fn confident_small_coin_beats_large_coin() {
    let (image, mut detections) = photograph(0.0);
    // ~500 px at 0.9 against ~100 px at 0.95.
    detections.coins = vec![
        Detection::new(disk(80.0, 60.0, 12.6), 0.9, "5peso_old"),
        Detection::new(disk(540.0, 60.0, 5.6), 0.95, "1peso"),
    ];
    let metrics = appraise(
        &image,
        &detections,
        &AppraisalContext::default(),
        &price_model(),
    )
    .unwrap();
    assert_eq!(metrics.coin_label, "1peso");
}

#[test]
fn low_confidence_pattern_is_unknown() {
    let (image, mut detections) = photograph(0.0);
    detections.pattern.confidence = 0.3;
    let metrics = appraise(
        &image,
        &detections,
        &AppraisalContext::default(),
        &price_model(),
    )
    .unwrap();
    assert_eq!(metrics.pattern, PatternClass::Unknown);
    assert!(metrics.pattern_low_confidence);
    assert_eq!(metrics.pattern_label, "kohaku");
    assert_eq!(
        [
            metrics.features.pattern_ogon,
            metrics.features.pattern_showa,
            metrics.features.pattern_kohaku,
        ],
        [0.0; 3]
    );
}

#[test]
fn feature_order_matches_schema() {
    let (image, detections) = photograph(0.4);
    let context = AppraisalContext::default();
    let first = extract_features(&image, &detections, &context).unwrap();
    let second = extract_features(&image, &detections, &context).unwrap();
    assert_eq!(first.values(), second.values());
    for (name, value) in FEATURE_NAMES.iter().zip(first.values()) {
        assert_eq!(first.get(name), Some(value));
    }
}

#[test]
fn unusable_photographs_fail_with_specific_errors() {
    let context = AppraisalContext::default();
    let model = price_model();

    let (image, mut detections) = photograph(0.0);
    detections.coins.clear();
    let err = appraise(&image, &detections, &context, &model).unwrap_err();
    assert_eq!(err.kind(), "no_coin_detected");

    let (image, mut detections) = photograph(0.0);
    detections.fish[0].confidence = 0.1;
    let err = appraise(&image, &detections, &context, &model).unwrap_err();
    assert_eq!(err.kind(), "no_fish_detected");

    let (image, mut detections) = photograph(0.0);
    detections.coins[0].label = "token".into();
    let err = appraise(&image, &detections, &context, &model).unwrap_err();
    assert!(matches!(err, AppraisalError::UnknownDenomination(ref l) if l == "token"));
}

#[test]
fn training_on_one_photograph_is_refused() {
    let context = AppraisalContext::default();
    let rows = [
        TrainingRow::new("koi_001.jpg", 4500.0),
        TrainingRow::new("koi_002.jpg", 5200.0),
    ];
    let err = train(&rows, &TrainingConfig::default(), |row| {
        if row.reference == "koi_001.jpg" {
            let (image, detections) = photograph(0.0);
            extract_features(&image, &detections, &context)
        } else {
            Err(AppraisalError::NoCoinDetected)
        }
    })
    .unwrap_err();
    assert!(matches!(
        err,
        AppraisalError::InsufficientData {
            usable: 1,
            required: 2
        }
    ));
}
