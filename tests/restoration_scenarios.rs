//! Face restoration behaviour with deterministic model doubles

mod common;

use common::{face_at, restorer, FailingEnhancer, IdentityEnhancer, PaintEnhancer};
use image::{Rgb, RgbImage};
use profile_restore::{ImageRestorer, RestorationSettings};
use std::sync::atomic::Ordering;

const BACKGROUND: Rgb<u8> = Rgb([20, 120, 40]);

fn portrait() -> RgbImage {
    RgbImage::from_fn(64, 64, |x, y| {
        if (24..40).contains(&x) && (24..44).contains(&y) {
            Rgb([180, 140, 120])
        } else {
            BACKGROUND
        }
    })
}

fn close(a: Rgb<u8>, b: Rgb<u8>, tolerance: i32) -> bool {
    a.0.iter()
        .zip(b.0.iter())
        .all(|(x, y)| (i32::from(*x) - i32::from(*y)).abs() <= tolerance)
}

#[test]
fn test_failing_enhancer_falls_back_to_crop() {
    let faces = vec![face_at(32.0, 32.0, 8.0)];
    let image = portrait();

    let mut failing = restorer(faces.clone(), Box::new(FailingEnhancer), RestorationSettings::default());
    let unblended = RestorationSettings {
        blend_weight: 0.0,
        ..RestorationSettings::default()
    };
    let mut identity = restorer(faces, Box::new(IdentityEnhancer::default()), unblended);

    let from_failure = failing.restore(&image).unwrap();
    let from_identity = identity.restore(&image).unwrap();

    assert_eq!(from_failure.dimensions(), (128, 128));
    assert_eq!(from_failure, from_identity);
}

#[test]
fn test_small_faces_are_not_enhanced() {
    let enhancer = IdentityEnhancer::default();
    let calls = enhancer.calls.clone();
    let image = portrait();

    let mut with_small_face =
        restorer(vec![face_at(32.0, 32.0, 3.0)], Box::new(enhancer), RestorationSettings::default());
    let mut without_faces =
        restorer(Vec::new(), Box::new(IdentityEnhancer::default()), RestorationSettings::default());

    let restored = with_small_face.restore(&image).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(restored, without_faces.restore(&image).unwrap());
}

#[test]
fn test_enhanced_face_pasted_with_feathered_edge() {
    let settings = RestorationSettings {
        blend_weight: 1.0,
        ..RestorationSettings::default()
    };
    let mut restorer = restorer(
        vec![face_at(32.0, 32.0, 8.0)],
        Box::new(PaintEnhancer(Rgb([250, 10, 10]))),
        settings,
    );

    let out = restorer.restore(&portrait()).unwrap();

    assert_eq!(out.dimensions(), (128, 128));
    // Face centre takes the enhanced colour
    assert!(close(*out.get_pixel(64, 66), Rgb([250, 10, 10]), 8));
    // Far corner keeps the upsampled background
    assert!(close(*out.get_pixel(2, 2), BACKGROUND, 2));
}

#[test]
fn test_only_center_face_restored() {
    let settings = RestorationSettings {
        blend_weight: 1.0,
        ..RestorationSettings::default()
    };
    let enhancer = IdentityEnhancer::default();
    let calls = enhancer.calls.clone();
    let faces = vec![face_at(12.0, 12.0, 6.0), face_at(32.0, 32.0, 6.0), face_at(52.0, 52.0, 6.0)];

    let mut restorer = restorer(faces, Box::new(enhancer), settings);
    restorer.restore(&portrait()).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_all_faces_restored_when_requested() {
    let settings = RestorationSettings {
        only_center_face: false,
        ..RestorationSettings::default()
    };
    let enhancer = IdentityEnhancer::default();
    let calls = enhancer.calls.clone();
    let faces = vec![face_at(12.0, 12.0, 6.0), face_at(52.0, 52.0, 6.0)];

    let mut restorer = restorer(faces, Box::new(enhancer), settings);
    restorer.restore(&portrait()).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
