use glam::{Quat, Vec3};
use image::{Rgba, RgbaImage};
use myreal_ar::config::FallbackConfig;
use myreal_ar::events::OrientationSample;
use myreal_ar::motion::{MotionTracker, wrap_delta};
use myreal_ar::placement::{Controls, Pose, SpatialAnchor};
use myreal_ar::processing::visual_center::visual_center;
use myreal_ar::render::fallback::tilt_effects;

#[test]
fn visual_center_stays_in_unit_square() {
    let mut img = RgbaImage::new(37, 53);
    for (x, y, px) in img.enumerate_pixels_mut() {
        if (x * 7 + y * 3) % 11 == 0 {
            *px = Rgba([255, 255, 255, 255]);
        }
    }
    let c = visual_center(&img, 20, 4);
    assert!((0.0..=1.0).contains(&c.x));
    assert!((0.0..=1.0).contains(&c.y));

    let empty = RgbaImage::new(40, 40);
    let c = visual_center(&empty, 20, 4);
    assert_eq!((c.x, c.y), (0.5, 0.5));
}

#[test]
fn bottom_right_quadrant_centers_near_three_quarters() {
    let mut img = RgbaImage::new(400, 300);
    for y in 150..300 {
        for x in 200..400 {
            img.put_pixel(x, y, Rgba([10, 20, 30, 255]));
        }
    }
    let c = visual_center(&img, 20, 4);
    assert!((c.x - 0.75).abs() < 0.01, "x = {}", c.x);
    assert!((c.y - 0.75).abs() < 0.01, "y = {}", c.y);
}

#[test]
fn heading_steps_are_bounded_by_smoothing() {
    let k = 0.15;
    let mut tracker = MotionTracker::new(k);
    tracker.on_sample(OrientationSample::new(10.0, 80.0, 0.0));
    let raw = [200.0, 359.0, 0.5, 181.0, 90.0, 270.0, 355.0, 5.0];
    for heading in raw {
        let before = tracker.state().heading;
        tracker.on_sample(OrientationSample::new(heading, 80.0, 0.0));
        let after = tracker.state().heading;
        let step = wrap_delta(after - before).abs();
        assert!(step <= 360.0 * k + 1e-3, "step {step} from {before} to {after}");
        assert!((0.0..360.0).contains(&after));
    }
}

#[test]
fn heading_moves_forward_through_wrap() {
    let mut tracker = MotionTracker::new(0.5);
    tracker.on_sample(OrientationSample::new(350.0, 80.0, 0.0));
    let mut last = tracker.state().heading;
    for heading in [355.0, 5.0, 5.0, 5.0] {
        tracker.on_sample(OrientationSample::new(heading, 80.0, 0.0));
        let now = tracker.state().heading;
        // Progress is measured along the short arc, so crossing 0 counts as forward.
        assert!(wrap_delta(now - last) > 0.0, "{last} -> {now}");
        last = now;
    }
    assert!(last < 10.0 && last > 0.0, "ended at {last}");
}

#[test]
fn inactive_tracker_has_zero_effects() {
    let tracker = MotionTracker::new(0.15);
    let effects = tilt_effects(&FallbackConfig::default(), &tracker, false);
    assert!(effects.is_zero());
    assert_eq!(tracker.effective_heading(), 0.0);

    let gated = MotionTracker::gated(0.15);
    let effects = tilt_effects(&FallbackConfig::default(), &gated, false);
    assert!(effects.is_zero());
}

#[test]
fn stabilize_zeroes_effects_of_active_tracker() {
    let mut tracker = MotionTracker::new(1.0);
    tracker.on_sample(OrientationSample::new(30.0, 60.0, 20.0));
    tracker.on_sample(OrientationSample::new(50.0, 70.0, 25.0));
    let cfg = FallbackConfig::default();
    assert!(!tilt_effects(&cfg, &tracker, false).is_zero());
    assert!(tilt_effects(&cfg, &tracker, true).is_zero());
}

#[test]
fn place_then_identity_frame_reproduces_anchor() {
    let camera = Pose::new(
        Vec3::new(0.3, 1.5, -0.2),
        Quat::from_rotation_y(0.7) * Quat::from_rotation_x(-0.2),
    );
    let hit = Pose::new(Vec3::new(0.1, 0.0, -1.8), Quat::IDENTITY);
    for (hit, prefer) in [(None, true), (Some(&hit), true), (Some(&hit), false)] {
        let mut anchor = SpatialAnchor::new();
        let placed = anchor.place(&camera, hit, prefer, 1.2);
        let frame = anchor.apply_frame(&Controls::IDENTITY).unwrap();
        assert_eq!(frame.position, placed.position);
        assert_eq!(frame.orientation, placed.orientation);
        assert_eq!(frame.scale, 1.0);
    }
}

#[test]
fn repeated_frames_do_not_drift() {
    let mut anchor = SpatialAnchor::new();
    anchor.place(&Pose::IDENTITY, None, true, 1.2);
    let controls = Controls {
        scale: 1.3,
        rotation: 0.4,
        offset_x: 0.1,
        offset_y: -0.05,
    };
    let first = anchor.apply_frame(&controls).unwrap();
    for _ in 0..100 {
        assert_eq!(anchor.apply_frame(&controls).unwrap(), first);
    }
    let state = anchor.state();
    anchor.apply_frame(&Controls::IDENTITY);
    assert_eq!(anchor.state(), state);
}

#[test]
fn offsets_slide_along_rotated_axes() {
    let mut anchor = SpatialAnchor::new();
    let camera = Pose::new(Vec3::new(0.2, 1.5, 0.0), Quat::from_rotation_y(0.7));
    let placed = anchor.place(&camera, None, true, 1.2);
    let rotation = std::f32::consts::FRAC_PI_2;
    let controls = Controls {
        rotation,
        offset_x: 0.3,
        offset_y: -0.1,
        ..Controls::IDENTITY
    };
    let t = anchor.apply_frame(&controls).unwrap();
    let rotated = placed.orientation * Quat::from_rotation_y(rotation);
    let expected = placed.position + rotated * Vec3::X * 0.3 + rotated * Vec3::Y * -0.1;
    assert!((t.position - expected).length() < 1e-5);
}
