use fieldrun::domain::{Coordinate, Route};
use fieldrun::geometry::{closest_point_on_route, great_circle_distance, route_length, segment_lengths};

fn field_route() -> Route {
    // Lawnmower pattern over a small field
    Route::new(vec![
        Coordinate::new(45.0000, 7.0000),
        Coordinate::new(45.0000, 7.0040),
        Coordinate::new(45.0005, 7.0040),
        Coordinate::new(45.0005, 7.0000),
        Coordinate::new(45.0010, 7.0000),
    ])
    .unwrap()
}

#[test]
fn points_on_route_project_to_their_own_distance() {
    let route = field_route();
    let points = route.points();
    let lengths = segment_lengths(points);

    let mut preceding = 0.0;
    for (i, w) in points.windows(2).enumerate() {
        for step in 0..=10 {
            let t = step as f64 / 10.0;
            let p = w[0].lerp(&w[1], t);
            let proj = closest_point_on_route(points, &p).unwrap();

            let expected = preceding + lengths[i] * t;
            assert!(
                (proj.distance_traveled_m - expected).abs() < 0.5,
                "segment {i} t {t}: got {} expected {expected}",
                proj.distance_traveled_m
            );
            assert!(proj.distance_to_projection_m < 0.01);
        }
        preceding += lengths[i];
    }
}

#[test]
fn projection_never_leaves_the_route() {
    let route = field_route();
    let total = route_length(route.points());

    for lat_step in -2..=12 {
        for lon_step in -2..=12 {
            let p = Coordinate::new(
                45.0 + lat_step as f64 * 0.0001,
                7.0 + lon_step as f64 * 0.0004,
            );
            let proj = closest_point_on_route(route.points(), &p).unwrap();
            assert!(proj.t >= 0.0 && proj.t <= 1.0);
            assert!(proj.segment_index < route.segment_count());
            assert!(proj.distance_traveled_m >= 0.0);
            assert!(proj.distance_traveled_m <= total + 1e-6);
        }
    }
}

#[test]
fn off_route_point_snaps_to_nearest_leg() {
    let route = field_route();
    // Just north of the middle of the third leg (lat 45.0005, heading west)
    let p = Coordinate::new(45.00052, 7.0020);
    let proj = closest_point_on_route(route.points(), &p).unwrap();

    assert_eq!(proj.segment_index, 2);
    assert!((proj.t - 0.5).abs() < 0.01);
    let offset = great_circle_distance(&p, &Coordinate::new(45.0005, 7.0020));
    assert!((proj.distance_to_projection_m - offset).abs() < 0.1);
}
