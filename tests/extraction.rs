use image::{Rgba, RgbaImage};
use image_to_palette_wasm::color::delta_e;
use image_to_palette_wasm::progress::FnSink;
use image_to_palette_wasm::{
    Algorithm, Bitmap, CancellationToken, CentroidConfig, ExtractionContext, PaletteError,
    PaletteRequest, ProgressEvent, Rgb, Stage, extract, extract_colors,
};

fn algorithms() -> Vec<Algorithm> {
    vec![
        "density".parse().unwrap(),
        "median-cut".parse().unwrap(),
        "weighted".parse().unwrap(),
        Algorithm::Centroid(CentroidConfig {
            seed: Some(11),
            ..CentroidConfig::default()
        }),
    ]
}

fn bitmap(image: RgbaImage) -> Bitmap {
    Bitmap::from_image(image).unwrap()
}

/// Six well separated blocks of unequal size plus a small accent.
fn scene() -> Bitmap {
    bitmap(RgbaImage::from_fn(120, 90, |x, y| {
        if (56..62).contains(&x) && (40..46).contains(&y) {
            return Rgba([250, 210, 0, 255]);
        }
        match (x / 40, y / 45) {
            (0, 0) => Rgba([232, 232, 228, 255]),
            (1, 0) => Rgba([24, 24, 32, 255]),
            (2, 0) => Rgba([200, 32, 40, 255]),
            (0, _) => Rgba([40, 120, 200, 255]),
            (1, _) => Rgba([48, 160, 72, 255]),
            _ => Rgba([136, 64, 160, 255]),
        }
    }))
}

fn run_with_events(bitmap: &Bitmap, request: &PaletteRequest) -> (Vec<Rgb>, Vec<ProgressEvent>) {
    let mut events: Vec<ProgressEvent> = Vec::new();
    let colors = {
        let mut ctx = ExtractionContext::new(&mut events);
        extract(bitmap, request, &mut ctx).unwrap()
    };
    (colors, events)
}

#[test]
fn test_solid_image_gives_its_own_color() {
    let solid = bitmap(RgbaImage::from_pixel(100, 100, Rgba([128, 64, 32, 255])));
    for algorithm in algorithms() {
        let request = PaletteRequest::new(algorithm, 5);
        let colors = extract_colors(&solid, &request).unwrap();
        assert_eq!(colors, vec![Rgb::new(128, 64, 32)], "{}", algorithm.name());
    }
}

#[test]
fn test_small_accent_survives_density_clustering() {
    let image = RgbaImage::from_fn(100, 100, |x, _| {
        if x < 90 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([255, 0, 0, 255])
        }
    });
    let request = PaletteRequest::new("density".parse().unwrap(), 3);
    let colors = extract_colors(&bitmap(image), &request).unwrap();
    assert!(colors.iter().any(|c| c.r >= 200 && c.g >= 200 && c.b >= 200));
    assert!(colors.iter().any(|c| c.r >= 200 && c.g <= 40 && c.b <= 40));
}

#[test]
fn test_transparent_image_completes_empty() {
    let clear = bitmap(RgbaImage::from_pixel(64, 64, Rgba([90, 200, 30, 0])));
    for algorithm in algorithms() {
        let (colors, events) = run_with_events(&clear, &PaletteRequest::new(algorithm, 5));
        assert!(colors.is_empty(), "{}", algorithm.name());
        let last = events.last().unwrap();
        assert!(last.is_complete);
        assert_eq!(last.stage, Stage::Completed);
        assert!(last.colors.is_empty());
    }
}

#[test]
fn test_palette_never_exceeds_target() {
    let scene = scene();
    for algorithm in algorithms() {
        for k in [1, 3, 5, 8] {
            let colors = extract_colors(&scene, &PaletteRequest::new(algorithm, k)).unwrap();
            assert!(!colors.is_empty(), "{} k={k}", algorithm.name());
            assert!(colors.len() <= k, "{} k={k} gave {}", algorithm.name(), colors.len());
        }
    }
}

#[test]
fn test_scored_strategies_return_distinct_colors() {
    let scene = scene();
    let floors = [("density", 8.0), ("median-cut", 8.0), ("weighted", 10.0)];
    for (name, floor) in floors {
        let request = PaletteRequest::new(name.parse().unwrap(), 6);
        let labs: Vec<_> = extract_colors(&scene, &request)
            .unwrap()
            .into_iter()
            .map(Rgb::to_lab)
            .collect();
        for (i, x) in labs.iter().enumerate() {
            for y in &labs[i + 1..] {
                assert!(delta_e(x, y) >= floor, "{name}: {x:?} vs {y:?}");
            }
        }
    }
}

#[test]
fn test_runs_are_deterministic() {
    let scene = scene();
    for algorithm in algorithms() {
        let request = PaletteRequest::new(algorithm, 5);
        let first = extract_colors(&scene, &request).unwrap();
        let second = extract_colors(&scene, &request).unwrap();
        assert_eq!(first, second, "{}", algorithm.name());
    }
}

#[test]
fn test_progress_is_monotonic_and_ends_at_one() {
    let scene = scene();
    for algorithm in algorithms() {
        let (colors, events) = run_with_events(&scene, &PaletteRequest::new(algorithm, 5));
        assert!(events.len() >= 2, "{}", algorithm.name());
        assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));
        assert!(events.iter().all(|e| (0.0..=1.0).contains(&e.progress)));

        let (last, rest) = events.split_last().unwrap();
        assert!(last.is_complete);
        assert_eq!(last.progress, 1.0);
        assert_eq!(last.colors, colors);
        assert!(rest.iter().all(|e| !e.is_complete && e.progress < 1.0));
    }
}

#[test]
fn test_cancel_from_sink_stops_extraction() {
    let scene = scene();
    for algorithm in algorithms() {
        let token = CancellationToken::new();
        let remote = token.clone();
        let mut seen = 0usize;
        let mut sink = FnSink(|_event: ProgressEvent| {
            seen += 1;
            remote.cancel();
            true
        });
        let result = {
            let mut ctx = ExtractionContext::with_token(&mut sink, token);
            extract(&scene, &PaletteRequest::new(algorithm, 5), &mut ctx)
        };
        assert!(matches!(result, Err(PaletteError::Cancelled)), "{}", algorithm.name());
        assert_eq!(seen, 1);
    }
}

#[test]
fn test_invalid_parameters_are_rejected() {
    let scene = scene();
    let bad = [
        r#"{"algorithm": {"kind": "density", "eps": -1.0}}"#,
        r#"{"algorithm": {"kind": "density", "min_points": 0}}"#,
        r#"{"algorithm": {"kind": "median_cut", "merge_threshold": -2.0}}"#,
        r#"{"algorithm": {"kind": "weighted", "sampler": {"quantize_bits": 8}}}"#,
        r#"{"algorithm": {"kind": "centroid", "max_iterations": 0}}"#,
        r#"{"algorithm": {"kind": "centroid", "sampler": {"max_dimension": 0}}}"#,
        r#"{"target_colors": 0}"#,
    ];
    for json in bad {
        let request = PaletteRequest::from_json_str(json).unwrap();
        assert!(
            matches!(
                extract_colors(&scene, &request),
                Err(PaletteError::InvalidParameter { .. })
            ),
            "{json}"
        );
    }
}

#[test]
fn test_large_images_are_downsampled_first() {
    let big = bitmap(RgbaImage::from_fn(1200, 800, |x, _| {
        if x < 600 {
            Rgba([20, 60, 180, 255])
        } else {
            Rgba([240, 180, 20, 255])
        }
    }));
    let request = PaletteRequest::new("weighted".parse().unwrap(), 4);
    let colors = extract_colors(&big, &request).unwrap();
    assert_eq!(colors.len(), 2);
    assert!(colors.contains(&Rgb::new(20, 60, 180)));
    assert!(colors.contains(&Rgb::new(240, 180, 20)));
}
