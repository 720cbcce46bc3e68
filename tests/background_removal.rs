mod common;

use std::sync::{Arc, Mutex};

use common::{decode_rgba, png_bytes, processor, solid_png};
use pixel_core::error::ProcessingError;
use pixel_core::processing::{ImageSource, OutputFormat, ProgressReporter, RemovalAlgorithm, RemovalOptions};

#[test]
fn solid_red_image_becomes_transparent() {
    let processor = processor();
    let input = solid_png(500, 500, [255, 0, 0, 255]);
    let options = RemovalOptions {
        sensitivity: 25,
        ..RemovalOptions::default()
    };

    let result = processor
        .remove_background_blocking(ImageSource::Bytes(input), &options, &ProgressReporter::silent())
        .expect("remove background");

    assert_eq!(result.image.mime_type, "image/png");
    assert_eq!(result.source_dimensions, (500, 500));
    assert_eq!(result.algorithms[0], "background-removal:auto");
    assert!(result.metrics.is_none());

    let output = decode_rgba(&result.image.bytes);
    assert_eq!(output.dimensions(), (500, 500));
    let transparent = output.pixels().filter(|p| p.0[3] == 0).count();
    assert!(
        transparent as f64 / (500.0 * 500.0) > 0.95,
        "transparent = {transparent}"
    );
    assert_eq!(processor.governor().active_count(), 0);
}

#[test]
fn centered_subject_on_white_is_kept() {
    let processor = processor();
    let input = png_bytes(200, 200, |x, y| {
        if (60..140).contains(&x) && (60..140).contains(&y) {
            [20, 40, 160, 255]
        } else {
            [255, 255, 255, 255]
        }
    });

    let result = processor
        .remove_background_blocking(
            ImageSource::Bytes(input),
            &RemovalOptions::default(),
            &ProgressReporter::silent(),
        )
        .expect("remove background");

    let output = decode_rgba(&result.image.bytes);
    assert_eq!(output.get_pixel(100, 100).0[3], 255);
    assert_eq!(output.get_pixel(0, 0).0[3], 0);
    assert_eq!(output.get_pixel(199, 199).0[3], 0);
}

#[test]
fn oversized_input_is_rejected_before_decode() {
    let processor = processor();
    let input = vec![0u8; 18 * 1024 * 1024];

    let result = processor.remove_background_blocking(
        ImageSource::Bytes(input),
        &RemovalOptions::default(),
        &ProgressReporter::silent(),
    );

    match result {
        Err(ProcessingError::FileTooLarge { actual, limit }) => {
            assert_eq!(actual, 18 * 1024 * 1024);
            assert_eq!(limit, 15 * 1024 * 1024);
        }
        other => panic!("expected FileTooLarge, got {other:?}"),
    }
    assert_eq!(processor.governor().active_count(), 0);
}

#[test]
fn non_image_input_is_invalid() {
    let processor = processor();
    let pdf = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n".to_vec();

    let result = processor.remove_background_blocking(
        ImageSource::Bytes(pdf),
        &RemovalOptions::default(),
        &ProgressReporter::silent(),
    );
    assert!(matches!(result, Err(ProcessingError::InvalidInput(_))));
    assert_eq!(processor.governor().active_count(), 0);
}

#[test]
fn jpeg_output_is_rejected_for_removal() {
    let processor = processor();
    let options = RemovalOptions {
        output_format: OutputFormat::Jpeg,
        ..RemovalOptions::default()
    };

    let result = processor.remove_background_blocking(
        ImageSource::Bytes(solid_png(10, 10, [0, 0, 0, 255])),
        &options,
        &ProgressReporter::silent(),
    );
    assert!(matches!(result, Err(ProcessingError::InvalidInput(_))));
}

#[test]
fn webp_output_and_explicit_algorithm() {
    let processor = processor();
    let options = RemovalOptions {
        algorithm: RemovalAlgorithm::Portrait,
        feather_edges: false,
        output_format: OutputFormat::Webp,
        ..RemovalOptions::default()
    };

    let result = processor
        .remove_background_blocking(
            ImageSource::Bytes(solid_png(64, 48, [30, 200, 30, 255])),
            &options,
            &ProgressReporter::silent(),
        )
        .expect("remove background");

    assert_eq!(result.image.mime_type, "image/webp");
    assert_eq!(result.algorithms[0], "background-removal:portrait");
    assert!(!result.algorithms.iter().any(|a| a == "feather-edges"));
    assert_eq!(decode_rgba(&result.image.bytes).dimensions(), (64, 48));
}

#[test]
fn third_concurrent_operation_is_rejected() {
    let processor = processor();
    let first = processor.governor().acquire("held-1", 4, 4).expect("first");
    let second = processor.governor().acquire("held-2", 4, 4).expect("second");

    let result = processor.remove_background_blocking(
        ImageSource::Bytes(solid_png(10, 10, [0, 0, 0, 255])),
        &RemovalOptions::default(),
        &ProgressReporter::silent(),
    );
    assert!(matches!(
        result,
        Err(ProcessingError::ResourceExhausted { active: 2, limit: 2 })
    ));

    drop(first);
    drop(second);
    assert!(
        processor
            .remove_background_blocking(
                ImageSource::Bytes(solid_png(10, 10, [0, 0, 0, 255])),
                &RemovalOptions::default(),
                &ProgressReporter::silent(),
            )
            .is_ok()
    );
}

#[tokio::test]
async fn async_entry_reports_progress_checkpoints() {
    let processor = processor();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let result = processor
        .remove_background(
            ImageSource::Bytes(solid_png(40, 40, [10, 10, 10, 255])),
            RemovalOptions::default(),
            Some(Arc::new(move |percent, label| {
                sink.lock().expect("lock").push((percent, label));
            })),
        )
        .await
        .expect("remove background");
    assert!(result.elapsed_ms < 60_000);

    let seen = seen.lock().expect("lock");
    let labels: Vec<&str> = seen.iter().map(|(_, label)| *label).collect();
    assert_eq!(labels, vec!["load", "analyze", "select", "process", "enhance", "finalize"]);
    assert!(seen.windows(2).all(|pair| pair[0].0 < pair[1].0));
    assert_eq!(seen.last().map(|(percent, _)| *percent), Some(100));
}
