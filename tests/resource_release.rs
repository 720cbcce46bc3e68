mod common;

use std::time::Duration;

use common::{png_bytes, processor, solid_png};
use pixel_core::error::ProcessingError;
use pixel_core::processing::{ImageSource, ProgressReporter, RemovalOptions, UpscaleOptions};

#[test]
fn mixed_sequence_returns_to_zero() {
    let processor = processor();
    let silent = ProgressReporter::silent();

    let inputs: Vec<ImageSource> = vec![
        ImageSource::Bytes(solid_png(32, 32, [200, 40, 40, 255])),
        ImageSource::Bytes(Vec::new()),
        ImageSource::Bytes(b"not an image at all".to_vec()),
        ImageSource::Base64("data:image/png;base64,@@@".to_string()),
        ImageSource::Bytes(png_bytes(24, 24, |x, _| if x < 12 { [0, 0, 0, 255] } else { [255; 4] })),
    ];

    for source in inputs {
        let _ = processor.remove_background_blocking(source, &RemovalOptions::default(), &silent);
        assert_eq!(processor.governor().active_count(), 0);
    }

    let _ = processor.upscale_blocking(
        ImageSource::Bytes(solid_png(1500, 1500, [0, 0, 0, 255])),
        &UpscaleOptions {
            scale_factor: 3.0,
            ..UpscaleOptions::default()
        },
        &silent,
    );
    assert_eq!(processor.governor().active_count(), 0);

    let stats = processor.governor().stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.total_acquired, stats.total_released);
    assert_eq!(stats.force_released, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_operations_settle_to_zero() {
    let processor = processor();
    let mut tasks = Vec::new();
    for i in 0..6u8 {
        let processor = processor.clone();
        tasks.push(tokio::spawn(async move {
            processor
                .remove_background(
                    ImageSource::Bytes(solid_png(120, 120, [i * 40, 80, 160, 255])),
                    RemovalOptions::default(),
                    None,
                )
                .await
        }));
    }

    let mut succeeded = 0;
    for task in tasks {
        match task.await.expect("join") {
            Ok(_) => succeeded += 1,
            Err(ProcessingError::ResourceExhausted { limit, .. }) => assert_eq!(limit, 2),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert!(succeeded >= 1);
    assert_eq!(processor.governor().active_count(), 0);
    assert!(processor.governor().stats().peak <= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_operation_still_releases() {
    let processor = processor();
    let worker = processor.clone();
    let task = tokio::spawn(async move {
        worker
            .upscale(
                ImageSource::Bytes(solid_png(400, 400, [10, 120, 30, 255])),
                UpscaleOptions::default(),
                None,
            )
            .await
    });
    task.abort();

    let mut waited = Duration::ZERO;
    while processor.governor().active_count() > 0 && waited < Duration::from_secs(30) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    assert_eq!(processor.governor().active_count(), 0);
}
