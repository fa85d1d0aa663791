use crate::cache::{cache_key, ResultCache};
use crate::db;
use crate::error::DetectError;
use crate::ocr::{self, OcrEngine};
use crate::plate::{assemble, order_tokens};
use crate::types::{DetectResponse, RawText, ScanRecord, VehicleMatch};
use chrono::{FixedOffset, Utc};
use failure::format_err;
use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Runs an uploaded photo through cache, OCR, plate assembly and registry
/// lookup. One instance is shared by every request.
pub struct Detector {
    ocr: Arc<dyn OcrEngine>,
    cache: Arc<dyn ResultCache>,
    db_conn: Arc<Mutex<Connection>>,
    cache_ttl: Duration,
    utc_offset: FixedOffset,
}

impl Detector {
    pub fn new(
        ocr: Arc<dyn OcrEngine>,
        cache: Arc<dyn ResultCache>,
        db_conn: Arc<Mutex<Connection>>,
        cache_ttl: Duration,
        utc_offset: FixedOffset,
    ) -> Detector {
        Detector {
            ocr,
            cache,
            db_conn,
            cache_ttl,
            utc_offset,
        }
    }

    pub async fn detect(&self, image_bytes: &[u8]) -> Result<DetectResponse, DetectError> {
        if image_bytes.is_empty() {
            return Err(DetectError::EmptyImage);
        }
        let image = image::load_from_memory(image_bytes).map_err(|e| {
            warn!("Failed to decode image: {:?}", e);
            DetectError::InvalidImage(e)
        })?;

        let key = cache_key(image_bytes);
        if let Some(cached) = self.cache.get(&key).await {
            info!("Returning cached result for image {}", key);
            return Ok(cached);
        }

        let response = self.run(image).await.map_err(|e| {
            error!("Error detecting plate: {:?}", e);
            DetectError::Internal(e)
        })?;
        self.cache.put(&key, response.clone(), self.cache_ttl).await;
        Ok(response)
    }

    async fn run(&self, image: image::DynamicImage) -> Result<DetectResponse, failure::Error> {
        let preprocessed = tokio::task::spawn_blocking(move || ocr::preprocess(&image))
            .await
            .map_err(|e| format_err!("Preprocessing task failed: {}", e))?;
        let detections = self.ocr.read_text(&preprocessed).await?;
        for d in &detections {
            debug!("Detected {:?} at x={} ({:.3})", d.text, d.left, d.confidence);
        }

        let plate = assemble(&order_tokens(&detections));
        let conn = self.db_conn.lock().await;
        let vehicle = match &plate {
            Some(plate) => {
                info!("Read plate {}", plate);
                match db::find_vehicle(&conn, plate)? {
                    Some(vehicle) => VehicleMatch::Registered(vehicle),
                    None => VehicleMatch::NotRegistered,
                }
            }
            None => {
                info!("No plate among {} detections", detections.len());
                VehicleMatch::Unreadable
            }
        };

        let record = ScanRecord::new(plate.as_deref(), vehicle.is_registered(), self.now());
        // The scan log is an audit trail; losing an entry must not fail the scan.
        if let Err(e) = db::record_scan(&conn, &record) {
            error!("Error recording scan {:?}: {:?}", record, e);
        }
        drop(conn);

        Ok(DetectResponse {
            plate,
            raw: detections
                .into_iter()
                .map(|d| RawText {
                    text: d.text,
                    prob: d.confidence,
                })
                .collect(),
            vehicle,
        })
    }

    fn now(&self) -> String {
        Utc::now()
            .with_timezone(&self.utc_offset)
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::types::{RawDetection, Vehicle};
    use async_trait::async_trait;
    use image::{DynamicImage, GrayImage, ImageOutputFormat, RgbImage};
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns canned detections and counts how often it was asked.
    pub struct StubOcr {
        pub detections: Vec<RawDetection>,
        pub calls: AtomicUsize,
    }

    impl StubOcr {
        pub fn new(detections: &[(f64, &str, f64)]) -> StubOcr {
            StubOcr {
                detections: detections
                    .iter()
                    .map(|(left, text, confidence)| RawDetection {
                        left: *left,
                        text: text.to_string(),
                        confidence: *confidence,
                    })
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OcrEngine for StubOcr {
        async fn read_text(&self, _: &GrayImage) -> Result<Vec<RawDetection>, failure::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.detections.clone())
        }
    }

    struct BrokenOcr;

    #[async_trait]
    impl OcrEngine for BrokenOcr {
        async fn read_text(&self, _: &GrayImage) -> Result<Vec<RawDetection>, failure::Error> {
            Err(format_err!("model crashed at 0xdeadbeef"))
        }
    }

    /// A tiny PNG; `seed` varies one pixel so callers get distinct bytes.
    pub fn png_bytes(seed: u8) -> Vec<u8> {
        let mut img = RgbImage::new(4, 2);
        img.put_pixel(0, 0, image::Rgb([seed, seed, seed]));
        let mut bytes = vec![];
        DynamicImage::ImageRgb8(img)
            .write_to(&mut bytes, ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    pub fn registered_vehicle() -> Vehicle {
        Vehicle {
            owner_name: "Budi Santoso".to_string(),
            engine_number: "JF11E1234567".to_string(),
            chassis_number: "MH1JF1110BK123456".to_string(),
            plate_number: "B 1234 XYZ".to_string(),
            vehicle_type: "Motorcycle".to_string(),
            status: "Active".to_string(),
        }
    }

    pub fn detector(ocr: Arc<dyn OcrEngine>) -> (Detector, Arc<Mutex<Connection>>) {
        let conn = db::open_in_memory();
        db::register_vehicle(&conn, &registered_vehicle()).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let detector = Detector::new(
            ocr,
            Arc::new(MemoryCache::new(NonZeroUsize::new(16).unwrap())),
            conn.clone(),
            Duration::from_secs(300),
            FixedOffset::east_opt(7 * 3600).unwrap(),
        );
        (detector, conn)
    }

    async fn scans(conn: &Arc<Mutex<Connection>>) -> Vec<crate::types::ScanEntry> {
        db::list_scans(&*conn.lock().await).unwrap()
    }

    #[tokio::test]
    async fn registered_plate() {
        let ocr = Arc::new(StubOcr::new(&[
            (80.0, "XYZ", 0.91),
            (5.0, "b", 0.87),
            (30.0, "1234", 0.99),
        ]));
        let (detector, conn) = detector(ocr.clone());

        let response = detector.detect(&png_bytes(1)).await.unwrap();
        assert_eq!(response.plate.as_deref(), Some("B 1234 XYZ"));
        assert_eq!(
            response.vehicle,
            VehicleMatch::Registered(registered_vehicle())
        );
        // Raw detections are reported in engine order.
        let texts: Vec<&str> = response.raw.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["XYZ", "b", "1234"]);
        assert_eq!(response.raw[1].prob, 0.87);

        let scans = scans(&conn).await;
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].plate_text, "B 1234 XYZ");
        assert_eq!(scans[0].is_match, "Registered");
        assert_eq!(scans[0].created_at.len(), "2024-01-01T00:00:00".len());
    }

    #[tokio::test]
    async fn unregistered_plate() {
        let ocr = Arc::new(StubOcr::new(&[
            (0.0, "AD", 0.9),
            (1.0, "777", 0.9),
            (2.0, "KL", 0.9),
        ]));
        let (detector, conn) = detector(ocr);

        let response = detector.detect(&png_bytes(1)).await.unwrap();
        assert_eq!(response.plate.as_deref(), Some("AD 777 KL"));
        assert_eq!(response.vehicle, VehicleMatch::NotRegistered);
        assert_eq!(scans(&conn).await[0].is_match, "Not Registered");
    }

    #[tokio::test]
    async fn unreadable_plate_still_logs_and_reports_raw() {
        let ocr = Arc::new(StubOcr::new(&[(0.0, "12", 0.4), (1.0, "34", 0.3)]));
        let (detector, conn) = detector(ocr);

        let response = detector.detect(&png_bytes(1)).await.unwrap();
        assert_eq!(response.plate, None);
        assert_eq!(response.vehicle, VehicleMatch::Unreadable);
        assert_eq!(response.raw.len(), 2);

        let scans = scans(&conn).await;
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].plate_text, "PLATE UNREADABLE");
        assert_eq!(scans[0].is_match, "Not Registered");
    }

    #[tokio::test]
    async fn cache_hit_skips_whole_pipeline() {
        let ocr = Arc::new(StubOcr::new(&[
            (0.0, "B", 0.9),
            (1.0, "1234", 0.9),
            (2.0, "XYZ", 0.9),
        ]));
        let (detector, conn) = detector(ocr.clone());

        let first = detector.detect(&png_bytes(1)).await.unwrap();
        let second = detector.detect(&png_bytes(1)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(ocr.calls(), 1);
        assert_eq!(scans(&conn).await.len(), 1);

        detector.detect(&png_bytes(2)).await.unwrap();
        assert_eq!(ocr.calls(), 2);
        assert_eq!(scans(&conn).await.len(), 2);
    }

    #[tokio::test]
    async fn unreadable_results_are_cached_too() {
        let ocr = Arc::new(StubOcr::new(&[]));
        let (detector, _) = detector(ocr.clone());
        detector.detect(&png_bytes(3)).await.unwrap();
        detector.detect(&png_bytes(3)).await.unwrap();
        assert_eq!(ocr.calls(), 1);
    }

    #[tokio::test]
    async fn bad_input_never_reaches_ocr() {
        let ocr = Arc::new(StubOcr::new(&[]));
        let (detector, conn) = detector(ocr.clone());

        match detector.detect(&[]).await {
            Err(DetectError::EmptyImage) => {}
            other => panic!("expected EmptyImage, got {:?}", other),
        }
        match detector.detect(b"definitely not an image").await {
            Err(DetectError::InvalidImage(_)) => {}
            other => panic!("expected InvalidImage, got {:?}", other),
        }
        assert_eq!(ocr.calls(), 0);
        assert!(scans(&conn).await.is_empty());
    }

    #[tokio::test]
    async fn ocr_failure_is_internal_and_not_cached() {
        let (detector, conn) = detector(Arc::new(BrokenOcr));
        for _ in 0..2 {
            match detector.detect(&png_bytes(1)).await {
                Err(e @ DetectError::Internal(_)) => {
                    assert_eq!(e.to_string(), "Internal server error")
                }
                other => panic!("expected Internal, got {:?}", other),
            }
        }
        assert!(scans(&conn).await.is_empty());
    }

    #[tokio::test]
    async fn registry_failure_is_internal_and_not_cached() {
        let ocr = Arc::new(StubOcr::new(&[
            (0.0, "B", 0.9),
            (1.0, "1234", 0.9),
            (2.0, "XYZ", 0.9),
        ]));
        let (detector, conn) = detector(ocr.clone());
        conn.lock()
            .await
            .execute("DROP TABLE vehicle", rusqlite::NO_PARAMS)
            .unwrap();

        for _ in 0..2 {
            match detector.detect(&png_bytes(5)).await {
                Err(e @ DetectError::Internal(_)) => {
                    assert_eq!(e.to_string(), "Internal server error")
                }
                other => panic!("expected Internal, got {:?}", other),
            }
        }
        assert_eq!(ocr.calls(), 2);
        assert!(scans(&conn).await.is_empty());
    }
}
