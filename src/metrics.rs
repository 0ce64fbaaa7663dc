//! Request counters for the compressor service

use crate::request::TransformKind;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Global metrics collector
#[derive(Debug, Default)]
pub struct Metrics {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub total_latency_ms: AtomicU64,

    // Per-operation counters
    pub image_transform_count: AtomicU64,
    pub animated_compress_count: AtomicU64,
    pub video_compress_count: AtomicU64,
    pub video_crop_count: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, op: &str, success: bool, latency_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);

        let counter = match op {
            op if op == TransformKind::ImageResize.op() => &self.image_transform_count,
            op if op == TransformKind::AnimatedResize.op() => &self.animated_compress_count,
            op if op == TransformKind::VideoCompress.op() => &self.video_compress_count,
            op if op == TransformKind::VideoCrop.op() => &self.video_crop_count,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            error_rate: if total > 0 { failed as f64 / total as f64 } else { 0.0 },
            avg_latency_ms: if total > 0 { total_latency / total } else { 0 },
            operations: OperationMetrics {
                image_transform: self.image_transform_count.load(Ordering::Relaxed),
                image_compress_animated: self.animated_compress_count.load(Ordering::Relaxed),
                video_compress: self.video_compress_count.load(Ordering::Relaxed),
                video_crop: self.video_crop_count.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
    pub avg_latency_ms: u64,
    pub operations: OperationMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub image_transform: u64,
    pub image_compress_animated: u64,
    pub video_compress: u64,
    pub video_crop: u64,
}

/// Timer for tracking operation latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
