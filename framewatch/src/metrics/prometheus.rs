//! Prometheus metrics exporter.
//!
//! Exports metrics in Prometheus text format.

use std::fmt::Write;
use std::sync::Arc;

use super::recorder::{FrameCountSample, MetricsRecorder};

/// Prometheus metrics exporter.
pub struct PrometheusExporter {
    recorder: Arc<MetricsRecorder>,
    namespace: String,
}

impl PrometheusExporter {
    /// Create a new Prometheus exporter.
    pub fn new(recorder: Arc<MetricsRecorder>) -> Self {
        Self {
            recorder,
            namespace: "framewatch".to_string(),
        }
    }

    /// Create a new Prometheus exporter with custom namespace.
    pub fn with_namespace(recorder: Arc<MetricsRecorder>, namespace: impl Into<String>) -> Self {
        Self {
            recorder,
            namespace: namespace.into(),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn export(&self) -> String {
        let snapshot = self.recorder.snapshot();
        let mut output = String::new();

        // Frame classification
        let statuses: [(&str, &str, fn(&FrameCountSample) -> u64); 3] = [
            ("frames_ok_total", "Frames classified ok", |s| s.ok),
            ("frames_black_total", "Frames classified black", |s| s.black),
            ("frames_corrupt_total", "Frames that failed to decode", |s| s.corrupt),
        ];
        for (name, help, value) in statuses {
            self.write_header(&mut output, name, help, "counter");
            for sample in &snapshot.frames {
                self.write_sample(
                    &mut output,
                    name,
                    value(sample) as f64,
                    &[
                        ("feed_id", &sample.feed_id),
                        ("stream_id", &sample.stream_id),
                        ("quality", sample.quality.as_str()),
                    ],
                );
            }
        }

        // Stream freshness and freeze state
        self.write_header(
            &mut output,
            "latest_timestamp_seconds",
            "Timestamp of the most recent frame",
            "gauge",
        );
        for stream in &snapshot.streams {
            self.write_sample(
                &mut output,
                "latest_timestamp_seconds",
                stream.latest_timestamp_seconds,
                &stream_labels(&stream.feed_id, &stream.stream_id),
            );
        }

        self.write_header(
            &mut output,
            "freeze_total",
            "Frames that repeated the previous frame",
            "counter",
        );
        for stream in &snapshot.streams {
            self.write_sample(
                &mut output,
                "freeze_total",
                stream.freeze_total as f64,
                &stream_labels(&stream.feed_id, &stream.stream_id),
            );
        }

        self.write_header(
            &mut output,
            "freeze_active",
            "Whether the stream is currently frozen",
            "gauge",
        );
        for stream in &snapshot.streams {
            self.write_sample(
                &mut output,
                "freeze_active",
                if stream.freeze_active { 1.0 } else { 0.0 },
                &stream_labels(&stream.feed_id, &stream.stream_id),
            );
        }

        self.write_header(
            &mut output,
            "freeze_duration_seconds",
            "Duration of completed freeze episodes",
            "histogram",
        );
        for stream in &snapshot.streams {
            let labels = stream_labels(&stream.feed_id, &stream.stream_id);
            let histogram = &stream.freeze_duration;
            for (le, count) in &histogram.buckets {
                let le = le.to_string();
                let mut bucket_labels = labels.to_vec();
                bucket_labels.push(("le", le.as_str()));
                self.write_sample(
                    &mut output,
                    "freeze_duration_seconds_bucket",
                    *count as f64,
                    &bucket_labels,
                );
            }
            let mut inf_labels = labels.to_vec();
            inf_labels.push(("le", "+Inf"));
            self.write_sample(
                &mut output,
                "freeze_duration_seconds_bucket",
                histogram.count as f64,
                &inf_labels,
            );
            self.write_sample(&mut output, "freeze_duration_seconds_sum", histogram.sum, &labels);
            self.write_sample(
                &mut output,
                "freeze_duration_seconds_count",
                histogram.count as f64,
                &labels,
            );
        }

        // Alert delivery
        self.write_counter(
            &mut output,
            "alerts_sent_total",
            "Alerts delivered",
            snapshot.alerts_sent_total as f64,
        );
        self.write_counter(
            &mut output,
            "alerts_failed_total",
            "Alerts that exhausted their retries",
            snapshot.alerts_failed_total as f64,
        );
        self.write_counter(
            &mut output,
            "alerts_dropped_total",
            "Alerts dropped because the queue was full",
            snapshot.alerts_dropped_total as f64,
        );

        output
    }

    fn write_header(&self, output: &mut String, name: &str, help: &str, kind: &str) {
        let full_name = format!("{}_{}", self.namespace, name);
        let _ = writeln!(output, "# HELP {} {}", full_name, help);
        let _ = writeln!(output, "# TYPE {} {}", full_name, kind);
    }

    fn write_sample(&self, output: &mut String, name: &str, value: f64, labels: &[(&str, &str)]) {
        let full_name = format!("{}_{}", self.namespace, name);
        if labels.is_empty() {
            let _ = writeln!(output, "{} {}", full_name, value);
            return;
        }

        let labels_str = labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
            .collect::<Vec<_>>()
            .join(",");

        let _ = writeln!(output, "{}{{{}}} {}", full_name, labels_str, value);
    }

    fn write_counter(&self, output: &mut String, name: &str, help: &str, value: f64) {
        self.write_header(output, name, help, "counter");
        self.write_sample(output, name, value, &[]);
    }
}

fn stream_labels<'a>(feed_id: &'a str, stream_id: &'a str) -> [(&'static str, &'a str); 2] {
    [("feed_id", feed_id), ("stream_id", stream_id)]
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
