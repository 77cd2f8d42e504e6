//! Metric types and the Prometheus text exposition.
//!
//! The collection pipeline emits plain [`Sample`] tuples; this module
//! owns turning them into exposition-format text (version 0.0.4) and
//! keeps the process-lifetime scan duration histogram. The sink is an
//! explicit object constructed once in `main` and shared by reference,
//! rather than a process-global registry.

use std::fmt::Write;
use std::sync::Mutex;
use std::time::Duration;

/// Which of the two metric families a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// `ata_smart_value`: the vendor-scaled 0-255(ish) health indicator.
    Normalized,
    /// `ata_smart_raw_value`: the decoded physical quantity.
    Raw,
}

/// One decoded metric with its full label set.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub kind: SampleKind,
    pub dev: String,
    pub serial: String,
    pub model: String,
    pub family: String,
    pub attr_id: u8,
    pub attr_name: String,
    pub value: f64,
}

const DURATION_BUCKET_COUNT: usize = 10;

/// Histogram of per-device scan durations.
///
/// Ten exponential buckets starting at 10 ms, doubling each step, with
/// the usual implicit +Inf bucket. Counts accumulate for the lifetime of
/// the process, like any Prometheus histogram.
#[derive(Debug)]
struct DurationHistogram {
    bounds: [f64; DURATION_BUCKET_COUNT],
    counts: [u64; DURATION_BUCKET_COUNT],
    sum: f64,
    total: u64,
}

impl DurationHistogram {
    fn new() -> Self {
        let mut bounds = [0.0; DURATION_BUCKET_COUNT];
        let mut bound = 0.01;
        for b in &mut bounds {
            *b = bound;
            bound *= 2.0;
        }
        Self {
            bounds,
            counts: [0; DURATION_BUCKET_COUNT],
            sum: 0.0,
            total: 0,
        }
    }

    fn observe(&mut self, seconds: f64) {
        for (bound, count) in self.bounds.iter().zip(self.counts.iter_mut()) {
            if seconds <= *bound {
                *count += 1;
            }
        }
        self.sum += seconds;
        self.total += 1;
    }
}

/// Shared sink for everything the exporter publishes.
///
/// Scan tasks on the blocking pool record durations concurrently; the
/// mutex is held only for the few loads and stores of one observation.
#[derive(Debug)]
pub struct MetricSink {
    durations: Mutex<DurationHistogram>,
}

const VALUE_HELP: &str = "ATA SMART normalized value";
const RAW_VALUE_HELP: &str = "ATA SMART raw decoded value";
const DURATION_NAME: &str = "ata_smart_collector_duration_seconds";

impl MetricSink {
    pub fn new() -> Self {
        Self {
            durations: Mutex::new(DurationHistogram::new()),
        }
    }

    /// Records how long one device scan took, success or not.
    pub fn observe_scan(&self, elapsed: Duration) {
        let mut durations = self.durations.lock().expect("duration histogram poisoned");
        durations.observe(elapsed.as_secs_f64());
    }

    /// Renders one scrape: the samples of the current collection pass
    /// plus the accumulated duration histogram.
    pub fn render(&self, samples: &[Sample]) -> String {
        let mut out = String::new();

        out.push_str("# HELP ata_smart_value ");
        out.push_str(VALUE_HELP);
        out.push_str("\n# TYPE ata_smart_value untyped\n");
        for sample in samples.iter().filter(|s| s.kind == SampleKind::Normalized) {
            write_sample(&mut out, "ata_smart_value", sample);
        }

        out.push_str("# HELP ata_smart_raw_value ");
        out.push_str(RAW_VALUE_HELP);
        out.push_str("\n# TYPE ata_smart_raw_value untyped\n");
        for sample in samples.iter().filter(|s| s.kind == SampleKind::Raw) {
            write_sample(&mut out, "ata_smart_raw_value", sample);
        }

        let durations = self.durations.lock().expect("duration histogram poisoned");
        let _ = write!(
            out,
            "# HELP {DURATION_NAME} Duration of one device scan\n# TYPE {DURATION_NAME} histogram\n"
        );
        for (bound, count) in durations.bounds.iter().zip(durations.counts.iter()) {
            let _ = writeln!(out, "{DURATION_NAME}_bucket{{le=\"{bound}\"}} {count}");
        }
        let _ = writeln!(
            out,
            "{DURATION_NAME}_bucket{{le=\"+Inf\"}} {}",
            durations.total
        );
        let _ = writeln!(out, "{DURATION_NAME}_sum {}", durations.sum);
        let _ = writeln!(out, "{DURATION_NAME}_count {}", durations.total);

        out
    }
}

impl Default for MetricSink {
    fn default() -> Self {
        Self::new()
    }
}

fn write_sample(out: &mut String, name: &str, sample: &Sample) {
    let _ = writeln!(
        out,
        "{name}{{dev=\"{}\",serial=\"{}\",model=\"{}\",family=\"{}\",attr_id=\"{}\",attr_name=\"{}\"}} {}",
        escape(&sample.dev),
        escape(&sample.serial),
        escape(&sample.model),
        escape(&sample.family),
        sample.attr_id,
        escape(&sample.attr_name),
        sample.value,
    );
}

/// Label value escaping per the exposition format: backslash, double
/// quote and newline.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: SampleKind, attr_id: u8, value: f64) -> Sample {
        Sample {
            kind,
            dev: "sda".to_owned(),
            serial: "S3R14L".to_owned(),
            model: "ST4000DM004".to_owned(),
            family: "Seagate Barracuda".to_owned(),
            attr_id,
            attr_name: "Temperature_Celsius".to_owned(),
            value,
        }
    }

    #[test]
    fn renders_both_families_with_labels() {
        let sink = MetricSink::new();
        let text = sink.render(&[
            sample(SampleKind::Normalized, 194, 100.0),
            sample(SampleKind::Raw, 194, 31.0),
        ]);

        assert!(text.contains(
            "ata_smart_value{dev=\"sda\",serial=\"S3R14L\",model=\"ST4000DM004\",\
             family=\"Seagate Barracuda\",attr_id=\"194\",attr_name=\"Temperature_Celsius\"} 100"
        ));
        assert!(text.contains("ata_smart_raw_value{dev=\"sda\""));
        assert!(text.contains("# TYPE ata_smart_value untyped"));
        assert!(text.contains("# TYPE ata_smart_raw_value untyped"));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let sink = MetricSink::new();
        sink.observe_scan(Duration::from_millis(5)); // first bucket
        sink.observe_scan(Duration::from_millis(150)); // 0.16 bucket
        sink.observe_scan(Duration::from_secs(60)); // beyond all bounds

        let text = sink.render(&[]);
        assert!(text.contains("ata_smart_collector_duration_seconds_bucket{le=\"0.01\"} 1"));
        assert!(text.contains("ata_smart_collector_duration_seconds_bucket{le=\"0.16\"} 2"));
        assert!(text.contains("ata_smart_collector_duration_seconds_bucket{le=\"5.12\"} 2"));
        assert!(text.contains("ata_smart_collector_duration_seconds_bucket{le=\"+Inf\"} 3"));
        assert!(text.contains("ata_smart_collector_duration_seconds_count 3"));
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape(r#"a"b\c"#), r#"a\"b\\c"#);
        assert_eq!(escape("line\nbreak"), "line\\nbreak");
    }
}
