use metrics::Label;

const SMALLEST_VALID_PAYLOAD: &[u8] = b"a:0|c\n";

/// Smallest maximum payload length that still allows a metric to be written.
pub(crate) const MIN_PAYLOAD_LEN: usize = SMALLEST_VALID_PAYLOAD.len();

// Bytes that would break the line protocol if they showed up verbatim in a metric name or tag. Newlines are always
// replaced, regardless of the set used.
const NAME_RESERVED: &[u8] = b":|@#,";
const DATADOG_TAG_KEY_RESERVED: &[u8] = b":|,#";
const DATADOG_TAG_VALUE_RESERVED: &[u8] = b"|,#";
const TELEGRAF_TAG_RESERVED: &[u8] = b":|,#=";

/// Tag format used when rendering metrics.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TagFormat {
    /// Datadog-style tags, appended after the metric type: `name:1|c|#env:prod,canary`.
    #[default]
    Datadog,

    /// Telegraf-style tags, appended to the metric name: `name,env=prod,canary:1|c`.
    Telegraf,
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum MetricType {
    Counter,
    Gauge,
    Timing,
    Histogram,
    Distribution,
}

impl MetricType {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            MetricType::Counter => b"|c",
            MetricType::Gauge => b"|g",
            MetricType::Timing => b"|ms",
            MetricType::Histogram => b"|h",
            MetricType::Distribution => b"|d",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum MetricValue {
    Integer(i64),
    Unsigned(u64),
    FloatingPoint(f64),
}

struct MetricValueFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
}

impl MetricValueFormatter {
    fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new() }
    }

    fn format(&mut self, value: MetricValue) -> &str {
        match value {
            MetricValue::Integer(v) => self.int_writer.format(v),
            MetricValue::Unsigned(v) => self.int_writer.format(v),
            MetricValue::FloatingPoint(v) => self.float_writer.format(v),
        }
    }
}

/// Renders individual metrics into StatsD lines.
///
/// Every metric is rendered on its own: there is no batching of multiple metrics into a single payload. The buffer is
/// reused between writes, so a rendered line is only valid until the next call to [`LineWriter::write`].
///
/// When `with_length_prefix` is `true`, each line is prefixed with its length as a 4-byte little-endian integer, which
/// is required by stream-oriented Unix domain sockets. The prefix does not count towards the payload length.
pub(crate) struct LineWriter {
    max_payload_len: usize,
    buf: Vec<u8>,
    with_length_prefix: bool,
    prefix: Option<String>,
    suffix: Option<String>,
    global_tags: Vec<Label>,
    tag_format: TagFormat,
    formatter: MetricValueFormatter,
}

impl LineWriter {
    /// Creates a new `LineWriter` with the given maximum payload length.
    pub fn new(max_payload_len: usize, with_length_prefix: bool) -> Self {
        // NOTE: This is validated by the builder as well, but we want to double check that we're getting a properly
        // sanitized value.
        assert!(
            u32::try_from(max_payload_len).is_ok(),
            "maximum payload length must be less than 2^32 bytes"
        );
        assert!(
            max_payload_len >= MIN_PAYLOAD_LEN,
            "maximum payload length is too small to allow any metrics to be written (must be {MIN_PAYLOAD_LEN} or greater)"
        );

        Self {
            max_payload_len,
            buf: Vec::new(),
            with_length_prefix,
            prefix: None,
            suffix: None,
            global_tags: Vec::new(),
            tag_format: TagFormat::Datadog,
            formatter: MetricValueFormatter::new(),
        }
    }

    /// Sets the prefix prepended, with a `.` separator, to every metric name.
    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    /// Sets the suffix appended, with a `.` separator, to every metric name.
    pub fn with_suffix(mut self, suffix: Option<String>) -> Self {
        self.suffix = suffix.filter(|s| !s.is_empty());
        self
    }

    /// Sets the global tags to apply to all metrics, after any per-metric tags.
    pub fn with_global_tags(mut self, global_tags: &[Label]) -> Self {
        self.global_tags = global_tags.to_vec();
        self
    }

    pub fn with_tag_format(mut self, tag_format: TagFormat) -> Self {
        self.tag_format = tag_format;
        self
    }

    /// Renders a single metric.
    ///
    /// Returns the rendered payload, or `None` if the metric would exceed the maximum payload length, in which case it
    /// must be dropped.
    pub fn write(
        &mut self,
        name: &str,
        value: MetricValue,
        metric_type: MetricType,
        tags: &[Label],
    ) -> Option<&[u8]> {
        self.buf.clear();

        if self.with_length_prefix {
            // Written as zero for now, and filled in once we know the length of the line.
            self.buf.extend_from_slice(&[0, 0, 0, 0]);
        }

        if let Some(prefix) = &self.prefix {
            write_sanitized(&mut self.buf, prefix, NAME_RESERVED);
            self.buf.push(b'.');
        }

        write_sanitized(&mut self.buf, name, NAME_RESERVED);

        if let Some(suffix) = &self.suffix {
            self.buf.push(b'.');
            write_sanitized(&mut self.buf, suffix, NAME_RESERVED);
        }

        if self.tag_format == TagFormat::Telegraf {
            for tag in tags.iter().chain(self.global_tags.iter()) {
                self.buf.push(b',');
                write_telegraf_tag(&mut self.buf, tag);
            }
        }

        self.buf.push(b':');
        self.buf.extend_from_slice(self.formatter.format(value).as_bytes());
        self.buf.extend_from_slice(metric_type.as_bytes());

        if self.tag_format == TagFormat::Datadog {
            let mut wrote_tag = false;
            for tag in tags.iter().chain(self.global_tags.iter()) {
                // If we haven't written a tag yet, write out the tags prefix first.
                //
                // Otherwise, write a tag separator.
                if wrote_tag {
                    self.buf.push(b',');
                } else {
                    self.buf.extend_from_slice(b"|#");
                    wrote_tag = true;
                }

                write_datadog_tag(&mut self.buf, tag);
            }
        }

        self.buf.push(b'\n');

        let prefix_len = if self.with_length_prefix { 4 } else { 0 };
        let payload_len = self.buf.len() - prefix_len;
        if payload_len > self.max_payload_len {
            self.buf.clear();
            return None;
        }

        if self.with_length_prefix {
            // NOTE: We unwrap the conversion here because `self.max_payload_len` is less than 2^32, and we just checked
            // that the payload is no longer than that.
            let len_buf = u32::try_from(payload_len).unwrap().to_le_bytes();
            self.buf[..4].copy_from_slice(&len_buf[..]);
        }

        Some(&self.buf)
    }
}

fn write_sanitized(buf: &mut Vec<u8>, s: &str, reserved: &[u8]) {
    // All reserved bytes are ASCII, so swapping them out byte-by-byte keeps the string valid UTF-8.
    buf.extend(s.as_bytes().iter().map(|&b| {
        if b == b'\n' || b == b'\r' || reserved.contains(&b) {
            b'_'
        } else {
            b
        }
    }));
}

fn write_datadog_tag(buf: &mut Vec<u8>, label: &Label) {
    // If the label value is empty, we treat it as a bare tag. This means all we write is something like `tag_name`,
    // instead of a more naive form, like `tag_name:`.
    write_sanitized(buf, label.key(), DATADOG_TAG_KEY_RESERVED);
    if label.value().is_empty() {
        return;
    }

    buf.push(b':');
    write_sanitized(buf, label.value(), DATADOG_TAG_VALUE_RESERVED);
}

fn write_telegraf_tag(buf: &mut Vec<u8>, label: &Label) {
    write_sanitized(buf, label.key(), TELEGRAF_TAG_RESERVED);
    if label.value().is_empty() {
        return;
    }

    buf.push(b'=');
    write_sanitized(buf, label.value(), TELEGRAF_TAG_RESERVED);
}
